use chrono::Utc;
use common::storage::BlobStore;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, TransactionSession,
    TransactionTrait,
};
use tracing::{info, warn};

use super::{Actor, documents, page_offset};
use crate::entity::{document, user};
use crate::error::AppError;
use crate::utils::hash::PasswordHasher;

/// Profile fields a user (or an admin on their behalf) may edit.
#[derive(Debug, Default, Clone)]
pub struct ProfileChanges {
    pub display_name: Option<String>,
    pub email: Option<String>,
}

/// Canonical form used for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn is_unique_violation(e: &DbErr) -> bool {
    matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

/// User records: creation, credential checks and admin-gated mutations.
pub struct UserDirectory<'a, C: ConnectionTrait + TransactionTrait> {
    conn: &'a C,
    hasher: PasswordHasher,
    blobs: &'a dyn BlobStore,
}

impl<'a, C: ConnectionTrait + TransactionTrait> UserDirectory<'a, C> {
    pub fn new(conn: &'a C, hasher: PasswordHasher, blobs: &'a dyn BlobStore) -> Self {
        Self {
            conn,
            hasher,
            blobs,
        }
    }

    async fn hash_password(&self, plaintext: &str) -> Result<String, AppError> {
        let hasher = self.hasher;
        let plaintext = plaintext.to_owned();
        tokio::task::spawn_blocking(move || hasher.hash(&plaintext))
            .await
            .map_err(|e| AppError::Internal(format!("hash task failed: {e}")))?
            .map_err(AppError::from)
    }

    async fn verify_password(&self, plaintext: &str, credential: &str) -> Result<bool, AppError> {
        let hasher = self.hasher;
        let plaintext = plaintext.to_owned();
        let credential = credential.to_owned();
        tokio::task::spawn_blocking(move || hasher.verify(&plaintext, &credential))
            .await
            .map_err(|e| AppError::Internal(format!("verify task failed: {e}")))
    }

    pub async fn find(&self, id: i32) -> Result<Option<user::Model>, DbErr> {
        user::Entity::find_by_id(id).one(self.conn).await
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<user::Model>, DbErr> {
        user::Entity::find()
            .filter(user::Column::Email.eq(normalize_email(email)))
            .one(self.conn)
            .await
    }

    /// Fetch a user or fail with `NotFound`.
    pub async fn get(&self, id: i32) -> Result<user::Model, AppError> {
        self.find(id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".into()))
    }

    /// Register a password-authenticated account.
    pub async fn create_local(
        &self,
        email: &str,
        display_name: &str,
        password: &str,
    ) -> Result<user::Model, AppError> {
        let email = normalize_email(email);
        if self.find_by_email(&email).await?.is_some() {
            return Err(AppError::EmailTaken);
        }

        let password_hash = self.hash_password(password).await?;
        let now = Utc::now();
        let model = user::ActiveModel {
            email: Set(email),
            display_name: Set(display_name.trim().to_string()),
            password_hash: Set(Some(password_hash)),
            is_active: Set(true),
            is_admin: Set(false),
            external_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            last_login_at: Set(None),
            ..Default::default()
        };

        let user = model.insert(self.conn).await.map_err(|e| {
            if is_unique_violation(&e) {
                tracing::debug!("Registration race: unique constraint caught on insert");
                AppError::EmailTaken
            } else {
                AppError::from(e)
            }
        })?;

        info!(user_id = user.id, "Created local user");
        Ok(user)
    }

    /// Resolve an externally-authenticated identity to a local account.
    ///
    /// Looks up by external subject first, then links an existing account with
    /// the same email, and otherwise creates a password-less account. Every
    /// path stamps `last_login_at`.
    pub async fn create_from_external_identity(
        &self,
        email: &str,
        display_name: &str,
        external_id: &str,
    ) -> Result<user::Model, AppError> {
        let email = normalize_email(email);
        let display_name = display_name.trim();
        let now = Utc::now();

        let by_subject = user::Entity::find()
            .filter(user::Column::ExternalId.eq(external_id))
            .one(self.conn)
            .await?;

        if let Some(existing) = by_subject {
            if !existing.is_active {
                return Err(AppError::AccountInactive);
            }
            let mut active = existing.into_active_model();
            if !display_name.is_empty() {
                active.display_name = Set(display_name.to_string());
            }
            active.last_login_at = Set(Some(now));
            active.updated_at = Set(now);
            return Ok(active.update(self.conn).await?);
        }

        if let Some(existing) = self.find_by_email(&email).await? {
            if existing.external_id.is_some() {
                warn!(
                    user_id = existing.id,
                    "External login for an email linked to a different identity"
                );
                return Err(AppError::Conflict(
                    "Email is linked to another external identity".into(),
                ));
            }
            if !existing.is_active {
                return Err(AppError::AccountInactive);
            }
            let user_id = existing.id;
            let mut active = existing.into_active_model();
            active.external_id = Set(Some(external_id.to_string()));
            active.last_login_at = Set(Some(now));
            active.updated_at = Set(now);
            let user = active.update(self.conn).await?;
            info!(user_id, "Linked external identity to existing user");
            return Ok(user);
        }

        let name = if display_name.is_empty() {
            email.split('@').next().unwrap_or_default().to_string()
        } else {
            display_name.to_string()
        };
        let model = user::ActiveModel {
            email: Set(email),
            display_name: Set(name),
            password_hash: Set(None),
            is_active: Set(true),
            is_admin: Set(false),
            external_id: Set(Some(external_id.to_string())),
            created_at: Set(now),
            updated_at: Set(now),
            last_login_at: Set(Some(now)),
            ..Default::default()
        };
        let user = model.insert(self.conn).await.map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict("Concurrent external login, please retry".into())
            } else {
                AppError::from(e)
            }
        })?;

        info!(user_id = user.id, "Created user from external identity");
        Ok(user)
    }

    /// Check an email/password pair.
    ///
    /// Unknown email, missing password and wrong password all fail with the
    /// same `InvalidCredentials`. The inactive check runs only after the
    /// password matched, so it does not reveal which accounts exist.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<user::Model, AppError> {
        let user = self
            .find_by_email(email)
            .await?
            .ok_or(AppError::InvalidCredentials)?;

        let Some(credential) = user.password_hash.as_deref() else {
            return Err(AppError::InvalidCredentials);
        };
        if !self.verify_password(password, credential).await? {
            return Err(AppError::InvalidCredentials);
        }
        if !user.is_active {
            return Err(AppError::AccountInactive);
        }

        let now = Utc::now();
        let mut active = user.into_active_model();
        active.last_login_at = Set(Some(now));
        Ok(active.update(self.conn).await?)
    }

    /// Page through all users ordered by id. Admin only.
    pub async fn list(
        &self,
        actor: Actor,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<user::Model>, u64), AppError> {
        actor.require_admin()?;

        let query = user::Entity::find();
        let total = query.clone().count(self.conn).await?;
        let users = query
            .order_by_asc(user::Column::Id)
            .offset(page_offset(page, per_page))
            .limit(per_page)
            .all(self.conn)
            .await?;

        Ok((users, total))
    }

    /// Edit display name and/or email. Self or admin.
    pub async fn update_profile(
        &self,
        actor: Actor,
        user_id: i32,
        changes: ProfileChanges,
    ) -> Result<user::Model, AppError> {
        if !actor.can_manage(user_id) {
            return Err(AppError::PermissionDenied);
        }
        let user = self.get(user_id).await?;
        self.write_profile(user, changes, None).await
    }

    /// Apply profile changes and an optional new credential in a single row update.
    async fn write_profile(
        &self,
        user: user::Model,
        changes: ProfileChanges,
        password_hash: Option<String>,
    ) -> Result<user::Model, AppError> {
        let mut active = user.clone().into_active_model();

        if let Some(name) = changes.display_name {
            active.display_name = Set(name.trim().to_string());
        }
        if let Some(email) = changes.email {
            let email = normalize_email(&email);
            if email != user.email {
                if self.find_by_email(&email).await?.is_some() {
                    return Err(AppError::EmailTaken);
                }
                active.email = Set(email);
            }
        }
        if let Some(hash) = password_hash {
            active.password_hash = Set(Some(hash));
        }
        active.updated_at = Set(Utc::now());

        active.update(self.conn).await.map_err(|e| {
            if is_unique_violation(&e) {
                AppError::EmailTaken
            } else {
                AppError::from(e)
            }
        })
    }

    /// Change one's own password.
    ///
    /// Accounts that already have a password must present it. Accounts created
    /// from an external identity may set their first password without one.
    pub async fn change_password(
        &self,
        user_id: i32,
        current: Option<&str>,
        new_password: &str,
    ) -> Result<(), AppError> {
        let user = self.get(user_id).await?;

        if let Some(credential) = user.password_hash.as_deref() {
            let current = current.ok_or(AppError::InvalidCredentials)?;
            if !self.verify_password(current, credential).await? {
                return Err(AppError::InvalidCredentials);
            }
        }

        self.store_password(user, new_password).await?;
        info!(user_id, "Password changed");
        Ok(())
    }

    /// Edit a user's profile and optionally reset their password. Admin only.
    ///
    /// The new password is hashed before anything is written, so either every
    /// change lands or none does.
    pub async fn update_user(
        &self,
        actor: Actor,
        user_id: i32,
        changes: ProfileChanges,
        new_password: Option<&str>,
    ) -> Result<user::Model, AppError> {
        actor.require_admin()?;
        let user = self.get(user_id).await?;

        let password_hash = match new_password {
            Some(password) => Some(self.hash_password(password).await?),
            None => None,
        };
        let reset = password_hash.is_some();
        let user = self.write_profile(user, changes, password_hash).await?;

        info!(
            user_id,
            admin_id = actor.user_id,
            password_reset = reset,
            "User updated by admin"
        );
        Ok(user)
    }

    /// Overwrite a user's password outside any request, for operator tooling.
    pub async fn set_password(&self, user_id: i32, new_password: &str) -> Result<(), AppError> {
        let user = self.get(user_id).await?;
        self.store_password(user, new_password).await?;
        info!(user_id, "Password set by operator");
        Ok(())
    }

    async fn store_password(&self, user: user::Model, new_password: &str) -> Result<(), AppError> {
        let hash = self.hash_password(new_password).await?;
        let mut active = user.into_active_model();
        active.password_hash = Set(Some(hash));
        active.updated_at = Set(Utc::now());
        active.update(self.conn).await?;
        Ok(())
    }

    /// Grant or revoke admin. An admin cannot revoke their own flag.
    pub async fn set_admin(
        &self,
        actor: Actor,
        user_id: i32,
        is_admin: bool,
    ) -> Result<user::Model, AppError> {
        actor.require_admin()?;
        if actor.user_id == user_id && !is_admin {
            return Err(AppError::ProtectedAccount);
        }

        let user = self.get(user_id).await?;
        let mut active = user.into_active_model();
        active.is_admin = Set(is_admin);
        active.updated_at = Set(Utc::now());
        let user = active.update(self.conn).await?;

        info!(user_id, admin_id = actor.user_id, is_admin, "Admin flag changed");
        Ok(user)
    }

    /// Grant admin outside any request, for operator tooling and startup bootstrap.
    pub async fn promote_to_admin(&self, user_id: i32) -> Result<user::Model, AppError> {
        let user = self.get(user_id).await?;
        if user.is_admin && user.is_active {
            return Ok(user);
        }
        let mut active = user.into_active_model();
        active.is_admin = Set(true);
        active.is_active = Set(true);
        active.updated_at = Set(Utc::now());
        let user = active.update(self.conn).await?;

        info!(user_id, "Promoted to admin by operator");
        Ok(user)
    }

    /// Activate or deactivate an account. Admin accounts cannot be deactivated.
    pub async fn set_active(
        &self,
        actor: Actor,
        user_id: i32,
        is_active: bool,
    ) -> Result<user::Model, AppError> {
        actor.require_admin()?;

        let user = self.get(user_id).await?;
        if user.is_admin && !is_active {
            return Err(AppError::ProtectedAccount);
        }

        let mut active = user.into_active_model();
        active.is_active = Set(is_active);
        active.updated_at = Set(Utc::now());
        let user = active.update(self.conn).await?;

        info!(user_id, admin_id = actor.user_id, is_active, "Active flag changed");
        Ok(user)
    }

    /// Delete a non-admin user together with all of their documents.
    ///
    /// Blobs are removed first, outside the transaction. The document rows and
    /// the user row are then deleted in one transaction.
    pub async fn delete(&self, actor: Actor, user_id: i32) -> Result<(), AppError> {
        actor.require_admin()?;

        let user = self.get(user_id).await?;
        if user.is_admin {
            return Err(AppError::ProtectedAccount);
        }

        let purged = documents::purge_owner_blobs(self.conn, self.blobs, user_id).await?;

        let txn = self.conn.begin().await?;
        document::Entity::delete_many()
            .filter(document::Column::OwnerId.eq(user_id))
            .exec(&txn)
            .await?;
        user::Entity::delete_by_id(user_id).exec(&txn).await?;
        txn.commit().await?;

        info!(
            user_id,
            admin_id = actor.user_id,
            documents = purged,
            "Deleted user"
        );
        Ok(())
    }
}
