use sea_orm::{ConnectionTrait, TransactionTrait};
use tracing::info;

use crate::entity::user;
use crate::error::AppError;
use crate::models::auth::{validate_display_name, validate_email, validate_password};
use crate::services::UserDirectory;
use crate::state::AppState;

/// Create an account, or reuse the one registered under `email`, optionally making it admin.
///
/// An existing account keeps its password. Returns the account and whether it was created.
pub async fn ensure_account<C: ConnectionTrait + TransactionTrait>(
    users: &UserDirectory<'_, C>,
    email: &str,
    display_name: &str,
    password: &str,
    admin: bool,
) -> Result<(user::Model, bool), AppError> {
    validate_email(email)?;
    validate_display_name(display_name)?;
    validate_password(password)?;

    let (mut account, created) = match users.find_by_email(email).await? {
        Some(existing) => (existing, false),
        None => (
            users.create_local(email, display_name, password).await?,
            true,
        ),
    };

    if admin {
        account = users.promote_to_admin(account.id).await?;
    }
    Ok((account, created))
}

/// Create or promote the admin named in `auth.bootstrap_admin`, if configured.
pub async fn bootstrap_admin(state: &AppState) -> Result<(), AppError> {
    let Some(cfg) = &state.config.auth.bootstrap_admin else {
        return Ok(());
    };

    let (account, created) = ensure_account(
        &state.users(),
        &cfg.email,
        &cfg.display_name,
        &cfg.password,
        true,
    )
    .await?;

    if created {
        info!(user_id = account.id, "Bootstrap admin created");
    } else {
        info!(user_id = account.id, "Bootstrap admin present");
    }
    Ok(())
}
