pub mod documents;
pub mod users;

pub use documents::{Content, DocumentChanges, DocumentRegistry, Upload};
pub use users::{ProfileChanges, UserDirectory};

use crate::entity::user;
use crate::error::AppError;

/// The authenticated principal a service call is made on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: i32,
    pub is_admin: bool,
}

impl Actor {
    /// Owner of the resource, or an admin.
    pub fn can_manage(&self, owner_id: i32) -> bool {
        self.is_admin || self.user_id == owner_id
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin {
            Ok(())
        } else {
            Err(AppError::PermissionDenied)
        }
    }
}

impl From<&user::Model> for Actor {
    fn from(user: &user::Model) -> Self {
        Self {
            user_id: user.id,
            is_admin: user.is_admin,
        }
    }
}

/// Row offset of a 1-based page, saturating at the largest offset SQL accepts.
pub(crate) fn page_offset(page: u64, per_page: u64) -> u64 {
    page.saturating_sub(1)
        .saturating_mul(per_page)
        .min(i64::MAX as u64)
}

/// Trim an optional free-text field, mapping blank to `None` and enforcing a length cap.
pub(crate) fn clean_text(
    value: Option<String>,
    max_chars: usize,
    field: &str,
) -> Result<Option<String>, AppError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > max_chars {
        return Err(AppError::Validation(format!(
            "{field} must be at most {max_chars} characters"
        )));
    }
    Ok(Some(trimmed.to_string()))
}
