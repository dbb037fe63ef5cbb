use crate::error::AppError;
use stagescout_common::UserId;

/// The caller a verified bearer token belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: UserId,
}

pub trait AuthService: Send + Sync {
    /// Verify a bearer token and return its user
    fn verify(&self, token: &str) -> Result<AuthUser, AppError>;
    /// Issue a token for `user_id`
    fn issue(&self, user_id: &str) -> Result<String, AppError>;
}
