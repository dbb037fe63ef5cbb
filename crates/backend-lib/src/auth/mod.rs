// ============================
// crates/backend-lib/src/auth/mod.rs
// ============================
//! Authentication module.
//!
//! Bearer tokens are verified here; issuing them after a credential check is
//! the identity provider's job.

mod service;
pub mod token;

pub use service::{AuthService, AuthUser};
pub use token::{Claims, JwtAuth};
