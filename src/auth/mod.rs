//! Operator authentication: configuration, token verification and Rocket
//! request guards. Tokens are issued by the admin application; this service
//! only verifies them.

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod guards;
pub mod jwt;
pub mod roles;

pub use config::AuthConfig;
pub use error::{AuthError, AuthResult};
pub use guards::{AuthUser, ImportOperator};
pub use jwt::JwtService;
pub use roles::Role;

/// Managed state shared by the auth guards.
#[derive(Clone)]
pub struct AuthState {
    pub jwt_service: Arc<JwtService>,
}

impl AuthState {
    pub fn from_config(config: AuthConfig) -> AuthResult<Self> {
        log::info!(
            "verifying operator tokens for issuer {} and audience {}",
            config.issuer,
            config.audience
        );
        Ok(Self {
            jwt_service: Arc::new(JwtService::from_config(&config)?),
        })
    }
}
