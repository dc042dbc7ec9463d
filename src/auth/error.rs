use rocket::http::Status;
use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

/// Why a request could not be attributed to an import operator.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing or malformed bearer token")]
    MissingToken,
    #[error("operator token expired")]
    TokenExpired,
    #[error("operator token invalid")]
    TokenInvalid,
    #[error("role {0} may not import leads")]
    Forbidden(String),
    #[error("auth configuration error: {0}")]
    Config(String),
    #[error("failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

impl AuthError {
    pub fn status(&self) -> Status {
        match self {
            AuthError::MissingToken | AuthError::TokenExpired | AuthError::TokenInvalid => {
                Status::Unauthorized
            }
            AuthError::Forbidden(_) => Status::Forbidden,
            AuthError::Config(_) | AuthError::Signing(_) => Status::InternalServerError,
        }
    }
}
