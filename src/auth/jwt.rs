use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use crate::auth::{AuthConfig, AuthError, AuthResult, Role};

/// Seconds of clock skew tolerated between the admin application and us.
const CLOCK_SKEW_LEEWAY_SECS: u64 = 30;

/// Claims carried by an operator access token.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OperatorClaims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: String,
}

impl OperatorClaims {
    /// Unknown role names resolve to [`Role::User`], which cannot import.
    pub fn role(&self) -> Role {
        Role::from_str(&self.role)
    }
}

#[derive(Debug, Clone)]
pub struct SignedAccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// HS256 operator token verification. Tokens are minted by the admin
/// application with the shared secret; `issue_access_token` exists for the
/// CLI and tests.
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    header: Header,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl JwtService {
    pub fn from_config(config: &AuthConfig) -> AuthResult<Self> {
        if config.access_token_ttl_secs <= 0 {
            log::warn!(
                "access token ttl of {}s yields tokens that are already expired",
                config.access_token_ttl_secs
            );
        }

        let secret = config.jwt_secret.as_bytes();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[&config.audience]);
        validation.set_issuer(&[&config.issuer]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        validation.leeway = CLOCK_SKEW_LEEWAY_SECS;

        let mut header = Header::new(Algorithm::HS256);
        header.kid = config.jwt_kid.clone();

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            header,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            ttl: Duration::seconds(config.access_token_ttl_secs),
        })
    }

    pub fn issue_access_token(
        &self,
        subject: &str,
        email: Option<&str>,
        role: Role,
    ) -> AuthResult<SignedAccessToken> {
        let issued_at = Utc::now();
        let expires_at = issued_at + self.ttl;

        let claims = OperatorClaims {
            sub: subject.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: expires_at.timestamp(),
            iat: issued_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
            email: email.map(str::to_string),
            role: role.as_str().to_string(),
        };

        let token = encode(&self.header, &claims, &self.encoding_key)?;
        Ok(SignedAccessToken { token, expires_at })
    }

    /// Verify signature, issuer, audience and expiry. Expiry is reported
    /// separately so clients know to refresh rather than re-authenticate.
    pub fn decode_access_token(&self, token: &str) -> AuthResult<OperatorClaims> {
        match decode::<OperatorClaims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => Ok(data.claims),
            Err(err) if matches!(err.kind(), ErrorKind::ExpiredSignature) => {
                Err(AuthError::TokenExpired)
            }
            Err(err) => {
                log::debug!("rejected operator token: {}", err);
                Err(AuthError::TokenInvalid)
            }
        }
    }
}
