use rocket::Request;
use rocket::State;
use rocket::request::{FromRequest, Outcome};
use rocket_okapi::r#gen::OpenApiGenerator;
use okapi::openapi3::{Object, SecurityRequirement, SecurityScheme, SecuritySchemeData};
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};

use crate::auth::{AuthError, AuthResult, AuthState, Role};
use crate::import::Actor;

/// Reason the auth guards refused a request, kept in the request-local
/// cache for the error catcher.
#[derive(Debug, Clone, Default)]
pub struct AuthFailure(pub Option<String>);

fn reject<T>(request: &Request<'_>, err: AuthError) -> Outcome<T, AuthError> {
    request.local_cache(|| AuthFailure(Some(err.to_string())));
    Outcome::Error((err.status(), err))
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
    pub role: Role,
}

impl AuthUser {
    pub fn actor(&self) -> Actor {
        Actor::new(self.id.clone(), self.email.clone())
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthUser {
    type Error = AuthError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match extract_user(request).await {
            Ok(user) => Outcome::Success(user),
            Err(err) => reject(request, err),
        }
    }
}

/// An authenticated user whose role permits bulk imports.
#[derive(Debug, Clone)]
pub struct ImportOperator(pub AuthUser);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ImportOperator {
    type Error = AuthError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match AuthUser::from_request(request).await {
            Outcome::Success(user) => {
                if user.role.can_import() {
                    Outcome::Success(ImportOperator(user))
                } else {
                    log::debug!("user {} may not import", user.id);
                    reject(request, AuthError::Forbidden(user.role.as_str().to_string()))
                }
            }
            Outcome::Error(err) => Outcome::Error(err),
            Outcome::Forward(_) => reject(request, AuthError::MissingToken),
        }
    }
}

fn bearer_security() -> RequestHeaderInput {
    let scheme = SecurityScheme {
        description: Some("Operator access token issued by the admin application.".to_owned()),
        data: SecuritySchemeData::Http {
            scheme: "bearer".to_owned(),
            bearer_format: Some("JWT".to_owned()),
        },
        extensions: Object::default(),
    };
    let mut requirement = SecurityRequirement::new();
    requirement.insert("HttpAuth".to_owned(), Vec::new());
    RequestHeaderInput::Security("HttpAuth".to_owned(), scheme, requirement)
}

impl<'r> OpenApiFromRequest<'r> for AuthUser {
    fn from_request_input(
        _gen: &mut OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(bearer_security())
    }
}

impl<'r> OpenApiFromRequest<'r> for ImportOperator {
    fn from_request_input(
        _gen: &mut OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(bearer_security())
    }
}

async fn extract_user(request: &Request<'_>) -> AuthResult<AuthUser> {
    let token = bearer_token_from_request(request)?;

    let auth_state = request
        .guard::<&State<AuthState>>()
        .await
        .succeeded()
        .ok_or_else(|| AuthError::Config("AuthState missing from state".into()))?;

    let claims = auth_state.jwt_service.decode_access_token(token)?;
    if claims.sub.trim().is_empty() {
        return Err(AuthError::TokenInvalid);
    }

    let role = claims.role();
    Ok(AuthUser {
        id: claims.sub,
        email: claims.email,
        role,
    })
}

fn bearer_token_from_request<'a>(request: &'a Request<'_>) -> AuthResult<&'a str> {
    let header = request
        .headers()
        .get_one("Authorization")
        .ok_or(AuthError::MissingToken)?;
    let mut parts = header.splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default().trim();
    if scheme.eq_ignore_ascii_case("Bearer") && !token.is_empty() {
        Ok(token)
    } else {
        Err(AuthError::MissingToken)
    }
}
