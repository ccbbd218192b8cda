//! Registration, login and the refresh cookie lifecycle.
//!
//! The refresh token only ever travels in an `HttpOnly` cookie scoped to
//! the auth routes under the configured mount point; the access token is returned in the body and kept in memory by
//! the client.

use super::ApiError;
use crate::{
    api::{
        state::{AuthConfig, AuthState, SessionGrant},
        types::{
            AccessTokenResponse, ErrorResponse, LoginRequest, MeResponse, RegisterRequest,
            RegisterResponse,
        },
    },
    Error,
};
use axum::{
    extract::Extension,
    http::{
        header::{InvalidHeaderValue, AUTHORIZATION, COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{error, instrument, warn};

pub const REFRESH_COOKIE_NAME: &str = "storefront_refresh";

#[utoipa::path(
    post,
    path= "/auth/register",
    request_body = RegisterRequest,
    responses (
        (status = 201, description = "Account created", body = RegisterResponse),
        (status = 400, description = "Invalid email, password or profile", body = ErrorResponse),
        (status = 409, description = "An account with this email already exists", body = ErrorResponse),
    ),
    tag= "auth"
)]
#[instrument(skip_all)]
pub async fn register(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RegisterRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "missing payload"));
    };

    let id = auth_state
        .register(
            &request.email,
            &request.password,
            request.display_name.as_deref(),
            request.country_code.as_deref(),
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse { id: id.to_string() }),
    )
        .into_response())
}

#[utoipa::path(
    post,
    path= "/auth/login",
    request_body = LoginRequest,
    responses (
        (status = 200, description = "Access token issued, refresh cookie set", body = AccessTokenResponse),
        (status = 400, description = "Missing payload", body = ErrorResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
    ),
    tag= "auth"
)]
#[instrument(skip_all)]
pub async fn login(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "missing payload"));
    };

    let identity = auth_state
        .authenticate(&request.email, &request.password)
        .await?;
    let grant = auth_state.open_session(identity.id).await?;

    grant_response(auth_state.config(), grant)
}

#[utoipa::path(
    post,
    path= "/auth/refresh",
    responses (
        (status = 200, description = "Access token reissued, refresh cookie rotated", body = AccessTokenResponse),
        (status = 401, description = "Missing, unknown or expired refresh cookie", body = ErrorResponse),
    ),
    tag= "auth"
)]
#[instrument(skip_all)]
pub async fn refresh(auth_state: Extension<Arc<AuthState>>, headers: HeaderMap) -> Response {
    let Some(token) = extract_refresh_token(&headers) else {
        return unauthorized_and_clear(auth_state.config());
    };

    match auth_state.refresh(&token).await {
        Ok(grant) => grant_response(auth_state.config(), grant)
            .unwrap_or_else(IntoResponse::into_response),
        Err(Error::AuthRejected | Error::AuthExpired) => {
            unauthorized_and_clear(auth_state.config())
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}

#[utoipa::path(
    post,
    path= "/auth/logout",
    responses (
        (status = 204, description = "Refresh session closed and cookie cleared"),
    ),
    tag= "auth"
)]
#[instrument(skip_all)]
pub async fn logout(auth_state: Extension<Arc<AuthState>>, headers: HeaderMap) -> Response {
    if let Some(token) = extract_refresh_token(&headers) {
        if let Err(err) = auth_state.close_session(&token).await {
            warn!("Failed to close refresh session: {err}");
        }
    }

    let mut response = StatusCode::NO_CONTENT.into_response();
    attach_cleared_cookie(auth_state.config(), &mut response);
    response
}

#[utoipa::path(
    get,
    path= "/auth/me",
    responses (
        (status = 200, description = "Claims of the presented access token", body = MeResponse),
        (status = 401, description = "Missing, invalid or expired access token", body = ErrorResponse),
    ),
    security(("bearer" = [])),
    tag= "auth"
)]
#[instrument(skip_all)]
pub async fn me(
    auth_state: Extension<Arc<AuthState>>,
    headers: HeaderMap,
) -> Result<Json<MeResponse>, ApiError> {
    let token = extract_bearer_token(&headers).ok_or_else(ApiError::unauthorized)?;
    let claims = auth_state.issuer().verify(&token)?;

    Ok(Json(MeResponse {
        id: claims.subject_id()?.to_string(),
        roles: claims.roles,
        expires_at: claims.exp,
    }))
}

fn grant_response(config: &AuthConfig, grant: SessionGrant) -> Result<Response, ApiError> {
    let cookie = refresh_cookie(config, &grant.refresh_token).map_err(|err| {
        error!("Failed to build refresh cookie: {err}");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    })?;

    let mut response = Json(AccessTokenResponse {
        access_token: grant.access.token,
    })
    .into_response();
    response.headers_mut().insert(SET_COOKIE, cookie);
    Ok(response)
}

fn unauthorized_and_clear(config: &AuthConfig) -> Response {
    let mut response = ApiError::unauthorized().into_response();
    attach_cleared_cookie(config, &mut response);
    response
}

fn attach_cleared_cookie(config: &AuthConfig, response: &mut Response) {
    match clear_refresh_cookie(config) {
        Ok(cookie) => {
            response.headers_mut().insert(SET_COOKIE, cookie);
        }
        Err(err) => error!("Failed to build clear-cookie header: {err}"),
    }
}

pub(crate) fn refresh_cookie(
    config: &AuthConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = config.refresh_ttl_seconds();
    let path = config.refresh_cookie_path();
    let mut cookie = format!(
        "{REFRESH_COOKIE_NAME}={token}; Path={path}; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"
    );
    if config.refresh_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn clear_refresh_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let path = config.refresh_cookie_path();
    let mut cookie =
        format!("{REFRESH_COOKIE_NAME}=; Path={path}; HttpOnly; SameSite=Lax; Max-Age=0");
    if config.refresh_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn extract_refresh_token(headers: &HeaderMap) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let key = parts.next().unwrap_or_default().trim();
            let val = parts.next().unwrap_or_default().trim();
            if key == REFRESH_COOKIE_NAME && !val.is_empty() {
                return Some(val.to_string());
            }
        }
    }
    None
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie_headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(value).unwrap_or(HeaderValue::from_static("")));
        headers
    }

    #[test]
    fn refresh_cookie_attributes() -> Result<(), InvalidHeaderValue> {
        let local = AuthConfig::new("http://localhost:5173".to_string()).with_refresh_ttl_seconds(60);
        let cookie = refresh_cookie(&local, "abc")?;
        assert_eq!(
            cookie.to_str().unwrap_or_default(),
            "storefront_refresh=abc; Path=/auth; HttpOnly; SameSite=Lax; Max-Age=60"
        );

        let secure = AuthConfig::new("https://shop.example.com".to_string());
        let cleared = clear_refresh_cookie(&secure)?;
        let cleared = cleared.to_str().unwrap_or_default();
        assert!(cleared.contains("Max-Age=0"));
        assert!(cleared.ends_with("; Secure"));

        let mounted = AuthConfig::new("http://localhost:5173".to_string()).with_base_path("/v1");
        let cookie = refresh_cookie(&mounted, "abc")?;
        assert!(cookie.to_str().unwrap_or_default().contains("; Path=/v1/auth;"));
        let cleared = clear_refresh_cookie(&mounted)?;
        assert!(cleared.to_str().unwrap_or_default().contains("; Path=/v1/auth;"));
        Ok(())
    }

    #[test]
    fn extracts_refresh_token_among_other_cookies() {
        let headers = cookie_headers("theme=dark; storefront_refresh=tok-123 ; other=1");
        assert_eq!(extract_refresh_token(&headers), Some("tok-123".to_string()));

        assert_eq!(extract_refresh_token(&cookie_headers("storefront_refresh=")), None);
        assert_eq!(extract_refresh_token(&cookie_headers("theme=dark")), None);
        assert_eq!(extract_refresh_token(&HeaderMap::new()), None);
    }

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer a.b.c"));
        assert_eq!(extract_bearer_token(&headers), Some("a.b.c".to_string()));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic xyz"));
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(extract_bearer_token(&headers), None);
    }
}
