use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::Json;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{CurrentPrincipal, Principal};
use crate::errors::{AppError, AppResult};
use crate::extract::AppJson;
use crate::events::{record, RequestContext};
use crate::models::user::{DbUser, LoginRequest, LoginResponse, MessageResponse, Session, User};
use crate::session::{cleared_session_cookie, session_cookie, token_from_headers};
use crate::utils::{normalize_email, utc_now, verify_password};

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful; also sets the sid cookie", body = LoginResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    AppJson(payload): AppJson<LoginRequest>,
) -> AppResult<([(header::HeaderName, String); 1], Json<LoginResponse>)> {
    let db_user = sqlx::query_as::<_, DbUser>(
        "SELECT id, name, email, password_hash, role, organization_id, department_id, is_active, created_at, updated_at \
         FROM users WHERE email = ? AND is_active = 1",
    )
    .bind(normalize_email(&payload.email))
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;

    if !verify_password(&payload.password, &db_user.password_hash)? {
        tracing::info!(email = %payload.email, "login rejected");
        return Err(AppError::unauthorized("invalid credentials"));
    }

    let user: User = db_user.try_into()?;
    let now = utc_now();
    let session = Session {
        id: Uuid::new_v4(),
        user_id: user.id,
        created_at: now,
        expires_at: state.sessions.expiry_from(now),
    };

    sqlx::query("INSERT INTO sessions (id, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)")
        .bind(session.id.to_string())
        .bind(session.user_id.to_string())
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&state.pool)
        .await?;

    let token = state.sessions.encode(session.id, user.id, now)?;
    let max_age = (session.expires_at - now).num_seconds();

    record(
        &state.event_bus,
        "created",
        Some(user.id),
        &session,
        None,
        Some(RequestContext::from_headers(&headers)),
    );
    tracing::info!(identity_id = %user.id, "session opened");

    Ok((
        [(header::SET_COOKIE, session_cookie(&token, max_age))],
        Json(LoginResponse {
            token,
            expires_at: session.expires_at,
            user,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    responses(
        (status = 200, description = "Resolved principal", body = Principal),
        (status = 401, description = "No valid session")
    ),
    security(("bearerAuth" = []), ("cookieAuth" = []))
)]
pub async fn me(principal: CurrentPrincipal) -> AppResult<Json<Principal>> {
    Ok(Json(principal.0))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "Auth",
    responses(
        (status = 200, description = "Session revoked and cookie cleared", body = MessageResponse),
        (status = 401, description = "No valid session")
    ),
    security(("bearerAuth" = []), ("cookieAuth" = []))
)]
pub async fn logout(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    headers: HeaderMap,
) -> AppResult<([(header::HeaderName, String); 1], Json<MessageResponse>)> {
    // The dev bypass has no session to revoke.
    let claims = token_from_headers(&headers).and_then(|token| state.sessions.decode(&token).ok());

    if let Some(claims) = claims {
        let revoked: Option<(DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
            "UPDATE sessions SET revoked_at = ? WHERE id = ? AND user_id = ? AND revoked_at IS NULL \
             RETURNING created_at, expires_at",
        )
        .bind(utc_now())
        .bind(claims.sid.to_string())
        .bind(principal.user_id.to_string())
        .fetch_optional(&state.pool)
        .await?;

        if let Some((created_at, expires_at)) = revoked {
            let session = Session {
                id: claims.sid,
                user_id: principal.user_id,
                created_at,
                expires_at,
            };
            record(
                &state.event_bus,
                "closed",
                Some(principal.user_id),
                &session,
                None,
                Some(RequestContext::from_headers(&headers)),
            );
            tracing::info!(identity_id = %principal.user_id, "session closed");
        }
    }

    Ok((
        [(header::SET_COOKIE, cleared_session_cookie())],
        Json(MessageResponse {
            message: "Logged out".to_string(),
        }),
    ))
}
