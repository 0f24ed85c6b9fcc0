use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::app::AppState;
use crate::authz::Principal;
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, RequestContext};
use crate::extract::AppJson;
use crate::models::rbac::EffectivePermissions;
use crate::models::user::{AuthResponse, CurrentUser, DbUser, LoginRequest, RegisterRequest, User, USER_COLUMNS};
use crate::routes::users::{fetch_user, insert_user, role_names_for_user};
use crate::utils::verify_password;

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    message: String,
}

#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = AuthResponse),
        (status = 409, description = "Username or email already in use")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    AppJson(payload): AppJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    let user = insert_user(&state.pool, &payload, None).await?;

    // New accounts hold no roles until an administrator assigns some.
    let token = state.jwt.encode(user.id, &user.username, Vec::new())?;

    log_activity(
        &state.event_bus,
        "registered",
        Some(user.id),
        &user,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user,
            roles: Vec::new(),
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = ? OR email = ?");
    let db_user = sqlx::query_as::<_, DbUser>(&sql)
        .bind(&payload.login)
        .bind(&payload.login)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;

    if !verify_password(&payload.password, &db_user.password_hash)? {
        tracing::info!(user_id = %db_user.id, "login rejected: wrong password");
        return Err(AppError::unauthorized("invalid credentials"));
    }

    let roles = role_names_for_user(&state.pool, db_user.id).await?;
    let token = state.jwt.encode(db_user.id, &db_user.username, roles.clone())?;
    let user: User = db_user.into();

    tracing::info!(user_id = %user.id, roles = roles.len(), "user logged in");

    Ok(Json(AuthResponse { token, user, roles }))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    responses((status = 200, description = "Current user", body = CurrentUser)),
    security(("bearerAuth" = []))
)]
pub async fn me(State(state): State<AppState>, principal: Principal) -> AppResult<Json<CurrentUser>> {
    let user: User = fetch_user(&state.pool, principal.user_id).await?.into();
    let roles = role_names_for_user(&state.pool, principal.user_id).await?;
    Ok(Json(CurrentUser { user, roles }))
}

/// Policies granted by the roles in the caller's token, for client-side menus and guards.
#[utoipa::path(
    get,
    path = "/auth/me/permissions",
    tag = "Auth",
    responses((status = 200, description = "Caller's effective permissions", body = EffectivePermissions)),
    security(("bearerAuth" = []))
)]
pub async fn my_permissions(
    State(state): State<AppState>,
    principal: Principal,
) -> AppResult<Json<EffectivePermissions>> {
    let mut policies: Vec<String> = state.authz.resolver().resolve(&principal).await?.into_iter().collect();
    policies.sort();

    Ok(Json(EffectivePermissions {
        user_id: principal.user_id,
        roles: principal.roles.into_iter().collect(),
        policies,
    }))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "Auth",
    responses((status = 200, description = "Logout acknowledged", body = MessageResponse)),
    security(("bearerAuth" = []))
)]
pub async fn logout(_principal: Principal) -> AppResult<Json<MessageResponse>> {
    Ok(Json(MessageResponse {
        message: "Logged out".to_string(),
    }))
}
