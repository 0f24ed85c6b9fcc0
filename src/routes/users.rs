use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{policies, Principal};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, RequestContext};
use crate::extract::AppJson;
use crate::models::user::{DbUser, RegisterRequest, User, UserUpdateRequest, USER_COLUMNS};
use crate::utils::{hash_password, required, utc_now};

#[utoipa::path(
    get,
    path = "/users",
    tag = "Users",
    responses((status = 200, description = "List users", body = [User])),
    security(("bearerAuth" = []))
)]
pub async fn list_users(State(state): State<AppState>, principal: Principal) -> AppResult<Json<Vec<User>>> {
    state.authz.authorize(Some(&principal), policies::USERS_READ).await?;

    let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY last_name, first_name");
    let users = sqlx::query_as::<_, DbUser>(&sql)
        .fetch_all(&state.pool)
        .await?
        .into_iter()
        .map(User::from)
        .collect();

    Ok(Json(users))
}

#[utoipa::path(
    post,
    path = "/users",
    tag = "Users",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 409, description = "Username or email already in use")
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_user(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    AppJson(payload): AppJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<User>)> {
    state.authz.authorize(Some(&principal), policies::USERS_CREATE).await?;

    let user = insert_user(&state.pool, &payload, Some(principal.user_id)).await?;

    log_activity(
        &state.event_bus,
        "created",
        Some(principal.user_id),
        &user,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(user)))
}

#[utoipa::path(
    get,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "User detail", body = User),
        (status = 404, description = "User not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_user(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<User>> {
    state.authz.authorize(Some(&principal), policies::USERS_READ).await?;

    let user = fetch_user(&state.pool, id).await?;
    Ok(Json(user.into()))
}

#[utoipa::path(
    put,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = UserUpdateRequest,
    responses((status = 200, description = "User updated", body = User)),
    security(("bearerAuth" = []))
)]
pub async fn update_user(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<UserUpdateRequest>,
) -> AppResult<Json<User>> {
    state.authz.authorize(Some(&principal), policies::USERS_UPDATE).await?;

    let mut user = fetch_user(&state.pool, id).await?;
    let old: User = user.clone().into();

    if let Some(first_name) = payload.first_name.as_deref() {
        user.first_name = required("first_name", first_name)?;
    }
    if let Some(last_name) = payload.last_name.as_deref() {
        user.last_name = required("last_name", last_name)?;
    }
    if let Some(email) = payload.email.as_deref() {
        user.email = required("email", email)?;
    }
    if payload.mobile.is_some() {
        user.mobile = payload.mobile.clone();
    }
    if let Some(password) = payload.password.as_deref() {
        user.password_hash = hash_password(password)?;
    }

    let now = utc_now();
    user.updated_on = Some(now);
    user.updated_by = Some(principal.user_id);

    sqlx::query(
        "UPDATE users SET first_name = ?, last_name = ?, email = ?, mobile = ?, password_hash = ?, updated_on = ?, updated_by = ? WHERE id = ?",
    )
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(&user.email)
    .bind(&user.mobile)
    .bind(&user.password_hash)
    .bind(user.updated_on)
    .bind(user.updated_by)
    .bind(user.id)
    .execute(&state.pool)
    .await?;

    let user: User = user.into();

    log_activity(
        &state.event_bus,
        "updated",
        Some(principal.user_id),
        &user,
        Some(&old),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(user))
}

#[utoipa::path(
    delete,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 204, description = "User deleted"),
        (status = 400, description = "Cannot delete own account")
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_user(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.authz.authorize(Some(&principal), policies::USERS_DELETE).await?;

    if id == principal.user_id {
        return Err(AppError::bad_request("cannot delete the signed-in account"));
    }

    let user: User = fetch_user(&state.pool, id).await?.into();

    // user_roles rows go with it (ON DELETE CASCADE).
    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(&state.pool)
        .await?;

    log_activity(
        &state.event_bus,
        "deleted",
        Some(principal.user_id),
        &user,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

/// Validates and inserts a user. `actor` is `None` for self-registration.
pub async fn insert_user(
    pool: &SqlitePool,
    payload: &RegisterRequest,
    actor: Option<Uuid>,
) -> AppResult<User> {
    let first_name = required("first_name", &payload.first_name)?;
    let last_name = required("last_name", &payload.last_name)?;
    let username = required("username", &payload.username)?;
    let email = required("email", &payload.email)?;

    ensure_identity_available(pool, &username, &email).await?;

    let password_hash = hash_password(&payload.password)?;
    let user_id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO users (id, first_name, last_name, username, email, mobile, password_hash, created_on, created_by) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(&first_name)
    .bind(&last_name)
    .bind(&username)
    .bind(&email)
    .bind(&payload.mobile)
    .bind(password_hash)
    .bind(utc_now())
    .bind(actor)
    .execute(pool)
    .await?;

    Ok(fetch_user(pool, user_id).await?.into())
}

async fn ensure_identity_available(pool: &SqlitePool, username: &str, email: &str) -> AppResult<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE username = ? OR email = ?")
        .bind(username)
        .bind(email)
        .fetch_one(pool)
        .await?;

    if count > 0 {
        return Err(AppError::conflict("username or email already in use"));
    }

    Ok(())
}

pub(crate) async fn fetch_user(pool: &SqlitePool, user_id: Uuid) -> AppResult<DbUser> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
    sqlx::query_as::<_, DbUser>(&sql)
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))
}

/// Role names currently assigned to a user, sorted.
pub async fn role_names_for_user(pool: &SqlitePool, user_id: Uuid) -> AppResult<Vec<String>> {
    let names = sqlx::query_scalar::<_, String>(
        r#"
        SELECT r.name
        FROM roles r
        INNER JOIN user_roles ur ON r.id = ur.role_id
        WHERE ur.user_id = ?
        ORDER BY r.name
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(names)
}
