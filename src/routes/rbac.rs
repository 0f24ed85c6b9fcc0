//! RBAC Admin API Routes
//!
//! Roles, the page/operation/permission catalog, and the assignments between them.
//! Every change is written to the activity log with Critical severity, and every change
//! that can alter a resolution result refreshes the authorization core before returning.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get},
    Json, Router,
};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::integrity::{self, IntegrityIssue};
use crate::authz::{policies, roles, validate_catalog_name, PermissionStore, Principal, SqlitePermissionStore};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, RequestContext};
use crate::extract::AppJson;
use crate::models::rbac::*;
use crate::routes::users::{fetch_user, role_names_for_user};
use crate::utils::{required, utc_now};

const ROLE_COLUMNS: &str = "id, name, description, created_on, created_by, updated_on, updated_by";

const PERMISSION_SELECT: &str = r#"
    SELECT p.id, p.page_id, pg.name AS page_name, p.operation_id, o.name AS operation_name,
           p.description, p.created_on, p.created_by, p.updated_on, p.updated_by
    FROM permissions p
    INNER JOIN pages pg ON pg.id = p.page_id
    INNER JOIN operations o ON o.id = p.operation_id
"#;

// =============================================================================
// ROUTER
// =============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        // Roles
        .route("/roles", get(list_roles).post(create_role))
        .route("/roles/:role_id", get(get_role).put(update_role).delete(delete_role))
        .route(
            "/roles/:role_id/permissions",
            get(get_role_permissions)
                .post(assign_permissions_to_role)
                .put(replace_role_permissions),
        )
        .route(
            "/roles/:role_id/permissions/:permission_id",
            delete(revoke_permission_from_role),
        )
        // Catalog
        .route("/pages", get(list_pages).post(create_page))
        .route("/pages/:page_id", delete(delete_page))
        .route("/operations", get(list_operations).post(create_operation))
        .route("/operations/:operation_id", delete(delete_operation))
        .route("/permissions", get(list_permissions).post(create_permission))
        .route("/permissions/:permission_id", delete(delete_permission))
        .route("/mappings", get(list_mappings))
        // User role assignments
        .route(
            "/users/:user_id/roles",
            get(get_user_roles).post(assign_role_to_user).put(replace_user_roles),
        )
        .route("/users/:user_id/roles/:role_id", delete(revoke_role_from_user))
        .route("/users/:user_id/effective-permissions", get(get_effective_permissions))
        // Diagnostics
        .route("/integrity", get(check_integrity))
}

// =============================================================================
// ROLE ENDPOINTS
// =============================================================================

/// List all roles
#[utoipa::path(
    get,
    path = "/rbac/roles",
    tag = "RBAC",
    responses(
        (status = 200, description = "List of roles", body = Vec<Role>),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_roles(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Vec<Role>>, AppError> {
    state.authz.authorize(Some(&principal), policies::ROLES_READ).await?;

    let sql = format!("SELECT {ROLE_COLUMNS} FROM roles ORDER BY name");
    let roles = sqlx::query_as::<_, Role>(&sql).fetch_all(&state.pool).await?;

    Ok(Json(roles))
}

/// Create a new role
#[utoipa::path(
    post,
    path = "/rbac/roles",
    tag = "RBAC",
    request_body = RoleCreateRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 409, description = "Role name already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    AppJson(req): AppJson<RoleCreateRequest>,
) -> Result<(StatusCode, Json<Role>), AppError> {
    state.authz.authorize(Some(&principal), policies::ROLES_CREATE).await?;

    let name = required("name", &req.name)?;
    let id = Uuid::new_v4();

    sqlx::query("INSERT INTO roles (id, name, description, created_on, created_by) VALUES (?, ?, ?, ?, ?)")
        .bind(id)
        .bind(&name)
        .bind(&req.description)
        .bind(utc_now())
        .bind(principal.user_id)
        .execute(&state.pool)
        .await?;

    let role = fetch_role(&state.pool, id).await?;

    log_activity(
        &state.event_bus,
        "created",
        Some(principal.user_id),
        &role,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(role)))
}

/// Get a role by ID
#[utoipa::path(
    get,
    path = "/rbac/roles/{role_id}",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    responses(
        (status = 200, description = "Role details", body = Role),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_role(
    State(state): State<AppState>,
    principal: Principal,
    Path(role_id): Path<Uuid>,
) -> Result<Json<Role>, AppError> {
    state.authz.authorize(Some(&principal), policies::ROLES_READ).await?;

    Ok(Json(fetch_role(&state.pool, role_id).await?))
}

/// Rename or re-describe a role
#[utoipa::path(
    put,
    path = "/rbac/roles/{role_id}",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    request_body = RoleUpdateRequest,
    responses(
        (status = 200, description = "Role updated", body = Role),
        (status = 404, description = "Role not found"),
        (status = 409, description = "Role name already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_role(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path(role_id): Path<Uuid>,
    AppJson(req): AppJson<RoleUpdateRequest>,
) -> Result<Json<Role>, AppError> {
    state.authz.authorize(Some(&principal), policies::ROLES_UPDATE).await?;

    let old = fetch_role(&state.pool, role_id).await?;
    let mut role = old.clone();

    if let Some(name) = req.name.as_deref() {
        let name = required("name", name)?;
        if old.name == roles::ADMINISTRATOR && name != old.name {
            return Err(AppError::bad_request("the Administrator role cannot be renamed"));
        }
        role.name = name;
    }
    if req.description.is_some() {
        role.description = req.description;
    }
    role.updated_on = Some(utc_now());
    role.updated_by = Some(principal.user_id);

    sqlx::query("UPDATE roles SET name = ?, description = ?, updated_on = ?, updated_by = ? WHERE id = ?")
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.updated_on)
        .bind(role.updated_by)
        .bind(role.id)
        .execute(&state.pool)
        .await?;

    // Resolution matches on role name.
    if role.name != old.name {
        state.authz.invalidate().await;
    }

    log_activity(
        &state.event_bus,
        "updated",
        Some(principal.user_id),
        &role,
        Some(&old),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(role))
}

/// Delete a role and its assignments
#[utoipa::path(
    delete,
    path = "/rbac/roles/{role_id}",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    responses(
        (status = 204, description = "Role deleted"),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_role(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path(role_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.authz.authorize(Some(&principal), policies::ROLES_DELETE).await?;

    let role = fetch_role(&state.pool, role_id).await?;
    if role.name == roles::ADMINISTRATOR {
        return Err(AppError::bad_request("the Administrator role cannot be deleted"));
    }

    // role_permissions and user_roles rows cascade.
    sqlx::query("DELETE FROM roles WHERE id = ?")
        .bind(role_id)
        .execute(&state.pool)
        .await?;

    state.authz.invalidate().await;

    log_activity(
        &state.event_bus,
        "deleted",
        Some(principal.user_id),
        &role,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// ROLE-PERMISSION ENDPOINTS
// =============================================================================

/// Get permissions assigned to a role
#[utoipa::path(
    get,
    path = "/rbac/roles/{role_id}/permissions",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    responses(
        (status = 200, description = "List of assigned permissions", body = Vec<Permission>),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_role_permissions(
    State(state): State<AppState>,
    principal: Principal,
    Path(role_id): Path<Uuid>,
) -> Result<Json<Vec<Permission>>, AppError> {
    state.authz.authorize(Some(&principal), policies::ROLES_READ).await?;

    fetch_role(&state.pool, role_id).await?;
    Ok(Json(permissions_for_role(&state.pool, role_id).await?))
}

/// Assign several permissions to a role at once
#[utoipa::path(
    post,
    path = "/rbac/roles/{role_id}/permissions",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    request_body = AssignPermissionsRequest,
    responses(
        (status = 201, description = "Permissions assigned; full list returned", body = Vec<Permission>),
        (status = 404, description = "Role or one of the permissions not found; nothing assigned"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn assign_permissions_to_role(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path(role_id): Path<Uuid>,
    AppJson(req): AppJson<AssignPermissionsRequest>,
) -> Result<(StatusCode, Json<Vec<Permission>>), AppError> {
    state.authz.authorize(Some(&principal), policies::ROLES_UPDATE).await?;

    let permission_ids = dedup(req.permission_ids);
    let now = utc_now();

    let mut tx = state.pool.begin().await?;
    ensure_present(&mut tx, "roles", "role", &[role_id]).await?;
    ensure_present(&mut tx, "permissions", "permission", &permission_ids).await?;
    insert_role_permissions(&mut tx, role_id, &permission_ids, principal.user_id).await?;
    touch_role(&mut tx, role_id, principal.user_id).await?;
    tx.commit().await?;

    state.authz.invalidate().await;

    log_activity(
        &state.event_bus,
        "assigned",
        Some(principal.user_id),
        &RolePermissionBatch {
            role_id,
            permission_ids,
            created_on: now,
            created_by: Some(principal.user_id),
        },
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    let permissions = permissions_for_role(&state.pool, role_id).await?;
    Ok((StatusCode::CREATED, Json(permissions)))
}

/// Replace the full permission set of a role
#[utoipa::path(
    put,
    path = "/rbac/roles/{role_id}/permissions",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    request_body = AssignPermissionsRequest,
    responses(
        (status = 200, description = "Permission set replaced", body = Vec<Permission>),
        (status = 404, description = "Role or one of the permissions not found; nothing changed"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn replace_role_permissions(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path(role_id): Path<Uuid>,
    AppJson(req): AppJson<AssignPermissionsRequest>,
) -> Result<Json<Vec<Permission>>, AppError> {
    state.authz.authorize(Some(&principal), policies::ROLES_UPDATE).await?;

    let permission_ids = dedup(req.permission_ids);
    let now = utc_now();

    let mut tx = state.pool.begin().await?;
    ensure_present(&mut tx, "roles", "role", &[role_id]).await?;
    ensure_present(&mut tx, "permissions", "permission", &permission_ids).await?;
    sqlx::query("DELETE FROM role_permissions WHERE role_id = ?")
        .bind(role_id)
        .execute(&mut *tx)
        .await?;
    insert_role_permissions(&mut tx, role_id, &permission_ids, principal.user_id).await?;
    touch_role(&mut tx, role_id, principal.user_id).await?;
    tx.commit().await?;

    state.authz.invalidate().await;

    log_activity(
        &state.event_bus,
        "replaced",
        Some(principal.user_id),
        &RolePermissionBatch {
            role_id,
            permission_ids,
            created_on: now,
            created_by: Some(principal.user_id),
        },
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(permissions_for_role(&state.pool, role_id).await?))
}

/// Remove a permission from a role
#[utoipa::path(
    delete,
    path = "/rbac/roles/{role_id}/permissions/{permission_id}",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
        ("permission_id" = Uuid, Path, description = "Permission ID"),
    ),
    responses(
        (status = 204, description = "Permission removed from role"),
        (status = 404, description = "Permission was not assigned to the role"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn revoke_permission_from_role(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path((role_id, permission_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    state.authz.authorize(Some(&principal), policies::ROLES_UPDATE).await?;

    let mut tx = state.pool.begin().await?;
    let affected = sqlx::query("DELETE FROM role_permissions WHERE role_id = ? AND permission_id = ?")
        .bind(role_id)
        .bind(permission_id)
        .execute(&mut *tx)
        .await?;

    if affected.rows_affected() == 0 {
        return Err(AppError::not_found("permission is not assigned to this role"));
    }

    touch_role(&mut tx, role_id, principal.user_id).await?;
    tx.commit().await?;

    state.authz.invalidate().await;

    log_activity(
        &state.event_bus,
        "revoked",
        Some(principal.user_id),
        &RolePermission {
            role_id,
            permission_id,
            created_on: utc_now(),
            created_by: Some(principal.user_id),
        },
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// CATALOG ENDPOINTS
// =============================================================================

/// List pages in display order
#[utoipa::path(
    get,
    path = "/rbac/pages",
    tag = "RBAC",
    responses((status = 200, description = "List of pages", body = Vec<Page>)),
    security(("bearerAuth" = []))
)]
pub async fn list_pages(State(state): State<AppState>, principal: Principal) -> AppResult<Json<Vec<Page>>> {
    state.authz.authorize(Some(&principal), policies::PERMISSIONS_READ).await?;

    let pages = sqlx::query_as::<_, Page>(
        "SELECT id, name, url, display_order, created_on, created_by, updated_on, updated_by FROM pages ORDER BY display_order, name",
    )
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(pages))
}

/// Create a page
#[utoipa::path(
    post,
    path = "/rbac/pages",
    tag = "RBAC",
    request_body = PageCreateRequest,
    responses(
        (status = 201, description = "Page created", body = Page),
        (status = 400, description = "Name is empty or contains '.' or whitespace"),
        (status = 409, description = "Page name already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_page(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    AppJson(req): AppJson<PageCreateRequest>,
) -> AppResult<(StatusCode, Json<Page>)> {
    state.authz.authorize(Some(&principal), policies::PERMISSIONS_CREATE).await?;
    validate_catalog_name("page", &req.name)?;

    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO pages (id, name, url, display_order, created_on, created_by) VALUES (?, ?, ?, ?, ?, ?)")
        .bind(id)
        .bind(&req.name)
        .bind(req.url.trim())
        .bind(req.display_order)
        .bind(utc_now())
        .bind(principal.user_id)
        .execute(&state.pool)
        .await?;

    let page = sqlx::query_as::<_, Page>(
        "SELECT id, name, url, display_order, created_on, created_by, updated_on, updated_by FROM pages WHERE id = ?",
    )
    .bind(id)
    .fetch_one(&state.pool)
    .await?;

    state.authz.invalidate().await;

    log_activity(
        &state.event_bus,
        "created",
        Some(principal.user_id),
        &page,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(page)))
}

/// Delete a page together with its permissions and their grants
#[utoipa::path(
    delete,
    path = "/rbac/pages/{page_id}",
    tag = "RBAC",
    params(("page_id" = Uuid, Path, description = "Page ID")),
    responses(
        (status = 204, description = "Page deleted"),
        (status = 404, description = "Page not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_page(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path(page_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.authz.authorize(Some(&principal), policies::PERMISSIONS_DELETE).await?;

    let page = sqlx::query_as::<_, Page>(
        "SELECT id, name, url, display_order, created_on, created_by, updated_on, updated_by FROM pages WHERE id = ?",
    )
    .bind(page_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("page not found"))?;

    sqlx::query("DELETE FROM pages WHERE id = ?")
        .bind(page_id)
        .execute(&state.pool)
        .await?;

    log_activity(
        &state.event_bus,
        "deleted",
        Some(principal.user_id),
        &page,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    catalog_changed(&state).await;

    Ok(StatusCode::NO_CONTENT)
}

/// List operations
#[utoipa::path(
    get,
    path = "/rbac/operations",
    tag = "RBAC",
    responses((status = 200, description = "List of operations", body = Vec<Operation>)),
    security(("bearerAuth" = []))
)]
pub async fn list_operations(
    State(state): State<AppState>,
    principal: Principal,
) -> AppResult<Json<Vec<Operation>>> {
    state.authz.authorize(Some(&principal), policies::PERMISSIONS_READ).await?;

    let operations = sqlx::query_as::<_, Operation>(
        "SELECT id, name, created_on, created_by, updated_on, updated_by FROM operations ORDER BY name",
    )
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(operations))
}

/// Create an operation
#[utoipa::path(
    post,
    path = "/rbac/operations",
    tag = "RBAC",
    request_body = OperationCreateRequest,
    responses(
        (status = 201, description = "Operation created", body = Operation),
        (status = 400, description = "Name is empty or contains '.' or whitespace"),
        (status = 409, description = "Operation name already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_operation(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    AppJson(req): AppJson<OperationCreateRequest>,
) -> AppResult<(StatusCode, Json<Operation>)> {
    state.authz.authorize(Some(&principal), policies::PERMISSIONS_CREATE).await?;
    validate_catalog_name("operation", &req.name)?;

    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO operations (id, name, created_on, created_by) VALUES (?, ?, ?, ?)")
        .bind(id)
        .bind(&req.name)
        .bind(utc_now())
        .bind(principal.user_id)
        .execute(&state.pool)
        .await?;

    let operation = sqlx::query_as::<_, Operation>(
        "SELECT id, name, created_on, created_by, updated_on, updated_by FROM operations WHERE id = ?",
    )
    .bind(id)
    .fetch_one(&state.pool)
    .await?;

    state.authz.invalidate().await;

    log_activity(
        &state.event_bus,
        "created",
        Some(principal.user_id),
        &operation,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(operation)))
}

/// Delete an operation together with its permissions and their grants
#[utoipa::path(
    delete,
    path = "/rbac/operations/{operation_id}",
    tag = "RBAC",
    params(("operation_id" = Uuid, Path, description = "Operation ID")),
    responses(
        (status = 204, description = "Operation deleted"),
        (status = 404, description = "Operation not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_operation(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path(operation_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.authz.authorize(Some(&principal), policies::PERMISSIONS_DELETE).await?;

    let operation = sqlx::query_as::<_, Operation>(
        "SELECT id, name, created_on, created_by, updated_on, updated_by FROM operations WHERE id = ?",
    )
    .bind(operation_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("operation not found"))?;

    sqlx::query("DELETE FROM operations WHERE id = ?")
        .bind(operation_id)
        .execute(&state.pool)
        .await?;

    log_activity(
        &state.event_bus,
        "deleted",
        Some(principal.user_id),
        &operation,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    catalog_changed(&state).await;

    Ok(StatusCode::NO_CONTENT)
}

/// List all permissions
#[utoipa::path(
    get,
    path = "/rbac/permissions",
    tag = "RBAC",
    responses(
        (status = 200, description = "List of permissions", body = Vec<Permission>),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_permissions(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Vec<Permission>>, AppError> {
    state.authz.authorize(Some(&principal), policies::PERMISSIONS_READ).await?;

    let sql = format!("{PERMISSION_SELECT} ORDER BY pg.display_order, o.name");
    let permissions = sqlx::query_as::<_, DbPermission>(&sql)
        .fetch_all(&state.pool)
        .await?
        .into_iter()
        .map(Permission::from)
        .collect();

    Ok(Json(permissions))
}

/// Create a permission for an existing page and operation
#[utoipa::path(
    post,
    path = "/rbac/permissions",
    tag = "RBAC",
    request_body = PermissionCreateRequest,
    responses(
        (status = 201, description = "Permission created", body = Permission),
        (status = 404, description = "Page or operation not found"),
        (status = 409, description = "Permission for this page and operation already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_permission(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    AppJson(req): AppJson<PermissionCreateRequest>,
) -> Result<(StatusCode, Json<Permission>), AppError> {
    state.authz.authorize(Some(&principal), policies::PERMISSIONS_CREATE).await?;

    let id = Uuid::new_v4();

    let mut tx = state.pool.begin().await?;
    ensure_present(&mut tx, "pages", "page", &[req.page_id]).await?;
    ensure_present(&mut tx, "operations", "operation", &[req.operation_id]).await?;
    sqlx::query(
        "INSERT INTO permissions (id, page_id, operation_id, description, created_on, created_by) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(req.page_id)
    .bind(req.operation_id)
    .bind(&req.description)
    .bind(utc_now())
    .bind(principal.user_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    let permission = fetch_permission(&state.pool, id).await?;

    log_activity(
        &state.event_bus,
        "created",
        Some(principal.user_id),
        &permission,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    catalog_changed(&state).await;

    Ok((StatusCode::CREATED, Json(permission)))
}

/// Delete a permission and every grant of it
#[utoipa::path(
    delete,
    path = "/rbac/permissions/{permission_id}",
    tag = "RBAC",
    params(("permission_id" = Uuid, Path, description = "Permission ID")),
    responses(
        (status = 204, description = "Permission deleted"),
        (status = 404, description = "Permission not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_permission(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path(permission_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.authz.authorize(Some(&principal), policies::PERMISSIONS_DELETE).await?;

    let permission = fetch_permission(&state.pool, permission_id).await?;

    sqlx::query("DELETE FROM permissions WHERE id = ?")
        .bind(permission_id)
        .execute(&state.pool)
        .await?;

    log_activity(
        &state.event_bus,
        "deleted",
        Some(principal.user_id),
        &permission,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    catalog_changed(&state).await;

    Ok(StatusCode::NO_CONTENT)
}

/// Flattened role → page → operation rows used by permission resolution
#[utoipa::path(
    get,
    path = "/rbac/mappings",
    tag = "RBAC",
    responses((status = 200, description = "Role permission mappings", body = Vec<RolePermissionMapping>)),
    security(("bearerAuth" = []))
)]
pub async fn list_mappings(
    State(state): State<AppState>,
    principal: Principal,
) -> AppResult<Json<Vec<RolePermissionMapping>>> {
    state.authz.authorize(Some(&principal), policies::PERMISSIONS_READ).await?;

    let store = SqlitePermissionStore::new(state.pool.clone());
    Ok(Json(store.role_permission_mappings().await?))
}

// =============================================================================
// USER-ROLE ENDPOINTS
// =============================================================================

/// Get roles assigned to a user
#[utoipa::path(
    get,
    path = "/rbac/users/{user_id}/roles",
    tag = "RBAC",
    params(
        ("user_id" = Uuid, Path, description = "User ID"),
    ),
    responses(
        (status = 200, description = "List of assigned roles", body = Vec<Role>),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_user_roles(
    State(state): State<AppState>,
    principal: Principal,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<Role>>, AppError> {
    state.authz.authorize(Some(&principal), policies::USERS_READ).await?;

    fetch_user(&state.pool, user_id).await?;
    Ok(Json(roles_for_user(&state.pool, user_id).await?))
}

/// Assign a role to a user
#[utoipa::path(
    post,
    path = "/rbac/users/{user_id}/roles",
    tag = "RBAC",
    params(
        ("user_id" = Uuid, Path, description = "User ID"),
    ),
    request_body = AssignRoleRequest,
    responses(
        (status = 201, description = "Role assigned"),
        (status = 404, description = "User or role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn assign_role_to_user(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
    AppJson(req): AppJson<AssignRoleRequest>,
) -> Result<StatusCode, AppError> {
    state.authz.authorize(Some(&principal), policies::USERS_UPDATE).await?;

    let now = utc_now();

    let mut tx = state.pool.begin().await?;
    ensure_present(&mut tx, "users", "user", &[user_id]).await?;
    ensure_present(&mut tx, "roles", "role", &[req.role_id]).await?;
    insert_user_roles(&mut tx, user_id, &[req.role_id], principal.user_id).await?;
    touch_role(&mut tx, req.role_id, principal.user_id).await?;
    tx.commit().await?;

    log_activity(
        &state.event_bus,
        "assigned",
        Some(principal.user_id),
        &UserRole {
            user_id,
            role_id: req.role_id,
            created_on: now,
            created_by: Some(principal.user_id),
        },
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::CREATED)
}

/// Replace the full role set of a user
#[utoipa::path(
    put,
    path = "/rbac/users/{user_id}/roles",
    tag = "RBAC",
    params(
        ("user_id" = Uuid, Path, description = "User ID"),
    ),
    request_body = ReplaceRolesRequest,
    responses(
        (status = 200, description = "Role set replaced", body = Vec<Role>),
        (status = 404, description = "User or one of the roles not found; nothing changed"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn replace_user_roles(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
    AppJson(req): AppJson<ReplaceRolesRequest>,
) -> Result<Json<Vec<Role>>, AppError> {
    state.authz.authorize(Some(&principal), policies::USERS_UPDATE).await?;

    let role_ids = dedup(req.role_ids);
    let now = utc_now();

    let mut tx = state.pool.begin().await?;
    ensure_present(&mut tx, "users", "user", &[user_id]).await?;
    ensure_present(&mut tx, "roles", "role", &role_ids).await?;
    sqlx::query("DELETE FROM user_roles WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    insert_user_roles(&mut tx, user_id, &role_ids, principal.user_id).await?;
    tx.commit().await?;

    log_activity(
        &state.event_bus,
        "replaced",
        Some(principal.user_id),
        &UserRoleBatch {
            user_id,
            role_ids,
            created_on: now,
            created_by: Some(principal.user_id),
        },
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(roles_for_user(&state.pool, user_id).await?))
}

/// Revoke a role from a user
#[utoipa::path(
    delete,
    path = "/rbac/users/{user_id}/roles/{role_id}",
    tag = "RBAC",
    params(
        ("user_id" = Uuid, Path, description = "User ID"),
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    responses(
        (status = 204, description = "Role revoked"),
        (status = 404, description = "Role was not assigned to the user"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn revoke_role_from_user(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path((user_id, role_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    state.authz.authorize(Some(&principal), policies::USERS_UPDATE).await?;

    let mut tx = state.pool.begin().await?;
    let affected = sqlx::query("DELETE FROM user_roles WHERE user_id = ? AND role_id = ?")
        .bind(user_id)
        .bind(role_id)
        .execute(&mut *tx)
        .await?;

    if affected.rows_affected() == 0 {
        return Err(AppError::not_found("role is not assigned to this user"));
    }

    touch_role(&mut tx, role_id, principal.user_id).await?;
    tx.commit().await?;

    log_activity(
        &state.event_bus,
        "revoked",
        Some(principal.user_id),
        &UserRole {
            user_id,
            role_id,
            created_on: utc_now(),
            created_by: Some(principal.user_id),
        },
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// EFFECTIVE PERMISSIONS
// =============================================================================

/// Policies a user would hold with their currently assigned roles
#[utoipa::path(
    get,
    path = "/rbac/users/{user_id}/effective-permissions",
    tag = "RBAC",
    params(
        ("user_id" = Uuid, Path, description = "User ID"),
    ),
    responses(
        (status = 200, description = "Effective permissions", body = EffectivePermissions),
        (status = 404, description = "User not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_effective_permissions(
    State(state): State<AppState>,
    principal: Principal,
    Path(user_id): Path<Uuid>,
) -> Result<Json<EffectivePermissions>, AppError> {
    state.authz.authorize(Some(&principal), policies::USERS_READ).await?;

    fetch_user(&state.pool, user_id).await?;
    let roles = role_names_for_user(&state.pool, user_id).await?;
    let role_set = roles.iter().cloned().collect();

    let mut policies: Vec<String> = state
        .authz
        .resolver()
        .resolve_roles(&role_set)
        .await?
        .into_iter()
        .collect();
    policies.sort();

    Ok(Json(EffectivePermissions {
        user_id,
        roles,
        policies,
    }))
}

// =============================================================================
// INTEGRITY
// =============================================================================

/// Dangling references in the RBAC tables
#[utoipa::path(
    get,
    path = "/rbac/integrity",
    tag = "RBAC",
    responses((status = 200, description = "Integrity issues (empty when consistent)", body = Vec<IntegrityIssue>)),
    security(("bearerAuth" = []))
)]
pub async fn check_integrity(
    State(state): State<AppState>,
    principal: Principal,
) -> AppResult<Json<Vec<IntegrityIssue>>> {
    state.authz.authorize(Some(&principal), policies::ADMINISTRATOR_ONLY).await?;

    Ok(Json(integrity::find_orphans(&state.pool).await?))
}

// =============================================================================
// HELPERS
// =============================================================================

fn dedup(mut ids: Vec<Uuid>) -> Vec<Uuid> {
    ids.sort();
    ids.dedup();
    ids
}

/// Fails with 404 naming the first id missing from `table`.
async fn ensure_present(
    conn: &mut SqliteConnection,
    table: &'static str,
    label: &str,
    ids: &[Uuid],
) -> AppResult<()> {
    let sql = format!("SELECT COUNT(1) FROM {table} WHERE id = ?");
    for id in ids {
        let count: i64 = sqlx::query_scalar(&sql).bind(id).fetch_one(&mut *conn).await?;
        if count == 0 {
            return Err(AppError::not_found(format!("{label} {id} not found")));
        }
    }
    Ok(())
}

async fn insert_role_permissions(
    conn: &mut SqliteConnection,
    role_id: Uuid,
    permission_ids: &[Uuid],
    actor: Uuid,
) -> AppResult<()> {
    let now = utc_now();
    for permission_id in permission_ids {
        sqlx::query(
            "INSERT OR IGNORE INTO role_permissions (role_id, permission_id, created_on, created_by) VALUES (?, ?, ?, ?)",
        )
        .bind(role_id)
        .bind(permission_id)
        .bind(now)
        .bind(actor)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn insert_user_roles(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    role_ids: &[Uuid],
    actor: Uuid,
) -> AppResult<()> {
    let now = utc_now();
    for role_id in role_ids {
        sqlx::query(
            "INSERT OR IGNORE INTO user_roles (user_id, role_id, created_on, created_by) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(role_id)
        .bind(now)
        .bind(actor)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Reloads the policy registry after a committed catalog write. The write stands even if the
/// reload fails; the registry then stays stale and the next lookup retries.
async fn catalog_changed(state: &AppState) {
    if let Err(err) = state.authz.refresh_catalog().await {
        tracing::warn!(error = %err, "catalog write committed but policy registry reload failed");
    }
}

async fn touch_role(conn: &mut SqliteConnection, role_id: Uuid, actor: Uuid) -> AppResult<()> {
    sqlx::query("UPDATE roles SET updated_on = ?, updated_by = ? WHERE id = ?")
        .bind(utc_now())
        .bind(actor)
        .bind(role_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn fetch_role(pool: &SqlitePool, role_id: Uuid) -> AppResult<Role> {
    let sql = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = ?");
    sqlx::query_as::<_, Role>(&sql)
        .bind(role_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("role not found"))
}

async fn fetch_permission(pool: &SqlitePool, permission_id: Uuid) -> AppResult<Permission> {
    let sql = format!("{PERMISSION_SELECT} WHERE p.id = ?");
    sqlx::query_as::<_, DbPermission>(&sql)
        .bind(permission_id)
        .fetch_optional(pool)
        .await?
        .map(Permission::from)
        .ok_or_else(|| AppError::not_found("permission not found"))
}

async fn permissions_for_role(pool: &SqlitePool, role_id: Uuid) -> AppResult<Vec<Permission>> {
    let sql = format!(
        "{PERMISSION_SELECT} INNER JOIN role_permissions rp ON rp.permission_id = p.id WHERE rp.role_id = ? ORDER BY pg.display_order, o.name"
    );
    let rows = sqlx::query_as::<_, DbPermission>(&sql)
        .bind(role_id)
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(Permission::from).collect())
}

async fn roles_for_user(pool: &SqlitePool, user_id: Uuid) -> AppResult<Vec<Role>> {
    let roles = sqlx::query_as::<_, Role>(
        r#"
        SELECT r.id, r.name, r.description, r.created_on, r.created_by, r.updated_on, r.updated_by
        FROM roles r
        INNER JOIN user_roles ur ON r.id = ur.role_id
        WHERE ur.user_id = ?
        ORDER BY r.name
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(roles)
}
