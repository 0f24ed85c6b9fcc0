use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::policy_name;
use crate::events::{Loggable, Severity};

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, FromRow)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_on: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub updated_on: Option<DateTime<Utc>>,
    pub updated_by: Option<Uuid>,
}

impl Loggable for Role {
    fn entity_type() -> &'static str { "role" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleCreateRequest {
    #[schema(example = "Editor")]
    pub name: String,
    #[schema(example = "Can create and edit contacts")]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleUpdateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

// =============================================================================
// PAGE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, FromRow)]
pub struct Page {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub display_order: i64,
    pub created_on: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub updated_on: Option<DateTime<Utc>>,
    pub updated_by: Option<Uuid>,
}

impl Loggable for Page {
    fn entity_type() -> &'static str { "page" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PageCreateRequest {
    #[schema(example = "Reports")]
    pub name: String,
    #[schema(example = "/reports")]
    pub url: String,
    #[serde(default)]
    pub display_order: i64,
}

// =============================================================================
// OPERATION
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, FromRow)]
pub struct Operation {
    pub id: Uuid,
    pub name: String,
    pub created_on: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub updated_on: Option<DateTime<Utc>>,
    pub updated_by: Option<Uuid>,
}

impl Loggable for Operation {
    fn entity_type() -> &'static str { "operation" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OperationCreateRequest {
    #[schema(example = "Export")]
    pub name: String,
}

// =============================================================================
// PERMISSION
// =============================================================================

/// A grantable (page, operation) pair, joined with its names.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Permission {
    pub id: Uuid,
    pub page_id: Uuid,
    pub page_name: String,
    pub operation_id: Uuid,
    pub operation_name: String,
    /// Policy name endpoints use to require this permission
    #[schema(example = "Contacts.CreatePolicy")]
    pub policy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_on: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub updated_on: Option<DateTime<Utc>>,
    pub updated_by: Option<Uuid>,
}

impl Loggable for Permission {
    fn entity_type() -> &'static str { "permission" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbPermission {
    pub id: Uuid,
    pub page_id: Uuid,
    pub page_name: String,
    pub operation_id: Uuid,
    pub operation_name: String,
    pub description: Option<String>,
    pub created_on: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub updated_on: Option<DateTime<Utc>>,
    pub updated_by: Option<Uuid>,
}

impl From<DbPermission> for Permission {
    fn from(db: DbPermission) -> Self {
        Permission {
            policy: policy_name(&db.page_name, &db.operation_name),
            id: db.id,
            page_id: db.page_id,
            page_name: db.page_name,
            operation_id: db.operation_id,
            operation_name: db.operation_name,
            description: db.description,
            created_on: db.created_on,
            created_by: db.created_by,
            updated_on: db.updated_on,
            updated_by: db.updated_by,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PermissionCreateRequest {
    pub page_id: Uuid,
    pub operation_id: Uuid,
    #[schema(example = "Export contact reports")]
    pub description: Option<String>,
}

// =============================================================================
// USER-ROLE ASSIGNMENT
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserRole {
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub created_on: DateTime<Utc>,
    pub created_by: Option<Uuid>,
}

impl Loggable for UserRole {
    fn entity_type() -> &'static str { "user_role" }
    fn subject_id(&self) -> Uuid { self.user_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignRoleRequest {
    pub role_id: Uuid,
}

/// Replaces a user's full role set in one transaction.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReplaceRolesRequest {
    pub role_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserRoleBatch {
    pub user_id: Uuid,
    pub role_ids: Vec<Uuid>,
    pub created_on: DateTime<Utc>,
    pub created_by: Option<Uuid>,
}

impl Loggable for UserRoleBatch {
    fn entity_type() -> &'static str { "user_role" }
    fn subject_id(&self) -> Uuid { self.user_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

// =============================================================================
// ROLE-PERMISSION ASSIGNMENT
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RolePermission {
    pub role_id: Uuid,
    pub permission_id: Uuid,
    pub created_on: DateTime<Utc>,
    pub created_by: Option<Uuid>,
}

impl Loggable for RolePermission {
    fn entity_type() -> &'static str { "role_permission" }
    fn subject_id(&self) -> Uuid { self.role_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

/// Batch grant. Applied in one transaction: either every id is assigned or none is.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignPermissionsRequest {
    pub permission_ids: Vec<Uuid>,
}

/// Summary of a batch assignment, logged as one activity event.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RolePermissionBatch {
    pub role_id: Uuid,
    pub permission_ids: Vec<Uuid>,
    pub created_on: DateTime<Utc>,
    pub created_by: Option<Uuid>,
}

impl Loggable for RolePermissionBatch {
    fn entity_type() -> &'static str { "role_permission" }
    fn subject_id(&self) -> Uuid { self.role_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

// =============================================================================
// RESOLUTION VIEWS
// =============================================================================

/// Flattened role → permission → page/operation row consumed by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema, FromRow)]
pub struct RolePermissionMapping {
    pub role_id: Uuid,
    pub role_name: String,
    pub page_id: Uuid,
    pub page_name: String,
    pub page_url: String,
    pub operation_id: Uuid,
    pub operation_name: String,
    pub permission_id: Uuid,
}

impl RolePermissionMapping {
    pub fn policy_name(&self) -> String {
        policy_name(&self.page_name, &self.operation_name)
    }
}

/// A page/operation combination that exists in the permission catalog.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct CatalogEntry {
    pub page_name: String,
    pub operation_name: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EffectivePermissions {
    pub user_id: Uuid,
    pub roles: Vec<String>,
    /// Sorted policy names granted through the roles
    pub policies: Vec<String>,
}
