use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub mobile: Option<String>,
    pub created_on: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub updated_on: Option<DateTime<Utc>>,
    pub updated_by: Option<Uuid>,
}

impl crate::events::Loggable for User {
    fn entity_type() -> &'static str { "user" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbUser {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub mobile: Option<String>,
    pub password_hash: String,
    pub created_on: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub updated_on: Option<DateTime<Utc>>,
    pub updated_by: Option<Uuid>,
}

impl From<DbUser> for User {
    fn from(value: DbUser) -> Self {
        User {
            id: value.id,
            first_name: value.first_name,
            last_name: value.last_name,
            username: value.username,
            email: value.email,
            mobile: value.mobile,
            created_on: value.created_on,
            created_by: value.created_by,
            updated_on: value.updated_on,
            updated_by: value.updated_by,
        }
    }
}

pub const USER_COLUMNS: &str =
    "id, first_name, last_name, username, email, mobile, password_hash, created_on, created_by, updated_on, updated_by";

/// Used both for self-registration and for administrators creating accounts.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    #[schema(example = "Ada")]
    pub first_name: String,
    #[schema(example = "Lovelace")]
    pub last_name: String,
    #[schema(example = "ada")]
    pub username: String,
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[schema(example = "+44 20 7946 0000")]
    pub mobile: Option<String>,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UserUpdateRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub mobile: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Username or email
    #[schema(example = "ada")]
    pub login: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CurrentUser {
    #[serde(flatten)]
    pub user: User,
    pub roles: Vec<String>,
}
