pub mod auth;
pub mod contacts;
pub mod health;
pub mod rbac;
pub mod users;
