pub mod contact;
pub mod rbac;
pub mod user;
