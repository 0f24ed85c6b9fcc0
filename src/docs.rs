use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Map, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::authz::integrity;
use crate::models;
use crate::routes::{auth, contacts, health, rbac, users};

#[derive(OpenApi)]
#[openapi(
	paths(
		health::health,
		auth::register,
		auth::login,
		auth::me,
		auth::my_permissions,
		auth::logout,
		contacts::list_contacts,
		contacts::create_contact,
		contacts::get_contact,
		contacts::update_contact,
		contacts::delete_contact,
		users::list_users,
		users::create_user,
		users::get_user,
		users::update_user,
		users::delete_user,
		rbac::list_roles,
		rbac::create_role,
		rbac::get_role,
		rbac::update_role,
		rbac::delete_role,
		rbac::get_role_permissions,
		rbac::assign_permissions_to_role,
		rbac::replace_role_permissions,
		rbac::revoke_permission_from_role,
		rbac::list_pages,
		rbac::create_page,
		rbac::delete_page,
		rbac::list_operations,
		rbac::create_operation,
		rbac::delete_operation,
		rbac::list_permissions,
		rbac::create_permission,
		rbac::delete_permission,
		rbac::list_mappings,
		rbac::get_user_roles,
		rbac::assign_role_to_user,
		rbac::replace_user_roles,
		rbac::revoke_role_from_user,
		rbac::get_effective_permissions,
		rbac::check_integrity
	),
	components(
		schemas(
			health::HealthResponse,
			auth::MessageResponse,
			models::user::User,
			models::user::AuthResponse,
			models::user::CurrentUser,
			models::user::LoginRequest,
			models::user::RegisterRequest,
			models::user::UserUpdateRequest,
			models::contact::Contact,
			models::contact::ContactCreateRequest,
			models::contact::ContactUpdateRequest,
			models::rbac::Role,
			models::rbac::RoleCreateRequest,
			models::rbac::RoleUpdateRequest,
			models::rbac::Page,
			models::rbac::PageCreateRequest,
			models::rbac::Operation,
			models::rbac::OperationCreateRequest,
			models::rbac::Permission,
			models::rbac::PermissionCreateRequest,
			models::rbac::AssignRoleRequest,
			models::rbac::ReplaceRolesRequest,
			models::rbac::AssignPermissionsRequest,
			models::rbac::RolePermissionMapping,
			models::rbac::EffectivePermissions,
			integrity::IntegrityIssue
		)
	),
	tags(
		(name = "Health", description = "Liveness and catalog status"),
		(name = "Auth", description = "Authentication endpoints"),
		(name = "Contacts", description = "Contact directory"),
		(name = "Users", description = "User administration"),
		(name = "RBAC", description = "Roles, permission catalog and assignments")
	)
)]
pub struct ApiDoc;

pub fn build_openapi(port: u16, tls: bool) -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut doc = serde_json::to_value(&ApiDoc::openapi())?;

	ensure_security_components(&mut doc);
	ensure_openapi_version(&mut doc);
	add_examples(&mut doc);
	ensure_servers(&mut doc, port, tls);

	Ok(serde_json::from_value(doc)?)
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> anyhow::Result<Router> {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.with_credentials(true)
		.persist_authorization(true);

	let doc_json = Arc::new(serde_json::to_value(&doc)?);

	let json_route = {
		let doc_json = Arc::clone(&doc_json);
		get(move || {
			let doc_json = Arc::clone(&doc_json);
			async move { Json((*doc_json).clone()) }
		})
	};

	Ok(Router::new()
		.route("/api-docs/openapi.json", json_route)
		.merge(SwaggerUi::new("/docs").config(swagger_config)))
}

fn ensure_security_components(doc: &mut Value) {
	let Some(root) = doc.as_object_mut() else {
		return;
	};
	let components = root
		.entry("components")
		.or_insert_with(|| Value::Object(Map::new()));
	let Some(components) = components.as_object_mut() else {
		return;
	};
	let schemes = components
		.entry("securitySchemes")
		.or_insert_with(|| Value::Object(Map::new()));
	if let Some(schemes) = schemes.as_object_mut() {
		schemes.insert(
			"bearerAuth".to_string(),
			json!({
				"type": "http",
				"scheme": "bearer",
				"bearerFormat": "JWT"
			}),
		);
	}
}

fn ensure_openapi_version(doc: &mut Value) {
	if let Some(root) = doc.as_object_mut() {
		root.entry("openapi")
			.or_insert_with(|| Value::String("3.1.0".to_string()));
	}
}

fn add_examples(doc: &mut Value) {
	if let Some(paths) = doc.get_mut("paths").and_then(Value::as_object_mut) {
		for item in paths.values_mut() {
			if let Some(operations) = item.as_object_mut() {
				for operation in operations.values_mut() {
					apply_parameter_examples(operation);
					apply_request_examples(operation);
				}
			}
		}
	}
}

fn apply_parameter_examples(operation: &mut Value) {
	if let Some(parameters) = operation
		.get_mut("parameters")
		.and_then(Value::as_array_mut)
	{
		for parameter in parameters.iter_mut() {
			let is_id = parameter
				.get("name")
				.and_then(Value::as_str)
				.map(|name| name == "id" || name.ends_with("_id"))
				.unwrap_or(false);
			if is_id {
				if let Some(obj) = parameter.as_object_mut() {
					obj.entry("example")
						.or_insert_with(|| json!("00000000-0000-0000-0000-000000000000"));
				}
			}
		}
	}
}

fn apply_request_examples(operation: &mut Value) {
	let Some(appjson) = operation
		.pointer_mut("/requestBody/content/application~1json")
		.and_then(Value::as_object_mut)
	else {
		return;
	};

	let schema_ref = appjson
		.get("schema")
		.and_then(|schema| schema.get("$ref"))
		.and_then(Value::as_str)
		.map(str::to_string);

	let example = match schema_ref.as_deref() {
		Some("#/components/schemas/LoginRequest") => json!({
			"login": "alice",
			"password": "S3cureP@ssw0rd"
		}),
		Some("#/components/schemas/RegisterRequest") => json!({
			"first_name": "Alice",
			"last_name": "Archer",
			"username": "alice",
			"email": "alice@example.com",
			"mobile": "+15550100",
			"password": "S3cureP@ssw0rd"
		}),
		Some("#/components/schemas/ContactCreateRequest") => json!({
			"first_name": "Grace",
			"last_name": "Hopper",
			"email": "grace@example.com",
			"company": "Navy"
		}),
		Some("#/components/schemas/RoleCreateRequest") => json!({
			"name": "Editor",
			"description": "Can create and edit contacts"
		}),
		Some("#/components/schemas/PageCreateRequest") => json!({
			"name": "Reports",
			"url": "/reports",
			"display_order": 5
		}),
		Some("#/components/schemas/OperationCreateRequest") => json!({ "name": "Export" }),
		_ => return,
	};

	appjson.entry("example").or_insert(example);
}

fn ensure_servers(doc: &mut Value, port: u16, tls: bool) {
	let scheme = if tls { "https" } else { "http" };
	let server_url = format!("{}://localhost:{}", scheme, port);
	match doc.get_mut("servers") {
		Some(Value::Array(arr)) => {
			let has = arr
				.iter()
				.any(|v| v.get("url").and_then(Value::as_str) == Some(server_url.as_str()));
			if !has {
				arr.push(json!({ "url": server_url }));
			}
		}
		_ => {
			doc["servers"] = json!([{ "url": server_url }]);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn document_carries_bearer_scheme_and_server() {
		let doc = build_openapi(8123, false).expect("openapi builds");
		let value = serde_json::to_value(&doc).expect("serializes");

		assert_eq!(
			value.pointer("/components/securitySchemes/bearerAuth/scheme"),
			Some(&json!("bearer"))
		);
		assert_eq!(
			value.pointer("/servers/0/url"),
			Some(&json!("http://localhost:8123"))
		);
	}

	#[test]
	fn rbac_paths_are_registered() {
		let value = serde_json::to_value(ApiDoc::openapi()).expect("serializes");
		let paths = value.get("paths").and_then(Value::as_object).expect("paths");

		for path in [
			"/contacts",
			"/rbac/roles/{role_id}/permissions",
			"/rbac/users/{user_id}/effective-permissions",
			"/rbac/integrity",
		] {
			assert!(paths.contains_key(path), "missing {path}");
		}
	}
}
