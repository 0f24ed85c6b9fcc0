use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{policies, Principal};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, RequestContext};
use crate::extract::AppJson;
use crate::models::contact::{Contact, ContactCreateRequest, ContactQuery, ContactUpdateRequest};
use crate::utils::{required, utc_now};

const CONTACT_COLUMNS: &str =
    "id, first_name, last_name, email, mobile, company, notes, created_on, created_by, updated_on, updated_by";

#[utoipa::path(
    get,
    path = "/contacts",
    tag = "Contacts",
    params(ContactQuery),
    responses((status = 200, description = "List contacts", body = [Contact])),
    security(("bearerAuth" = []))
)]
pub async fn list_contacts(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<ContactQuery>,
) -> AppResult<Json<Vec<Contact>>> {
    state.authz.authorize(Some(&principal), policies::CONTACTS_READ).await?;

    let contacts = match query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(term) => {
            let pattern = format!("%{}%", term.to_lowercase());
            let sql = format!(
                "SELECT {CONTACT_COLUMNS} FROM contacts \
                 WHERE lower(first_name) LIKE ?1 OR lower(last_name) LIKE ?1 OR lower(coalesce(email, '')) LIKE ?1 OR lower(coalesce(company, '')) LIKE ?1 \
                 ORDER BY last_name, first_name"
            );
            sqlx::query_as::<_, Contact>(&sql)
                .bind(pattern)
                .fetch_all(&state.pool)
                .await?
        }
        None => {
            let sql = format!("SELECT {CONTACT_COLUMNS} FROM contacts ORDER BY last_name, first_name");
            sqlx::query_as::<_, Contact>(&sql).fetch_all(&state.pool).await?
        }
    };

    Ok(Json(contacts))
}

#[utoipa::path(
    post,
    path = "/contacts",
    tag = "Contacts",
    request_body = ContactCreateRequest,
    responses((status = 201, description = "Contact created", body = Contact)),
    security(("bearerAuth" = []))
)]
pub async fn create_contact(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    AppJson(payload): AppJson<ContactCreateRequest>,
) -> AppResult<(StatusCode, Json<Contact>)> {
    state.authz.authorize(Some(&principal), policies::CONTACTS_CREATE).await?;

    let first_name = required("first_name", &payload.first_name)?;
    let last_name = required("last_name", &payload.last_name)?;
    let contact_id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO contacts (id, first_name, last_name, email, mobile, company, notes, created_on, created_by) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(contact_id)
    .bind(&first_name)
    .bind(&last_name)
    .bind(&payload.email)
    .bind(&payload.mobile)
    .bind(&payload.company)
    .bind(&payload.notes)
    .bind(utc_now())
    .bind(principal.user_id)
    .execute(&state.pool)
    .await?;

    let contact = fetch_contact(&state.pool, contact_id).await?;

    log_activity(
        &state.event_bus,
        "created",
        Some(principal.user_id),
        &contact,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(contact)))
}

#[utoipa::path(
    get,
    path = "/contacts/{id}",
    tag = "Contacts",
    params(("id" = Uuid, Path, description = "Contact id")),
    responses(
        (status = 200, description = "Contact detail", body = Contact),
        (status = 404, description = "Contact not found")
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_contact(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Contact>> {
    state.authz.authorize(Some(&principal), policies::CONTACTS_READ).await?;

    Ok(Json(fetch_contact(&state.pool, id).await?))
}

#[utoipa::path(
    put,
    path = "/contacts/{id}",
    tag = "Contacts",
    params(("id" = Uuid, Path, description = "Contact id")),
    request_body = ContactUpdateRequest,
    responses((status = 200, description = "Contact updated", body = Contact)),
    security(("bearerAuth" = []))
)]
pub async fn update_contact(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    AppJson(payload): AppJson<ContactUpdateRequest>,
) -> AppResult<Json<Contact>> {
    state.authz.authorize(Some(&principal), policies::CONTACTS_UPDATE).await?;

    let old = fetch_contact(&state.pool, id).await?;
    let mut contact = old.clone();

    if let Some(first_name) = payload.first_name.as_deref() {
        contact.first_name = required("first_name", first_name)?;
    }
    if let Some(last_name) = payload.last_name.as_deref() {
        contact.last_name = required("last_name", last_name)?;
    }
    if payload.email.is_some() {
        contact.email = payload.email;
    }
    if payload.mobile.is_some() {
        contact.mobile = payload.mobile;
    }
    if payload.company.is_some() {
        contact.company = payload.company;
    }
    if payload.notes.is_some() {
        contact.notes = payload.notes;
    }

    contact.updated_on = Some(utc_now());
    contact.updated_by = Some(principal.user_id);

    // created_on/created_by are deliberately absent from the SET list.
    sqlx::query(
        "UPDATE contacts SET first_name = ?, last_name = ?, email = ?, mobile = ?, company = ?, notes = ?, updated_on = ?, updated_by = ? WHERE id = ?",
    )
    .bind(&contact.first_name)
    .bind(&contact.last_name)
    .bind(&contact.email)
    .bind(&contact.mobile)
    .bind(&contact.company)
    .bind(&contact.notes)
    .bind(contact.updated_on)
    .bind(contact.updated_by)
    .bind(contact.id)
    .execute(&state.pool)
    .await?;

    log_activity(
        &state.event_bus,
        "updated",
        Some(principal.user_id),
        &contact,
        Some(&old),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(contact))
}

#[utoipa::path(
    delete,
    path = "/contacts/{id}",
    tag = "Contacts",
    params(("id" = Uuid, Path, description = "Contact id")),
    responses((status = 204, description = "Contact deleted")),
    security(("bearerAuth" = []))
)]
pub async fn delete_contact(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.authz.authorize(Some(&principal), policies::CONTACTS_DELETE).await?;

    let contact = fetch_contact(&state.pool, id).await?;

    let affected = sqlx::query("DELETE FROM contacts WHERE id = ?")
        .bind(id)
        .execute(&state.pool)
        .await?;

    if affected.rows_affected() == 0 {
        return Err(AppError::not_found("contact not found"));
    }

    log_activity(
        &state.event_bus,
        "deleted",
        Some(principal.user_id),
        &contact,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

async fn fetch_contact(pool: &SqlitePool, contact_id: Uuid) -> AppResult<Contact> {
    let sql = format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?");
    sqlx::query_as::<_, Contact>(&sql)
        .bind(contact_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("contact not found"))
}
