//! Ticket endpoints. Every handler checks the permission guard before it
//! touches the store, and every read or write goes through the principal's
//! scope predicate; a ticket outside scope is indistinguishable from a
//! missing one.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{actions, build_scope, require_permission, resources, CurrentPrincipal, Principal, TicketFilters};
use crate::errors::{constraint_error, AppError, AppResult};
use crate::extract::AppJson;
use crate::events::{record, RequestContext};
use crate::models::ticket::{
    DbTicket, Ticket, TicketCreateRequest, TicketListQuery, TicketPage, TicketPriority, TicketStatus,
    TicketUpdateRequest, TICKET_COLUMNS,
};
use crate::utils::utc_now;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_tickets).post(create_ticket))
        .route("/:id", get(get_ticket).put(update_ticket).delete(delete_ticket))
}

#[utoipa::path(
    get,
    path = "/tickets",
    tag = "Tickets",
    params(TicketListQuery),
    responses(
        (status = 200, description = "Tickets visible to the caller, newest first", body = TicketPage),
        (status = 401, description = "No valid session"),
        (status = 403, description = "Missing read_tickets")
    ),
    security(("bearerAuth" = []), ("cookieAuth" = []))
)]
pub async fn list_tickets(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    Query(query): Query<TicketListQuery>,
) -> AppResult<Json<TicketPage>> {
    require_permission(&principal, resources::TICKETS, actions::READ)?;

    let (page, limit, offset) = query.pagination()?;
    let scope = build_scope(&principal, &query.filters());

    let mut count: QueryBuilder<'_, Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM tickets");
    scope.push_where(&mut count);
    let total = count.build_query_scalar::<i64>().fetch_one(&state.pool).await?;

    let mut select: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!("SELECT {TICKET_COLUMNS} FROM tickets"));
    scope.push_where(&mut select);
    select
        .push(" ORDER BY created_at DESC, id DESC LIMIT ")
        .push_bind(i64::from(limit))
        .push(" OFFSET ")
        .push_bind(i64::from(offset));

    let rows = select.build_query_as::<DbTicket>().fetch_all(&state.pool).await?;
    let tickets = rows
        .into_iter()
        .map(Ticket::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    let total_pages = (total.max(0) as u64).div_ceil(u64::from(limit)) as u32;

    Ok(Json(TicketPage {
        tickets,
        total,
        page,
        limit,
        total_pages,
    }))
}

#[utoipa::path(
    get,
    path = "/tickets/{id}",
    tag = "Tickets",
    params(("id" = Uuid, Path, description = "Ticket ID")),
    responses(
        (status = 200, description = "Ticket", body = Ticket),
        (status = 403, description = "Missing read_tickets"),
        (status = 404, description = "Ticket not found or outside scope")
    ),
    security(("bearerAuth" = []), ("cookieAuth" = []))
)]
pub async fn get_ticket(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Ticket>> {
    require_permission(&principal, resources::TICKETS, actions::READ)?;
    let ticket = fetch_scoped(&state.pool, &principal, id).await?;
    Ok(Json(ticket))
}

#[utoipa::path(
    post,
    path = "/tickets",
    tag = "Tickets",
    request_body = TicketCreateRequest,
    responses(
        (status = 201, description = "Ticket created", body = Ticket),
        (status = 400, description = "Department does not belong to the organization"),
        (status = 403, description = "Missing create_tickets or target outside the caller's tenancy")
    ),
    security(("bearerAuth" = []), ("cookieAuth" = []))
)]
pub async fn create_ticket(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    headers: HeaderMap,
    AppJson(req): AppJson<TicketCreateRequest>,
) -> AppResult<(StatusCode, Json<Ticket>)> {
    require_permission(&principal, resources::TICKETS, actions::CREATE)?;

    let title = req.title.trim();
    if title.is_empty() {
        return Err(AppError::bad_request("title is required"));
    }

    let organization_id = req.organization_id.or(principal.organization_id);
    if !principal.can_cross_organizations && organization_id != principal.organization_id {
        return Err(AppError::forbidden("cannot create tickets in another organization"));
    }

    let department_id = req.department_id.or(principal.department_id);
    if !principal.can_cross_departments && department_id != principal.department_id {
        return Err(AppError::forbidden("cannot create tickets in another department"));
    }

    if let Some(department_id) = department_id {
        ensure_department_in_organization(&state.pool, department_id, organization_id).await?;
    }

    let now = utc_now();
    let ticket = Ticket {
        id: Uuid::new_v4(),
        title: title.to_string(),
        description: req.description,
        status: TicketStatus::Open,
        priority: req.priority.unwrap_or(TicketPriority::Medium),
        organization_id,
        department_id,
        created_by: principal.user_id,
        assigned_to: req.assigned_to,
        client_responsible_id: req.client_responsible_id,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO tickets (id, title, description, status, priority, organization_id, department_id, \
         created_by, assigned_to, client_responsible_id, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(ticket.id.to_string())
    .bind(&ticket.title)
    .bind(&ticket.description)
    .bind(ticket.status.as_str())
    .bind(ticket.priority.as_str())
    .bind(ticket.organization_id.map(|id| id.to_string()))
    .bind(ticket.department_id.map(|id| id.to_string()))
    .bind(ticket.created_by.to_string())
    .bind(ticket.assigned_to.map(|id| id.to_string()))
    .bind(ticket.client_responsible_id.map(|id| id.to_string()))
    .bind(ticket.created_at)
    .bind(ticket.updated_at)
    .execute(&state.pool)
    .await
    .map_err(|err| constraint_error(err, "ticket already exists"))?;

    record(
        &state.event_bus,
        "created",
        Some(principal.user_id),
        &ticket,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(ticket)))
}

#[utoipa::path(
    put,
    path = "/tickets/{id}",
    tag = "Tickets",
    params(("id" = Uuid, Path, description = "Ticket ID")),
    request_body = TicketUpdateRequest,
    responses(
        (status = 200, description = "Ticket updated", body = Ticket),
        (status = 403, description = "Missing update_tickets"),
        (status = 404, description = "Ticket not found or outside scope")
    ),
    security(("bearerAuth" = []), ("cookieAuth" = []))
)]
pub async fn update_ticket(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    AppJson(req): AppJson<TicketUpdateRequest>,
) -> AppResult<Json<Ticket>> {
    require_permission(&principal, resources::TICKETS, actions::UPDATE)?;

    let old = fetch_scoped(&state.pool, &principal, id).await?;
    let mut ticket = old.clone();

    if let Some(title) = req.title {
        let title = title.trim();
        if title.is_empty() {
            return Err(AppError::bad_request("title cannot be empty"));
        }
        ticket.title = title.to_string();
    }
    if let Some(description) = req.description {
        ticket.description = Some(description);
    }
    if let Some(status) = req.status {
        ticket.status = status;
    }
    if let Some(priority) = req.priority {
        ticket.priority = priority;
    }
    if let Some(assigned_to) = req.assigned_to {
        ticket.assigned_to = Some(assigned_to);
    }
    if let Some(client_responsible_id) = req.client_responsible_id {
        ticket.client_responsible_id = Some(client_responsible_id);
    }
    ticket.updated_at = utc_now();

    sqlx::query(
        "UPDATE tickets SET title = ?, description = ?, status = ?, priority = ?, assigned_to = ?, \
         client_responsible_id = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&ticket.title)
    .bind(&ticket.description)
    .bind(ticket.status.as_str())
    .bind(ticket.priority.as_str())
    .bind(ticket.assigned_to.map(|id| id.to_string()))
    .bind(ticket.client_responsible_id.map(|id| id.to_string()))
    .bind(ticket.updated_at)
    .bind(ticket.id.to_string())
    .execute(&state.pool)
    .await
    .map_err(|err| constraint_error(err, "ticket conflicts with an existing one"))?;

    record(
        &state.event_bus,
        "updated",
        Some(principal.user_id),
        &ticket,
        Some(&old),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(ticket))
}

#[utoipa::path(
    delete,
    path = "/tickets/{id}",
    tag = "Tickets",
    params(("id" = Uuid, Path, description = "Ticket ID")),
    responses(
        (status = 204, description = "Ticket deleted"),
        (status = 403, description = "Missing delete_tickets"),
        (status = 404, description = "Ticket not found or outside scope")
    ),
    security(("bearerAuth" = []), ("cookieAuth" = []))
)]
pub async fn delete_ticket(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    require_permission(&principal, resources::TICKETS, actions::DELETE)?;

    let ticket = fetch_scoped(&state.pool, &principal, id).await?;

    sqlx::query("DELETE FROM tickets WHERE id = ?")
        .bind(ticket.id.to_string())
        .execute(&state.pool)
        .await?;

    record(
        &state.event_bus,
        "deleted",
        Some(principal.user_id),
        &ticket,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

async fn fetch_scoped(pool: &SqlitePool, principal: &Principal, id: Uuid) -> AppResult<Ticket> {
    let scope = build_scope(principal, &TicketFilters::for_ticket(id));

    let mut select: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!("SELECT {TICKET_COLUMNS} FROM tickets"));
    scope.push_where(&mut select);

    let row = select.build_query_as::<DbTicket>().fetch_optional(pool).await?;
    let row = row.ok_or_else(|| AppError::not_found("ticket not found"))?;
    let ticket = Ticket::try_from(row)?;

    // The SQL predicate and the in-memory one must agree
    if !scope.matches(&ticket.scope()) {
        tracing::warn!(ticket_id = %id, "ticket returned by the scoped query failed the scope check");
        return Err(AppError::not_found("ticket not found"));
    }

    Ok(ticket)
}

async fn ensure_department_in_organization(
    pool: &SqlitePool,
    department_id: Uuid,
    organization_id: Option<Uuid>,
) -> AppResult<()> {
    let owner: Option<String> = sqlx::query_scalar("SELECT organization_id FROM departments WHERE id = ?")
        .bind(department_id.to_string())
        .fetch_optional(pool)
        .await?;

    let owner = owner.ok_or_else(|| AppError::bad_request("unknown department"))?;
    if Some(owner) != organization_id.map(|id| id.to_string()) {
        return Err(AppError::bad_request("department does not belong to the ticket's organization"));
    }

    Ok(())
}
