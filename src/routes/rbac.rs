//! RBAC Admin API Routes
//!
//! Endpoints for managing roles, permissions, and user-role assignments.
//! Each endpoint is guarded by `<action>_roles` or `<action>_permissions`,
//! every mutation is recorded in the audit log with Critical severity and
//! drops the affected cached principals.

use std::collections::BTreeSet;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get},
    Json, Router,
};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{
    actions, permission_name, require_permission, resources, CurrentPrincipal, IdentityStore, SqliteIdentityStore,
    WILDCARD,
};
use crate::errors::{constraint_error, AppError, AppResult};
use crate::extract::AppJson;
use crate::events::{record, RequestContext};
use crate::models::rbac::*;
use crate::utils::utc_now;

const ROLE_COLUMNS: &str = "id, name, description, is_system, created_at, updated_at";
const PERMISSION_COLUMNS: &str = "id, name, resource, action, description, created_at, updated_at";

// =============================================================================
// ROUTER
// =============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        // Roles
        .route("/roles", get(list_roles).post(create_role))
        .route("/roles/:role_id", get(get_role).put(update_role).delete(delete_role))
        .route("/roles/:role_id/permissions", get(get_role_permissions).post(assign_permission_to_role))
        .route(
            "/roles/:role_id/permissions/:permission_id",
            delete(remove_permission_from_role),
        )
        // Permissions
        .route("/permissions", get(list_permissions).post(create_permission))
        .route("/permissions/:permission_id", delete(delete_permission))
        // User role assignments
        .route("/users/:user_id/roles", get(get_user_roles).post(assign_role_to_user))
        .route("/users/:user_id/roles/:assignment_id", delete(revoke_role_from_user))
        // Effective permissions (computed)
        .route("/users/:user_id/effective-permissions", get(get_effective_permissions))
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
        (status = 403, description = "Missing read_roles"),
    ),
    security(("bearerAuth" = []), ("cookieAuth" = []))
)]
pub async fn list_roles(State(state): State<AppState>, principal: CurrentPrincipal) -> AppResult<Json<Vec<Role>>> {
    require_permission(&principal, resources::ROLES, actions::READ)?;

    let rows = sqlx::query_as::<_, DbRole>(&format!("SELECT {ROLE_COLUMNS} FROM roles ORDER BY name"))
        .fetch_all(&state.pool)
        .await?;

    let roles = rows.into_iter().map(Role::try_from).collect::<Result<Vec<_>, _>>()?;
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
        (status = 403, description = "Missing create_roles"),
        (status = 409, description = "Role name already exists"),
    ),
    security(("bearerAuth" = []), ("cookieAuth" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    headers: HeaderMap,
    AppJson(req): AppJson<RoleCreateRequest>,
) -> AppResult<(StatusCode, Json<Role>)> {
    require_permission(&principal, resources::ROLES, actions::CREATE)?;

    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("role name is required"));
    }

    let now = utc_now();
    let role = Role {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: req.description,
        is_system: false,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO roles (id, name, description, is_system, created_at, updated_at) VALUES (?, ?, ?, 0, ?, ?)",
    )
    .bind(role.id.to_string())
    .bind(&role.name)
    .bind(&role.description)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await
    .map_err(|err| constraint_error(err, "role name already exists"))?;

    record(
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
    security(("bearerAuth" = []), ("cookieAuth" = []))
)]
pub async fn get_role(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    Path(role_id): Path<Uuid>,
) -> AppResult<Json<Role>> {
    require_permission(&principal, resources::ROLES, actions::READ)?;
    Ok(Json(fetch_role(&state.pool, role_id).await?))
}

/// Rename or redescribe a role. System roles keep their name.
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
        (status = 409, description = "Name taken, or renaming a system role"),
    ),
    security(("bearerAuth" = []), ("cookieAuth" = []))
)]
pub async fn update_role(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    headers: HeaderMap,
    Path(role_id): Path<Uuid>,
    AppJson(req): AppJson<RoleUpdateRequest>,
) -> AppResult<Json<Role>> {
    require_permission(&principal, resources::ROLES, actions::UPDATE)?;

    let old = fetch_role(&state.pool, role_id).await?;
    let mut role = old.clone();

    if let Some(name) = req.name.as_deref().map(str::trim) {
        if name.is_empty() {
            return Err(AppError::bad_request("role name cannot be empty"));
        }
        if old.is_system && name != old.name {
            return Err(AppError::conflict("system roles cannot be renamed"));
        }
        role.name = name.to_string();
    }
    if let Some(description) = req.description {
        role.description = Some(description);
    }
    role.updated_at = utc_now();

    sqlx::query("UPDATE roles SET name = ?, description = ?, updated_at = ? WHERE id = ?")
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.updated_at)
        .bind(role.id.to_string())
        .execute(&state.pool)
        .await
        .map_err(|err| constraint_error(err, "role name already exists"))?;

    record(
        &state.event_bus,
        "updated",
        Some(principal.user_id),
        &role,
        Some(&old),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(role))
}

/// Delete a role
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
        (status = 409, description = "System role, or role with assignment history"),
    ),
    security(("bearerAuth" = []), ("cookieAuth" = []))
)]
pub async fn delete_role(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    headers: HeaderMap,
    Path(role_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    require_permission(&principal, resources::ROLES, actions::DELETE)?;

    let role = fetch_role(&state.pool, role_id).await?;
    if role.is_system {
        return Err(AppError::conflict("system roles cannot be deleted"));
    }

    // Assignment rows are history; a role that was ever assigned stays.
    let assignments: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM user_roles WHERE role_id = ?")
        .bind(role_id.to_string())
        .fetch_one(&state.pool)
        .await?;
    if assignments > 0 {
        return Err(AppError::conflict("role has assignment history and cannot be deleted"));
    }

    let mut tx = state.pool.begin().await?;
    sqlx::query("DELETE FROM role_permissions WHERE role_id = ?")
        .bind(role_id.to_string())
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM roles WHERE id = ?")
        .bind(role_id.to_string())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    state.principal_cache.invalidate_all();

    record(
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

/// Permissions linked to a role
#[utoipa::path(
    get,
    path = "/rbac/roles/{role_id}/permissions",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    responses(
        (status = 200, description = "Permissions of the role", body = Vec<Permission>),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []), ("cookieAuth" = []))
)]
pub async fn get_role_permissions(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    Path(role_id): Path<Uuid>,
) -> AppResult<Json<Vec<Permission>>> {
    require_permission(&principal, resources::ROLES, actions::READ)?;
    fetch_role(&state.pool, role_id).await?;

    let rows = sqlx::query_as::<_, DbPermission>(
        r#"
        SELECT p.id, p.name, p.resource, p.action, p.description, p.created_at, p.updated_at
        FROM permissions p
        INNER JOIN role_permissions rp ON rp.permission_id = p.id
        WHERE rp.role_id = ?
        ORDER BY p.name
        "#,
    )
    .bind(role_id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let permissions = rows.into_iter().map(Permission::try_from).collect::<Result<Vec<_>, _>>()?;
    Ok(Json(permissions))
}

/// Link a permission to a role
#[utoipa::path(
    post,
    path = "/rbac/roles/{role_id}/permissions",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
    ),
    request_body = AssignPermissionToRoleRequest,
    responses(
        (status = 201, description = "Permission linked", body = RolePermission),
        (status = 404, description = "Role or permission not found"),
        (status = 409, description = "Already linked"),
    ),
    security(("bearerAuth" = []), ("cookieAuth" = []))
)]
pub async fn assign_permission_to_role(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    headers: HeaderMap,
    Path(role_id): Path<Uuid>,
    AppJson(req): AppJson<AssignPermissionToRoleRequest>,
) -> AppResult<(StatusCode, Json<RolePermission>)> {
    require_permission(&principal, resources::ROLES, actions::UPDATE)?;

    fetch_role(&state.pool, role_id).await?;
    fetch_permission(&state.pool, req.permission_id).await?;

    let link = RolePermission {
        role_id,
        permission_id: req.permission_id,
        created_at: utc_now(),
    };

    sqlx::query("INSERT INTO role_permissions (role_id, permission_id, created_at) VALUES (?, ?, ?)")
        .bind(link.role_id.to_string())
        .bind(link.permission_id.to_string())
        .bind(link.created_at)
        .execute(&state.pool)
        .await
        .map_err(|err| constraint_error(err, "permission already linked to role"))?;

    state.principal_cache.invalidate_all();

    record(
        &state.event_bus,
        "linked",
        Some(principal.user_id),
        &link,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(link)))
}

/// Unlink a permission from a role
#[utoipa::path(
    delete,
    path = "/rbac/roles/{role_id}/permissions/{permission_id}",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
        ("permission_id" = Uuid, Path, description = "Permission ID"),
    ),
    responses(
        (status = 204, description = "Permission unlinked"),
        (status = 404, description = "Link not found"),
    ),
    security(("bearerAuth" = []), ("cookieAuth" = []))
)]
pub async fn remove_permission_from_role(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    headers: HeaderMap,
    Path((role_id, permission_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    require_permission(&principal, resources::ROLES, actions::UPDATE)?;

    let removed: Option<chrono::DateTime<chrono::Utc>> = sqlx::query_scalar(
        "DELETE FROM role_permissions WHERE role_id = ? AND permission_id = ? RETURNING created_at",
    )
    .bind(role_id.to_string())
    .bind(permission_id.to_string())
    .fetch_optional(&state.pool)
    .await?;

    let created_at = removed.ok_or_else(|| AppError::not_found("permission is not linked to role"))?;

    state.principal_cache.invalidate_all();

    let link = RolePermission {
        role_id,
        permission_id,
        created_at,
    };
    record(
        &state.event_bus,
        "unlinked",
        Some(principal.user_id),
        &link,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// PERMISSION ENDPOINTS
// =============================================================================

/// List all permissions
#[utoipa::path(
    get,
    path = "/rbac/permissions",
    tag = "RBAC",
    responses(
        (status = 200, description = "List of permissions", body = Vec<Permission>),
        (status = 403, description = "Missing read_permissions"),
    ),
    security(("bearerAuth" = []), ("cookieAuth" = []))
)]
pub async fn list_permissions(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
) -> AppResult<Json<Vec<Permission>>> {
    require_permission(&principal, resources::PERMISSIONS, actions::READ)?;

    let rows = sqlx::query_as::<_, DbPermission>(&format!(
        "SELECT {PERMISSION_COLUMNS} FROM permissions ORDER BY resource, action"
    ))
    .fetch_all(&state.pool)
    .await?;

    let permissions = rows.into_iter().map(Permission::try_from).collect::<Result<Vec<_>, _>>()?;
    Ok(Json(permissions))
}

/// Create a permission named `<action>_<resource>`
#[utoipa::path(
    post,
    path = "/rbac/permissions",
    tag = "RBAC",
    request_body = PermissionCreateRequest,
    responses(
        (status = 201, description = "Permission created", body = Permission),
        (status = 400, description = "Invalid resource or action"),
        (status = 409, description = "Permission already exists"),
    ),
    security(("bearerAuth" = []), ("cookieAuth" = []))
)]
pub async fn create_permission(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    headers: HeaderMap,
    AppJson(req): AppJson<PermissionCreateRequest>,
) -> AppResult<(StatusCode, Json<Permission>)> {
    require_permission(&principal, resources::PERMISSIONS, actions::CREATE)?;

    let resource = req.resource.trim().to_lowercase();
    let action = req.action.trim().to_lowercase();
    let name = permission_name_for(&resource, &action)?;

    let now = utc_now();
    let permission = Permission {
        id: Uuid::new_v4(),
        name,
        resource,
        action,
        description: req.description,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO permissions (id, name, resource, action, description, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(permission.id.to_string())
    .bind(&permission.name)
    .bind(&permission.resource)
    .bind(&permission.action)
    .bind(&permission.description)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await
    .map_err(|err| constraint_error(err, "permission already exists"))?;

    record(
        &state.event_bus,
        "created",
        Some(principal.user_id),
        &permission,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(permission)))
}

/// Delete a permission and unlink it from every role
#[utoipa::path(
    delete,
    path = "/rbac/permissions/{permission_id}",
    tag = "RBAC",
    params(
        ("permission_id" = Uuid, Path, description = "Permission ID"),
    ),
    responses(
        (status = 204, description = "Permission deleted"),
        (status = 404, description = "Permission not found"),
    ),
    security(("bearerAuth" = []), ("cookieAuth" = []))
)]
pub async fn delete_permission(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    headers: HeaderMap,
    Path(permission_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    require_permission(&principal, resources::PERMISSIONS, actions::DELETE)?;

    let permission = fetch_permission(&state.pool, permission_id).await?;

    let mut tx = state.pool.begin().await?;
    sqlx::query("DELETE FROM role_permissions WHERE permission_id = ?")
        .bind(permission_id.to_string())
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM permissions WHERE id = ?")
        .bind(permission_id.to_string())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    state.principal_cache.invalidate_all();

    record(
        &state.event_bus,
        "deleted",
        Some(principal.user_id),
        &permission,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// USER-ROLE ENDPOINTS
// =============================================================================

/// All assignments of a user, revoked and expired ones included
#[utoipa::path(
    get,
    path = "/rbac/users/{user_id}/roles",
    tag = "RBAC",
    params(
        ("user_id" = Uuid, Path, description = "User ID"),
    ),
    responses(
        (status = 200, description = "Assignment history, newest first", body = Vec<UserRole>),
        (status = 404, description = "User not found"),
    ),
    security(("bearerAuth" = []), ("cookieAuth" = []))
)]
pub async fn get_user_roles(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<Vec<UserRole>>> {
    require_permission(&principal, resources::ROLES, actions::READ)?;
    ensure_user_exists(&state.pool, user_id).await?;

    let rows = sqlx::query_as::<_, DbUserRole>(&format!(
        "SELECT {USER_ROLE_COLUMNS} FROM user_roles ur \
         INNER JOIN roles r ON r.id = ur.role_id \
         WHERE ur.user_id = ? ORDER BY ur.assigned_at DESC, ur.id"
    ))
    .bind(user_id.to_string())
    .fetch_all(&state.pool)
    .await?;

    let assignments = rows.into_iter().map(UserRole::try_from).collect::<Result<Vec<_>, _>>()?;
    Ok(Json(assignments))
}

/// Assign a role to a user. Every call adds a new assignment row.
#[utoipa::path(
    post,
    path = "/rbac/users/{user_id}/roles",
    tag = "RBAC",
    params(
        ("user_id" = Uuid, Path, description = "User ID"),
    ),
    request_body = AssignRoleRequest,
    responses(
        (status = 201, description = "Role assigned", body = UserRole),
        (status = 400, description = "Expiry in the past"),
        (status = 404, description = "User or role not found"),
    ),
    security(("bearerAuth" = []), ("cookieAuth" = []))
)]
pub async fn assign_role_to_user(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
    AppJson(req): AppJson<AssignRoleRequest>,
) -> AppResult<(StatusCode, Json<UserRole>)> {
    require_permission(&principal, resources::ROLES, actions::UPDATE)?;

    ensure_user_exists(&state.pool, user_id).await?;
    let role = fetch_role(&state.pool, req.role_id).await?;

    let now = utc_now();
    if req.expires_at.is_some_and(|expires_at| expires_at <= now) {
        return Err(AppError::bad_request("expires_at must be in the future"));
    }

    let assignment = UserRole {
        id: Uuid::new_v4(),
        user_id,
        role_id: role.id,
        role_name: role.name,
        assigned_by: Some(principal.user_id),
        assigned_at: now,
        expires_at: req.expires_at,
        is_active: true,
        revoked_at: None,
        revoked_by: None,
    };

    sqlx::query(
        "INSERT INTO user_roles (id, user_id, role_id, assigned_by, assigned_at, expires_at, is_active) \
         VALUES (?, ?, ?, ?, ?, ?, 1)",
    )
    .bind(assignment.id.to_string())
    .bind(assignment.user_id.to_string())
    .bind(assignment.role_id.to_string())
    .bind(principal.user_id.to_string())
    .bind(assignment.assigned_at)
    .bind(assignment.expires_at)
    .execute(&state.pool)
    .await?;

    state.principal_cache.invalidate(&user_id).await;

    record(
        &state.event_bus,
        "assigned",
        Some(principal.user_id),
        &assignment,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(assignment)))
}

/// Revoke one assignment. The row is kept; revoking twice is a no-op.
#[utoipa::path(
    delete,
    path = "/rbac/users/{user_id}/roles/{assignment_id}",
    tag = "RBAC",
    params(
        ("user_id" = Uuid, Path, description = "User ID"),
        ("assignment_id" = Uuid, Path, description = "Assignment ID"),
    ),
    responses(
        (status = 204, description = "Assignment revoked, or already inactive"),
        (status = 404, description = "Assignment not found for this user"),
    ),
    security(("bearerAuth" = []), ("cookieAuth" = []))
)]
pub async fn revoke_role_from_user(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    headers: HeaderMap,
    Path((user_id, assignment_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    require_permission(&principal, resources::ROLES, actions::UPDATE)?;

    let old = fetch_assignment(&state.pool, user_id, assignment_id).await?;
    if !old.is_active {
        return Ok(StatusCode::NO_CONTENT);
    }

    let now = utc_now();
    let updated = sqlx::query(
        "UPDATE user_roles SET is_active = 0, revoked_at = ?, revoked_by = ? WHERE id = ? AND is_active = 1",
    )
    .bind(now)
    .bind(principal.user_id.to_string())
    .bind(assignment_id.to_string())
    .execute(&state.pool)
    .await?;

    state.principal_cache.invalidate(&user_id).await;

    // A concurrent revoke got there first.
    if updated.rows_affected() == 0 {
        return Ok(StatusCode::NO_CONTENT);
    }

    let revoked = UserRole {
        is_active: false,
        revoked_at: Some(now),
        revoked_by: Some(principal.user_id),
        ..old.clone()
    };
    record(
        &state.event_bus,
        "revoked",
        Some(principal.user_id),
        &revoked,
        Some(&old),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// EFFECTIVE PERMISSIONS
// =============================================================================

/// Get computed effective permissions for a user
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
    security(("bearerAuth" = []), ("cookieAuth" = []))
)]
pub async fn get_effective_permissions(
    State(state): State<AppState>,
    principal: CurrentPrincipal,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<EffectivePermissions>> {
    require_permission(&principal, resources::ROLES, actions::READ)?;
    ensure_user_exists(&state.pool, user_id).await?;

    // Same query the resolver uses, so this view cannot drift from enforcement.
    let now = utc_now();
    let assignments = SqliteIdentityStore::new(state.pool.clone())
        .find_active_role_assignments(user_id, now)
        .await?;

    let effective = assignments.iter().filter(|assignment| assignment.is_effective_at(now));

    let roles: BTreeSet<String> = effective.clone().map(|assignment| assignment.role_name.clone()).collect();
    let permissions: BTreeSet<String> = effective
        .flat_map(|assignment| assignment.permissions.iter().cloned())
        .collect();

    Ok(Json(EffectivePermissions {
        user_id,
        roles: roles.into_iter().collect(),
        permissions: permissions.into_iter().collect(),
    }))
}

// =============================================================================
// HELPERS
// =============================================================================

/// `<action>_<resource>`, or `*` when both parts are `*`.
///
/// The action never contains `_`, so the first underscore of a name always
/// separates the two parts.
fn permission_name_for(resource: &str, action: &str) -> AppResult<String> {
    if resource == WILDCARD && action == WILDCARD {
        return Ok(WILDCARD.to_string());
    }

    let valid_resource = !resource.is_empty() && resource.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_resource {
        return Err(AppError::bad_request(
            "resource must be non-empty and use only letters, digits and underscores",
        ));
    }

    let valid_action = !action.is_empty() && action.chars().all(|c| c.is_ascii_alphanumeric());
    if !valid_action {
        return Err(AppError::bad_request("action must be non-empty and use only letters and digits"));
    }

    Ok(permission_name(resource, action))
}

async fn fetch_role(pool: &SqlitePool, role_id: Uuid) -> AppResult<Role> {
    let row = sqlx::query_as::<_, DbRole>(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = ?"))
        .bind(role_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("role not found"))?;

    Ok(Role::try_from(row)?)
}

async fn fetch_permission(pool: &SqlitePool, permission_id: Uuid) -> AppResult<Permission> {
    let row = sqlx::query_as::<_, DbPermission>(&format!("SELECT {PERMISSION_COLUMNS} FROM permissions WHERE id = ?"))
        .bind(permission_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("permission not found"))?;

    Ok(Permission::try_from(row)?)
}

async fn fetch_assignment(pool: &SqlitePool, user_id: Uuid, assignment_id: Uuid) -> AppResult<UserRole> {
    let row = sqlx::query_as::<_, DbUserRole>(&format!(
        "SELECT {USER_ROLE_COLUMNS} FROM user_roles ur \
         INNER JOIN roles r ON r.id = ur.role_id \
         WHERE ur.id = ? AND ur.user_id = ?"
    ))
    .bind(assignment_id.to_string())
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("assignment not found"))?;

    Ok(UserRole::try_from(row)?)
}

async fn ensure_user_exists(pool: &SqlitePool, user_id: Uuid) -> AppResult<()> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM users WHERE id = ?")
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await?;

    exists.map(|_| ()).ok_or_else(|| AppError::not_found("user not found"))
}
