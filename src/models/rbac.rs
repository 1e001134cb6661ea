use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::StoreError;
use crate::db::row_parsers::{opt_uuid_field, uuid_field};
use crate::events::{Loggable, Severity};

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Role {
    fn entity_type() -> &'static str { "role" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbRole {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbRole> for Role {
    type Error = StoreError;

    fn try_from(db: DbRole) -> Result<Self, Self::Error> {
        Ok(Role {
            id: uuid_field(&db.id, "roles.id")?,
            name: db.name,
            description: db.description,
            is_system: db.is_system,
            created_at: db.created_at,
            updated_at: db.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleCreateRequest {
    #[schema(example = "billing_agent")]
    pub name: String,
    #[schema(example = "Handles billing tickets")]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleUpdateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

// =============================================================================
// PERMISSION
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Permission {
    pub id: Uuid,
    /// `<action>_<resource>`, or `*`
    pub name: String,
    pub resource: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Permission {
    fn entity_type() -> &'static str { "permission" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbPermission {
    pub id: String,
    pub name: String,
    pub resource: String,
    pub action: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbPermission> for Permission {
    type Error = StoreError;

    fn try_from(db: DbPermission) -> Result<Self, Self::Error> {
        Ok(Permission {
            id: uuid_field(&db.id, "permissions.id")?,
            name: db.name,
            resource: db.resource,
            action: db.action,
            description: db.description,
            created_at: db.created_at,
            updated_at: db.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PermissionCreateRequest {
    #[schema(example = "tickets")]
    pub resource: String,
    #[schema(example = "export")]
    pub action: String,
    #[schema(example = "Export tickets as CSV")]
    pub description: Option<String>,
}

// =============================================================================
// ROLE-PERMISSION LINK
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RolePermission {
    pub role_id: Uuid,
    pub permission_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Loggable for RolePermission {
    fn entity_type() -> &'static str { "role_permission" }
    fn subject_id(&self) -> Uuid { self.role_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignPermissionToRoleRequest {
    pub permission_id: Uuid,
}

// =============================================================================
// USER-ROLE ASSIGNMENT
// =============================================================================

/// One assignment row. Rows are never deleted; revocation clears `is_active`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserRole {
    pub id: Uuid,
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub role_name: String,
    pub assigned_by: Option<Uuid>,
    pub assigned_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<Uuid>,
}

impl Loggable for UserRole {
    fn entity_type() -> &'static str { "user_role" }
    fn subject_id(&self) -> Uuid { self.user_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbUserRole {
    pub id: String,
    pub user_id: String,
    pub role_id: String,
    pub role_name: String,
    pub assigned_by: Option<String>,
    pub assigned_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<String>,
}

impl TryFrom<DbUserRole> for UserRole {
    type Error = StoreError;

    fn try_from(db: DbUserRole) -> Result<Self, Self::Error> {
        Ok(UserRole {
            id: uuid_field(&db.id, "user_roles.id")?,
            user_id: uuid_field(&db.user_id, "user_roles.user_id")?,
            role_id: uuid_field(&db.role_id, "user_roles.role_id")?,
            role_name: db.role_name,
            assigned_by: opt_uuid_field(db.assigned_by.as_deref(), "user_roles.assigned_by")?,
            assigned_at: db.assigned_at,
            expires_at: db.expires_at,
            is_active: db.is_active,
            revoked_at: db.revoked_at,
            revoked_by: opt_uuid_field(db.revoked_by.as_deref(), "user_roles.revoked_by")?,
        })
    }
}

pub const USER_ROLE_COLUMNS: &str = "ur.id, ur.user_id, ur.role_id, r.name AS role_name, ur.assigned_by, \
     ur.assigned_at, ur.expires_at, ur.is_active, ur.revoked_at, ur.revoked_by";

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignRoleRequest {
    pub role_id: Uuid,
    /// Optional end of the grant; omitted means open-ended
    pub expires_at: Option<DateTime<Utc>>,
}

// =============================================================================
// EFFECTIVE PERMISSIONS (computed)
// =============================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct EffectivePermissions {
    pub user_id: Uuid,
    /// Names of roles with at least one effective assignment
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}
