use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{RoleTier, StoreError};
use crate::db::row_parsers::{parse_opt_uuid, parse_uuid};

/// The stored identity a session points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub organization_id: Option<Uuid>,
    pub department_id: Option<Uuid>,
    pub role: RoleTier,
    pub is_active: bool,
}

/// One user-role row with the role's permission names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleAssignment {
    pub assignment_id: Uuid,
    pub role_id: Uuid,
    pub role_name: String,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub permissions: Vec<String>,
}

impl RoleAssignment {
    pub fn is_effective_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |expires_at| expires_at > now)
    }
}

/// Read side of the user/role/permission store used during authentication.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Identity behind a live (unrevoked, unexpired) session.
    async fn find_identity_by_session_id(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Identity>, StoreError>;

    /// Active, unexpired role assignments with their permissions.
    async fn find_active_role_assignments(
        &self,
        identity_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<RoleAssignment>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct SqliteIdentityStore {
    pool: SqlitePool,
}

impl SqliteIdentityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityStore for SqliteIdentityStore {
    async fn find_identity_by_session_id(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Identity>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT u.id, u.role, u.organization_id, u.department_id, u.is_active
            FROM sessions s
            INNER JOIN users u ON u.id = s.user_id
            WHERE s.id = ? AND s.revoked_at IS NULL AND s.expires_at > ?
            "#,
        )
        .bind(session_id.to_string())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let role: String = row.try_get("role")?;
        Ok(Some(Identity {
            id: parse_uuid(&row, "id")?,
            organization_id: parse_opt_uuid(&row, "organization_id")?,
            department_id: parse_opt_uuid(&row, "department_id")?,
            role: role.parse()?,
            is_active: row.try_get("is_active")?,
        }))
    }

    async fn find_active_role_assignments(
        &self,
        identity_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<RoleAssignment>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT ur.id AS assignment_id, ur.role_id, r.name AS role_name,
                   ur.is_active, ur.expires_at, p.name AS permission_name
            FROM user_roles ur
            INNER JOIN roles r ON r.id = ur.role_id
            LEFT JOIN role_permissions rp ON rp.role_id = r.id
            LEFT JOIN permissions p ON p.id = rp.permission_id
            WHERE ur.user_id = ?
              AND ur.is_active = 1
              AND (ur.expires_at IS NULL OR ur.expires_at > ?)
            ORDER BY ur.assigned_at, ur.id, p.name
            "#,
        )
        .bind(identity_id.to_string())
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut assignments: Vec<RoleAssignment> = Vec::new();
        for row in rows {
            let assignment_id = parse_uuid(&row, "assignment_id")?;
            let permission: Option<String> = row.try_get("permission_name")?;

            match assignments.last_mut() {
                Some(current) if current.assignment_id == assignment_id => {
                    current.permissions.extend(permission);
                }
                _ => assignments.push(RoleAssignment {
                    assignment_id,
                    role_id: parse_uuid(&row, "role_id")?,
                    role_name: row.try_get("role_name")?,
                    is_active: row.try_get("is_active")?,
                    expires_at: row.try_get("expires_at")?,
                    permissions: permission.into_iter().collect(),
                }),
            }
        }

        Ok(assignments)
    }
}
