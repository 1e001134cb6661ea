use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::authz::{StoreError, TicketFilters, TicketScope};
use crate::db::row_parsers::{opt_uuid_field, uuid_field};
use crate::errors::AppError;
use crate::events::Loggable;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Pending,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Pending => "pending",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
        }
    }
}

impl FromStr for TicketStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(TicketStatus::Open),
            "in_progress" => Ok(TicketStatus::InProgress),
            "pending" => Ok(TicketStatus::Pending),
            "resolved" => Ok(TicketStatus::Resolved),
            "closed" => Ok(TicketStatus::Closed),
            other => Err(StoreError::Malformed(format!("unknown ticket status '{other}'"))),
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TicketPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketPriority::Low => "low",
            TicketPriority::Medium => "medium",
            TicketPriority::High => "high",
            TicketPriority::Urgent => "urgent",
        }
    }
}

impl FromStr for TicketPriority {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(TicketPriority::Low),
            "medium" => Ok(TicketPriority::Medium),
            "high" => Ok(TicketPriority::High),
            "urgent" => Ok(TicketPriority::Urgent),
            other => Err(StoreError::Malformed(format!("unknown ticket priority '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Ticket {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub organization_id: Option<Uuid>,
    pub department_id: Option<Uuid>,
    pub created_by: Uuid,
    pub assigned_to: Option<Uuid>,
    pub client_responsible_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    pub fn scope(&self) -> TicketScope {
        TicketScope {
            id: self.id,
            organization_id: self.organization_id,
            department_id: self.department_id,
            created_by: self.created_by,
            assigned_to: self.assigned_to,
            client_responsible_id: self.client_responsible_id,
            status: self.status.as_str().to_string(),
            priority: self.priority.as_str().to_string(),
        }
    }
}

impl Loggable for Ticket {
    fn entity_type() -> &'static str { "ticket" }
    fn subject_id(&self) -> Uuid { self.id }
}

pub const TICKET_COLUMNS: &str = "id, title, description, status, priority, organization_id, department_id, \
     created_by, assigned_to, client_responsible_id, created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
pub struct DbTicket {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub priority: String,
    pub organization_id: Option<String>,
    pub department_id: Option<String>,
    pub created_by: String,
    pub assigned_to: Option<String>,
    pub client_responsible_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbTicket> for Ticket {
    type Error = StoreError;

    fn try_from(db: DbTicket) -> Result<Self, Self::Error> {
        Ok(Ticket {
            id: uuid_field(&db.id, "tickets.id")?,
            title: db.title,
            description: db.description,
            status: db.status.parse()?,
            priority: db.priority.parse()?,
            organization_id: opt_uuid_field(db.organization_id.as_deref(), "tickets.organization_id")?,
            department_id: opt_uuid_field(db.department_id.as_deref(), "tickets.department_id")?,
            created_by: uuid_field(&db.created_by, "tickets.created_by")?,
            assigned_to: opt_uuid_field(db.assigned_to.as_deref(), "tickets.assigned_to")?,
            client_responsible_id: opt_uuid_field(
                db.client_responsible_id.as_deref(),
                "tickets.client_responsible_id",
            )?,
            created_at: db.created_at,
            updated_at: db.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TicketCreateRequest {
    #[schema(example = "Printer on fire")]
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<TicketPriority>,
    /// Defaults to the caller's organization
    pub organization_id: Option<Uuid>,
    /// Defaults to the caller's department
    pub department_id: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
    pub client_responsible_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TicketUpdateRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TicketStatus>,
    pub priority: Option<TicketPriority>,
    pub assigned_to: Option<Uuid>,
    pub client_responsible_id: Option<Uuid>,
}

/// Query string for `GET /tickets`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TicketListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub organization_id: Option<Uuid>,
    pub department_id: Option<Uuid>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub assigned_to: Option<Uuid>,
    pub created_by: Option<Uuid>,
}

impl TicketListQuery {
    pub fn filters(&self) -> TicketFilters {
        TicketFilters {
            organization_id: self.organization_id,
            department_id: self.department_id,
            status: self.status.clone(),
            priority: self.priority.clone(),
            assigned_to: self.assigned_to,
            created_by: self.created_by,
            ticket_id: None,
        }
    }

    /// `(page, limit, offset)` with defaults applied.
    pub fn pagination(&self) -> Result<(u32, u32, u32), AppError> {
        let page = self.page.unwrap_or(DEFAULT_PAGE);
        if page == 0 {
            return Err(AppError::bad_request("page starts at 1"));
        }
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = (page - 1).saturating_mul(limit);
        Ok((page, limit, offset))
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TicketPage {
    pub tickets: Vec<Ticket>,
    /// Matching tickets across all pages
    pub total: i64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults_and_clamps() {
        let query = TicketListQuery::default();
        assert_eq!(query.pagination().unwrap(), (1, 10, 0));

        let query = TicketListQuery {
            page: Some(3),
            limit: Some(500),
            ..TicketListQuery::default()
        };
        assert_eq!(query.pagination().unwrap(), (3, 100, 200));

        let query = TicketListQuery {
            page: Some(0),
            ..TicketListQuery::default()
        };
        assert!(query.pagination().is_err());
    }

    #[test]
    fn status_round_trips_through_its_tag() {
        for status in [
            TicketStatus::Open,
            TicketStatus::InProgress,
            TicketStatus::Pending,
            TicketStatus::Resolved,
            TicketStatus::Closed,
        ] {
            assert_eq!(status.as_str().parse::<TicketStatus>().unwrap(), status);
        }
        assert!("reopened".parse::<TicketStatus>().is_err());
    }
}
