//! Ticket visibility scoping.
//!
//! A principal falls into exactly one tier, chosen top-down:
//!
//! | priority | tier         | condition                                         | predicate                                  |
//! |----------|--------------|---------------------------------------------------|--------------------------------------------|
//! | 1        | unrestricted | super user or `can_cross_organizations`           | all, optionally `organization_id = filter` |
//! | 2        | organization | `can_cross_departments` and an organization       | own organization, optional department      |
//! | 3        | department   | a department                                      | own department                             |
//! | 4        | self-owned   | fallback                                          | creator OR assignee OR client responsible  |
//!
//! Explicit filters are ANDed onto the tier predicate and can only narrow it.

use sqlx::{QueryBuilder, Sqlite};
use uuid::Uuid;

use super::Principal;

/// Filters a caller may pass when listing tickets.
#[derive(Debug, Clone, Default)]
pub struct TicketFilters {
    /// Only honored for principals allowed to cross organizations
    pub organization_id: Option<Uuid>,
    /// Only honored for principals allowed to cross departments
    pub department_id: Option<Uuid>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub assigned_to: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub ticket_id: Option<Uuid>,
}

impl TicketFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_ticket(ticket_id: Uuid) -> Self {
        Self {
            ticket_id: Some(ticket_id),
            ..Self::default()
        }
    }
}

/// The scope-relevant attributes of a ticket.
#[derive(Debug, Clone)]
pub struct TicketScope {
    pub id: Uuid,
    pub organization_id: Option<Uuid>,
    pub department_id: Option<Uuid>,
    pub created_by: Uuid,
    pub assigned_to: Option<Uuid>,
    pub client_responsible_id: Option<Uuid>,
    pub status: String,
    pub priority: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierPredicate {
    Unrestricted { organization_id: Option<Uuid> },
    Organization { organization_id: Uuid, department_id: Option<Uuid> },
    Department { department_id: Uuid },
    SelfOwned { principal_id: Uuid },
}

impl TierPredicate {
    pub fn name(&self) -> &'static str {
        match self {
            TierPredicate::Unrestricted { .. } => "unrestricted",
            TierPredicate::Organization { .. } => "organization",
            TierPredicate::Department { .. } => "department",
            TierPredicate::SelfOwned { .. } => "self_owned",
        }
    }

    fn admits(&self, ticket: &TicketScope) -> bool {
        match self {
            TierPredicate::Unrestricted { organization_id } => organization_id
                .map_or(true, |org| ticket.organization_id == Some(org)),
            TierPredicate::Organization {
                organization_id,
                department_id,
            } => {
                ticket.organization_id == Some(*organization_id)
                    && department_id.map_or(true, |dept| ticket.department_id == Some(dept))
            }
            TierPredicate::Department { department_id } => ticket.department_id == Some(*department_id),
            TierPredicate::SelfOwned { principal_id } => {
                ticket.created_by == *principal_id
                    || ticket.assigned_to == Some(*principal_id)
                    || ticket.client_responsible_id == Some(*principal_id)
            }
        }
    }

    fn push_sql(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        match self {
            TierPredicate::Unrestricted { organization_id: None } => {
                qb.push("1 = 1");
            }
            TierPredicate::Unrestricted {
                organization_id: Some(org),
            } => {
                qb.push("organization_id = ").push_bind(org.to_string());
            }
            TierPredicate::Organization {
                organization_id,
                department_id,
            } => {
                qb.push("organization_id = ").push_bind(organization_id.to_string());
                if let Some(dept) = department_id {
                    qb.push(" AND department_id = ").push_bind(dept.to_string());
                }
            }
            TierPredicate::Department { department_id } => {
                qb.push("department_id = ").push_bind(department_id.to_string());
            }
            TierPredicate::SelfOwned { principal_id } => {
                let id = principal_id.to_string();
                qb.push("(created_by = ")
                    .push_bind(id.clone())
                    .push(" OR assigned_to = ")
                    .push_bind(id.clone())
                    .push(" OR client_responsible_id = ")
                    .push_bind(id)
                    .push(")");
            }
        }
    }
}

/// Extra conditions ANDed onto the tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Narrowing {
    Id(Uuid),
    Status(String),
    Priority(String),
    AssignedTo(Uuid),
    CreatedBy(Uuid),
}

impl Narrowing {
    fn admits(&self, ticket: &TicketScope) -> bool {
        match self {
            Narrowing::Id(id) => ticket.id == *id,
            Narrowing::Status(status) => ticket.status == *status,
            Narrowing::Priority(priority) => ticket.priority == *priority,
            Narrowing::AssignedTo(user) => ticket.assigned_to == Some(*user),
            Narrowing::CreatedBy(user) => ticket.created_by == *user,
        }
    }

    fn push_sql(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        match self {
            Narrowing::Id(id) => qb.push("id = ").push_bind(id.to_string()),
            Narrowing::Status(status) => qb.push("status = ").push_bind(status.clone()),
            Narrowing::Priority(priority) => qb.push("priority = ").push_bind(priority.clone()),
            Narrowing::AssignedTo(user) => qb.push("assigned_to = ").push_bind(user.to_string()),
            Narrowing::CreatedBy(user) => qb.push("created_by = ").push_bind(user.to_string()),
        };
    }
}

/// The filter the data layer must apply: `tier AND narrowing...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopePredicate {
    pub tier: TierPredicate,
    pub narrowing: Vec<Narrowing>,
}

impl ScopePredicate {
    pub fn matches(&self, ticket: &TicketScope) -> bool {
        self.tier.admits(ticket) && self.narrowing.iter().all(|n| n.admits(ticket))
    }

    /// Appends ` WHERE <predicate>` with bound parameters.
    pub fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        qb.push(" WHERE ");
        self.tier.push_sql(qb);
        for narrowing in &self.narrowing {
            qb.push(" AND ");
            narrowing.push_sql(qb);
        }
    }
}

pub fn build_scope(principal: &Principal, filters: &TicketFilters) -> ScopePredicate {
    let tier = select_tier(principal, filters);

    let mut narrowing = Vec::new();
    if let Some(id) = filters.ticket_id {
        narrowing.push(Narrowing::Id(id));
    }
    if let Some(status) = &filters.status {
        narrowing.push(Narrowing::Status(status.clone()));
    }
    if let Some(priority) = &filters.priority {
        narrowing.push(Narrowing::Priority(priority.clone()));
    }
    if let Some(user) = filters.assigned_to {
        narrowing.push(Narrowing::AssignedTo(user));
    }
    if let Some(user) = filters.created_by {
        narrowing.push(Narrowing::CreatedBy(user));
    }

    tracing::debug!(
        identity_id = %principal.user_id,
        tier = tier.name(),
        narrowing = narrowing.len(),
        "ticket scope resolved"
    );

    ScopePredicate { tier, narrowing }
}

fn select_tier(principal: &Principal, filters: &TicketFilters) -> TierPredicate {
    if principal.is_super_user || principal.can_cross_organizations {
        return TierPredicate::Unrestricted {
            organization_id: filters.organization_id,
        };
    }

    if principal.can_cross_departments {
        if let Some(organization_id) = principal.organization_id {
            return TierPredicate::Organization {
                organization_id,
                department_id: filters.department_id,
            };
        }
    }

    // Department filters are ignored here: the principal stays in their own department.
    if let Some(department_id) = principal.department_id {
        return TierPredicate::Department { department_id };
    }

    TierPredicate::SelfOwned {
        principal_id: principal.user_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::RoleTier;

    fn ticket(org: Option<Uuid>, dept: Option<Uuid>, created_by: Uuid) -> TicketScope {
        TicketScope {
            id: Uuid::new_v4(),
            organization_id: org,
            department_id: dept,
            created_by,
            assigned_to: None,
            client_responsible_id: None,
            status: "open".to_string(),
            priority: "medium".to_string(),
        }
    }

    /// Two organizations with two departments each, tickets spread across
    /// them plus a few unassigned ones.
    struct World {
        org_a: Uuid,
        org_b: Uuid,
        dept_a1: Uuid,
        dept_a2: Uuid,
        tickets: Vec<TicketScope>,
    }

    fn world() -> World {
        let (org_a, org_b) = (Uuid::new_v4(), Uuid::new_v4());
        let (dept_a1, dept_a2, dept_b1) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let someone = Uuid::new_v4();

        let mut tickets = vec![
            ticket(Some(org_a), Some(dept_a1), someone),
            ticket(Some(org_a), Some(dept_a2), someone),
            ticket(Some(org_a), None, someone),
            ticket(Some(org_b), Some(dept_b1), someone),
            ticket(None, None, someone),
        ];
        tickets[1].status = "closed".to_string();
        tickets[3].priority = "high".to_string();

        World {
            org_a,
            org_b,
            dept_a1,
            dept_a2,
            tickets,
        }
    }

    fn visible(scope: &ScopePredicate, tickets: &[TicketScope]) -> usize {
        tickets.iter().filter(|t| scope.matches(t)).count()
    }

    #[test]
    fn super_user_with_org_filter_sees_that_org_only() {
        let w = world();
        let principal = Principal::new(Uuid::new_v4(), RoleTier::SuperAdmin);
        let filters = TicketFilters {
            organization_id: Some(w.org_b),
            ..TicketFilters::new()
        };

        let scope = build_scope(&principal, &filters);
        assert_eq!(
            scope.tier,
            TierPredicate::Unrestricted {
                organization_id: Some(w.org_b)
            }
        );
        assert_eq!(visible(&scope, &w.tickets), 1);

        let unfiltered = build_scope(&principal, &TicketFilters::new());
        assert_eq!(visible(&unfiltered, &w.tickets), w.tickets.len());
    }

    #[test]
    fn highest_tier_wins_when_several_apply() {
        let w = world();
        let principal = Principal::new(Uuid::new_v4(), RoleTier::SystemAdmin)
            .with_organization(Some(w.org_a))
            .with_department(Some(w.dept_a1));

        let scope = build_scope(&principal, &TicketFilters::new());
        assert_eq!(scope.tier, TierPredicate::Unrestricted { organization_id: None });

        let manager = Principal::new(Uuid::new_v4(), RoleTier::CompanyManager)
            .with_organization(Some(w.org_a))
            .with_department(Some(w.dept_a1));
        let scope = build_scope(&manager, &TicketFilters::new());
        assert_eq!(
            scope.tier,
            TierPredicate::Organization {
                organization_id: w.org_a,
                department_id: None
            }
        );
        assert_eq!(visible(&scope, &w.tickets), 3);
    }

    #[test]
    fn organization_tier_honors_department_filter_but_not_org_filter() {
        let w = world();
        let admin = Principal::new(Uuid::new_v4(), RoleTier::CompanyAdmin).with_organization(Some(w.org_a));

        let by_dept = TicketFilters {
            department_id: Some(w.dept_a2),
            ..TicketFilters::new()
        };
        assert_eq!(visible(&build_scope(&admin, &by_dept), &w.tickets), 1);

        let other_org = TicketFilters {
            organization_id: Some(w.org_b),
            ..TicketFilters::new()
        };
        let scope = build_scope(&admin, &other_org);
        assert!(w
            .tickets
            .iter()
            .filter(|t| scope.matches(t))
            .all(|t| t.organization_id == Some(w.org_a)));
    }

    #[test]
    fn department_tier_ignores_department_filter() {
        let w = world();
        let agent = Principal::new(Uuid::new_v4(), RoleTier::Agent)
            .with_organization(Some(w.org_a))
            .with_department(Some(w.dept_a1));

        let filters = TicketFilters {
            department_id: Some(w.dept_a2),
            ..TicketFilters::new()
        };
        let scope = build_scope(&agent, &filters);
        assert_eq!(scope.tier, TierPredicate::Department { department_id: w.dept_a1 });
        assert_eq!(visible(&scope, &w.tickets), 1);
    }

    #[test]
    fn agent_with_org_but_no_department_falls_back_to_ownership() {
        let w = world();
        let agent_id = Uuid::new_v4();
        let agent = Principal::new(agent_id, RoleTier::Agent).with_organization(Some(w.org_a));

        let scope = build_scope(&agent, &TicketFilters::new());
        assert_eq!(scope.tier, TierPredicate::SelfOwned { principal_id: agent_id });
        assert_eq!(visible(&scope, &w.tickets), 0);
    }

    #[test]
    fn ownership_is_creator_or_assignee_or_client_responsible() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let principal = Principal::new(me, RoleTier::Client);
        let scope = build_scope(&principal, &TicketFilters::new());

        let mut created = ticket(Some(Uuid::new_v4()), Some(Uuid::new_v4()), me);
        created.status = "closed".into();
        let mut assigned = ticket(None, None, other);
        assigned.assigned_to = Some(me);
        let mut responsible = ticket(Some(Uuid::new_v4()), None, other);
        responsible.client_responsible_id = Some(me);
        responsible.priority = "urgent".into();
        let mut unrelated = ticket(None, None, other);
        unrelated.assigned_to = Some(other);

        assert!(scope.matches(&created));
        assert!(scope.matches(&assigned));
        assert!(scope.matches(&responsible));
        assert!(!scope.matches(&unrelated));
    }

    #[test]
    fn filters_only_narrow_the_tier() {
        let w = world();
        let principals = [
            Principal::new(Uuid::new_v4(), RoleTier::SuperAdmin),
            Principal::new(Uuid::new_v4(), RoleTier::CompanyAdmin).with_organization(Some(w.org_a)),
            Principal::new(Uuid::new_v4(), RoleTier::Agent).with_department(Some(w.dept_a1)),
            Principal::new(Uuid::new_v4(), RoleTier::Client),
        ];
        let filter_sets = [
            TicketFilters {
                status: Some("closed".into()),
                ..TicketFilters::new()
            },
            TicketFilters {
                priority: Some("high".into()),
                ..TicketFilters::new()
            },
            TicketFilters {
                organization_id: Some(w.org_a),
                department_id: Some(w.dept_a2),
                ..TicketFilters::new()
            },
            TicketFilters::for_ticket(w.tickets[0].id),
        ];

        for principal in &principals {
            let base = build_scope(principal, &TicketFilters::new());
            for filters in &filter_sets {
                let narrowed = build_scope(principal, filters);
                for t in &w.tickets {
                    if narrowed.matches(t) {
                        assert!(base.matches(t), "filter widened scope for {:?}", principal.role);
                    }
                }
            }
        }
    }

    #[test]
    fn sql_rendering_binds_every_value() {
        let me = Uuid::new_v4();
        let principal = Principal::new(me, RoleTier::Client);
        let filters = TicketFilters {
            status: Some("open".into()),
            ..TicketFilters::new()
        };
        let scope = build_scope(&principal, &filters);

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT id FROM tickets");
        scope.push_where(&mut qb);
        assert_eq!(
            qb.sql(),
            "SELECT id FROM tickets WHERE (created_by = ? OR assigned_to = ? OR client_responsible_id = ?) AND status = ?"
        );
        assert!(!qb.sql().contains(&me.to_string()));
    }

    #[test]
    fn sql_for_unrestricted_without_filters_is_a_tautology() {
        let principal = Principal::new(Uuid::new_v4(), RoleTier::SuperAdmin);
        let scope = build_scope(&principal, &TicketFilters::new());

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(1) FROM tickets");
        scope.push_where(&mut qb);
        assert_eq!(qb.sql(), "SELECT COUNT(1) FROM tickets WHERE 1 = 1");
    }

    #[test]
    fn org_filter_cannot_move_a_department_principal() {
        let w = world();
        let agent = Principal::new(Uuid::new_v4(), RoleTier::Agent).with_department(Some(w.dept_a2));
        let scope = build_scope(
            &agent,
            &TicketFilters {
                organization_id: Some(w.org_b),
                ..TicketFilters::new()
            },
        );
        assert_eq!(scope.tier, TierPredicate::Department { department_id: w.dept_a2 });
        assert!(!w.tickets.iter().any(|t| scope.matches(t) && t.organization_id == Some(w.org_b)));
    }
}
