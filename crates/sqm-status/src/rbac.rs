//! Role-based permission matrix.
//!
//! Permissions are a table of grants, one row per role. Widening a role or
//! adding one is a table edit; no call site branches on a role name.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::graph::{is_legal_transition, Edge};
use crate::vocabulary::QueueStatus;
use crate::vocabulary::QueueStatus::{Cancelled, Processing, Serving, Waiting};

/// Staff roles that may request status changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Admin,
    Cashier,
    Sales,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::SuperAdmin, Role::Admin, Role::Cashier, Role::Sales];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::Admin => "admin",
            Role::Cashier => "cashier",
            Role::Sales => "sales",
        }
    }

    /// Case-insensitive parse; surrounding whitespace is ignored.
    pub fn parse(s: &str) -> Option<Self> {
        let folded = s.trim().to_lowercase();
        Self::ALL.into_iter().find(|r| r.as_str() == folded)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Grant table
// ---------------------------------------------------------------------------

enum Grant {
    /// Every legal edge of the graph.
    AnyLegal,
    /// Exactly these edges.
    Edges(&'static [Edge]),
}

impl Grant {
    fn permits(&self, from: QueueStatus, to: QueueStatus) -> bool {
        match self {
            Grant::AnyLegal => true,
            Grant::Edges(edges) => edges.contains(&(from, to)),
        }
    }
}

const CASHIER_EDGES: &[Edge] = &[
    (Waiting, Serving),
    (Serving, Processing),
    (Waiting, Cancelled),
    (Serving, Cancelled),
    (Processing, Cancelled),
];

const PERMISSIONS: &[(Role, Grant)] = &[
    (Role::SuperAdmin, Grant::AnyLegal),
    (Role::Admin, Grant::AnyLegal),
    (Role::Cashier, Grant::Edges(CASHIER_EDGES)),
    (Role::Sales, Grant::Edges(&[])),
];

/// `true` when `role` may take the legal edge `from → to`. Illegal edges are
/// never allowed, for any role.
pub fn is_allowed_for_role(role: Role, from: QueueStatus, to: QueueStatus) -> bool {
    if !is_legal_transition(from, to) {
        return false;
    }
    PERMISSIONS
        .iter()
        .find(|(r, _)| *r == role)
        .map(|(_, grant)| grant.permits(from, to))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Combined check
// ---------------------------------------------------------------------------

/// Outcome of checking a requested transition against graph and matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    /// Not an edge of the graph. Reported before any role consideration.
    Illegal,
    /// A legal edge the role is not granted.
    Denied,
}

/// Check graph legality first, then the role grant.
///
/// `role = None` skips the role check. Only trusted internal callers may
/// pass `None`; externally reachable entry points always resolve a role.
pub fn check_transition(role: Option<Role>, from: QueueStatus, to: QueueStatus) -> Verdict {
    if !is_legal_transition(from, to) {
        return Verdict::Illegal;
    }
    match role {
        None => Verdict::Allowed,
        Some(r) if is_allowed_for_role(r, from, to) => Verdict::Allowed,
        Some(_) => Verdict::Denied,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::LEGAL_EDGES;

    #[test]
    fn admins_hold_every_legal_edge() {
        for role in [Role::SuperAdmin, Role::Admin] {
            for (from, to) in LEGAL_EDGES {
                assert!(is_allowed_for_role(role, *from, *to), "{role}: {from}->{to}");
            }
        }
    }

    #[test]
    fn cashier_cannot_complete_or_fast_track() {
        assert!(is_allowed_for_role(Role::Cashier, Waiting, Serving));
        assert!(is_allowed_for_role(Role::Cashier, Serving, Processing));
        assert!(!is_allowed_for_role(
            Role::Cashier,
            Processing,
            QueueStatus::Completed
        ));
        assert!(!is_allowed_for_role(Role::Cashier, Waiting, Processing));
    }

    #[test]
    fn cashier_may_cancel_any_non_terminal() {
        for s in QueueStatus::ALL.into_iter().filter(|s| !s.is_terminal()) {
            assert!(is_allowed_for_role(Role::Cashier, s, Cancelled), "{s}");
        }
    }

    #[test]
    fn sales_holds_nothing() {
        for (from, to) in LEGAL_EDGES {
            assert!(!is_allowed_for_role(Role::Sales, *from, *to));
        }
    }

    #[test]
    fn cashier_grants_are_a_subset_of_the_graph() {
        for (from, to) in CASHIER_EDGES {
            assert!(is_legal_transition(*from, *to), "{from}->{to}");
        }
    }

    #[test]
    fn illegal_edges_report_illegal_not_denied() {
        let v = check_transition(Some(Role::Sales), QueueStatus::Completed, Processing);
        assert_eq!(v, Verdict::Illegal);
        let v = check_transition(Some(Role::Sales), Waiting, Serving);
        assert_eq!(v, Verdict::Denied);
    }

    #[test]
    fn missing_role_is_unrestricted_but_still_graph_bound() {
        assert_eq!(check_transition(None, Waiting, Processing), Verdict::Allowed);
        assert_eq!(check_transition(None, Cancelled, Waiting), Verdict::Illegal);
    }

    #[test]
    fn role_parse_is_case_insensitive() {
        assert_eq!(Role::parse(" Super_Admin "), Some(Role::SuperAdmin));
        assert_eq!(Role::parse("CASHIER"), Some(Role::Cashier));
        assert_eq!(Role::parse("manager"), None);
    }
}
