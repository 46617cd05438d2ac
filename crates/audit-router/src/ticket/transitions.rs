//! Configured workflow transitions.
//!
//! The router knows three roles only. The state graph behind them belongs to
//! the Jira workflow and transition names are matched verbatim.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::jira::Transition;

/// Which configured transition a ticket should take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionRole {
    /// Applied right after a ticket is created.
    Initial,
    /// The assigned SRE has answered.
    Sre,
    /// The SRE's manager has answered.
    Manager,
}

impl TransitionRole {
    pub const ALL: [Self; 3] = [Self::Initial, Self::Sre, Self::Manager];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Sre => "sre",
            Self::Manager => "manager",
        }
    }
}

impl fmt::Display for TransitionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transition names keyed by role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionTable {
    pub initial: String,
    pub sre: String,
    pub manager: String,
}

impl TransitionTable {
    /// The configured name for `role`, or `None` when left blank.
    #[must_use]
    pub fn name(&self, role: TransitionRole) -> Option<&str> {
        let name = match role {
            TransitionRole::Initial => &self.initial,
            TransitionRole::Sre => &self.sre,
            TransitionRole::Manager => &self.manager,
        };
        (!name.is_empty()).then_some(name.as_str())
    }

    #[must_use]
    pub fn unset_roles(&self) -> Vec<TransitionRole> {
        TransitionRole::ALL
            .into_iter()
            .filter(|role| self.name(*role).is_none())
            .collect()
    }
}

/// Find the id of the transition called `name`.
#[must_use]
pub fn find_transition_id<'a>(transitions: &'a [Transition], name: &str) -> Option<&'a str> {
    transitions
        .iter()
        .find(|t| t.name == name)
        .map(|t| t.id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TransitionTable {
        TransitionTable {
            initial: "Pending SRE".to_string(),
            sre: "Pending Manager".to_string(),
            manager: String::new(),
        }
    }

    #[test]
    fn test_name_by_role() {
        let t = table();
        assert_eq!(t.name(TransitionRole::Initial), Some("Pending SRE"));
        assert_eq!(t.name(TransitionRole::Sre), Some("Pending Manager"));
        assert_eq!(t.name(TransitionRole::Manager), None);
        assert_eq!(t.unset_roles(), vec![TransitionRole::Manager]);
    }

    #[test]
    fn test_find_transition_id_exact_match() {
        let available = vec![
            Transition {
                id: "11".to_string(),
                name: "Pending SRE".to_string(),
            },
            Transition {
                id: "21".to_string(),
                name: "Pending Manager".to_string(),
            },
        ];
        assert_eq!(find_transition_id(&available, "Pending Manager"), Some("21"));
        assert_eq!(find_transition_id(&available, "pending manager"), None);
        assert_eq!(find_transition_id(&[], "Pending SRE"), None);
    }

    #[test]
    fn test_role_display() {
        assert_eq!(TransitionRole::Sre.to_string(), "sre");
    }
}
