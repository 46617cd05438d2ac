//! Correlation labels.
//!
//! The router keeps no state of its own. Who the SRE and the manager are for a
//! ticket is written into its labels at creation and read back from the live
//! issue whenever a comment arrives.

use super::transitions::TransitionRole;

pub const MANAGED_LABEL: &str = "compliance-audit-router/managed";
pub const SRE_LABEL_KEY: &str = "compliance-audit-router/sre";
pub const MANAGER_LABEL_KEY: &str = "compliance-audit-router/manager";

/// Labels attached to a ticket whose SRE was resolved.
#[must_use]
pub fn correlation_labels(sre_id: &str, manager_id: &str) -> Vec<String> {
    vec![
        MANAGED_LABEL.to_string(),
        format!("{SRE_LABEL_KEY}:{sre_id}"),
        format!("{MANAGER_LABEL_KEY}:{manager_id}"),
    ]
}

/// The SRE and manager account ids recovered from a ticket's labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Correlation {
    pub sre_id: Option<String>,
    pub manager_id: Option<String>,
}

impl Correlation {
    #[must_use]
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Self {
        let mut correlation = Self::default();
        for label in labels {
            let label = label.as_ref();
            if let Some(id) = label_value(label, SRE_LABEL_KEY) {
                correlation.sre_id = Some(id.to_string());
            } else if let Some(id) = label_value(label, MANAGER_LABEL_KEY) {
                correlation.manager_id = Some(id.to_string());
            }
        }
        correlation
    }

    /// Which transition a comment from `account_id` should trigger.
    #[must_use]
    pub fn role_of(&self, account_id: &str) -> Option<TransitionRole> {
        if self.sre_id.as_deref() == Some(account_id) {
            Some(TransitionRole::Sre)
        } else if self.manager_id.as_deref() == Some(account_id) {
            Some(TransitionRole::Manager)
        } else {
            None
        }
    }
}

fn label_value<'a>(label: &'a str, key: &str) -> Option<&'a str> {
    label
        .strip_prefix(key)
        .and_then(|rest| rest.strip_prefix(':'))
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_round_trip() {
        let labels = correlation_labels("557058:abc", "def");
        assert_eq!(labels[0], MANAGED_LABEL);

        let correlation = Correlation::from_labels(&labels);
        assert_eq!(correlation.sre_id.as_deref(), Some("557058:abc"));
        assert_eq!(correlation.manager_id.as_deref(), Some("def"));
    }

    #[test]
    fn test_unrelated_labels_ignored() {
        let correlation = Correlation::from_labels(&["triage", "compliance-audit-router/managed"]);
        assert_eq!(correlation, Correlation::default());
    }

    #[test]
    fn test_role_of() {
        let correlation = Correlation::from_labels(&correlation_labels("sre-1", "mgr-1"));
        assert_eq!(correlation.role_of("sre-1"), Some(TransitionRole::Sre));
        assert_eq!(correlation.role_of("mgr-1"), Some(TransitionRole::Manager));
        assert_eq!(correlation.role_of("someone"), None);
    }

    #[test]
    fn test_unknown_manager_still_parsed() {
        let correlation = Correlation::from_labels(&correlation_labels("sre-1", "unknown"));
        assert_eq!(correlation.manager_id.as_deref(), Some("unknown"));
    }
}
