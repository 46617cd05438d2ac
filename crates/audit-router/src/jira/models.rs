//! Jira entities as seen by the router.

use serde::{Deserialize, Serialize};

/// Account id used when a Jira user could not be resolved.
pub const UNKNOWN_USER: &str = "unknown";

/// Key given to issues that were only pretended into existence in dry-run mode.
pub const DRY_RUN_ISSUE_KEY: &str = "DRY-RUN-0000";

/// A Jira user reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JiraUser {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub account_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing)]
    pub display_name: String,
}

impl JiraUser {
    /// The placeholder identity for an unresolved user.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            account_id: UNKNOWN_USER.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.account_id == UNKNOWN_USER
    }
}

/// Jira wiki-markup mention for an account id.
#[must_use]
pub fn mention(account_id: &str) -> String {
    format!("[~accountid:{account_id}]")
}

/// Fields for a ticket about to be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewIssue {
    pub project_key: String,
    pub issue_type: String,
    pub summary: String,
    pub description: String,
    pub reporter: JiraUser,
    pub assignee: Option<JiraUser>,
    pub labels: Vec<String>,
}

/// Handle to an existing (or dry-run) issue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRef {
    pub id: String,
    #[serde(default)]
    pub key: String,
}

impl TicketRef {
    #[must_use]
    pub fn dry_run() -> Self {
        Self {
            id: DRY_RUN_ISSUE_KEY.to_string(),
            key: DRY_RUN_ISSUE_KEY.to_string(),
        }
    }

    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        self.id == DRY_RUN_ISSUE_KEY
    }
}

/// An issue as returned by `GET /issue/{id}` or embedded in a webhook.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub fields: IssueFields,
}

impl Issue {
    #[must_use]
    pub fn ticket_ref(&self) -> TicketRef {
        TicketRef {
            id: self.id.clone(),
            key: self.key.clone(),
        }
    }

    /// Account id of the current assignee, if any.
    #[must_use]
    pub fn assignee_id(&self) -> Option<&str> {
        self.fields
            .assignee
            .as_ref()
            .map(|a| a.account_id.as_str())
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueFields {
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub assignee: Option<JiraUser>,
}

/// A workflow transition available on an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default)]
    pub author: JiraUser,
    #[serde(default)]
    pub body: String,
}

/// Payload of a Jira issue webhook.
///
/// Events without a comment deserialize with an empty author and never
/// drive a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    #[serde(default)]
    pub webhook_event: Option<String>,
    pub issue: Issue,
    #[serde(default)]
    pub comment: Comment,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notification_event_from_jira_payload() {
        let payload = json!({
            "timestamp": 1_700_000_000_000_i64,
            "webhookEvent": "comment_created",
            "issue": {
                "id": "10001",
                "key": "OHSS-42",
                "fields": {
                    "labels": ["compliance-audit-router/managed"],
                    "assignee": { "accountId": "abc", "displayName": "Some SRE" },
                    "summary": "ignored"
                }
            },
            "comment": {
                "author": { "accountId": "abc", "name": "sre" },
                "body": "Justified because of an incident."
            }
        });

        let event: NotificationEvent = serde_json::from_value(payload).unwrap();
        assert_eq!(event.webhook_event.as_deref(), Some("comment_created"));
        assert_eq!(event.issue.key, "OHSS-42");
        assert_eq!(event.issue.assignee_id(), Some("abc"));
        assert_eq!(event.comment.author.account_id, "abc");
    }

    #[test]
    fn test_unassigned_issue_has_no_assignee_id() {
        let issue: Issue = serde_json::from_value(json!({
            "id": "1", "key": "OHSS-1", "fields": { "assignee": null }
        }))
        .unwrap();
        assert_eq!(issue.assignee_id(), None);
    }

    #[test]
    fn test_user_serializes_only_identifiers() {
        let user = JiraUser {
            account_id: "abc".to_string(),
            name: String::new(),
            display_name: "Display".to_string(),
        };
        assert_eq!(serde_json::to_value(&user).unwrap(), json!({ "accountId": "abc" }));
    }

    #[test]
    fn test_mention_and_placeholders() {
        assert_eq!(mention("abc"), "[~accountid:abc]");
        assert!(JiraUser::unknown().is_unknown());
        assert!(TicketRef::dry_run().is_dry_run());
    }
}
