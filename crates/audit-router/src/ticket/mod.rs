//! Ticket lifecycle engine.
//!
//! Creates compliance tickets and moves them through the three configured
//! workflow transitions. All correlation state lives on the ticket itself
//! (see [`labels`]), so every notification re-reads the live issue.

pub mod labels;
pub mod transitions;

use handlebars::{Handlebars, RenderError};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::jira::{
    mention, IssueTracker, JiraUser, NewIssue, NotificationEvent, TicketRef, TrackerError,
    UNKNOWN_USER,
};

pub use labels::{correlation_labels, Correlation};
pub use transitions::{find_transition_id, TransitionRole, TransitionTable};

/// Summary line of every ticket the router files.
pub const TICKET_SUMMARY: &str = "Compliance Alert: SRE Cluster Admin Elevation";

/// Transition id used when the ticket itself only exists in dry-run mode.
pub const DRY_RUN_TRANSITION_ID: &str = "dry-run-transition-id";

/// Errors from ticket creation and notification handling.
#[derive(Debug, Error)]
pub enum TicketError {
    #[error("failed to get Jira user for reporter: {0}")]
    Reporter(#[source] TrackerError),

    #[error("failed to create issue: {0}")]
    Create(#[source] TrackerError),

    #[error("issue {key} was created but the message template could not be rendered: {source}")]
    Template {
        key: String,
        #[source]
        source: RenderError,
    },

    #[error("issue {key} was successfully created but failed to apply initial comment: {source}")]
    Comment {
        key: String,
        #[source]
        source: TrackerError,
    },

    #[error("no transition configured for role {0}")]
    TransitionNotConfigured(TransitionRole),

    #[error("failed to fetch transitions for issue {key} (status {name}): {source}")]
    TransitionLookup {
        key: String,
        name: String,
        #[source]
        source: TrackerError,
    },

    #[error("did not find status {name} on issue {key}")]
    TransitionNotFound { key: String, name: String },

    #[error("failed to transition issue {key} to status {name}: {source}")]
    Transition {
        key: String,
        name: String,
        #[source]
        source: TrackerError,
    },

    #[error("failed to get issue {key} from jira webhook: {source}")]
    FetchIssue {
        key: String,
        #[source]
        source: TrackerError,
    },

    #[error("comment author {author} on issue {key} is neither the recorded SRE nor manager")]
    UnrecognizedCommenter { key: String, author: String },
}

/// Configuration values the engine reads.
#[derive(Debug, Clone)]
pub struct TicketSettings {
    pub dry_run: bool,
    pub verbose: bool,
    pub message_template: String,
    pub project_key: String,
    pub issue_type: String,
    pub transitions: TransitionTable,
}

impl TicketSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            dry_run: config.dry_run,
            verbose: config.verbose,
            message_template: config.message_template.clone(),
            project_key: config.jira.key.clone(),
            issue_type: config.jira.issue_type.clone(),
            transitions: config.jira.transitions.clone(),
        }
    }
}

/// What a notification led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// Not a comment from the current assignee.
    Ignored,
    Transitioned { role: TransitionRole, name: String },
}

/// Drives tickets through their lifecycle against one tracker connection.
pub struct TicketEngine {
    tracker: Arc<dyn IssueTracker>,
    settings: Arc<TicketSettings>,
}

impl TicketEngine {
    #[must_use]
    pub fn new(tracker: Arc<dyn IssueTracker>, settings: Arc<TicketSettings>) -> Self {
        Self { tracker, settings }
    }

    /// File a ticket for `description`, assign it to the SRE and post the
    /// guidance comment.
    ///
    /// Unresolvable usernames do not fail creation: the ticket is filed
    /// unassigned and unlabeled and has to be triaged by hand.
    #[instrument(skip(self, description), fields(dry_run = self.settings.dry_run))]
    pub async fn create(
        &self,
        sre_username: &str,
        manager_username: &str,
        description: &str,
    ) -> Result<TicketRef, TicketError> {
        let dry_run = self.settings.dry_run;
        if dry_run {
            info!("Dry-run mode: Jira side effects will be logged, not applied");
        }

        let reporter = self.tracker.who_am_i().await.map_err(TicketError::Reporter)?;

        let sre = self.resolve_user(sre_username).await;
        if sre.is_none() {
            warn!(
                username = sre_username,
                "Failed to fetch SRE's Jira account; the ticket will be created with no assignee and needs to be managed manually"
            );
        }
        let manager = self.resolve_user(manager_username).await;
        if manager.is_none() {
            warn!(username = manager_username, "Failed to fetch manager's Jira account");
        }

        let sre_id = sre.as_ref().map_or(UNKNOWN_USER, |u| u.account_id.as_str());
        let manager_id = manager.as_ref().map_or(UNKNOWN_USER, |u| u.account_id.as_str());

        let mut issue = NewIssue {
            project_key: self.settings.project_key.clone(),
            issue_type: self.settings.issue_type.clone(),
            summary: TICKET_SUMMARY.to_string(),
            description: description.to_string(),
            reporter,
            assignee: None,
            labels: Vec::new(),
        };
        if let Some(sre) = &sre {
            issue.assignee = Some(sre.clone());
            issue.labels = correlation_labels(sre_id, manager_id);
        }

        let ticket = if dry_run {
            info!(issue = ?issue, "Dry-run mode: would have created Jira ticket");
            TicketRef::dry_run()
        } else {
            self.tracker
                .create_issue(&issue)
                .await
                .map_err(TicketError::Create)?
        };
        info!(key = %ticket.key, "Created new issue");

        let comment = self
            .render_message(sre_id)
            .map_err(|source| TicketError::Template {
                key: ticket.key.clone(),
                source,
            })?;

        if dry_run {
            info!(key = %ticket.key, body = %comment, "Dry-run mode: would have added comment");
        } else {
            self.tracker
                .add_comment(&ticket.id, &comment)
                .await
                .map_err(|source| TicketError::Comment {
                    key: ticket.key.clone(),
                    source,
                })?;
        }
        info!(key = %ticket.key, "Initial comment left on issue");

        self.transition(&ticket, TransitionRole::Initial).await?;
        Ok(ticket)
    }

    /// React to a comment webhook.
    ///
    /// Only a comment from the issue's current assignee can move it; the
    /// assignee's role comes from the live issue's correlation labels.
    #[instrument(skip(self, event), fields(issue = %event.issue.key))]
    pub async fn handle_notification(
        &self,
        event: &NotificationEvent,
    ) -> Result<NotificationOutcome, TicketError> {
        let reference = if event.issue.id.is_empty() {
            &event.issue.key
        } else {
            &event.issue.id
        };

        let live = self
            .tracker
            .get_issue(reference)
            .await
            .map_err(|source| TicketError::FetchIssue {
                key: event.issue.key.clone(),
                source,
            })?;

        let correlation = Correlation::from_labels(&live.fields.labels);
        let author = event.comment.author.account_id.as_str();

        if author.is_empty() || live.assignee_id() != Some(author) {
            debug!(
                author,
                assignee = ?live.assignee_id(),
                "Comment is not from the current assignee; ignoring"
            );
            return Ok(NotificationOutcome::Ignored);
        }

        let role = correlation
            .role_of(author)
            .ok_or_else(|| TicketError::UnrecognizedCommenter {
                key: live.key.clone(),
                author: author.to_string(),
            })?;

        let name = self.transition(&live.ticket_ref(), role).await?;
        info!(
            key = %live.key,
            status = %name,
            author = %event.comment.author.name,
            "Updated ticket after comment"
        );
        Ok(NotificationOutcome::Transitioned { role, name })
    }

    /// Look up and apply the transition configured for `role`.
    async fn transition(
        &self,
        ticket: &TicketRef,
        role: TransitionRole,
    ) -> Result<String, TicketError> {
        let name = self
            .settings
            .transitions
            .name(role)
            .ok_or(TicketError::TransitionNotConfigured(role))?;

        // A dry-run ticket has nothing to look transitions up on.
        let transition_id = if ticket.is_dry_run() {
            info!(key = %ticket.key, "Dry-run mode: would have fetched transitions");
            DRY_RUN_TRANSITION_ID.to_string()
        } else {
            let available = self
                .tracker
                .list_transitions(&ticket.id)
                .await
                .map_err(|source| TicketError::TransitionLookup {
                    key: ticket.key.clone(),
                    name: name.to_string(),
                    source,
                })?;
            find_transition_id(&available, name)
                .ok_or_else(|| TicketError::TransitionNotFound {
                    key: ticket.key.clone(),
                    name: name.to_string(),
                })?
                .to_string()
        };

        if self.settings.dry_run {
            info!(key = %ticket.key, status = name, "Dry-run mode: would have transitioned ticket");
        } else {
            self.tracker
                .apply_transition(&ticket.id, &transition_id)
                .await
                .map_err(|source| TicketError::Transition {
                    key: ticket.key.clone(),
                    name: name.to_string(),
                    source,
                })?;
        }
        info!(key = %ticket.key, status = name, role = %role, "Issue transitioned");
        Ok(name.to_string())
    }

    async fn resolve_user(&self, username: &str) -> Option<JiraUser> {
        if username.is_empty() {
            if self.settings.verbose {
                debug!("Skipping Jira lookup for empty username");
            }
            return None;
        }
        match self.tracker.find_user_by_name(username).await {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(username, error = %e, "Jira user lookup failed");
                None
            }
        }
    }

    fn render_message(&self, sre_id: &str) -> Result<String, RenderError> {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::no_escape);

        handlebars
            .render_template(
                &self.settings.message_template,
                &json!({ "Username": mention(sre_id) }),
            )
            .inspect_err(|_| {
                if self.settings.verbose {
                    debug!(template = %self.settings.message_template, "Message template failed to render");
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MESSAGE_TEMPLATE;
    use crate::jira::testing::{Call, FailOn, RecordingTracker};
    use crate::jira::{Comment, Issue, IssueFields};

    fn settings(dry_run: bool) -> Arc<TicketSettings> {
        Arc::new(TicketSettings {
            dry_run,
            verbose: true,
            message_template: DEFAULT_MESSAGE_TEMPLATE.to_string(),
            project_key: "OHSS".to_string(),
            issue_type: "Task".to_string(),
            transitions: TransitionTable {
                initial: "Pending SRE".to_string(),
                sre: "Pending Manager".to_string(),
                manager: "Done".to_string(),
            },
        })
    }

    fn tracker() -> RecordingTracker {
        RecordingTracker::new()
            .with_user("jdoe", "sre-1")
            .with_user("boss", "mgr-1")
            .with_transition("11", "Pending SRE")
            .with_transition("21", "Pending Manager")
            .with_transition("31", "Done")
    }

    fn engine(tracker: &Arc<RecordingTracker>, dry_run: bool) -> TicketEngine {
        TicketEngine::new(tracker.clone(), settings(dry_run))
    }

    fn user(id: &str) -> JiraUser {
        JiraUser {
            account_id: id.to_string(),
            ..JiraUser::default()
        }
    }

    fn live_issue(assignee: Option<&str>) -> Issue {
        Issue {
            id: "10001".to_string(),
            key: "OHSS-1".to_string(),
            fields: IssueFields {
                labels: correlation_labels("sre-1", "mgr-1"),
                assignee: assignee.map(user),
            },
        }
    }

    fn comment_from(author: &str) -> NotificationEvent {
        NotificationEvent {
            webhook_event: Some("comment_created".to_string()),
            issue: Issue {
                id: "10001".to_string(),
                key: "OHSS-1".to_string(),
                fields: IssueFields::default(),
            },
            comment: Comment {
                author: user(author),
                body: "justification".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_create_assigns_labels_comments_and_transitions() {
        let tracker = Arc::new(tracker());
        let ticket = engine(&tracker, false)
            .create("jdoe", "boss", "description")
            .await
            .unwrap();
        assert_eq!(ticket.key, "OHSS-1");

        let created = tracker.created();
        assert_eq!(created.len(), 1);
        let issue = &created[0];
        assert_eq!(issue.summary, TICKET_SUMMARY);
        assert_eq!(issue.reporter.account_id, "router-bot");
        assert_eq!(issue.assignee.as_ref().unwrap().account_id, "sre-1");
        assert_eq!(
            issue.labels,
            vec![
                "compliance-audit-router/managed",
                "compliance-audit-router/sre:sre-1",
                "compliance-audit-router/manager:mgr-1"
            ]
        );

        let calls = tracker.calls();
        assert!(calls.contains(&Call::AddComment {
            issue_id: "10001".to_string(),
            body: "[~accountid:sre-1]\n\nThis action requires justification. \
                   Please provide the justification in the comments section below."
                .to_string(),
        }));
        assert_eq!(tracker.applied_transitions(), vec!["11"]);
    }

    #[tokio::test]
    async fn test_unresolved_sre_creates_unassigned_unlabeled_ticket() {
        let tracker = Arc::new(tracker());
        engine(&tracker, false)
            .create("nobody", "boss", "description")
            .await
            .unwrap();

        let issue = &tracker.created()[0];
        assert!(issue.assignee.is_none());
        assert!(issue.labels.is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_manager_labels_unknown() {
        let tracker = Arc::new(tracker());
        engine(&tracker, false)
            .create("jdoe", "", "description")
            .await
            .unwrap();

        let issue = &tracker.created()[0];
        assert!(issue
            .labels
            .contains(&"compliance-audit-router/manager:unknown".to_string()));
        assert!(!tracker.calls().contains(&Call::FindUser(String::new())));
    }

    #[tokio::test]
    async fn test_reporter_failure_is_fatal() {
        let tracker = Arc::new(tracker().failing(FailOn::WhoAmI));
        let err = engine(&tracker, false)
            .create("jdoe", "boss", "d")
            .await
            .unwrap_err();
        assert!(matches!(err, TicketError::Reporter(_)));
        assert!(tracker.created().is_empty());
    }

    #[tokio::test]
    async fn test_template_failure_after_create_is_an_error() {
        let tracker = Arc::new(tracker());
        let mut settings = (*settings(false)).clone();
        settings.message_template = "{{#each Username}}".to_string();
        let engine = TicketEngine::new(tracker.clone(), Arc::new(settings));

        let err = engine.create("jdoe", "boss", "d").await.unwrap_err();
        assert!(matches!(err, TicketError::Template { ref key, .. } if key == "OHSS-1"));
        assert_eq!(tracker.created().len(), 1);
        assert!(!tracker.calls().iter().any(|c| matches!(c, Call::AddComment { .. })));
    }

    #[tokio::test]
    async fn test_missing_initial_transition_is_an_error() {
        let tracker = Arc::new(RecordingTracker::new().with_user("jdoe", "sre-1"));
        let err = engine(&tracker, false)
            .create("jdoe", "boss", "d")
            .await
            .unwrap_err();
        assert!(matches!(err, TicketError::TransitionNotFound { ref name, .. } if name == "Pending SRE"));
        assert!(tracker.applied_transitions().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_create_skips_mutations_but_resolves_users() {
        let tracker = Arc::new(tracker());
        let ticket = engine(&tracker, true)
            .create("jdoe", "boss", "d")
            .await
            .unwrap();
        assert!(ticket.is_dry_run());

        let calls = tracker.calls();
        assert!(!calls.iter().any(Call::is_mutating));
        assert!(calls.contains(&Call::WhoAmI));
        assert!(calls.contains(&Call::FindUser("jdoe".to_string())));
        assert!(calls.contains(&Call::FindUser("boss".to_string())));
    }

    #[tokio::test]
    async fn test_dry_run_still_fails_on_unconfigured_transition() {
        let tracker = Arc::new(tracker());
        let mut settings = (*settings(true)).clone();
        settings.transitions.initial = String::new();
        let engine = TicketEngine::new(tracker.clone(), Arc::new(settings));

        let err = engine.create("jdoe", "boss", "d").await.unwrap_err();
        assert!(matches!(
            err,
            TicketError::TransitionNotConfigured(TransitionRole::Initial)
        ));
    }

    #[tokio::test]
    async fn test_comment_from_sre_moves_to_sre_transition() {
        let tracker = Arc::new(tracker().with_issue(live_issue(Some("sre-1"))));
        let outcome = engine(&tracker, false)
            .handle_notification(&comment_from("sre-1"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            NotificationOutcome::Transitioned {
                role: TransitionRole::Sre,
                name: "Pending Manager".to_string()
            }
        );
        assert_eq!(tracker.applied_transitions(), vec!["21"]);
    }

    #[tokio::test]
    async fn test_comment_from_manager_moves_to_manager_transition() {
        let tracker = Arc::new(tracker().with_issue(live_issue(Some("mgr-1"))));
        let outcome = engine(&tracker, false)
            .handle_notification(&comment_from("mgr-1"))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            NotificationOutcome::Transitioned { role: TransitionRole::Manager, .. }
        ));
        assert_eq!(tracker.applied_transitions(), vec!["31"]);
    }

    #[tokio::test]
    async fn test_comment_from_non_assignee_is_ignored() {
        let tracker = Arc::new(tracker().with_issue(live_issue(Some("sre-1"))));
        let outcome = engine(&tracker, false)
            .handle_notification(&comment_from("mgr-1"))
            .await
            .unwrap();

        assert_eq!(outcome, NotificationOutcome::Ignored);
        assert!(tracker.applied_transitions().is_empty());
        assert!(!tracker
            .calls()
            .iter()
            .any(|c| matches!(c, Call::ListTransitions(_))));
    }

    #[tokio::test]
    async fn test_unassigned_issue_is_ignored() {
        let tracker = Arc::new(tracker().with_issue(live_issue(None)));
        let outcome = engine(&tracker, false)
            .handle_notification(&comment_from("sre-1"))
            .await
            .unwrap();
        assert_eq!(outcome, NotificationOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_assignee_without_label_role_is_an_error() {
        let tracker = Arc::new(tracker().with_issue(live_issue(Some("someone-else"))));
        let err = engine(&tracker, false)
            .handle_notification(&comment_from("someone-else"))
            .await
            .unwrap_err();
        assert!(matches!(err, TicketError::UnrecognizedCommenter { .. }));
        assert!(tracker.applied_transitions().is_empty());
    }

    #[tokio::test]
    async fn test_live_issue_fetch_failure() {
        let tracker = Arc::new(tracker().failing(FailOn::GetIssue));
        let err = engine(&tracker, false)
            .handle_notification(&comment_from("sre-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, TicketError::FetchIssue { ref key, .. } if key == "OHSS-1"));
    }

    #[tokio::test]
    async fn test_dry_run_notification_looks_up_but_does_not_apply() {
        let tracker = Arc::new(tracker().with_issue(live_issue(Some("sre-1"))));
        engine(&tracker, true)
            .handle_notification(&comment_from("sre-1"))
            .await
            .unwrap();

        let calls = tracker.calls();
        assert!(calls.contains(&Call::ListTransitions("10001".to_string())));
        assert!(!calls.iter().any(Call::is_mutating));
    }
}
