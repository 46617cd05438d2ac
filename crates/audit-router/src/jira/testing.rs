//! In-memory [`IssueTracker`] that records every call.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{
    Issue, IssueTracker, JiraUser, NewIssue, TicketRef, TrackerError, TrackerFactory, Transition,
};

/// One recorded tracker call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    WhoAmI,
    FindUser(String),
    CreateIssue(NewIssue),
    AddComment { issue_id: String, body: String },
    GetIssue(String),
    ListTransitions(String),
    ApplyTransition { issue_id: String, transition_id: String },
}

impl Call {
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::CreateIssue(_) | Self::AddComment { .. } | Self::ApplyTransition { .. }
        )
    }
}

/// Which call should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    WhoAmI,
    CreateIssue,
    AddComment,
    GetIssue,
    ListTransitions,
    ApplyTransition,
}

#[derive(Default)]
pub struct RecordingTracker {
    calls: Mutex<Vec<Call>>,
    users: HashMap<String, JiraUser>,
    issue: Option<Issue>,
    transitions: Vec<Transition>,
    fail_on: Option<FailOn>,
    /// Fail `create_issue` starting with this (1-based) call.
    fail_create_from: Option<usize>,
}

impl RecordingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, name: &str, account_id: &str) -> Self {
        self.users.insert(
            name.to_string(),
            JiraUser {
                account_id: account_id.to_string(),
                name: name.to_string(),
                display_name: String::new(),
            },
        );
        self
    }

    pub fn with_issue(mut self, issue: Issue) -> Self {
        self.issue = Some(issue);
        self
    }

    pub fn with_transition(mut self, id: &str, name: &str) -> Self {
        self.transitions.push(Transition {
            id: id.to_string(),
            name: name.to_string(),
        });
        self
    }

    pub fn failing(mut self, fail_on: FailOn) -> Self {
        self.fail_on = Some(fail_on);
        self
    }

    pub fn failing_create_from(mut self, nth: usize) -> Self {
        self.fail_create_from = Some(nth);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn created(&self) -> Vec<NewIssue> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::CreateIssue(issue) => Some(issue),
                _ => None,
            })
            .collect()
    }

    pub fn applied_transitions(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::ApplyTransition { transition_id, .. } => Some(transition_id),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, op: FailOn) -> Result<(), TrackerError> {
        if self.fail_on == Some(op) {
            return Err(TrackerError::Api {
                status: 500,
                body: format!("{op:?} failed"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl IssueTracker for RecordingTracker {
    async fn who_am_i(&self) -> Result<JiraUser, TrackerError> {
        self.record(Call::WhoAmI);
        self.check(FailOn::WhoAmI)?;
        Ok(JiraUser {
            account_id: "router-bot".to_string(),
            name: "router-bot".to_string(),
            display_name: String::new(),
        })
    }

    async fn find_user_by_name(&self, username: &str) -> Result<JiraUser, TrackerError> {
        self.record(Call::FindUser(username.to_string()));
        self.users
            .get(username)
            .cloned()
            .ok_or_else(|| TrackerError::UserLookup {
                username: username.to_string(),
                found: 0,
            })
    }

    async fn create_issue(&self, issue: &NewIssue) -> Result<TicketRef, TrackerError> {
        self.record(Call::CreateIssue(issue.clone()));
        self.check(FailOn::CreateIssue)?;
        let n = self.created().len();
        if self.fail_create_from.is_some_and(|from| n >= from) {
            return Err(TrackerError::Api {
                status: 400,
                body: format!("create #{n} rejected"),
            });
        }
        Ok(TicketRef {
            id: format!("{}", 10_000 + n),
            key: format!("{}-{n}", issue.project_key),
        })
    }

    async fn add_comment(&self, issue_id: &str, body: &str) -> Result<(), TrackerError> {
        self.record(Call::AddComment {
            issue_id: issue_id.to_string(),
            body: body.to_string(),
        });
        self.check(FailOn::AddComment)
    }

    async fn get_issue(&self, issue_id: &str) -> Result<Issue, TrackerError> {
        self.record(Call::GetIssue(issue_id.to_string()));
        self.check(FailOn::GetIssue)?;
        self.issue.clone().ok_or(TrackerError::Api {
            status: 404,
            body: "Issue Does Not Exist".to_string(),
        })
    }

    async fn list_transitions(&self, issue_id: &str) -> Result<Vec<Transition>, TrackerError> {
        self.record(Call::ListTransitions(issue_id.to_string()));
        self.check(FailOn::ListTransitions)?;
        Ok(self.transitions.clone())
    }

    async fn apply_transition(&self, issue_id: &str, transition_id: &str) -> Result<(), TrackerError> {
        self.record(Call::ApplyTransition {
            issue_id: issue_id.to_string(),
            transition_id: transition_id.to_string(),
        });
        self.check(FailOn::ApplyTransition)
    }
}

/// Hands out the same shared tracker on every connect.
pub struct SharedTracker(pub Arc<RecordingTracker>);

impl TrackerFactory for SharedTracker {
    fn connect(&self) -> Result<Arc<dyn IssueTracker>, TrackerError> {
        Ok(self.0.clone())
    }
}
