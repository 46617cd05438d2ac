//! Issue tracker capability and its Jira implementation.

pub mod client;
pub mod models;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub use client::{JiraClient, JiraConnector};
pub use models::{
    mention, Comment, Issue, IssueFields, JiraUser, NewIssue, NotificationEvent, TicketRef,
    Transition, DRY_RUN_ISSUE_KEY, UNKNOWN_USER,
};

/// Errors returned by issue tracker calls.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("HTTP request to Jira failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Jira returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("error finding user '{username}': expected 1 user but found {found}")]
    UserLookup { username: String, found: usize },

    #[error("invalid Jira client configuration: {0}")]
    Config(String),
}

/// The operations the router needs from an issue tracker.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// The account the router itself authenticates as.
    async fn who_am_i(&self) -> Result<JiraUser, TrackerError>;

    /// Resolve a username. Anything other than exactly one match is an error.
    async fn find_user_by_name(&self, username: &str) -> Result<JiraUser, TrackerError>;

    async fn create_issue(&self, issue: &NewIssue) -> Result<TicketRef, TrackerError>;

    async fn add_comment(&self, issue_id: &str, body: &str) -> Result<(), TrackerError>;

    async fn get_issue(&self, issue_id: &str) -> Result<Issue, TrackerError>;

    async fn list_transitions(&self, issue_id: &str) -> Result<Vec<Transition>, TrackerError>;

    async fn apply_transition(&self, issue_id: &str, transition_id: &str)
        -> Result<(), TrackerError>;
}

/// Builds an [`IssueTracker`] for a single request.
pub trait TrackerFactory: Send + Sync {
    fn connect(&self) -> Result<Arc<dyn IssueTracker>, TrackerError>;
}
