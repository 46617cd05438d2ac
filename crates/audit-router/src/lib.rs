//! Compliance audit router.
//!
//! Receives compliance alert webhooks from Splunk, files a Jira ticket per
//! alert assigned to the SRE who triggered it, and advances those tickets
//! through a justification workflow as the SRE and their manager comment.
//!
//! # Modules
//!
//! - [`alert`]: normalization of raw search results into [`alert::AlertDetail`]
//! - [`pipeline`]: the alert-to-ticket pipeline with diagnostic fallbacks
//! - [`ticket`]: ticket creation and the notification-driven state machine
//! - [`splunk`], [`directory`], [`jira`]: collaborator clients
//! - [`server`]: axum routes

pub mod alert;
pub mod config;
pub mod decode;
pub mod directory;
pub mod jira;
pub mod metrics;
pub mod pipeline;
pub mod server;
pub mod splunk;
pub mod ticket;

pub use alert::AlertDetail;
pub use crate::config::Config;
pub use directory::{DirectoryClient, LdapDirectory};
pub use jira::{IssueTracker, JiraClient, JiraConnector, TrackerFactory};
pub use metrics::Metrics;
pub use pipeline::AlertPipeline;
pub use server::{build_router, AppState};
pub use splunk::{SearchClient, SplunkClient};
pub use ticket::{TicketEngine, TicketSettings};
