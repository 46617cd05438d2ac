//! Alert pipeline: Splunk webhook in, compliance tickets out.
//!
//! Steps run strictly in order and the first failure ends the request.
//! Upstream failures (search retrieval, directory lookup) additionally file
//! an unassigned diagnostic ticket so that no alert disappears silently.
//! Tickets already created are never rolled back.

use std::fmt::Display;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument};

use crate::alert::{valid_details, AlertDetail};
use crate::directory::{DirectoryClient, DirectoryError};
use crate::jira::{TicketRef, TrackerError, TrackerFactory};
use crate::metrics::{process, Metrics};
use crate::splunk::{SearchClient, SearchError, SplunkWebhook};
use crate::ticket::{TicketEngine, TicketError, TicketSettings};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed creating Jira client: {0}")]
    TrackerClient(#[source] TrackerError),

    #[error("error retrieving search results for {sid}: {source}")]
    SearchRetrieval {
        sid: String,
        #[source]
        source: SearchError,
    },

    #[error("failed ldap lookup for {user}: {source}")]
    DirectoryLookup {
        user: String,
        #[source]
        source: DirectoryError,
    },

    #[error("failed creating Jira ticket for {alert}: {source}")]
    TicketCreation {
        alert: String,
        #[source]
        source: TicketError,
    },

    #[error("failed creating diagnostic Jira ticket after {cause}: {source}")]
    DiagnosticTicket {
        cause: String,
        #[source]
        source: TicketError,
    },
}

/// Outcome of a fully processed alert webhook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Valid compliance events in the result set.
    pub events_found: usize,
    /// One ticket per event, in result order.
    pub tickets: Vec<TicketRef>,
}

#[derive(Clone)]
pub struct AlertPipeline {
    search: Arc<dyn SearchClient>,
    /// `None` when directory lookups are disabled.
    directory: Option<Arc<dyn DirectoryClient>>,
    trackers: Arc<dyn TrackerFactory>,
    settings: Arc<TicketSettings>,
    metrics: Metrics,
}

impl AlertPipeline {
    #[must_use]
    pub fn new(
        search: Arc<dyn SearchClient>,
        directory: Option<Arc<dyn DirectoryClient>>,
        trackers: Arc<dyn TrackerFactory>,
        settings: Arc<TicketSettings>,
        metrics: Metrics,
    ) -> Self {
        Self {
            search,
            directory,
            trackers,
            settings,
            metrics,
        }
    }

    #[instrument(skip_all, fields(sid = %webhook.sid))]
    pub async fn process(&self, webhook: &SplunkWebhook) -> Result<PipelineReport, PipelineError> {
        let tracker = self.trackers.connect().map_err(|e| {
            self.metrics.jira_client_create_failure(process::ALERT);
            PipelineError::TrackerClient(e)
        })?;
        let engine = TicketEngine::new(tracker, self.settings.clone());

        info!("Retrieving alert from Splunk");
        self.metrics.splunk_alert_sid_received(process::ALERT);

        let results = match self.search.retrieve_results(&webhook.sid).await {
            Ok(results) => results,
            Err(source) => {
                error!(error = %source, "Error retrieving search results from Splunk");
                self.metrics
                    .splunk_search_result_query_failure(process::ALERT, "retrieval_error");
                let body = search_failure_body(webhook, &source);
                self.file_diagnostic(&engine, "search retrieval failure", body)
                    .await?;
                return Err(PipelineError::SearchRetrieval {
                    sid: webhook.sid.clone(),
                    source,
                });
            }
        };

        let details = valid_details(&results.results);
        let mut tickets = Vec::with_capacity(details.len());

        for detail in &details {
            info!(alert = %detail, "Processing compliance event");
            self.metrics.compliance_event_found(process::ALERT);

            let (user, manager) = match &self.directory {
                None => (detail.user.clone(), String::new()),
                Some(directory) => match directory.lookup_user(&detail.user).await {
                    Ok(identity) => (identity.user, identity.manager),
                    Err(source) => {
                        error!(user = %detail.user, error = %source, "Failed ldap lookup");
                        self.metrics.ldap_lookup_failure(process::ALERT);
                        let body = directory_failure_body(detail, &source);
                        self.file_diagnostic(&engine, "directory lookup failure", body)
                            .await?;
                        return Err(PipelineError::DirectoryLookup {
                            user: detail.user.clone(),
                            source,
                        });
                    }
                },
            };

            let ticket = engine
                .create(&user, &manager, &detail.body())
                .await
                .map_err(|source| {
                    self.metrics.jira_issue_create_failure(process::ALERT);
                    PipelineError::TicketCreation {
                        alert: detail.name().to_string(),
                        source,
                    }
                })?;
            self.metrics.jira_issue_created(process::ALERT);
            tickets.push(ticket);
        }

        self.metrics.compliance_events_processed(process::ALERT);
        Ok(PipelineReport {
            events_found: details.len(),
            tickets,
        })
    }

    async fn file_diagnostic(
        &self,
        engine: &TicketEngine,
        cause: &str,
        body: String,
    ) -> Result<TicketRef, PipelineError> {
        match engine.create("", "", &body).await {
            Ok(ticket) => {
                info!(key = %ticket.key, cause, "Filed diagnostic ticket");
                self.metrics.jira_error_issue_created(process::ALERT);
                Ok(ticket)
            }
            Err(source) => {
                error!(cause, error = %source, "Failed creating diagnostic Jira ticket");
                self.metrics.jira_issue_create_failure(process::ALERT);
                Err(PipelineError::DiagnosticTicket {
                    cause: cause.to_string(),
                    source,
                })
            }
        }
    }
}

fn search_failure_body(webhook: &SplunkWebhook, err: &impl Display) -> String {
    let (data, render_error) = match serde_json::to_string_pretty(webhook) {
        Ok(json) => (json, None),
        Err(e) => (String::new(), Some(e)),
    };

    let mut body = format!(
        "A Compliance Alert was received from Splunk, but the alert details could not be retrieved. \
         Please review:\n\
         Splunk Webhook Search ID: {}\n\
         Splunk Webhook Data: {data}\n\
         \nError: {err}\n",
        webhook.sid
    );
    if let Some(e) = render_error {
        body.push_str(&format!(
            "\nNOTE: The Splunk webhook data could not be rendered as JSON.\n\
             This may indicate that the webhook data is incomplete. \
             The error was: {e}\n"
        ));
    }
    body
}

fn directory_failure_body(detail: &AlertDetail, err: &impl Display) -> String {
    let data = serde_json::to_string_pretty(detail).unwrap_or_else(|_| format!("{detail:?}"));
    format!(
        "A Compliance Alert was received from Splunk, but the user details could not be retrieved from LDAP. \
         Please review and assign accordingly:\n\
         Compliance Data: {data}\n\
         \nError: {err}\n"
    )
}
