//! REST client for the Jira v2 API.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::models::{Issue, JiraUser, NewIssue, TicketRef, Transition};
use super::{IssueTracker, TrackerError, TrackerFactory};
use crate::config::JiraConfig;

#[derive(Clone)]
enum Auth {
    /// Personal access token.
    Bearer(String),
    /// Username plus token as password. Development only.
    Basic { username: String, password: String },
}

/// Jira REST client.
#[derive(Clone)]
pub struct JiraClient {
    client: reqwest::Client,
    base_url: String,
    auth: Auth,
}

impl std::fmt::Debug for JiraClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let auth = match &self.auth {
            Auth::Bearer(_) => "pat",
            Auth::Basic { .. } => "basic",
        };
        f.debug_struct("JiraClient")
            .field("base_url", &self.base_url)
            .field("auth", &auth)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct CreateIssueRequest<'a> {
    fields: CreateIssueFields<'a>,
}

#[derive(Serialize)]
struct CreateIssueFields<'a> {
    project: ProjectKey<'a>,
    issuetype: Named<'a>,
    summary: &'a str,
    description: &'a str,
    reporter: &'a JiraUser,
    #[serde(skip_serializing_if = "Option::is_none")]
    assignee: Option<&'a JiraUser>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    labels: &'a [String],
}

#[derive(Serialize)]
struct ProjectKey<'a> {
    key: &'a str,
}

#[derive(Serialize)]
struct Named<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct CommentRequest<'a> {
    body: &'a str,
}

#[derive(Serialize)]
struct TransitionRequest<'a> {
    transition: TransitionId<'a>,
}

#[derive(Serialize)]
struct TransitionId<'a> {
    id: &'a str,
}

#[derive(Deserialize)]
struct TransitionsResponse {
    #[serde(default)]
    transitions: Vec<Transition>,
}

impl JiraClient {
    /// Create a client from configuration with its own connection pool.
    pub fn new(config: &JiraConfig) -> Result<Self, TrackerError> {
        Self::with_http(config, http_client(config)?)
    }

    /// Create a client over an existing connection pool.
    ///
    /// Uses bearer (PAT) auth unless a username is configured.
    pub fn with_http(config: &JiraConfig, client: reqwest::Client) -> Result<Self, TrackerError> {
        if config.host.is_empty() {
            return Err(TrackerError::Config("jiraconfig.host is empty".to_string()));
        }

        let auth = if config.username.is_empty() {
            Auth::Bearer(config.token.clone())
        } else {
            warn!("Using basic auth for Jira client; intended for development only");
            Auth::Basic {
                username: config.username.clone(),
                password: config.token.clone(),
            }
        };

        Ok(Self {
            client,
            base_url: config.host.trim_end_matches('/').to_string(),
            auth,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/rest/api/2{path}", self.base_url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Auth::Bearer(token) => request.bearer_auth(token),
            Auth::Basic { username, password } => request.basic_auth(username, Some(password)),
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, TrackerError> {
        let response = self.authorize(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TrackerError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, TrackerError> {
        Ok(self.send(request).await?.json().await?)
    }
}

#[async_trait]
impl IssueTracker for JiraClient {
    async fn who_am_i(&self) -> Result<JiraUser, TrackerError> {
        self.send_json(self.client.get(self.url("/myself"))).await
    }

    #[instrument(skip(self))]
    async fn find_user_by_name(&self, username: &str) -> Result<JiraUser, TrackerError> {
        if username.is_empty() {
            debug!("find_user_by_name called with empty username");
        }

        let request = self
            .client
            .get(self.url("/user/search"))
            .query(&[("username", username)]);
        let mut users: Vec<JiraUser> = self.send_json(request).await?;

        if users.len() != 1 {
            return Err(TrackerError::UserLookup {
                username: username.to_string(),
                found: users.len(),
            });
        }
        Ok(users.remove(0))
    }

    #[instrument(skip(self, issue), fields(project = %issue.project_key))]
    async fn create_issue(&self, issue: &NewIssue) -> Result<TicketRef, TrackerError> {
        let body = CreateIssueRequest {
            fields: CreateIssueFields {
                project: ProjectKey {
                    key: &issue.project_key,
                },
                issuetype: Named {
                    name: &issue.issue_type,
                },
                summary: &issue.summary,
                description: &issue.description,
                reporter: &issue.reporter,
                assignee: issue.assignee.as_ref(),
                labels: &issue.labels,
            },
        };

        let ticket: TicketRef = self
            .send_json(self.client.post(self.url("/issue")).json(&body))
            .await?;
        debug!(key = %ticket.key, "Created Jira issue");
        Ok(ticket)
    }

    async fn add_comment(&self, issue_id: &str, body: &str) -> Result<(), TrackerError> {
        let request = self
            .client
            .post(self.url(&format!("/issue/{issue_id}/comment")))
            .json(&CommentRequest { body });
        self.send(request).await?;
        Ok(())
    }

    async fn get_issue(&self, issue_id: &str) -> Result<Issue, TrackerError> {
        self.send_json(self.client.get(self.url(&format!("/issue/{issue_id}"))))
            .await
    }

    async fn list_transitions(&self, issue_id: &str) -> Result<Vec<Transition>, TrackerError> {
        let response: TransitionsResponse = self
            .send_json(
                self.client
                    .get(self.url(&format!("/issue/{issue_id}/transitions"))),
            )
            .await?;
        Ok(response.transitions)
    }

    async fn apply_transition(
        &self,
        issue_id: &str,
        transition_id: &str,
    ) -> Result<(), TrackerError> {
        let request = self
            .client
            .post(self.url(&format!("/issue/{issue_id}/transitions")))
            .json(&TransitionRequest {
                transition: TransitionId { id: transition_id },
            });
        self.send(request).await?;
        Ok(())
    }
}

fn http_client(config: &JiraConfig) -> Result<reqwest::Client, TrackerError> {
    Ok(reqwest::Client::builder()
        .danger_accept_invalid_certs(config.allow_insecure)
        .build()?)
}

/// Builds a [`JiraClient`] per request. All of them share one connection pool.
#[derive(Debug, Clone)]
pub struct JiraConnector {
    config: JiraConfig,
    http: reqwest::Client,
}

impl JiraConnector {
    pub fn new(config: JiraConfig) -> Result<Self, TrackerError> {
        let http = http_client(&config)?;
        Ok(Self { config, http })
    }
}

impl TrackerFactory for JiraConnector {
    fn connect(&self) -> Result<Arc<dyn IssueTracker>, TrackerError> {
        Ok(Arc::new(JiraClient::with_http(&self.config, self.http.clone())?))
    }
}
