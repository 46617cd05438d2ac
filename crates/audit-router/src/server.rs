//! HTTP server for Splunk alerts and Jira notifications.

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{debug, error, info, info_span, warn, Instrument, Level};
use uuid::Uuid;

use crate::decode::{decode_json_body, DecodeError, MalformedRequest, MAX_BODY_BYTES};
use crate::jira::{NotificationEvent, TrackerFactory};
use crate::metrics::{process, Metrics};
use crate::pipeline::AlertPipeline;
use crate::splunk::SplunkWebhook;
use crate::ticket::{NotificationOutcome, TicketEngine, TicketSettings};

/// Body of every 500 response. Details only go to the log.
pub const GENERIC_ERROR_MSG: &str =
    "The request could not be completed. Please contact the system administrator.";

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: AlertPipeline,
    /// Builds the tracker used for notification handling.
    pub trackers: Arc<dyn TrackerFactory>,
    pub ticket_settings: Arc<TicketSettings>,
    pub metrics: Metrics,
}

/// Build the HTTP router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/readyz", get(respond_ok))
        .route("/healthz", get(respond_ok))
        .route("/api/v1/alert", post(alert_handler))
        .route("/api/v1/jira_webhook", post(jira_webhook_handler))
        .route("/metrics", get(metrics_handler))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
        )
        .with_state(state)
}

fn respond(metrics: &Metrics, process: &str, status: StatusCode, msg: Option<&str>) -> Response {
    metrics.http_response(process, status.as_u16());

    let body = match status {
        StatusCode::OK => "ok",
        StatusCode::NO_CONTENT => return status.into_response(),
        StatusCode::INTERNAL_SERVER_ERROR => GENERIC_ERROR_MSG,
        _ => msg.unwrap_or(GENERIC_ERROR_MSG),
    };
    (status, [(header::CONTENT_TYPE, TEXT_PLAIN)], body.to_string()).into_response()
}

async fn respond_ok(State(state): State<AppState>) -> Response {
    respond(&state.metrics, process::HEALTH, StatusCode::OK, None)
}

/// Prometheus text exposition. The scrape counts itself before encoding.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    state
        .metrics
        .http_response(process::METRICS, StatusCode::OK.as_u16());
    match state.metrics.encode_text() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            text,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            respond(&state.metrics, process::METRICS, StatusCode::INTERNAL_SERVER_ERROR, None)
        }
    }
}

/// Why a request body was rejected, already counted and logged.
enum BodyFailure {
    Malformed(MalformedRequest),
    Internal,
}

impl BodyFailure {
    fn error_type(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed_request",
            Self::Internal => "unknown",
        }
    }

    fn into_response(self, metrics: &Metrics, process: &str) -> Response {
        match self {
            Self::Malformed(m) => respond(metrics, process, m.status, Some(&m.msg)),
            Self::Internal => respond(metrics, process, StatusCode::INTERNAL_SERVER_ERROR, None),
        }
    }
}

fn read_body<T: DeserializeOwned>(
    headers: &HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<T, BodyFailure> {
    let body = match body {
        Ok(body) => body,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            warn!("Received malformed request: body too large");
            return Err(BodyFailure::Malformed(MalformedRequest {
                status: StatusCode::PAYLOAD_TOO_LARGE,
                msg: "Request body must not be larger than 1MB".to_string(),
            }));
        }
        Err(rejection) => {
            error!(error = %rejection, "Failed reading request body");
            return Err(BodyFailure::Internal);
        }
    };

    decode_json_body(headers, &body).map_err(|e| match e {
        DecodeError::Malformed(m) => {
            warn!(msg = %m.msg, "Received malformed request");
            BodyFailure::Malformed(m)
        }
        DecodeError::Internal(e) => {
            error!(error = %e, "Failed decoding JSON request body");
            BodyFailure::Internal
        }
    })
}

/// Run the alert pipeline for a Splunk webhook.
async fn alert_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let span = info_span!("request", uuid = %Uuid::new_v4(), process = process::ALERT);
    async move {
        let metrics = &state.metrics;
        metrics.splunk_webhook_received(process::ALERT);

        let webhook: SplunkWebhook = match read_body(&headers, body) {
            Ok(webhook) => webhook,
            Err(failure) => {
                metrics.splunk_webhook_process_failure(process::ALERT, failure.error_type());
                return failure.into_response(metrics, process::ALERT);
            }
        };
        if state.ticket_settings.verbose {
            debug!(webhook = ?webhook, "Decoded Splunk webhook");
        }

        match state.pipeline.process(&webhook).await {
            Ok(report) => {
                info!(
                    events = report.events_found,
                    tickets = report.tickets.len(),
                    "Processed Splunk alert"
                );
                respond(metrics, process::ALERT, StatusCode::OK, None)
            }
            Err(e) => {
                error!(error = %e, "Failed processing Splunk alert");
                respond(metrics, process::ALERT, StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        }
    }
    .instrument(span)
    .await
}

/// Advance a ticket after a Jira comment notification.
async fn jira_webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let span = info_span!("request", uuid = %Uuid::new_v4(), process = process::JIRA_WEBHOOK);
    async move {
        let metrics = &state.metrics;
        metrics.jira_webhook_received(process::JIRA_WEBHOOK);

        let event: NotificationEvent = match read_body(&headers, body) {
            Ok(event) => event,
            Err(failure) => {
                metrics.jira_webhook_process_failure(process::JIRA_WEBHOOK, failure.error_type());
                return failure.into_response(metrics, process::JIRA_WEBHOOK);
            }
        };

        let tracker = match state.trackers.connect() {
            Ok(tracker) => tracker,
            Err(e) => {
                error!(error = %e, "Failed creating Jira client");
                metrics.jira_client_create_failure(process::JIRA_WEBHOOK);
                return respond(
                    metrics,
                    process::JIRA_WEBHOOK,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    None,
                );
            }
        };

        let engine = TicketEngine::new(tracker, state.ticket_settings.clone());
        match engine.handle_notification(&event).await {
            Ok(NotificationOutcome::Ignored) => {
                debug!(issue = %event.issue.key, "Notification required no transition");
                respond(metrics, process::JIRA_WEBHOOK, StatusCode::NO_CONTENT, None)
            }
            Ok(NotificationOutcome::Transitioned { .. }) => {
                respond(metrics, process::JIRA_WEBHOOK, StatusCode::NO_CONTENT, None)
            }
            Err(e) => {
                error!(error = %e, "Failed handling Jira webhook");
                metrics.jira_issue_update_failure(process::JIRA_WEBHOOK);
                respond(
                    metrics,
                    process::JIRA_WEBHOOK,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    None,
                )
            }
        }
    }
    .instrument(span)
    .await
}
