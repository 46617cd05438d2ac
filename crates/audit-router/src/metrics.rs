//! Prometheus counters for the router.
//!
//! Every counter carries a `process` label naming the handler that recorded
//! it plus the constant `name="compliance-audit-router"` label. Request ids
//! are kept out of labels; they live on the tracing span instead.

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use thiserror::Error;

use crate::config::APP_NAME;

/// `process` label values.
pub mod process {
    pub const ALERT: &str = "process_alert";
    pub const JIRA_WEBHOOK: &str = "process_jira_webhook";
    pub const HEALTH: &str = "health";
    pub const METRICS: &str = "metrics";
}

const PREFIX: &str = "compliance_audit_router";

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    Registration(#[from] prometheus::Error),

    #[error("failed to encode metrics: {0}")]
    Encoding(String),
}

/// Handle to the router's counters. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    splunk_webhook_received: IntCounterVec,
    splunk_webhook_process_failures: IntCounterVec,
    splunk_alert_sid_received: IntCounterVec,
    splunk_search_result_query_failures: IntCounterVec,
    compliance_events_found: IntCounterVec,
    compliance_events_processed: IntCounterVec,
    jira_client_create_failures: IntCounterVec,
    jira_issues_created: IntCounterVec,
    jira_error_issues_created: IntCounterVec,
    jira_issue_create_failures: IntCounterVec,
    jira_webhook_received: IntCounterVec,
    jira_webhook_process_failures: IntCounterVec,
    jira_issue_update_failures: IntCounterVec,
    ldap_lookup_failures: IntCounterVec,
    http_responses: IntCounterVec,
}

fn counter(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<IntCounterVec, MetricsError> {
    let opts = Opts::new(format!("{PREFIX}_{name}"), help).const_label("name", APP_NAME);
    let counter = IntCounterVec::new(opts, labels)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl Metrics {
    /// Create every counter in a fresh registry.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let r = &registry;
        let plain = &["process"];
        let typed = &["process", "error_type"];

        Ok(Self {
            splunk_webhook_received: counter(
                r,
                "splunk_webhook_received",
                "Number of Splunk alert webhooks received",
                plain,
            )?,
            splunk_webhook_process_failures: counter(
                r,
                "splunk_webhook_process_failures",
                "Number of Splunk alert webhooks that failed to be processed",
                typed,
            )?,
            splunk_alert_sid_received: counter(
                r,
                "splunk_alert_sid_received",
                "Number of Splunk alert SIDs received",
                plain,
            )?,
            splunk_search_result_query_failures: counter(
                r,
                "splunk_search_result_query_failures",
                "Number of Splunk search result queries that failed",
                typed,
            )?,
            compliance_events_found: counter(
                r,
                "compliance_events_found",
                "Number of compliance events found in Splunk webhook search results",
                plain,
            )?,
            compliance_events_processed: counter(
                r,
                "compliance_events_processed",
                "Number of compliance events passed on to the next stage of processing",
                plain,
            )?,
            jira_client_create_failures: counter(
                r,
                "jira_client_create_failures",
                "Number of failures to create a Jira client",
                plain,
            )?,
            jira_issues_created: counter(
                r,
                "jira_issues_created",
                "Number of Jira issues created",
                plain,
            )?,
            jira_error_issues_created: counter(
                r,
                "jira_error_issues_created",
                "Number of Jira issues created tracking errors in processing",
                plain,
            )?,
            jira_issue_create_failures: counter(
                r,
                "jira_issue_create_failures",
                "Number of Jira issues that failed to be created",
                plain,
            )?,
            jira_webhook_received: counter(
                r,
                "jira_webhook_received",
                "Number of Jira notification webhooks received",
                plain,
            )?,
            jira_webhook_process_failures: counter(
                r,
                "jira_webhook_process_failures",
                "Number of Jira notification webhooks that failed to be processed",
                typed,
            )?,
            jira_issue_update_failures: counter(
                r,
                "jira_issue_update_failures",
                "Number of Jira issues that failed to be updated based on received webhook",
                plain,
            )?,
            ldap_lookup_failures: counter(
                r,
                "ldap_lookup_failures",
                "Number of LDAP lookups that failed",
                plain,
            )?,
            http_responses: counter(
                r,
                "http_responses",
                "HTTP responses returned by the application with the status code as a label",
                &["process", "code"],
            )?,
            registry,
        })
    }

    pub fn splunk_webhook_received(&self, process: &str) {
        self.splunk_webhook_received.with_label_values(&[process]).inc();
    }

    pub fn splunk_webhook_process_failure(&self, process: &str, error_type: &str) {
        self.splunk_webhook_process_failures
            .with_label_values(&[process, error_type])
            .inc();
    }

    pub fn splunk_alert_sid_received(&self, process: &str) {
        self.splunk_alert_sid_received.with_label_values(&[process]).inc();
    }

    pub fn splunk_search_result_query_failure(&self, process: &str, error_type: &str) {
        self.splunk_search_result_query_failures
            .with_label_values(&[process, error_type])
            .inc();
    }

    pub fn compliance_event_found(&self, process: &str) {
        self.compliance_events_found.with_label_values(&[process]).inc();
    }

    pub fn compliance_events_processed(&self, process: &str) {
        self.compliance_events_processed.with_label_values(&[process]).inc();
    }

    pub fn jira_client_create_failure(&self, process: &str) {
        self.jira_client_create_failures.with_label_values(&[process]).inc();
    }

    pub fn jira_issue_created(&self, process: &str) {
        self.jira_issues_created.with_label_values(&[process]).inc();
    }

    pub fn jira_error_issue_created(&self, process: &str) {
        self.jira_error_issues_created.with_label_values(&[process]).inc();
    }

    pub fn jira_issue_create_failure(&self, process: &str) {
        self.jira_issue_create_failures.with_label_values(&[process]).inc();
    }

    pub fn jira_webhook_received(&self, process: &str) {
        self.jira_webhook_received.with_label_values(&[process]).inc();
    }

    pub fn jira_webhook_process_failure(&self, process: &str, error_type: &str) {
        self.jira_webhook_process_failures
            .with_label_values(&[process, error_type])
            .inc();
    }

    pub fn jira_issue_update_failure(&self, process: &str) {
        self.jira_issue_update_failures.with_label_values(&[process]).inc();
    }

    pub fn ldap_lookup_failure(&self, process: &str) {
        self.ldap_lookup_failures.with_label_values(&[process]).inc();
    }

    pub fn http_response(&self, process: &str, code: u16) {
        let code = code.to_string();
        self.http_responses
            .with_label_values(&[process, code.as_str()])
            .inc();
    }

    /// Render every counter in the Prometheus text format.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| MetricsError::Encoding(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::Encoding(e.to_string()))
    }

    #[cfg(test)]
    pub(crate) fn value(&self, name: &str, labels: &[&str]) -> u64 {
        let family = match name {
            "splunk_webhook_process_failures" => &self.splunk_webhook_process_failures,
            "splunk_search_result_query_failures" => &self.splunk_search_result_query_failures,
            "compliance_events_found" => &self.compliance_events_found,
            "compliance_events_processed" => &self.compliance_events_processed,
            "jira_issues_created" => &self.jira_issues_created,
            "jira_error_issues_created" => &self.jira_error_issues_created,
            "jira_issue_create_failures" => &self.jira_issue_create_failures,
            "jira_issue_update_failures" => &self.jira_issue_update_failures,
            "ldap_lookup_failures" => &self.ldap_lookup_failures,
            "http_responses" => &self.http_responses,
            other => panic!("no counter named {other}"),
        };
        family.with_label_values(labels).get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_const_label() {
        let metrics = Metrics::new().unwrap();
        metrics.splunk_webhook_received(process::ALERT);
        metrics.http_response(process::ALERT, 500);

        let text = metrics.encode_text().unwrap();
        assert!(text.contains(
            r#"compliance_audit_router_splunk_webhook_received{name="compliance-audit-router",process="process_alert"} 1"#
        ));
        assert!(text.contains(r#"code="500""#));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.ldap_lookup_failure(process::ALERT);
        assert_eq!(a.value("ldap_lookup_failures", &[process::ALERT]), 1);
        assert_eq!(b.value("ldap_lookup_failures", &[process::ALERT]), 0);
    }
}
