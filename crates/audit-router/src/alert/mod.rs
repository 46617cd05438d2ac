//! Compliance alert normalization.
//!
//! Splunk hands back each search result as an untyped map. [`AlertDetail::normalize`]
//! turns one of those rows into a typed record without ever failing; whether
//! the record is usable is a separate question answered by
//! [`AlertDetail::is_valid`], so rejected rows can still be logged.

pub mod fields;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::debug;

pub use fields::{RawResult, ResultFields, SPLUNK_TIME_FORMAT};

/// A single compliance event extracted from a Splunk search result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlertDetail {
    pub alert_name: String,
    pub user: String,
    pub group: String,
    /// `None` when the result carried no parsable timestamp.
    pub timestamp: Option<DateTime<Utc>>,
    pub cluster_ids: Vec<String>,
    pub cluster_text: String,
    pub elevated_summary: Vec<String>,
    pub elevated_summary_text: String,
    pub reasons: Vec<String>,
    pub reasons_text: String,
}

impl AlertDetail {
    /// Build an alert from a raw search result row.
    #[must_use]
    pub fn normalize(result: &RawResult) -> Self {
        Self {
            alert_name: result.text("alertname"),
            user: result.text("username"),
            group: result.text("group"),
            timestamp: result.timestamp("timestamp"),
            cluster_ids: result.list("clusterid"),
            cluster_text: result.text("cluster_text"),
            elevated_summary: result.list("elevated_summary"),
            elevated_summary_text: result.text("elevated_summary_text"),
            reasons: result.list("reason"),
            reasons_text: result.text("reason_text"),
        }
    }

    /// Whether the alert has everything a compliance ticket needs.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.alert_name.is_empty()
            && !self.user.is_empty()
            && !self.group.is_empty()
            && !self.cluster_ids.is_empty()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.alert_name
    }

    /// Ticket description for this alert.
    #[must_use]
    pub fn body(&self) -> String {
        format!(
            "{} - {}\n\n{}\n\n{}\n\n{}",
            self.user,
            self.name(),
            self.cluster_text,
            self.elevated_summary_text,
            self.reasons_text
        )
    }
}

impl fmt::Display for AlertDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} by {} ({}) on [{}]",
            self.alert_name,
            self.user,
            self.group,
            self.cluster_ids.join(", ")
        )
    }
}

/// Normalize every row and keep only valid alerts, preserving order.
#[must_use]
pub fn valid_details(results: &[RawResult]) -> Vec<AlertDetail> {
    results
        .iter()
        .map(AlertDetail::normalize)
        .filter(|detail| {
            let valid = detail.is_valid();
            if !valid {
                debug!(alert = ?detail, "Dropping incomplete compliance alert");
            }
            valid
        })
        .collect()
}
