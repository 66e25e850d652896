//! # Alerts
//!
//! Alert taxonomy and the side channel used for critical alerts.
//!
//! Each [`AlertType`] maps to a default priority and category; unknown type
//! strings fall back to [`AlertType::Other`] (medium / other). The Alert
//! handler posts the record to the backend sink and, for critical alerts,
//! calls a [`Notifier`] synchronously before completing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    HighRiskEntity,
    HighRiskNetwork,
    WatchlistMatch,
    SuspiciousTransaction,
    PepMatch,
    SanctionsMatch,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    Risk,
    Network,
    Screening,
    TransactionMonitoring,
    Other,
}

impl AlertType {
    /// Parse a type name; anything unrecognized is `Other`
    pub fn parse(name: &str) -> Self {
        match name {
            "high_risk_entity" => AlertType::HighRiskEntity,
            "high_risk_network" => AlertType::HighRiskNetwork,
            "watchlist_match" => AlertType::WatchlistMatch,
            "suspicious_transaction" => AlertType::SuspiciousTransaction,
            "pep_match" => AlertType::PepMatch,
            "sanctions_match" => AlertType::SanctionsMatch,
            _ => AlertType::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::HighRiskEntity => "high_risk_entity",
            AlertType::HighRiskNetwork => "high_risk_network",
            AlertType::WatchlistMatch => "watchlist_match",
            AlertType::SuspiciousTransaction => "suspicious_transaction",
            AlertType::PepMatch => "pep_match",
            AlertType::SanctionsMatch => "sanctions_match",
            AlertType::Other => "other",
        }
    }

    /// Default priority and category
    pub fn classification(&self) -> (AlertPriority, AlertCategory) {
        match self {
            AlertType::HighRiskEntity => (AlertPriority::High, AlertCategory::Risk),
            AlertType::HighRiskNetwork => (AlertPriority::High, AlertCategory::Network),
            AlertType::WatchlistMatch => (AlertPriority::High, AlertCategory::Screening),
            AlertType::SuspiciousTransaction => {
                (AlertPriority::High, AlertCategory::TransactionMonitoring)
            }
            AlertType::PepMatch => (AlertPriority::Medium, AlertCategory::Screening),
            AlertType::SanctionsMatch => (AlertPriority::Critical, AlertCategory::Screening),
            AlertType::Other => (AlertPriority::Medium, AlertCategory::Other),
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record posted to `POST /alerts`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    /// The type as requested; unknown names are kept verbatim
    pub alert_type: String,
    pub priority: AlertPriority,
    pub category: AlertCategory,
    pub entity_id: Option<String>,
    pub data: Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl AlertRecord {
    /// Build an open alert, classifying `alert_type` and applying `priority` if given
    pub fn new(
        alert_type: &str,
        entity_id: Option<String>,
        data: Value,
        priority: Option<AlertPriority>,
    ) -> Self {
        let (default_priority, category) = AlertType::parse(alert_type).classification();
        Self {
            alert_type: alert_type.to_string(),
            priority: priority.unwrap_or(default_priority),
            category,
            entity_id,
            data,
            status: "open".to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn is_critical(&self) -> bool {
        self.priority == AlertPriority::Critical
    }
}

/// Out-of-band notification for critical alerts
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &AlertRecord);
}

/// Notifier that writes critical alerts to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &AlertRecord) {
        warn!(
            alert_type = %alert.alert_type,
            category = ?alert.category,
            entity_id = alert.entity_id.as_deref().unwrap_or(""),
            "CRITICAL ALERT raised"
        );
    }
}
