use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::priority::Priority;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Sale,
    Service,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Sale => "sale",
            EntityKind::Service => "service",
        }
    }

    pub fn from_str_value(s: &str) -> Self {
        match s {
            "sale" => EntityKind::Sale,
            _ => EntityKind::Service,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SaleDetails {
    pub customer_name: String,
    pub service_name: String,
    pub amount: f64,
    pub currency: String,
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceDetails {
    pub customer_name: String,
    pub service_name: String,
    pub amount: f64,
    pub currency: String,
    pub billing_cycle: String,
    pub credentials: Option<String>,
}

/// Denormalized display payload copied verbatim from the source record.
/// The engine forwards it untouched; only the dashboard interprets it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RecordDetails {
    Sale(SaleDetails),
    Service(ServiceDetails),
}

impl RecordDetails {
    pub fn kind(&self) -> EntityKind {
        match self {
            RecordDetails::Sale(_) => EntityKind::Sale,
            RecordDetails::Service(_) => EntityKind::Service,
        }
    }
}

/// A sale or service subscription as read from the primary collections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryRecord {
    pub id: String,
    /// `None` models malformed upstream data; the reconciler skips it.
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub details: RecordDetails,
}

impl PrimaryRecord {
    pub fn kind(&self) -> EntityKind {
        self.details.kind()
    }
}

/// Derived expiration notification. At most one live notification exists
/// per `(kind, source_id)` pair after a completed pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub kind: EntityKind,
    pub source_id: String,
    pub days_remaining: i64,
    pub priority: Priority,
    pub read: bool,
    pub highlighted: bool,
    pub details: RecordDetails,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a notification. New entries always start unread and
/// unhighlighted.
#[derive(Debug, Clone)]
pub struct NotificationDraft {
    pub kind: EntityKind,
    pub source_id: String,
    pub days_remaining: i64,
    pub priority: Priority,
    pub details: RecordDetails,
}

/// Reconciliation update. Carries no `highlighted` field: that flag is
/// user-owned and the engine never writes it after creation.
#[derive(Debug, Clone)]
pub struct NotificationPatch {
    pub days_remaining: i64,
    pub priority: Priority,
    pub read: bool,
    pub details: RecordDetails,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_are_tagged_by_kind() {
        let details = RecordDetails::Sale(SaleDetails {
            customer_name: "Ana".into(),
            service_name: "Netflix Premium".into(),
            amount: 15.99,
            currency: "USD".into(),
            payment_method: Some("Zelle".into()),
        });
        assert_eq!(details.kind(), EntityKind::Sale);
        let json = serde_json::to_string(&details).unwrap();
        assert!(json.contains(r#""type":"sale""#));

        let back: RecordDetails = serde_json::from_str(&json).unwrap();
        assert_eq!(back, details);
    }

    #[test]
    fn kind_string_forms() {
        assert_eq!(EntityKind::Sale.as_str(), "sale");
        assert_eq!(EntityKind::from_str_value("service"), EntityKind::Service);
    }
}
