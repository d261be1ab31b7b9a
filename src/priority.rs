use serde::{Deserialize, Serialize};

/// Severity bucket for an expiring record.
///
/// Ordinal: `Low < Medium < High < Critical` (declaration order).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Bucket for a whole-day countdown. Zero or negative means due today
    /// or already overdue.
    pub fn for_days(days_remaining: i64) -> Self {
        match days_remaining {
            d if d <= 0 => Self::Critical,
            1..=3 => Self::High,
            4..=7 => Self::Medium,
            _ => Self::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn from_str_value(s: &str) -> Self {
        match s {
            "critical" => Self::Critical,
            "high" => Self::High,
            "medium" => Self::Medium,
            _ => Self::Low,
        }
    }

    /// Whether moving from `old` to `new` increased severity.
    pub fn escalated(old: Self, new: Self) -> bool {
        new > old
    }
}
