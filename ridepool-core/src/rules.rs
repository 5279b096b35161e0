use serde::Deserialize;

/// Business rules for settlement timing and money handling
#[derive(Debug, Deserialize, Clone)]
pub struct SettlementRules {
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Approvals (and rejections of approved passengers) are refused this close to departure
    #[serde(default = "default_approval_cutoff_hours")]
    pub approval_cutoff_hours: i64,
    /// How long after approval a driver may still remove an unpaid passenger
    #[serde(default = "default_rejection_grace_minutes")]
    pub rejection_grace_minutes: i64,
    /// Grace period after a trip's scheduled end before it is auto-completed
    #[serde(default = "default_completion_buffer_seconds")]
    pub completion_buffer_seconds: i64,
    #[serde(default = "default_trip_lock_ttl_seconds")]
    pub trip_lock_ttl_seconds: u64,
}

fn default_currency() -> String { "USD".to_string() }
fn default_approval_cutoff_hours() -> i64 { 3 }
fn default_rejection_grace_minutes() -> i64 { 60 }
fn default_completion_buffer_seconds() -> i64 { 1800 }
fn default_trip_lock_ttl_seconds() -> u64 { 300 }

impl Default for SettlementRules {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            approval_cutoff_hours: default_approval_cutoff_hours(),
            rejection_grace_minutes: default_rejection_grace_minutes(),
            completion_buffer_seconds: default_completion_buffer_seconds(),
            trip_lock_ttl_seconds: default_trip_lock_ttl_seconds(),
        }
    }
}
