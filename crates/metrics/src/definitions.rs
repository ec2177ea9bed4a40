//! Metric names and label keys used across the workspace.

pub mod sessions {
    pub const STARTED_TOTAL: &str = "wagate_sessions_started_total";
    pub const TORN_DOWN_TOTAL: &str = "wagate_sessions_torn_down_total";
    pub const ACTIVE: &str = "wagate_sessions_active";
    pub const AUTH_TRANSITIONS_TOTAL: &str = "wagate_auth_transitions_total";
}

pub mod webhook {
    pub const DELIVERIES_TOTAL: &str = "wagate_webhook_deliveries_total";
    pub const DROPPED_TOTAL: &str = "wagate_webhook_dropped_total";
    pub const DELIVERY_DURATION_SECONDS: &str = "wagate_webhook_delivery_duration_seconds";
}

pub mod credentials {
    pub const OPERATIONS_TOTAL: &str = "wagate_credential_store_operations_total";
}

pub mod outbound {
    pub const SENDS_TOTAL: &str = "wagate_outbound_sends_total";
}

pub mod labels {
    pub const RESULT: &str = "result";
    pub const KIND: &str = "kind";
    pub const OPERATION: &str = "operation";
    pub const STATE: &str = "state";
    pub const REASON: &str = "reason";
}
