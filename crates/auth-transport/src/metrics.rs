//! Counters for the refresh interceptor
//!
//! - `auth_refresh_total` (counter): label `outcome` = success | failure
//! - `auth_refresh_queued_total` (counter): requests that waited on a refresh
//! - `auth_refresh_waiters` (histogram): queue size drained per refresh
//! - `auth_replays_total` (counter): label `outcome` = success | unauthorized | error
//! - `auth_session_cleared_total` (counter): label `reason`

pub fn record_refresh(outcome: &'static str) {
    ::metrics::counter!("auth_refresh_total", "outcome" => outcome).increment(1);
}

pub fn record_queued() {
    ::metrics::counter!("auth_refresh_queued_total").increment(1);
}

pub fn record_waiters(count: usize) {
    ::metrics::histogram!("auth_refresh_waiters").record(count as f64);
}

pub fn record_replay(outcome: &'static str) {
    ::metrics::counter!("auth_replays_total", "outcome" => outcome).increment(1);
}

pub fn record_session_cleared(reason: &'static str) {
    ::metrics::counter!("auth_session_cleared_total", "reason" => reason).increment(1);
}
