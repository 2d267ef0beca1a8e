use metrics::counter;

// ── Metric names ────────────────────────────────────────────────────────

/// VAST requests by result (success, error, empty)
pub const VAST_REQUESTS: &str = "adcue_vast_requests_total";
/// Tracking beacons by event name and result
pub const TRACKING_EVENTS: &str = "adcue_tracking_events_total";
/// Ads played to a terminal state, by kind (video, vpaid)
pub const ADS_PLAYED: &str = "adcue_ads_played_total";
/// Ad breaks started
pub const AD_BREAKS: &str = "adcue_ad_breaks_total";
/// VPAID sessions by outcome (stopped, error, timeout, cancelled)
pub const VPAID_SESSIONS: &str = "adcue_vpaid_sessions_total";

// ── Recording helpers ───────────────────────────────────────────────────

/// Record a VAST request result
pub fn record_vast_request(result: &str) {
    counter!(VAST_REQUESTS, "result" => result.to_string()).increment(1);
}

/// Record a tracking beacon result
pub fn record_tracking_event(event: &str, result: &str) {
    counter!(TRACKING_EVENTS, "event" => event.to_string(), "result" => result.to_string())
        .increment(1);
}

/// Record an ad played to a terminal state
pub fn record_ad_played(kind: &str) {
    counter!(ADS_PLAYED, "kind" => kind.to_string()).increment(1);
}

/// Record an ad break starting
pub fn record_ad_break() {
    counter!(AD_BREAKS).increment(1);
}

/// Record a VPAID session outcome
pub fn record_vpaid_session(outcome: &str) {
    counter!(VPAID_SESSIONS, "outcome" => outcome.to_string()).increment(1);
}
