/// Prometheus counters for the HTTP surface
///
/// Registered in the default registry on first use and rendered in the
/// text exposition format by `GET /metrics`.

use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};

lazy_static! {
    pub static ref SUBMISSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "codecup_submissions_total",
        "Submissions received, by outcome",
        &["outcome"]
    )
    .expect("submission counter registers once");
    pub static ref STATUS_POLLS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "codecup_status_polls_total",
        "Status polls answered, by job state",
        &["state"]
    )
    .expect("poll counter registers once");
}

pub fn record_submission(outcome: &str) {
    SUBMISSIONS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_poll(state: &str) {
    STATUS_POLLS_TOTAL.with_label_values(&[state]).inc();
}

pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
