//! Prometheus collectors of the change watcher.
//!
//! Collectors are process-wide; callers expose them by registering into
//! their own [`Registry`] with [`register_custom_metrics`].

use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounterVec;
use prometheus::IntGaugeVec;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;


lazy_static! {
    pub static ref WATCH_POLLS: IntCounterVec = IntCounterVec::new(
        Opts::new("watch_polls", "Completed key listing queries of the change watcher"),
        &["node", "outcome"]
    )
    .expect("metric can not be created");

    pub static ref WATCH_BACKOFF_MS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("watch_backoff_ms", "Current retry delay of the change watcher in ms"),
        &["node"]
    )
    .expect("metric can not be created");

    pub static ref WATCH_INDEX: IntGaugeVec = IntGaugeVec::new(
        Opts::new("watch_index", "Last key/value index adopted by the change watcher"),
        &["node"]
    )
    .expect("metric can not be created");

    pub static ref KEY_EVENTS: IntCounterVec = IntCounterVec::new(
        Opts::new("key_events", "Key events published to listeners"),
        &["node", "status"]
    )
    .expect("metric can not be created");

    pub static ref NODE_EVENTS: IntCounterVec = IntCounterVec::new(
        Opts::new("node_events", "Node events published to listeners"),
        &["node", "status"]
    )
    .expect("metric can not be created");
}

pub const OUTCOME_OK: &str = "ok";
pub const OUTCOME_ERROR: &str = "error";

/// Integer gauge reading of `value`, saturating at `i64::MAX`
pub(crate) fn gauge_value<T>(value: T) -> i64
where
    T: TryInto<i64>,
{
    value.try_into().unwrap_or(i64::MAX)
}

/// Registers every collector of this crate into `registry`.
pub fn register_custom_metrics(registry: &Registry) -> prometheus::Result<()> {
    registry.register(Box::new(WATCH_POLLS.clone()))?;
    registry.register(Box::new(WATCH_BACKOFF_MS.clone()))?;
    registry.register(Box::new(WATCH_INDEX.clone()))?;
    registry.register(Box::new(KEY_EVENTS.clone()))?;
    registry.register(Box::new(NODE_EVENTS.clone()))?;
    Ok(())
}

/// Renders `registry` in the Prometheus text exposition format
pub fn encode_text(registry: &Registry) -> prometheus::Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
