/**
 * This module contains the names of every statsd metric relish reports, along with the
 * construction of the metrics scope itself.
 */
use dipstick::{Input, InputQueueScope, Prefixed, Statsd};

use crate::errors::RelishError;

/**
 * Connect the statsd output and wrap it in a queue so that reporting never blocks a request
 */
pub fn metrics(statsd: &str) -> Result<InputQueueScope, RelishError> {
    let metrics = Statsd::send_to(statsd)
        .map_err(|e| RelishError::Metrics(e.to_string()))?
        .named("relish")
        .metrics();
    Ok(InputQueueScope::wrap(metrics, 1_000))
}

#[derive(Debug, Display, IntoStaticStr, Hash, PartialEq, Eq)]
pub enum Stats {
    /* Gauges */
    #[strum(serialize = "sinks.live")]
    LiveSinks,

    /* Counters */
    #[strum(serialize = "ingest.accepted")]
    Accepted,
    #[strum(serialize = "ingest.rejected.not_found")]
    RejectedNotFound,
    #[strum(serialize = "ingest.rejected.unauthorized")]
    RejectedUnauthorized,
    #[strum(serialize = "ingest.rejected.malformed")]
    RejectedMalformed,
    #[strum(serialize = "error.sink_construction")]
    SinkConstructionError,
    #[strum(serialize = "error.sink_write")]
    SinkWriteError,
    #[strum(serialize = "sinks.released")]
    SinkReleased,

    /* Timers */
    #[strum(serialize = "sink.write")]
    SinkWrite,
}
