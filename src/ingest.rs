//!
//! The ingest module ties an incoming webhook to its configuration and hands it to the right sink
//!
//! Webhooks are dispatched one at a time as they arrive, there is no buffering in relish.

use chrono::Utc;
use dipstick::{InputQueueScope, InputScope};
use tracing::log::*;

use std::convert::TryInto;
use std::sync::Arc;
use std::time::Instant;

use crate::auth;
use crate::configuration::ConfigStore;
use crate::json;
use crate::settings::Timeouts;
use crate::sink::manager::SinkManager;
use crate::sink::{Event, SinkError, with_deadline};
use crate::status::Stats;

/// Why a webhook was not accepted
#[derive(Debug, thiserror::Error)]
pub enum Rejection {
    #[error("configuration with id {0} not found")]
    NotFound(String),
    #[error("invalid webhook key")]
    Unauthorized,
    #[error("request body is not valid JSON: {0}")]
    MalformedPayload(String),
    #[error("failed to get sink for configuration {config_id}: {source}")]
    Construction {
        config_id: String,
        source: SinkError,
    },
    #[error("failed to write rows to sink: {0}")]
    Write(SinkError),
}

impl Rejection {
    /// Machine readable reason, stable across releases unlike the messages
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::NotFound(_) => "not_found",
            Rejection::Unauthorized => "unauthorized",
            Rejection::MalformedPayload(_) => "malformed_payload",
            Rejection::Construction {
                source: SinkError::Timeout(_),
                ..
            }
            | Rejection::Write(SinkError::Timeout(_)) => "sink_timeout",
            Rejection::Construction { .. } => "sink_construction",
            Rejection::Write(_) => "sink_write",
        }
    }

    /// HTTP status for the rejection
    pub fn status(&self) -> u16 {
        match self {
            Rejection::NotFound(_) => 404,
            Rejection::Unauthorized => 401,
            _ => 400,
        }
    }
}

pub struct Ingestor {
    store: Arc<dyn ConfigStore>,
    sinks: Arc<SinkManager>,
    stats: InputQueueScope,
    timeouts: Timeouts,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        sinks: Arc<SinkManager>,
        stats: InputQueueScope,
        timeouts: Timeouts,
    ) -> Self {
        Ingestor {
            store,
            sinks,
            stats,
            timeouts,
        }
    }

    ///
    /// Handle a single webhook for the configuration.
    ///
    /// The credential is only consulted when the configuration uses a key, and it is checked
    /// before the payload is even looked at.
    ///
    pub async fn handle(
        &self,
        config_id: &str,
        credential: Option<&str>,
        payload: &[u8],
    ) -> Result<(), Rejection> {
        let result = self.dispatch(config_id, credential, payload).await;
        match &result {
            Ok(()) => self.stats.counter(Stats::Accepted.into()).count(1),
            Err(rejection) => {
                debug!("Rejecting webhook for {config_id}: {rejection}");
                let stat = match rejection {
                    Rejection::NotFound(_) => Stats::RejectedNotFound,
                    Rejection::Unauthorized => Stats::RejectedUnauthorized,
                    Rejection::MalformedPayload(_) => Stats::RejectedMalformed,
                    Rejection::Construction { .. } => Stats::SinkConstructionError,
                    Rejection::Write(_) => Stats::SinkWriteError,
                };
                self.stats.counter(stat.into()).count(1);
            }
        }
        result
    }

    async fn dispatch(
        &self,
        config_id: &str,
        credential: Option<&str>,
        payload: &[u8],
    ) -> Result<(), Rejection> {
        let config = self
            .store
            .get(config_id)
            .await
            .map_err(|_| Rejection::NotFound(config_id.to_string()))?;

        if config.use_key {
            let authorized = match (credential, config.key_hash.as_deref()) {
                (Some(key), Some(hash)) => auth::verify_key(&config.id, key, hash),
                _ => false,
            };
            if !authorized {
                return Err(Rejection::Unauthorized);
            }
        }

        json::validate(payload).map_err(|e| Rejection::MalformedPayload(e.to_string()))?;
        let payload = String::from_utf8(payload.to_vec())
            .map_err(|e| Rejection::MalformedPayload(e.to_string()))?;
        let mut event = Event::new(&config.id, &config.name, payload);

        let sink = with_deadline(
            self.timeouts.construct(),
            self.sinks.acquire(&config.id, &config.sink),
        )
        .await
        .map_err(|source| Rejection::Construction {
            config_id: config.id.clone(),
            source,
        })?;
        self.stats
            .gauge(Stats::LiveSinks.into())
            .value(self.sinks.len());

        let start = Instant::now();
        event.loaded_at = Utc::now();
        with_deadline(self.timeouts.write(), sink.write_rows(std::slice::from_ref(&event)))
            .await
            .map_err(Rejection::Write)?;

        if let Ok(elapsed) = start.elapsed().as_micros().try_into() {
            self.stats.timer(Stats::SinkWrite.into()).interval_us(elapsed);
        }
        Ok(())
    }
}
