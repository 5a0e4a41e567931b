//! The sink module contains the different sinks for relish
//!
//! Every identified configuration gets at most one live [Sink], created lazily by the
//! [manager::SinkManager] the first time a webhook arrives for it.

use chrono::{DateTime, Utc};
use serde::Serialize;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub mod descriptor;
pub mod file;
pub mod manager;
pub mod registry;
pub mod table;

///
/// The Sink trait is a simple interface for defining a thing that takes a bunch of events and
/// outputs them into the appropriate destination.
///
/// Implementations must serialize their own writes, the same instance is shared between every
/// request which arrives for its configuration.
///
#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    /// Hand the events to the destination, in order.
    ///
    /// Returning `Ok` means the destination has acknowledged the whole batch
    async fn write_rows(&self, events: &[Event]) -> Result<(), SinkError>;

    /// Release whatever the sink is holding on to.
    ///
    /// Must be idempotent and safe to call on a sink which never wrote anything
    async fn close(&self) -> Result<(), SinkError>;
}

/// Shared handle to a live [Sink]
pub type SinkRef = Arc<dyn Sink>;

/// The [Event] is a single webhook payload along with where and when it came from
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub received_at: DateTime<Utc>,
    pub loaded_at: DateTime<Utc>,
    pub source_id: String,
    pub source_name: String,
    /// Raw JSON body of the webhook, already checked for well-formedness
    pub payload: String,
}

impl Event {
    /// Stamp a newly received payload, `loaded_at` is refreshed right before the write
    pub fn new(source_id: &str, source_name: &str, payload: String) -> Self {
        let now = Utc::now();
        Event {
            received_at: now,
            loaded_at: now,
            source_id: source_id.to_string(),
            source_name: source_name.to_string(),
            payload,
        }
    }

    /// The JSON-Lines shape of the event, `event` always comes first
    pub fn record(&self) -> Record<'_> {
        Record {
            event: &self.payload,
            metadata: RecordMetadata {
                received_at: self.received_at,
                loaded_at: self.loaded_at,
                source_id: &self.source_id,
                source_name: &self.source_name,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Record<'a> {
    pub event: &'a str,
    pub metadata: RecordMetadata<'a>,
}

#[derive(Debug, Serialize)]
pub struct RecordMetadata<'a> {
    pub received_at: DateTime<Utc>,
    pub loaded_at: DateTime<Utc>,
    pub source_id: &'a str,
    pub source_name: &'a str,
}

/// Everything which can go wrong between building a sink and closing it
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("unsupported sink type '{0}'")]
    Unsupported(String),
    #[error("failed to create sink: {0}")]
    Construction(String),
    #[error("failed to write rows: {0}")]
    Write(String),
    #[error("destination rejected rows: {0}")]
    Rejected(String),
    #[error("failed to close sink: {0}")]
    Close(String),
    #[error("sink operation did not complete within {0:?}")]
    Timeout(Duration),
    #[error("sink has already been closed")]
    Closed,
}

/// Race the future against a timer, expiry turns into [SinkError::Timeout]
pub async fn with_deadline<T>(
    deadline: Duration,
    fut: impl Future<Output = Result<T, SinkError>>,
) -> Result<T, SinkError> {
    smol::future::or(fut, async {
        smol::Timer::after(deadline).await;
        Err(SinkError::Timeout(deadline))
    })
    .await
}

#[cfg(test)]
pub mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sink which only counts, used wherever the destination doesn't matter
    #[derive(Default)]
    pub struct CountingSink {
        pub writes: AtomicUsize,
        pub closes: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Sink for CountingSink {
        async fn write_rows(&self, events: &[Event]) -> Result<(), SinkError> {
            self.writes.fetch_add(events.len(), Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self) -> Result<(), SinkError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_record_puts_event_first() {
        let event = Event::new("abc", "test", r#"{"a":1}"#.into());
        let line = serde_json::to_string(&event.record()).expect("Failed to serialize");
        assert!(line.starts_with(r#"{"event":"{\"a\":1}","metadata":{"#));
        assert!(line.contains(r#""source_id":"abc""#));
        assert!(line.contains(r#""source_name":"test""#));
    }

    #[test]
    fn test_deadline_expires() {
        let result: Result<(), SinkError> = smol::block_on(with_deadline(
            Duration::from_millis(10),
            smol::future::pending(),
        ));
        assert!(matches!(result, Err(SinkError::Timeout(_))));
    }

    #[test]
    fn test_deadline_passes_through() {
        let result = smol::block_on(with_deadline(Duration::from_secs(5), async {
            Ok::<_, SinkError>(42)
        }));
        assert_eq!(42, result.expect("Should have completed"));
    }
}
