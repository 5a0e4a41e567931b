//!
//! The file module contains the JSON-Lines sink, which appends every event to a local file.
//!
//! This is not intended for production traffic, the file is reopened for every batch which is
//! slow but means a partially written batch can never corrupt what was already closed.

use smol::lock::Mutex;
use tracing::log::*;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use super::{Event, Sink, SinkError};
use crate::json;

pub struct FileSink {
    path: PathBuf,
    /// Serializes appends so that concurrent batches never interleave their lines
    lock: Mutex<()>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSink {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

#[async_trait::async_trait]
impl Sink for FileSink {
    async fn write_rows(&self, events: &[Event]) -> Result<(), SinkError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut buffer = String::new();
        for event in events {
            let line = json::to_string(&event.record())
                .map_err(|e| SinkError::Write(format!("failed to serialize event: {e}")))?;
            buffer.push_str(&line);
            buffer.push('\n');
        }

        let _guard = self.lock.lock().await;
        let path = self.path.clone();
        debug!("Appending {} events to {path:?}", events.len());

        smol::unblock(move || -> std::io::Result<()> {
            let mut file = OpenOptions::new().append(true).create(true).open(&path)?;
            file.write_all(buffer.as_bytes())?;
            file.flush()
        })
        .await
        .map_err(|e| SinkError::Write(format!("failed to append to {:?}: {e}", self.path)))
    }

    /// Nothing is held open between writes, closing only waits out a write in flight
    async fn close(&self) -> Result<(), SinkError> {
        let _guard = self.lock.lock().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::Value;

    fn read_lines(path: &std::path::Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .expect("Failed to read the output file")
            .lines()
            .map(|line| serde_json::from_str(line).expect("Every line should be a JSON object"))
            .collect()
    }

    #[test]
    fn test_round_trip_in_order() {
        let dir = tempfile::tempdir().expect("Failed to make a tempdir");
        let path = dir.path().join("out.jsonl");
        let sink = FileSink::new(&path);

        let first = Event::new("id", "name", r#"{"a":1}"#.into());
        let second = Event::new("id", "name", r#"{"a":2}"#.into());
        smol::block_on(sink.write_rows(&[first])).expect("Failed to write the first event");
        smol::block_on(sink.write_rows(&[second])).expect("Failed to write the second event");

        let lines = read_lines(&path);
        assert_eq!(2, lines.len());
        assert_eq!(Value::String(r#"{"a":1}"#.into()), lines[0]["event"]);
        assert_eq!(Value::String(r#"{"a":2}"#.into()), lines[1]["event"]);
        assert_eq!(Value::String("id".into()), lines[1]["metadata"]["source_id"]);
    }

    #[test]
    fn test_batch_is_one_line_per_event() {
        let dir = tempfile::tempdir().expect("Failed to make a tempdir");
        let path = dir.path().join("batch.jsonl");
        let sink = FileSink::new(&path);

        let events: Vec<Event> = (0..3)
            .map(|i| Event::new("id", "name", format!(r#"{{"i":{i}}}"#)))
            .collect();
        smol::block_on(sink.write_rows(&events)).expect("Failed to write the batch");

        let contents = std::fs::read_to_string(&path).expect("Failed to read");
        assert!(contents.ends_with('\n'));
        assert_eq!(3, read_lines(&path).len());
    }

    #[test]
    fn test_unwritable_path() {
        let dir = tempfile::tempdir().expect("Failed to make a tempdir");
        let sink = FileSink::new(dir.path().join("missing").join("out.jsonl"));
        let result = smol::block_on(sink.write_rows(&[Event::new("id", "name", "{}".into())]));
        assert!(matches!(result, Err(SinkError::Write(_))));
    }

    #[test]
    fn test_close_without_writes() {
        let sink = FileSink::new("never-written.jsonl");
        smol::block_on(sink.close()).expect("Closing an unused sink is fine");
        smol::block_on(sink.close()).expect("Closing twice is fine");
    }
}
