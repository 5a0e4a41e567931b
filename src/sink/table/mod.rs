//!
//! The table module contains the streaming insert sink, which appends rows to a warehouse table
//! over one long-lived append stream per sink.
//!
//! The stream and the schema descriptor are set up once when the sink is constructed, reopening
//! them per batch would dominate the cost of every write.

use prost::Message as _;
use serde::Deserialize;
use smol::lock::Mutex;
use tracing::log::*;
use tracing::{Level, span};
use url::Url;

use super::descriptor::TableConfig;
use super::{Event, Sink, SinkError};

pub mod grpc;
pub mod proto;

use proto::append_rows_request::{ProtoData, Rows};
use proto::append_rows_response::Response;
use proto::{AppendRowsRequest, AppendRowsResponse, ProtoRows, ProtoSchema};

/// Endpoint for the BigQuery Storage Write API
pub const BIGQUERY_STORAGE_URL: &str = "https://bigquerystorage.googleapis.com";

/// The request/response half of an append stream.
///
/// Each call to `append` must send exactly one request and return the one response which
/// answers it, even when an earlier append was dropped before its answer arrived.
#[async_trait::async_trait]
pub trait AppendTransport: Send {
    async fn append(&mut self, request: AppendRowsRequest) -> Result<AppendRowsResponse, SinkError>;

    /// Tear the stream down, after this no more appends will be issued
    async fn shutdown(&mut self) -> Result<(), SinkError>;
}

/// Settings shared by every table sink, from the `table` section of relish.yml
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TableDefaults {
    #[serde(default = "table_endpoint_default")]
    pub endpoint: Url,
    /// Identifies relish to the destination when a descriptor doesn't set its own trace
    #[serde(default = "table_trace_default")]
    pub trace: String,
    /// OAuth bearer token, `GCP_ACCESS_TOKEN` in the environment takes precedence
    pub access_token: Option<String>,
}

impl Default for TableDefaults {
    fn default() -> Self {
        TableDefaults {
            endpoint: table_endpoint_default(),
            trace: table_trace_default(),
            access_token: None,
        }
    }
}

fn table_endpoint_default() -> Url {
    Url::parse(BIGQUERY_STORAGE_URL).expect("The default BigQuery endpoint must be a valid URL")
}

fn table_trace_default() -> String {
    "relish".into()
}

pub struct StreamingTableSink {
    write_stream: String,
    trace: String,
    /// Derived once for the lifetime of the sink
    schema: ProtoSchema,
    /// `None` once the sink has been closed
    transport: Mutex<Option<Box<dyn AppendTransport>>>,
}

impl StreamingTableSink {
    pub fn new(config: &TableConfig, defaults: &TableDefaults, transport: Box<dyn AppendTransport>) -> Self {
        let trace = config.trace.clone().unwrap_or_else(|| defaults.trace.clone());
        StreamingTableSink {
            write_stream: config.write_stream(),
            trace,
            schema: ProtoSchema {
                proto_descriptor: Some(proto::event_descriptor()),
            },
            transport: Mutex::new(Some(transport)),
        }
    }

    /// Open the append stream against the configured endpoint
    pub async fn connect(config: &TableConfig, defaults: &TableDefaults) -> Result<Self, SinkError> {
        let token = std::env::var("GCP_ACCESS_TOKEN")
            .ok()
            .or_else(|| defaults.access_token.clone());
        let endpoint = defaults.endpoint.as_str().trim_end_matches('/');
        info!("Opening an append stream to {} via {endpoint}", config.write_stream());

        let transport =
            grpc::GrpcAppendStream::open(endpoint, &config.write_stream(), token.as_deref()).await?;
        Ok(Self::new(config, defaults, Box::new(transport)))
    }

    fn request_for(&self, events: &[Event]) -> AppendRowsRequest {
        let serialized_rows = events
            .iter()
            .map(|event| proto::EventRow::from(event).encode_to_vec())
            .collect();

        AppendRowsRequest {
            write_stream: self.write_stream.clone(),
            trace_id: self.trace.clone(),
            rows: Some(Rows::ProtoRows(ProtoData {
                writer_schema: Some(self.schema.clone()),
                rows: Some(ProtoRows { serialized_rows }),
            })),
        }
    }
}

/// Turn the destination's answer into a result, any row error fails the whole batch
fn interpret(response: AppendRowsResponse) -> Result<(), SinkError> {
    if !response.row_errors.is_empty() {
        let messages: Vec<String> = response
            .row_errors
            .iter()
            .map(|e| format!("row {}: {}", e.index, e.message))
            .collect();
        return Err(SinkError::Rejected(messages.join("; ")));
    }

    match response.response {
        Some(Response::AppendResult(result)) => {
            trace!("Append acknowledged at offset {:?}", result.offset);
            Ok(())
        }
        Some(Response::Error(status)) => Err(SinkError::Rejected(format!(
            "{} (code {})",
            status.message, status.code
        ))),
        None => Err(SinkError::Write("empty response from the destination".into())),
    }
}

#[async_trait::async_trait]
impl Sink for StreamingTableSink {
    async fn write_rows(&self, events: &[Event]) -> Result<(), SinkError> {
        if events.is_empty() {
            return Ok(());
        }
        let _span = span!(Level::DEBUG, "Table sink append", stream = %self.write_stream);
        let request = self.request_for(events);

        let mut transport = self.transport.lock().await;
        let transport = transport.as_mut().ok_or(SinkError::Closed)?;
        debug!("Appending {} rows to {}", events.len(), self.write_stream);
        interpret(transport.append(request).await?)
    }

    async fn close(&self) -> Result<(), SinkError> {
        let transport = self.transport.lock().await.take();
        match transport {
            Some(mut transport) => {
                debug!("Closing the append stream for {}", self.write_stream);
                transport.shutdown().await
            }
            None => Ok(()),
        }
    }
}
