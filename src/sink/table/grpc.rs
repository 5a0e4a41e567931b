//!
//! gRPC transport for the append stream, speaking to BigQuery through tonic
//!
//! tonic expects a tokio reactor, so everything touching the channel is wrapped in [Compat]

use async_channel::{Sender, unbounded};
use async_compat::Compat;
use tonic::client::Grpc;
use tonic::codec::{ProstCodec, Streaming};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, ClientTlsConfig};
use tonic::{Request, Status};
use tracing::log::*;

use std::time::Duration;

use super::AppendTransport;
use super::proto::{APPEND_ROWS_PATH, AppendRowsRequest, AppendRowsResponse};
use crate::sink::SinkError;

type ResponseStream = Streaming<AppendRowsResponse>;

/// The response half only becomes available once the server answers the call, which some
/// servers don't do until the first request has been sent.
enum Inbound {
    Pending(smol::Task<Result<ResponseStream, Status>>),
    Open(ResponseStream),
}

/// One `AppendRows` call. Responses arrive in request order
struct AppendCall {
    outbound: Sender<AppendRowsRequest>,
    inbound: Inbound,
    /// Requests sent whose responses have not been read yet, which happens when an append is
    /// abandoned part way through
    unanswered: usize,
}

impl AppendCall {
    async fn responses(&mut self) -> Result<&mut ResponseStream, SinkError> {
        if let Inbound::Pending(task) = &mut self.inbound {
            let stream = task.await.map_err(|status| {
                SinkError::Write(format!("failed to open the append stream: {status}"))
            })?;
            debug!("Append stream is open");
            self.inbound = Inbound::Open(stream);
        }

        match &mut self.inbound {
            Inbound::Open(stream) => Ok(stream),
            Inbound::Pending(_) => Err(SinkError::Write("the append stream never opened".into())),
        }
    }

    async fn next_response(&mut self) -> Result<AppendRowsResponse, SinkError> {
        let stream = self.responses().await?;
        let response = match Compat::new(stream.message()).await {
            Ok(Some(response)) => response,
            Ok(None) => {
                return Err(SinkError::Write(
                    "the append stream was closed by the destination".into(),
                ));
            }
            Err(status) => return Err(SinkError::Write(status.to_string())),
        };
        self.unanswered -= 1;
        Ok(response)
    }

    async fn exchange(&mut self, request: AppendRowsRequest) -> Result<AppendRowsResponse, SinkError> {
        while self.unanswered > 0 {
            let stale = self.next_response().await?;
            warn!("Discarding the late answer to an abandoned append: {:?}", stale.response);
        }

        // Counted before sending, the unbounded send completes without yielding
        self.unanswered += 1;
        if self.outbound.send(request).await.is_err() {
            self.unanswered -= 1;
            return Err(SinkError::Write(
                "the append stream is no longer accepting requests".into(),
            ));
        }
        self.next_response().await
    }
}

/// A long-lived append stream for one write stream.
///
/// The channel is connected once, the call on top of it is reopened on the next append after a
/// transport failure.
pub struct GrpcAppendStream {
    channel: Channel,
    write_stream: String,
    access_token: Option<String>,
    call: Option<AppendCall>,
    closed: bool,
}

impl GrpcAppendStream {
    /// Connect to the endpoint and start the bidirectional call for the given write stream
    pub async fn open(
        endpoint: &str,
        write_stream: &str,
        access_token: Option<&str>,
    ) -> Result<Self, SinkError> {
        let channel = Compat::new(connect(endpoint)).await?;
        let mut stream = GrpcAppendStream {
            channel,
            write_stream: write_stream.to_string(),
            access_token: access_token.map(String::from),
            call: None,
            closed: false,
        };
        stream.call = Some(stream.start_call()?);
        Ok(stream)
    }

    fn start_call(&self) -> Result<AppendCall, SinkError> {
        let (tx, rx) = unbounded();

        let mut request = Request::new(rx);
        request.metadata_mut().insert(
            "x-goog-request-params",
            ascii(&format!("write_stream={}", self.write_stream))?,
        );
        if let Some(token) = &self.access_token {
            request
                .metadata_mut()
                .insert("authorization", ascii(&format!("Bearer {token}"))?);
        }

        let channel = self.channel.clone();
        let task = smol::spawn(Compat::new(async move {
            let mut grpc = Grpc::new(channel);
            grpc.ready()
                .await
                .map_err(|e| Status::unavailable(format!("service was not ready: {e}")))?;
            let codec: ProstCodec<AppendRowsRequest, AppendRowsResponse> = ProstCodec::default();
            grpc.streaming(request, PathAndQuery::from_static(APPEND_ROWS_PATH), codec)
                .await
                .map(|response| response.into_inner())
        }));

        Ok(AppendCall {
            outbound: tx,
            inbound: Inbound::Pending(task),
            unanswered: 0,
        })
    }
}

#[async_trait::async_trait]
impl AppendTransport for GrpcAppendStream {
    async fn append(&mut self, request: AppendRowsRequest) -> Result<AppendRowsResponse, SinkError> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        if self.call.is_none() {
            info!("Reopening the append stream for {}", self.write_stream);
            self.call = Some(self.start_call()?);
        }

        let call = self.call.as_mut().ok_or(SinkError::Closed)?;
        match call.exchange(request).await {
            Ok(response) => Ok(response),
            Err(err) => {
                warn!("Append stream for {} failed: {err}", self.write_stream);
                self.call = None;
                Err(err)
            }
        }
    }

    async fn shutdown(&mut self) -> Result<(), SinkError> {
        self.closed = true;
        if let Some(call) = self.call.take() {
            // Dropping the sender half-closes the request stream
            drop(call.outbound);
            if let Inbound::Pending(task) = call.inbound {
                task.cancel().await;
            }
        }
        Ok(())
    }
}

async fn connect(endpoint: &str) -> Result<Channel, SinkError> {
    let mut builder = Channel::from_shared(endpoint.to_string())
        .map_err(|e| SinkError::Construction(format!("invalid endpoint {endpoint}: {e}")))?
        .connect_timeout(Duration::from_secs(10));

    if endpoint.starts_with("https") {
        builder = builder
            .tls_config(ClientTlsConfig::new())
            .map_err(|e| SinkError::Construction(format!("failed to configure TLS: {e}")))?;
    }

    debug!("Connecting to {endpoint}");
    builder
        .connect()
        .await
        .map_err(|e| SinkError::Construction(format!("failed to connect to {endpoint}: {e}")))
}

fn ascii(value: &str) -> Result<MetadataValue<Ascii>, SinkError> {
    value
        .parse()
        .map_err(|e| SinkError::Construction(format!("invalid request metadata: {e}")))
}
