//!
//! Protobuf messages for the BigQuery Storage Write API (`google.cloud.bigquery.storage.v1`)
//!
//! Only the fields relish sends or reads are declared, prost skips anything else on the wire.
//! Tags must match `storage.proto` and `protobuf.proto` upstream.

use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{DescriptorProto, FieldDescriptorProto};

use crate::sink::Event;

/// gRPC method path for the bidirectional append stream
pub const APPEND_ROWS_PATH: &str = "/google.cloud.bigquery.storage.v1.BigQueryWrite/AppendRows";

#[derive(Clone, PartialEq, prost::Message)]
pub struct AppendRowsRequest {
    #[prost(string, tag = "1")]
    pub write_stream: String,
    #[prost(oneof = "append_rows_request::Rows", tags = "4")]
    pub rows: Option<append_rows_request::Rows>,
    #[prost(string, tag = "6")]
    pub trace_id: String,
}

pub mod append_rows_request {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ProtoData {
        #[prost(message, optional, tag = "1")]
        pub writer_schema: Option<super::ProtoSchema>,
        #[prost(message, optional, tag = "2")]
        pub rows: Option<super::ProtoRows>,
    }

    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Rows {
        #[prost(message, tag = "4")]
        ProtoRows(ProtoData),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ProtoSchema {
    #[prost(message, optional, tag = "1")]
    pub proto_descriptor: Option<DescriptorProto>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ProtoRows {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub serialized_rows: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AppendRowsResponse {
    #[prost(oneof = "append_rows_response::Response", tags = "1, 2")]
    pub response: Option<append_rows_response::Response>,
    #[prost(message, repeated, tag = "4")]
    pub row_errors: Vec<RowError>,
    #[prost(string, tag = "5")]
    pub write_stream: String,
}

pub mod append_rows_response {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct AppendResult {
        #[prost(message, optional, tag = "1")]
        pub offset: Option<i64>,
    }

    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Response {
        #[prost(message, tag = "1")]
        AppendResult(AppendResult),
        #[prost(message, tag = "2")]
        Error(super::RpcStatus),
    }
}

/// `google.rpc.Status`
#[derive(Clone, PartialEq, prost::Message)]
pub struct RpcStatus {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RowError {
    #[prost(int64, tag = "1")]
    pub index: i64,
    #[prost(int32, tag = "2")]
    pub code: i32,
    #[prost(string, tag = "3")]
    pub message: String,
}

/// Binary row format of an [Event], timestamps are microseconds since the epoch which is what
/// BigQuery expects for `TIMESTAMP` columns
#[derive(Clone, PartialEq, prost::Message)]
pub struct EventRow {
    #[prost(message, optional, tag = "1")]
    pub metadata: Option<MetadataRow>,
    #[prost(string, tag = "2")]
    pub event: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct MetadataRow {
    #[prost(int64, tag = "1")]
    pub received_at: i64,
    #[prost(int64, tag = "2")]
    pub loaded_at: i64,
    #[prost(string, tag = "3")]
    pub source_id: String,
    #[prost(string, tag = "4")]
    pub source_name: String,
}

impl From<&Event> for EventRow {
    fn from(event: &Event) -> Self {
        EventRow {
            metadata: Some(MetadataRow {
                received_at: event.received_at.timestamp_micros(),
                loaded_at: event.loaded_at.timestamp_micros(),
                source_id: event.source_id.clone(),
                source_name: event.source_name.clone(),
            }),
            event: event.payload.clone(),
        }
    }
}

const METADATA_TYPE: &str = "relish_EventMetadata";

/// Fields of [MetadataRow], by number
const METADATA_FIELDS: &[(&str, i32, Type)] = &[
    ("received_at", 1, Type::Int64),
    ("loaded_at", 2, Type::Int64),
    ("source_id", 3, Type::String),
    ("source_name", 4, Type::String),
];

fn field(name: &str, number: i32, kind: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(kind as i32),
        ..Default::default()
    }
}

///
/// Build the self-contained descriptor for [EventRow].
///
/// The write API needs every referenced message nested inside the top-level descriptor with
/// proto2 semantics, rather than pointing at other files, so the metadata message is inlined.
///
pub fn event_descriptor() -> DescriptorProto {
    let metadata = DescriptorProto {
        name: Some(METADATA_TYPE.to_string()),
        field: METADATA_FIELDS
            .iter()
            .map(|(name, number, kind)| field(name, *number, *kind))
            .collect(),
        ..Default::default()
    };

    let mut metadata_field = field("metadata", 1, Type::Message);
    metadata_field.type_name = Some(METADATA_TYPE.to_string());

    DescriptorProto {
        name: Some("relish_Event".to_string()),
        field: vec![metadata_field, field("event", 2, Type::String)],
        nested_type: vec![metadata],
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_row_round_trip_keeps_payload() {
        let event = Event::new("src", "name", r#"{"a":1}"#.into());
        let bytes = EventRow::from(&event).encode_to_vec();
        let row = EventRow::decode(bytes.as_slice()).expect("Failed to decode the row");
        assert_eq!(r#"{"a":1}"#, row.event);
        let metadata = row.metadata.expect("Rows always carry metadata");
        assert_eq!("src", metadata.source_id);
        assert_eq!(event.received_at.timestamp_micros(), metadata.received_at);
    }

    /// The hand written descriptor has to line up with what prost puts on the wire
    #[test]
    fn test_descriptor_matches_row() {
        let descriptor = event_descriptor();
        let fields: Vec<(String, i32)> = descriptor
            .field
            .iter()
            .map(|f| (f.name().to_string(), f.number()))
            .collect();
        assert_eq!(
            vec![("metadata".to_string(), 1), ("event".to_string(), 2)],
            fields
        );
        assert_eq!(Some(METADATA_TYPE), descriptor.field[0].type_name.as_deref());
        assert_eq!(1, descriptor.nested_type.len());
        assert_eq!(4, descriptor.nested_type[0].field.len());
        assert_eq!(Type::String, descriptor.nested_type[0].field[3].r#type());
    }

    #[test]
    fn test_response_error_decodes() {
        let response = AppendRowsResponse {
            response: Some(append_rows_response::Response::Error(RpcStatus {
                code: 3,
                message: "bad row".into(),
            })),
            row_errors: vec![],
            write_stream: String::new(),
        };
        let decoded = AppendRowsResponse::decode(response.encode_to_vec().as_slice())
            .expect("Failed to decode");
        assert_eq!(response, decoded);
    }
}
