//!
//! Sink descriptors are the persisted description of where a configuration's webhooks go.
//!
//! Validation happens while deserializing, so a [SinkDescriptor] which exists is always valid for
//! its type and nothing at ingestion time needs to check it again.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The supported destinations along with their parameters
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(try_from = "RawDescriptor", into = "RawDescriptor")]
pub enum SinkDescriptor {
    File(FileConfig),
    Table(TableConfig),
}

impl SinkDescriptor {
    /// The `type` string this descriptor was declared with, used for the construction dispatch
    pub fn kind(&self) -> &'static str {
        match self {
            SinkDescriptor::File(_) => FILE,
            SinkDescriptor::Table(_) => TABLE,
        }
    }
}

pub const FILE: &str = "file";
pub const TABLE: &str = "table";

/// Append-only local JSON-Lines file, mostly useful for testing
#[derive(Clone, Debug, PartialEq)]
pub struct FileConfig {
    /// Absolute, or relative to the working directory of relish
    pub file_path: String,
}

/// A warehouse table receiving streaming inserts
#[derive(Clone, Debug, PartialEq)]
pub struct TableConfig {
    pub project: String,
    pub dataset: String,
    pub table: String,
    /// Overrides the trace id configured in the settings
    pub trace: Option<String>,
}

impl TableConfig {
    /// Name of the default stream for the table, which is where committed rows land
    pub fn write_stream(&self) -> String {
        format!(
            "projects/{}/datasets/{}/tables/{}/streams/_default",
            self.project, self.dataset, self.table
        )
    }
}

#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("unsupported sink type '{0}'")]
    UnsupportedType(String),
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{0} cannot be empty")]
    Empty(&'static str),
    #[error("{0} must be a string")]
    NotAString(&'static str),
}

/// Validate the parameters for the given sink type, producing the typed descriptor
pub fn validate(kind: &str, parameters: &Map<String, Value>) -> Result<SinkDescriptor, ValidationError> {
    match kind {
        FILE => Ok(SinkDescriptor::File(FileConfig {
            file_path: required(parameters, "file_path")?,
        })),
        TABLE => Ok(SinkDescriptor::Table(TableConfig {
            project: required(parameters, "project")?,
            dataset: required(parameters, "dataset")?,
            table: required(parameters, "table")?,
            trace: optional(parameters, "trace")?,
        })),
        unknown => Err(ValidationError::UnsupportedType(unknown.to_string())),
    }
}

fn required(parameters: &Map<String, Value>, field: &'static str) -> Result<String, ValidationError> {
    optional(parameters, field)?.ok_or(ValidationError::Missing(field))
}

fn optional(
    parameters: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<String>, ValidationError> {
    match parameters.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Err(ValidationError::Empty(field)),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ValidationError::NotAString(field)),
    }
}

/// Wire shape of a descriptor: `{"type": "file", "parameters": {...}}`
#[derive(Clone, Debug, Deserialize, Serialize)]
struct RawDescriptor {
    r#type: String,
    #[serde(default, alias = "config")]
    parameters: Map<String, Value>,
}

impl TryFrom<RawDescriptor> for SinkDescriptor {
    type Error = ValidationError;

    fn try_from(raw: RawDescriptor) -> Result<Self, Self::Error> {
        validate(&raw.r#type, &raw.parameters)
    }
}

impl From<SinkDescriptor> for RawDescriptor {
    fn from(descriptor: SinkDescriptor) -> Self {
        let r#type = descriptor.kind().to_string();
        let mut parameters = Map::new();
        match descriptor {
            SinkDescriptor::File(file) => {
                parameters.insert("file_path".into(), Value::String(file.file_path));
            }
            SinkDescriptor::Table(table) => {
                parameters.insert("project".into(), Value::String(table.project));
                parameters.insert("dataset".into(), Value::String(table.dataset));
                parameters.insert("table".into(), Value::String(table.table));
                if let Some(trace) = table.trace {
                    parameters.insert("trace".into(), Value::String(trace));
                }
            }
        }
        RawDescriptor { r#type, parameters }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("Test parameters must be an object")
    }

    #[test]
    fn test_file_requires_path() {
        assert_eq!(
            Err(ValidationError::Missing("file_path")),
            validate("file", &Map::new())
        );
        assert_eq!(
            Err(ValidationError::Empty("file_path")),
            validate("file", &params(json!({"file_path": ""})))
        );
        assert_eq!(
            Err(ValidationError::NotAString("file_path")),
            validate("file", &params(json!({"file_path": 12})))
        );
    }

    #[test]
    fn test_file_valid() {
        let descriptor = validate("file", &params(json!({"file_path": "/tmp/out.jsonl"})))
            .expect("A file path is all a file sink needs");
        assert_eq!(
            SinkDescriptor::File(FileConfig {
                file_path: "/tmp/out.jsonl".into()
            }),
            descriptor
        );
    }

    #[test]
    fn test_table_requires_every_field() {
        let complete = json!({"project": "p", "dataset": "d", "table": "t"});
        for field in ["project", "dataset", "table"] {
            let mut missing = params(complete.clone());
            missing.remove(field);
            assert_eq!(
                Err(ValidationError::Missing(field)),
                validate("table", &missing),
                "Removing {field} should fail validation"
            );
        }
        assert!(validate("table", &params(complete)).is_ok());
    }

    #[test]
    fn test_table_optional_trace() {
        let descriptor = validate(
            "table",
            &params(json!({"project": "p", "dataset": "d", "table": "t", "trace": "me"})),
        )
        .expect("Failed to validate");
        match descriptor {
            SinkDescriptor::Table(table) => {
                assert_eq!(Some("me".to_string()), table.trace);
                assert_eq!(
                    "projects/p/datasets/d/tables/t/streams/_default",
                    table.write_stream()
                );
            }
            other => panic!("Expected a table descriptor, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type() {
        assert_eq!(
            Err(ValidationError::UnsupportedType("kafka".into())),
            validate("kafka", &Map::new())
        );
    }

    #[test]
    fn test_deserialize_validates() {
        let err = serde_json::from_str::<SinkDescriptor>(r#"{"type":"file","parameters":{}}"#)
            .expect_err("Should not deserialize without a file_path");
        assert!(err.to_string().contains("file_path is required"));

        let descriptor: SinkDescriptor =
            serde_json::from_str(r#"{"type":"file","config":{"file_path":"out.jsonl"}}"#)
                .expect("The config alias should be accepted");
        assert_eq!("file", descriptor.kind());
    }

    #[test]
    fn test_serialize_shape() {
        let descriptor = SinkDescriptor::File(FileConfig {
            file_path: "out.jsonl".into(),
        });
        let value = serde_json::to_value(&descriptor).expect("Failed to serialize");
        assert_eq!(
            json!({"type": "file", "parameters": {"file_path": "out.jsonl"}}),
            value
        );
    }
}
