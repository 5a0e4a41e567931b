//!
//! The registry maps a descriptor's type onto whatever knows how to build that kind of sink
//!
//! Adding a destination means writing a [SinkBuilder] and registering it, nothing else in relish
//! needs to know about it.

use tracing::log::*;

use std::collections::HashMap;
use std::sync::Arc;

use super::descriptor::{FILE, SinkDescriptor, TABLE};
use super::file::FileSink;
use super::table::{StreamingTableSink, TableDefaults};
use super::{SinkError, SinkRef};

/// Constructs a live sink from a validated descriptor
#[async_trait::async_trait]
pub trait SinkBuilder: Send + Sync {
    async fn build(&self, descriptor: &SinkDescriptor) -> Result<SinkRef, SinkError>;
}

#[derive(Clone, Default)]
pub struct SinkRegistry {
    builders: HashMap<&'static str, Arc<dyn SinkBuilder>>,
}

impl SinkRegistry {
    /// A registry with nothing registered
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry relish serves with: files and streaming tables
    pub fn with_defaults(table: TableDefaults) -> Self {
        let mut registry = Self::new();
        registry.register(FILE, Arc::new(FileBuilder));
        registry.register(TABLE, Arc::new(TableBuilder { defaults: table }));
        registry
    }

    /// Register (or replace) the builder for the given sink type
    pub fn register(&mut self, kind: &'static str, builder: Arc<dyn SinkBuilder>) {
        self.builders.insert(kind, builder);
    }

    pub async fn construct(&self, descriptor: &SinkDescriptor) -> Result<SinkRef, SinkError> {
        let kind = descriptor.kind();
        match self.builders.get(kind) {
            Some(builder) => {
                debug!("Constructing a {kind} sink");
                builder.build(descriptor).await
            }
            None => Err(SinkError::Unsupported(kind.to_string())),
        }
    }
}

fn mismatch(expected: &str, descriptor: &SinkDescriptor) -> SinkError {
    SinkError::Construction(format!(
        "a {expected} builder cannot build a {} sink",
        descriptor.kind()
    ))
}

struct FileBuilder;

#[async_trait::async_trait]
impl SinkBuilder for FileBuilder {
    async fn build(&self, descriptor: &SinkDescriptor) -> Result<SinkRef, SinkError> {
        match descriptor {
            SinkDescriptor::File(config) => Ok(Arc::new(FileSink::new(&config.file_path))),
            other => Err(mismatch(FILE, other)),
        }
    }
}

struct TableBuilder {
    defaults: TableDefaults,
}

#[async_trait::async_trait]
impl SinkBuilder for TableBuilder {
    async fn build(&self, descriptor: &SinkDescriptor) -> Result<SinkRef, SinkError> {
        match descriptor {
            SinkDescriptor::Table(config) => Ok(Arc::new(
                StreamingTableSink::connect(config, &self.defaults).await?,
            )),
            other => Err(mismatch(TABLE, other)),
        }
    }
}
