//!
//! The manager owns every live sink, keyed by the identity of the configuration it serves
//!
//! Sinks are built lazily on first use and reused until the configuration changes, at which point
//! the old sink is released and the next webhook builds a fresh one from the new descriptor.
//!
//! Every configuration has its own slot lock, held across construction and across closing, so that
//! no configuration ever ends up with two sinks while a slow destination only holds up webhooks for
//! its own configuration.

use smol::lock::Mutex;
use tracing::log::*;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::descriptor::SinkDescriptor;
use super::registry::SinkRegistry;
use super::{SinkError, SinkRef};

/// What is left of a sink once it has been released
pub struct Released {
    pub sink: SinkRef,
    /// Outcome of closing the sink, the sink is gone from the manager either way
    pub closed: Result<(), SinkError>,
}

/// A sink along with the descriptor it was built from
struct Live {
    descriptor: SinkDescriptor,
    sink: SinkRef,
}

type Slot = Arc<Mutex<Option<Live>>>;

pub struct SinkManager {
    registry: SinkRegistry,
    /// Only locked long enough to look a slot up
    slots: Mutex<HashMap<String, Slot>>,
    live: AtomicUsize,
}

impl SinkManager {
    pub fn new(registry: SinkRegistry) -> Self {
        SinkManager {
            registry,
            slots: Mutex::new(HashMap::default()),
            live: AtomicUsize::new(0),
        }
    }

    ///
    /// Return the live sink for the configuration, constructing it from the descriptor if there
    /// isn't one yet.
    ///
    /// A live sink built from a different descriptor is replaced, and closed once its replacement
    /// exists. If the replacement cannot be built the live sink stays as it was.
    ///
    pub async fn acquire(
        &self,
        config_id: &str,
        descriptor: &SinkDescriptor,
    ) -> Result<SinkRef, SinkError> {
        if config_id.is_empty() {
            return Err(SinkError::Construction(
                "cannot build a sink for an unidentified configuration".into(),
            ));
        }

        let slot = self
            .slots
            .lock()
            .await
            .entry(config_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();
        let mut live = slot.lock().await;

        if let Some(current) = live.as_ref() {
            if current.descriptor == *descriptor {
                return Ok(current.sink.clone());
            }
            info!("The live sink for {config_id} no longer matches its descriptor, replacing it");
        }

        debug!("Constructing a {} sink for {config_id}", descriptor.kind());
        let sink = match self.registry.construct(descriptor).await {
            Ok(sink) => sink,
            Err(err) => {
                drop(live);
                self.forget_if_idle(config_id, slot).await;
                return Err(err);
            }
        };

        let replaced = live.replace(Live {
            descriptor: descriptor.clone(),
            sink: sink.clone(),
        });
        match replaced {
            Some(stale) => {
                if let Err(err) = stale.sink.close().await {
                    error!("Failed to cleanly close the replaced sink for {config_id}: {err}");
                }
            }
            None => {
                self.live.fetch_add(1, Ordering::SeqCst);
            }
        }
        info!("Registered a {} sink for {config_id}", descriptor.kind());
        Ok(sink)
    }

    /// Remove and close the sink for the configuration, if there is one
    pub async fn release(&self, config_id: &str) -> Option<Released> {
        let slot = self.slots.lock().await.get(config_id).cloned()?;

        let mut live = slot.lock().await;
        let released = match live.take() {
            Some(Live { sink, .. }) => {
                self.live.fetch_sub(1, Ordering::SeqCst);
                let closed = sink.close().await;
                if let Err(err) = &closed {
                    error!("Failed to cleanly close the sink for {config_id}: {err}");
                } else {
                    debug!("Released the sink for {config_id}");
                }
                Some(Released { sink, closed })
            }
            None => None,
        };
        drop(live);

        self.forget_if_idle(config_id, slot).await;
        released
    }

    /// Release every live sink, meant for process teardown
    pub async fn shutdown(&self) -> Vec<(String, Released)> {
        let ids: Vec<String> = self.slots.lock().await.keys().cloned().collect();
        info!("Shutting down {} sinks", self.len());

        let mut released = vec![];
        for id in ids {
            if let Some(sink) = self.release(&id).await {
                released.push((id, sink));
            }
        }
        released
    }

    /// Number of live sinks
    pub fn len(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Drop an empty slot nobody else is holding on to
    async fn forget_if_idle(&self, config_id: &str, slot: Slot) {
        let mut slots = self.slots.lock().await;
        let ours = slots.get(config_id).is_some_and(|s| Arc::ptr_eq(s, &slot));
        // Slots are only handed out under the map lock, so the count can't grow while it's held
        if ours
            && Arc::strong_count(&slot) == 2
            && slot.try_lock().is_some_and(|live| live.is_none())
        {
            slots.remove(config_id);
        }
    }
}
