//! Relish's main entrypoint
#[macro_use]
extern crate serde_derive;
#[cfg(feature = "simd")]
extern crate simd_json;
#[macro_use]
extern crate strum_macros;

use clap::{App, Arg};
use tracing::log::*;

use std::sync::Arc;

mod auth;
mod configuration;
mod errors;
mod ingest;
mod json;
mod serve;
mod settings;
mod sink;
mod status;

use configuration::{ConfigStore, MemoryStore};
use sink::manager::SinkManager;
use sink::registry::SinkRegistry;

#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

/// Non-async entrypoint which will set up the logger and launch the main smol task
fn main() -> Result<(), errors::RelishError> {
    pretty_env_logger::init();
    info!("Starting relish version {}", env!["CARGO_PKG_VERSION"]);

    use std::panic;
    // take_hook() returns the default hook in case when a custom one is not set
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        // invoke the default handler and exit the process
        orig_hook(panic_info);
        std::process::exit(1);
    }));
    smol::block_on(run())
}

/// Main asynchronous runloop
async fn run() -> Result<(), errors::RelishError> {
    let matches = App::new("Relish")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Forward webhooks into files and streaming tables")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Sets a custom config file")
                .default_value("relish.yml")
                .takes_value(true),
        )
        .get_matches();

    let settings_file = matches.value_of("config").unwrap_or("relish.yml");
    let settings = settings::load(settings_file)?;
    let stats = status::metrics(&settings.global.metrics.statsd)?;

    let store: Arc<dyn ConfigStore> = Arc::new(MemoryStore::new());
    let sinks = Arc::new(SinkManager::new(SinkRegistry::with_defaults(
        settings.global.table.clone(),
    )));
    let ingestor = Arc::new(ingest::Ingestor::new(
        store.clone(),
        sinks.clone(),
        stats.clone(),
        settings.global.timeouts.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = async_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })?;

    let addr = format!(
        "{}:{}",
        settings.global.listen.address, settings.global.listen.port
    );
    info!("Listening on: {}", addr);

    let app = serve::app(serve::State {
        store,
        sinks: sinks.clone(),
        ingestor,
        stats,
    });

    let served = smol::future::or(app.listen(addr), async {
        let _ = shutdown_rx.recv().await;
        info!("Interrupted, shutting down");
        Ok(())
    })
    .await;

    for (id, released) in sinks.shutdown().await {
        if let Err(err) = released.closed {
            warn!("Sink for {id} did not close cleanly: {err}");
        }
    }
    Ok(served?)
}
