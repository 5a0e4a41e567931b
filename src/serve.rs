//!
//! The serve module contains the HTTP surface of relish: managing configurations and receiving
//! the webhooks themselves.
//!
use dipstick::{InputQueueScope, InputScope};
use serde::{Deserialize, Serialize};
use tide::{Body, Request, Response, StatusCode};
use tracing::log::*;

use std::sync::Arc;

use crate::auth;
use crate::configuration::{ConfigStore, Configuration};
use crate::ingest::Ingestor;
use crate::sink::descriptor::SinkDescriptor;
use crate::sink::manager::SinkManager;
use crate::status::Stats;

#[derive(Clone)]
pub struct State {
    pub store: Arc<dyn ConfigStore>,
    pub sinks: Arc<SinkManager>,
    pub ingestor: Arc<Ingestor>,
    pub stats: InputQueueScope,
}

/// What callers send to create or replace a configuration
#[derive(Debug, Deserialize)]
struct ConfigurationRequest {
    name: String,
    #[serde(default)]
    use_key: bool,
    sink: SinkDescriptor,
}

/// A configuration as handed back to callers, along with its key the one time it is issued
#[derive(Serialize)]
struct ConfigurationResponse {
    #[serde(flatten)]
    configuration: Configuration,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse<'a> {
    error: &'a str,
    message: String,
}

#[derive(Serialize)]
struct StatusResponse {
    message: String,
    sinks: usize,
}

/// Build the tide application with every route relish serves
pub fn app(state: State) -> tide::Server<State> {
    let mut app = tide::with_state(state);

    app.at("/").get(|_| async move { Ok("relish webhook receiver") });
    app.at("/status").get(status);
    app.at("/configurations")
        .get(list_configurations)
        .post(create_configuration);
    app.at("/configurations/:id")
        .get(get_configuration)
        .put(update_configuration)
        .delete(delete_configuration);
    app.at("/ingest/:id").post(ingest);
    app
}

fn json_response(status: StatusCode, body: &impl Serialize) -> tide::Result {
    let mut res = Response::new(status);
    res.set_body(Body::from_json(body)?);
    Ok(res)
}

fn error_response(status: u16, error: &str, message: String) -> tide::Result {
    let mut res = Response::new(status);
    res.set_body(Body::from_json(&ErrorResponse { error, message })?);
    Ok(res)
}

fn parse_configuration(body: &[u8]) -> Result<ConfigurationRequest, tide::Result> {
    serde_json::from_slice(body).map_err(|e| {
        debug!("Refusing configuration: {e}");
        error_response(400, "invalid_configuration", e.to_string())
    })
}

async fn status(req: Request<State>) -> tide::Result {
    let sinks = req.state().sinks.len();
    json_response(
        StatusCode::Ok,
        &StatusResponse {
            message: format!("relish {}", env!("CARGO_PKG_VERSION")),
            sinks,
        },
    )
}

async fn list_configurations(req: Request<State>) -> tide::Result {
    let configs = req.state().store.list().await?;
    json_response(StatusCode::Ok, &configs)
}

async fn create_configuration(mut req: Request<State>) -> tide::Result {
    let body = req.body_bytes().await?;
    let request = match parse_configuration(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let config = Configuration::new(&request.name, request.sink, request.use_key);
    let config = req.state().store.insert(config).await?;
    config_with_key(req.state(), config).await
}

/// Issue a key for a freshly stored configuration if it wants one
async fn config_with_key(state: &State, mut config: Configuration) -> tide::Result {
    let mut key = None;
    if config.use_key {
        let generated = auth::generate_key();
        config.key_hash = Some(auth::hash_key(&config.id, &generated));
        config = state.store.update(config).await?;
        key = Some(generated);
    }
    info!("Created configuration {} ({})", config.id, config.sink.kind());
    json_response(
        StatusCode::Ok,
        &ConfigurationResponse {
            configuration: config,
            key,
        },
    )
}

async fn get_configuration(req: Request<State>) -> tide::Result {
    let id = req.param("id")?;
    match req.state().store.get(id).await {
        Ok(config) => json_response(StatusCode::Ok, &config),
        Err(e) => error_response(404, "not_found", e.to_string()),
    }
}

async fn update_configuration(mut req: Request<State>) -> tide::Result {
    let id = req.param("id")?.to_string();
    let existing = match req.state().store.get(&id).await {
        Ok(config) => config,
        Err(e) => return error_response(404, "not_found", e.to_string()),
    };

    let body = req.body_bytes().await?;
    let request = match parse_configuration(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let mut config = Configuration::new(&request.name, request.sink, request.use_key);
    config.id = existing.id.clone();

    let mut key = None;
    if config.use_key {
        match (existing.use_key, existing.key_hash) {
            (true, Some(hash)) => config.key_hash = Some(hash),
            _ => {
                let generated = auth::generate_key();
                config.key_hash = Some(auth::hash_key(&config.id, &generated));
                key = Some(generated);
            }
        }
    }

    let state = req.state();
    let config = match state.store.update(config).await {
        Ok(config) => config,
        Err(e) => return error_response(404, "not_found", e.to_string()),
    };
    release(state, &id).await;
    info!("Updated configuration {id}");

    json_response(
        StatusCode::Ok,
        &ConfigurationResponse {
            configuration: config,
            key,
        },
    )
}

async fn delete_configuration(req: Request<State>) -> tide::Result {
    let id = req.param("id")?;
    let state = req.state();
    match state.store.delete(id).await {
        Ok(config) => {
            release(state, id).await;
            info!("Deleted configuration {id}");
            json_response(StatusCode::Ok, &config)
        }
        Err(e) => error_response(404, "not_found", e.to_string()),
    }
}

/// The live sink no longer matches the stored configuration, if it exists
async fn release(state: &State, id: &str) {
    if state.sinks.release(id).await.is_some() {
        state.stats.counter(Stats::SinkReleased.into()).count(1);
    }
}

async fn ingest(mut req: Request<State>) -> tide::Result {
    let id = req.param("id")?.to_string();
    let credential = req
        .header("Authorization")
        .map(|values| auth::credential(values.last().as_str()).to_string());
    let body = req.body_bytes().await?;

    match req
        .state()
        .ingestor
        .handle(&id, credential.as_deref(), &body)
        .await
    {
        Ok(()) => Ok(Response::builder(StatusCode::Ok).body("Received").build()),
        Err(rejection) => error_response(
            rejection.status(),
            rejection.reason(),
            rejection.to_string(),
        ),
    }
}
