//! REST API for leaderboards and identity linking

use crate::types::{
    ErrorBody, LeaderboardQuery, LinkAccepted, LinkAddressBody, TxStatus, TxStatusQuery,
};
use anyhow::Result;
use memoree_runtime::linker::parse_tx_hash;
use memoree_runtime::{IdentityLinker, LeaderboardSelector, LeaderboardService, LinkRequest, LinkState};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{error, info, warn};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

/// Link request bodies are two short strings
const MAX_BODY_BYTES: u64 = 16 * 1024;

/// Shared handles behind every route
pub struct AppState {
    pub leaderboard: LeaderboardService,
    pub linker: IdentityLinker,
    pub registry: Registry,
}

pub async fn run_api_server(port: u16, state: Arc<AppState>) -> Result<()> {
    info!("API server listening on port {}", port);

    warp::serve(routes(state)).run(([0, 0, 0, 0], port)).await;

    Ok(())
}

pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    // Health check endpoint
    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| warp::reply::json(&serde_json::json!({ "status": "ok" })));

    // Metrics endpoint
    let metrics = warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(get_metrics);

    // Ranked, trust-flagged leaderboard
    let leaderboard = warp::path("leaderboard")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<LeaderboardQuery>())
        .and(with_state(state.clone()))
        .and_then(leaderboard_handler);

    // Relay an identity mapping
    let link_address = warp::path("link-address")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(link_address_handler);

    // Confirmation polling for a relayed transaction
    let tx_status = warp::path("tx-status")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<TxStatusQuery>())
        .and(with_state(state))
        .and_then(tx_status_handler);

    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_headers(vec!["content-type"]);

    health
        .or(metrics)
        .or(leaderboard)
        .or(link_address)
        .or(tx_status)
        .with(cors)
        .recover(handle_rejection)
}

// Helper filters
fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn json_reply<T: Serialize>(body: &T, status: StatusCode) -> Response {
    warp::reply::with_status(warp::reply::json(body), status).into_response()
}

// Handler functions
async fn get_metrics(state: Arc<AppState>) -> Result<Response, Rejection> {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return Ok(json_reply(
            &ErrorBody::new("metrics unavailable"),
            StatusCode::INTERNAL_SERVER_ERROR,
        ));
    }

    Ok(warp::reply::with_header(buffer, "Content-Type", encoder.format_type()).into_response())
}

async fn leaderboard_handler(
    query: LeaderboardQuery,
    state: Arc<AppState>,
) -> Result<Response, Rejection> {
    let selector = LeaderboardSelector::from_tab(query.tab.as_deref());

    match state.leaderboard.fetch(selector).await {
        Ok(payload) => Ok(
            warp::reply::with_header(payload, "content-type", "application/json").into_response(),
        ),
        Err(e) => {
            error!("Leaderboard query for {:?} failed: {}", selector, e);
            let status = if e.is_client_error() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            Ok(json_reply(&ErrorBody::new("Flow query failed"), status))
        }
    }
}

async fn link_address_handler(
    body: LinkAddressBody,
    state: Arc<AppState>,
) -> Result<Response, Rejection> {
    let request = LinkRequest {
        foreign_address: body.flow_address.unwrap_or_default(),
        signature: body.signature.unwrap_or_default(),
    };

    let reply = match state.linker.link(&request).await {
        LinkState::Relayed { tx_hash, .. } => json_reply(
            &LinkAccepted {
                tx_hash: format!("{tx_hash:?}"),
            },
            StatusCode::OK,
        ),
        LinkState::Rejected { reason } => {
            json_reply(&ErrorBody::new(reason), StatusCode::BAD_REQUEST)
        }
        LinkState::RelayFailed { details } => json_reply(
            &ErrorBody::with_details("Relay failed", details),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
        other => {
            error!("Link ended in unexpected state {:?}", other);
            json_reply(
                &ErrorBody::new("Relay failed"),
                StatusCode::INTERNAL_SERVER_ERROR,
            )
        }
    };
    Ok(reply)
}

async fn tx_status_handler(
    query: TxStatusQuery,
    state: Arc<AppState>,
) -> Result<Response, Rejection> {
    let tx_hash = match parse_tx_hash(query.hash.as_deref().unwrap_or_default()) {
        Ok(hash) => hash,
        Err(e) => {
            return Ok(json_reply(
                &TxStatus {
                    mined: false,
                    error: Some(e.to_string()),
                },
                StatusCode::BAD_REQUEST,
            ))
        }
    };

    let mined = state.linker.wait_for_mined(tx_hash).await;
    if !mined {
        warn!("Tx {:?} not mined within the polling budget", tx_hash);
    }
    Ok(json_reply(&TxStatus { mined, error: None }, StatusCode::OK))
}

// Error handling
async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("Invalid JSON body: {e}"))
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Payload too large".to_string())
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Expected application/json".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else if let Some(e) = err.find::<warp::filters::cors::CorsForbidden>() {
        (StatusCode::FORBIDDEN, e.to_string())
    } else {
        error!("Unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
    };

    Ok(json_reply(&ErrorBody::new(message), status))
}
