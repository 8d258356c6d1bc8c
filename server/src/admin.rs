//! Administrative HTTP interface
//!
//! `GET /save?name=..&lat=..&lon=..[&radiation-strength=..]`,
//! `GET /delete?name=..` and `GET /power-spots`, each mapped onto one
//! [`WorldHandle`] command.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use log::{info, warn};
use serde::Deserialize;
use shared::PowerSpot;
use std::io;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::world::{AddOutcome, WorldError, WorldHandle};

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("missing query parameter `{0}`")]
    MissingParam(&'static str),
    #[error("`{name}` is not a number: {value:?}")]
    NotANumber { name: &'static str, value: String },
    #[error(transparent)]
    World(#[from] WorldError),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match &self {
            AdminError::World(WorldError::Closed) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_REQUEST,
        };
        warn!("Admin request failed: {}", self);
        (status, self.to_string()).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct SaveParams {
    name: Option<String>,
    lat: Option<String>,
    lon: Option<String>,
    #[serde(rename = "radiation-strength")]
    radiation_strength: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    name: Option<String>,
}

fn required(value: Option<String>, name: &'static str) -> Result<String, AdminError> {
    value.ok_or(AdminError::MissingParam(name))
}

fn parse_number(value: &str, name: &'static str) -> Result<f64, AdminError> {
    value.trim().parse().map_err(|_| AdminError::NotANumber {
        name,
        value: value.to_string(),
    })
}

/// Builds the admin routes, each answering from the coordinator behind `world`
pub fn router(world: WorldHandle) -> Router {
    Router::new()
        .route("/save", get(save_handler))
        .route("/delete", get(delete_handler))
        .route("/power-spots", get(list_handler))
        .with_state(world)
}

/// Serves the admin routes on `listener` until the server fails
pub async fn serve(listener: TcpListener, world: WorldHandle) -> io::Result<()> {
    info!("Admin interface listening on {}", listener.local_addr()?);
    axum::serve(listener, router(world)).await
}

async fn save_handler(
    State(world): State<WorldHandle>,
    Query(params): Query<SaveParams>,
) -> Result<StatusCode, AdminError> {
    let name = required(params.name, "name")?;
    let lat = parse_number(&required(params.lat, "lat")?, "lat")?;
    let lon = parse_number(&required(params.lon, "lon")?, "lon")?;
    let radiation_strength = match params.radiation_strength {
        Some(value) => parse_number(&value, "radiation-strength")?,
        None => 0.0,
    };

    match world.add_power_spot(name.clone(), lat, lon, radiation_strength).await? {
        AddOutcome::Added => info!("Power spot `{}` added", name),
        AddOutcome::Replaced => info!("Power spot `{}` replaced", name),
    }
    Ok(StatusCode::OK)
}

async fn delete_handler(
    State(world): State<WorldHandle>,
    Query(params): Query<DeleteParams>,
) -> Result<StatusCode, AdminError> {
    let name = required(params.name, "name")?;
    let removed = world.delete_power_spot(name.clone()).await?;
    info!("Deleted {} power spots named `{}`", removed, name);
    Ok(StatusCode::OK)
}

async fn list_handler(State(world): State<WorldHandle>) -> Result<Json<Vec<PowerSpot>>, AdminError> {
    Ok(Json(world.list_power_spots().await?))
}
