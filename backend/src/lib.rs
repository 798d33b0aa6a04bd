pub mod conditions;
pub mod config;
pub mod costing;
pub mod dem;
pub mod elevation;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod models;
pub mod planner;
pub mod scoring;
pub mod trails;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use tower_http::cors::CorsLayer;

use crate::conditions::OpenMeteoWeather;
use crate::config::Config;
use crate::elevation::ElevationPipeline;
use crate::engine::{EngineError, ValhallaClient};
use crate::error::{RoutingError, TrailDiscoveryError};
use crate::models::{
    ApiError, RouteRequest, RouteResult, TrailCandidate, TrailRequest, TrailRouteRequest,
};
use crate::planner::RoutePlanner;
use crate::scoring::Scorer;
use crate::trails::TrailFinder;

#[derive(Clone)]
pub struct AppState {
    pub planner: Arc<RoutePlanner>,
    pub trails: Arc<TrailFinder>,
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

impl AppState {
    /// Wires the Valhalla client, elevation chain, weather lookup and scorer from config.
    pub fn from_config(config: &Config) -> Result<Self, StartupError> {
        let engine = Arc::new(ValhallaClient::new(config.engine_url.clone(), config.engine_timeout)?);
        let elevation = Arc::new(ElevationPipeline::from_settings(
            &config.elevation,
            config.scoring.difficulty,
        )?);
        let conditions = Arc::new(OpenMeteoWeather::new(config.weather_url.clone(), config.elevation.timeout)?);
        let scorer = Arc::new(Scorer::new(config.scoring.clone()));

        let planner = RoutePlanner::new(
            engine.clone(),
            elevation.clone(),
            conditions,
            scorer.clone(),
            config.planner,
        );
        let trails = TrailFinder::new(engine, elevation, scorer, config.trails);
        Ok(Self {
            planner: Arc::new(planner),
            trails: Arc::new(trails),
        })
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/route", post(route_handler))
        .route("/api/trails", post(trails_handler))
        .route("/api/trail_route", post(trail_route_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

async fn route_handler(State(state): State<AppState>, Json(req): Json<RouteRequest>) -> ApiResult<RouteResult> {
    state
        .planner
        .compute_route(req.start, req.end, req.mode, req.duration_min)
        .await
        .map(Json)
        .map_err(routing_error)
}

async fn trails_handler(
    State(state): State<AppState>,
    Json(req): Json<TrailRequest>,
) -> ApiResult<Vec<TrailCandidate>> {
    if !req.start.is_valid() || !(req.radius_m > 0.0) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "trail search needs a valid start and a positive radius".into(),
        ));
    }
    let trails = state
        .trails
        .discover_trails(req.start, req.radius_m, req.limit)
        .await
        .map_err(trail_error)?;
    if trails.is_empty() {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("no walkable trails within {:.0} m", req.radius_m),
        ));
    }
    Ok(Json(trails))
}

async fn trail_route_handler(
    State(state): State<AppState>,
    Json(req): Json<TrailRouteRequest>,
) -> ApiResult<RouteResult> {
    state
        .planner
        .route_between_trail_points(req.start, req.end)
        .await
        .map(Json)
        .map_err(routing_error)
}

fn api_error(status: StatusCode, message: String) -> (StatusCode, Json<ApiError>) {
    (status, Json(ApiError { message }))
}

fn routing_error(err: RoutingError) -> (StatusCode, Json<ApiError>) {
    let status = match &err {
        RoutingError::MissingDestination { .. }
        | RoutingError::InvalidInput(_)
        | RoutingError::InvalidDuration { .. } => StatusCode::BAD_REQUEST,
        RoutingError::NoCandidates { .. } | RoutingError::Degenerate { .. } => StatusCode::NOT_FOUND,
        RoutingError::EngineUnavailable { .. } => StatusCode::BAD_GATEWAY,
    };
    api_error(status, err.to_string())
}

fn trail_error(err: TrailDiscoveryError) -> (StatusCode, Json<ApiError>) {
    let status = match &err {
        TrailDiscoveryError::EmptyIsochrone => StatusCode::NOT_FOUND,
        TrailDiscoveryError::Isochrone(_) | TrailDiscoveryError::EdgeTrace(_) => StatusCode::BAD_GATEWAY,
    };
    api_error(status, err.to_string())
}
