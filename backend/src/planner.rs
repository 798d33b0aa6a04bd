use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::{
    conditions::{Conditions, ConditionsProvider, DayWindow},
    costing::{best_presets, CostingProfile},
    elevation::ElevationPipeline,
    engine::{EngineTrip, RoutingEngine},
    error::{DecodeError, RoutingError, RoutingStage},
    geometry::{decode_geometry, destination_point, haversine_m, simplify, ENGINE_PRECISION},
    models::{
        ConditionsSummary, GeoPoint, Maneuver, RouteCandidate, RouteGeometry, RouteMode, RouteResult,
        Weather,
    },
    scoring::{rank_order, ScoreContext, Scorer},
};

/// Tunables of the candidate generator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerOptions {
    /// Simplification tolerance for the AR waypoint list.
    pub simplify_tolerance_m: f64,
    pub loop_bearings: usize,
    pub scenic_alternates: u8,
    pub walking_speed_mps: f64,
    pub day_window: DayWindow,
    /// Loop candidates with a jump longer than this between consecutive points are dropped.
    pub teleport_threshold_m: f64,
    /// Trail access routes shorter than this are treated as degenerate.
    pub min_route_m: f64,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            simplify_tolerance_m: 8.0,
            loop_bearings: 8,
            scenic_alternates: 2,
            walking_speed_mps: 1.3,
            day_window: DayWindow::default(),
            teleport_threshold_m: 500.0,
            min_route_m: 5.0,
        }
    }
}

/// Parsed routing inputs shared by every mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteQuery {
    pub start: GeoPoint,
    pub end: Option<GeoPoint>,
    pub duration_min: Option<u32>,
}

/// Turns one engine trip into a candidate, joining legs end to end.
///
/// Consecutive legs share their junction point; it is kept once and the
/// maneuver shape indices of later legs are shifted onto the joined geometry.
pub fn decode_trip(trip: &EngineTrip, costing: &str) -> Result<RouteCandidate, DecodeError> {
    let mut points: Vec<GeoPoint> = Vec::new();
    let mut maneuvers: Vec<Maneuver> = Vec::new();

    for leg in &trip.legs {
        let decoded = decode_geometry(&leg.shape, ENGINE_PRECISION)?.into_points();
        let joins = matches!((points.last(), decoded.first()), (Some(a), Some(b)) if a == b);
        let offset = if joins { points.len() - 1 } else { points.len() };

        maneuvers.extend(leg.maneuvers.iter().cloned().map(|mut m| {
            m.begin_shape_index += offset;
            m.end_shape_index += offset;
            m
        }));
        points.extend(decoded.into_iter().skip(usize::from(joins)));
    }

    if points.is_empty() {
        return Err(DecodeError::Empty);
    }

    Ok(RouteCandidate {
        costing: costing.to_string(),
        geometry: RouteGeometry::new(points),
        maneuvers,
        distance_km: trip.length_km,
        duration_s: trip.time_s,
        edges: Vec::new(),
        elevation: None,
        score: None,
    })
}

/// Longest gap between consecutive points, in meters.
fn longest_jump_m(points: &[GeoPoint]) -> f64 {
    points
        .windows(2)
        .map(|pair| haversine_m(pair[0], pair[1]))
        .fold(0.0, f64::max)
}

fn next_turn(maneuvers: &[Maneuver]) -> Option<Maneuver> {
    maneuvers
        .iter()
        .find(|m| !m.kind.starts_with("start"))
        .or_else(|| maneuvers.first())
        .cloned()
}

/// Mode-aware route generation on top of a [`RoutingEngine`].
pub struct RoutePlanner {
    engine: Arc<dyn RoutingEngine>,
    elevation: Arc<ElevationPipeline>,
    conditions: Arc<dyn ConditionsProvider>,
    scorer: Arc<Scorer>,
    options: PlannerOptions,
}

impl RoutePlanner {
    pub fn new(
        engine: Arc<dyn RoutingEngine>,
        elevation: Arc<ElevationPipeline>,
        conditions: Arc<dyn ConditionsProvider>,
        scorer: Arc<Scorer>,
        options: PlannerOptions,
    ) -> Self {
        Self {
            engine,
            elevation,
            conditions,
            scorer,
            options,
        }
    }

    pub fn options(&self) -> &PlannerOptions {
        &self.options
    }

    pub async fn compute_route(
        &self,
        start: GeoPoint,
        end: Option<GeoPoint>,
        mode: RouteMode,
        duration_min: Option<u32>,
    ) -> Result<RouteResult, RoutingError> {
        let query = RouteQuery {
            start,
            end,
            duration_min,
        };
        self.dispatch(mode, &query).await
    }

    /// Runs one request through parse, candidate generation, decode, scoring and simplification.
    pub async fn dispatch(&self, mode: RouteMode, query: &RouteQuery) -> Result<RouteResult, RoutingError> {
        tracing::debug!(%mode, stage = %RoutingStage::ParseInput, "routing request received");
        if !query.start.is_valid() {
            return Err(RoutingError::InvalidInput(format!(
                "start ({}, {}) is not a valid coordinate",
                query.start.lat, query.start.lon
            )));
        }
        if let Some(end) = query.end.filter(|end| !end.is_valid()) {
            return Err(RoutingError::InvalidInput(format!(
                "end ({}, {}) is not a valid coordinate",
                end.lat, end.lon
            )));
        }

        let result = match mode {
            RouteMode::Shortest => self.shortest(query).await,
            RouteMode::Safe => self.safe(query).await,
            RouteMode::Scenic => self.scenic(query).await,
            RouteMode::Explore => self.explore(query).await,
            RouteMode::Elevation => self.elevation_aware(query).await,
            RouteMode::Best => self.best(query).await,
            RouteMode::Loop => self.loop_route(query).await,
        };

        match &result {
            Ok(route) => tracing::info!(
                %mode,
                costing = %route.costing,
                distance_km = route.distance_km,
                composite = route.score.map(|s| s.composite()),
                "route ready"
            ),
            Err(err) => tracing::warn!(%mode, stage = %err.stage(), "routing failed: {}", err),
        }
        result
    }

    fn destination(mode: RouteMode, query: &RouteQuery) -> Result<GeoPoint, RoutingError> {
        query.end.ok_or(RoutingError::MissingDestination { mode })
    }

    /// Issues one engine call and decodes every returned trip.
    async fn request(
        &self,
        mode: RouteMode,
        locations: &[GeoPoint],
        profile: &CostingProfile,
        alternates: u8,
    ) -> Result<Vec<RouteCandidate>, RoutingError> {
        tracing::debug!(
            %mode,
            stage = %RoutingStage::GenerateCandidates,
            profile = profile.name,
            alternates,
            "requesting engine route"
        );
        let route = self
            .engine
            .route(locations, profile, alternates)
            .await
            .map_err(|source| RoutingError::EngineUnavailable {
                mode,
                stage: RoutingStage::GenerateCandidates,
                source,
            })?;

        let mut candidates = Vec::with_capacity(route.trips.len());
        let mut last_error = None;
        for trip in &route.trips {
            match decode_trip(trip, profile.name) {
                Ok(candidate) => candidates.push(candidate),
                Err(err) => {
                    tracing::debug!(%mode, stage = %RoutingStage::Decode, "Rejected: undecodable trip: {}", err);
                    last_error = Some(err);
                }
            }
        }

        if candidates.is_empty() {
            return Err(RoutingError::NoCandidates {
                mode,
                stage: RoutingStage::Decode,
                reason: match last_error {
                    Some(err) => err.to_string(),
                    None => "engine returned no trips".to_string(),
                },
            });
        }
        Ok(candidates)
    }

    /// Attaches edge metadata and the elevation profile. Edge lookup failure leaves
    /// the edges empty, which scores neutrally.
    async fn enrich(&self, mut candidate: RouteCandidate) -> RouteCandidate {
        let points = candidate.geometry.points();
        let (edges, profile) = futures::join!(self.engine.trace_attributes(points), self.elevation.profile(points));
        candidate.edges = edges.unwrap_or_else(|err| {
            tracing::warn!(costing = %candidate.costing, "edge metadata unavailable: {}", err);
            Vec::new()
        });
        candidate.elevation = Some(profile);
        candidate
    }

    async fn score_all(&self, candidates: Vec<RouteCandidate>, ctx: ScoreContext) -> Vec<RouteCandidate> {
        tracing::debug!(mode = %ctx.mode, stage = %RoutingStage::Score, candidates = candidates.len(), "scoring");
        join_all(candidates.into_iter().map(|c| self.enrich(c)))
            .await
            .into_iter()
            .map(|mut candidate| {
                candidate.score = Some(self.scorer.score_candidate(&candidate, &ctx));
                candidate
            })
            .collect()
    }

    fn respond(
        &self,
        mode: RouteMode,
        candidate: RouteCandidate,
        conditions: Option<ConditionsSummary>,
        target_distance_km: Option<f64>,
    ) -> RouteResult {
        tracing::debug!(%mode, stage = %RoutingStage::Simplify, points = candidate.geometry.len(), "simplifying");
        let waypoints = simplify(&candidate.geometry, self.options.simplify_tolerance_m).into_points();
        RouteResult {
            mode,
            costing: candidate.costing,
            next_turn: next_turn(&candidate.maneuvers),
            geometry: candidate.geometry.into_points(),
            waypoints,
            maneuvers: candidate.maneuvers,
            distance_km: candidate.distance_km,
            duration_s: candidate.duration_s,
            score: candidate.score,
            elevation: candidate.elevation,
            conditions,
            target_distance_km,
        }
    }

    async fn conditions_at(&self, at: GeoPoint) -> (Conditions, bool) {
        let conditions = self.conditions.current(at).await;
        let night = self.options.day_window.is_night(conditions.local_time);
        (conditions, night)
    }

    fn first(mode: RouteMode, candidates: Vec<RouteCandidate>) -> Result<RouteCandidate, RoutingError> {
        candidates.into_iter().next().ok_or(RoutingError::NoCandidates {
            mode,
            stage: RoutingStage::Score,
            reason: "no candidate left to rank".to_string(),
        })
    }

    async fn shortest(&self, query: &RouteQuery) -> Result<RouteResult, RoutingError> {
        let mode = RouteMode::Shortest;
        let end = Self::destination(mode, query)?;
        let candidates = self.request(mode, &[query.start, end], &CostingProfile::base(), 0).await?;
        Ok(self.respond(mode, Self::first(mode, candidates)?, None, None))
    }

    /// Single scored call with a fixed profile.
    async fn single_scored(
        &self,
        mode: RouteMode,
        query: &RouteQuery,
        profile: CostingProfile,
        ctx: ScoreContext,
        conditions: Option<ConditionsSummary>,
    ) -> Result<RouteResult, RoutingError> {
        let end = Self::destination(mode, query)?;
        let candidates = self.request(mode, &[query.start, end], &profile, 0).await?;
        let scored = self.score_all(candidates, ctx).await;
        Ok(self.respond(mode, Self::first(mode, scored)?, conditions, None))
    }

    async fn safe(&self, query: &RouteQuery) -> Result<RouteResult, RoutingError> {
        let mode = RouteMode::Safe;
        Self::destination(mode, query)?;
        let (conditions, night) = self.conditions_at(query.start).await;
        let ctx = ScoreContext {
            mode,
            weather: conditions.weather,
            is_night: night,
        };
        let summary = ConditionsSummary {
            weather: conditions.weather,
            night,
        };
        self.single_scored(mode, query, CostingProfile::safe(night), ctx, Some(summary))
            .await
    }

    async fn explore(&self, query: &RouteQuery) -> Result<RouteResult, RoutingError> {
        let mode = RouteMode::Explore;
        Self::destination(mode, query)?;
        let (conditions, night) = self.conditions_at(query.start).await;
        let ctx = ScoreContext {
            mode,
            weather: conditions.weather,
            is_night: night,
        };
        let summary = ConditionsSummary {
            weather: conditions.weather,
            night,
        };
        let profile = CostingProfile::explore(conditions.weather, night);
        self.single_scored(mode, query, profile, ctx, Some(summary)).await
    }

    async fn elevation_aware(&self, query: &RouteQuery) -> Result<RouteResult, RoutingError> {
        let mode = RouteMode::Elevation;
        let ctx = ScoreContext {
            mode,
            weather: Weather::Clear,
            is_night: false,
        };
        self.single_scored(mode, query, CostingProfile::elevation(), ctx, None)
            .await
    }

    async fn scenic(&self, query: &RouteQuery) -> Result<RouteResult, RoutingError> {
        let mode = RouteMode::Scenic;
        let end = Self::destination(mode, query)?;
        let candidates = self
            .request(
                mode,
                &[query.start, end],
                &CostingProfile::scenic(),
                self.options.scenic_alternates,
            )
            .await?;
        let ctx = ScoreContext {
            mode,
            weather: Weather::Clear,
            is_night: false,
        };
        let mut scored = self.score_all(candidates, ctx).await;
        scored.sort_by(|a, b| {
            let scenic = |c: &RouteCandidate| c.score.map(|s| s.scenic()).unwrap_or(0.0);
            scenic(b).total_cmp(&scenic(a)).then_with(|| rank_order(a, b))
        });
        Ok(self.respond(mode, Self::first(mode, scored)?, None, None))
    }

    /// Races the fixed preset set and keeps the best composite.
    async fn best(&self, query: &RouteQuery) -> Result<RouteResult, RoutingError> {
        let mode = RouteMode::Best;
        let end = Self::destination(mode, query)?;
        let (conditions, night) = self.conditions_at(query.start).await;
        let presets = best_presets(conditions.weather, night);
        let locations = [query.start, end];

        let outcomes = join_all(presets.iter().map(|profile| self.request(mode, &locations, profile, 0))).await;

        let mut candidates = Vec::new();
        for (profile, outcome) in presets.iter().zip(outcomes) {
            match outcome {
                Ok(mut trips) => {
                    trips.truncate(1);
                    candidates.extend(trips);
                }
                Err(err) => tracing::warn!(preset = profile.name, "preset failed: {}", err),
            }
        }
        if candidates.is_empty() {
            return Err(RoutingError::NoCandidates {
                mode,
                stage: RoutingStage::GenerateCandidates,
                reason: format!("all {} presets failed", presets.len()),
            });
        }

        let ctx = ScoreContext {
            mode,
            weather: conditions.weather,
            is_night: night,
        };
        let mut scored = self.score_all(candidates, ctx).await;
        scored.sort_by(rank_order);
        let summary = ConditionsSummary {
            weather: conditions.weather,
            night,
        };
        Ok(self.respond(mode, Self::first(mode, scored)?, Some(summary), None))
    }

    /// Closed loops of a target duration from the start point.
    ///
    /// # Algorithm: radial waypoints
    ///
    /// - Target distance = duration × walking speed.
    /// - `loop_bearings` waypoints are placed at half the target distance on evenly
    ///   spaced bearings (0°, 360°/K, ...).
    /// - Each bearing is one engine call with locations `[start, waypoint, start]`;
    ///   the calls run concurrently and failed bearings are dropped.
    /// - Candidates with a jump over `teleport_threshold_m` between consecutive
    ///   points are rejected.
    /// - Survivors are scored, then ranked by
    ///   `w × closeness-to-target + (1 − w) × composite`, ties by [`rank_order`].
    async fn loop_route(&self, query: &RouteQuery) -> Result<RouteResult, RoutingError> {
        let mode = RouteMode::Loop;
        let minutes = query.duration_min.unwrap_or(0);
        if minutes == 0 {
            return Err(RoutingError::InvalidDuration { minutes });
        }
        let target_m = f64::from(minutes) * 60.0 * self.options.walking_speed_mps;
        let target_km = target_m / 1000.0;
        let bearings = self.options.loop_bearings.max(1);
        let profile = CostingProfile::scenic();

        tracing::info!(
            "Generating loops: target {:.1}km from {} bearings",
            target_km,
            bearings
        );

        let attempts = (0..bearings).map(|step| {
            let bearing = 360.0 * step as f64 / bearings as f64;
            let waypoint = destination_point(query.start, target_m / 2.0, bearing);
            let profile = &profile;
            async move {
                let locations = [query.start, waypoint, query.start];
                (bearing, self.request(mode, &locations, profile, 0).await)
            }
        });
        let outcomes = join_all(attempts).await;

        let mut candidates = Vec::new();
        for (bearing, outcome) in outcomes {
            match outcome {
                Ok(trips) => {
                    for candidate in trips.into_iter().take(1) {
                        let jump = longest_jump_m(candidate.geometry.points());
                        if jump > self.options.teleport_threshold_m {
                            tracing::debug!("Rejected: bearing {:.0}° jumps {:.0}m between points", bearing, jump);
                            continue;
                        }
                        candidates.push(candidate);
                    }
                }
                Err(err) => tracing::warn!("loop bearing {:.0}° failed: {}", bearing, err),
            }
        }
        if candidates.is_empty() {
            return Err(RoutingError::NoCandidates {
                mode,
                stage: RoutingStage::GenerateCandidates,
                reason: format!("no loop from {} bearings", bearings),
            });
        }

        let ctx = ScoreContext {
            mode,
            weather: Weather::Clear,
            is_night: false,
        };
        let scored = self.score_all(candidates, ctx).await;
        let loop_score = |c: &RouteCandidate| self.scorer.loop_score(c.composite(), c.distance_km, target_km);
        let best = scored
            .into_iter()
            .max_by(|a, b| {
                loop_score(a)
                    .total_cmp(&loop_score(b))
                    .then_with(|| rank_order(b, a))
            })
            .ok_or(RoutingError::NoCandidates {
                mode,
                stage: RoutingStage::Score,
                reason: "no loop left to rank".to_string(),
            })?;

        tracing::info!(
            "✓ Accepted loop: {:.1}km (target {:.1}km), bearing {:.0}°",
            best.distance_km,
            target_km,
            best.start_bearing()
        );
        Ok(self.respond(mode, best, None, Some(target_km)))
    }

    /// Plain pedestrian route between two trail points; rejects near-zero routes.
    pub async fn route_between_trail_points(&self, a: GeoPoint, b: GeoPoint) -> Result<RouteResult, RoutingError> {
        let mode = RouteMode::Shortest;
        let query = RouteQuery {
            start: a,
            end: Some(b),
            duration_min: None,
        };
        if !a.is_valid() || !b.is_valid() {
            return Err(RoutingError::InvalidInput("trail endpoints must be valid coordinates".into()));
        }
        let end = Self::destination(mode, &query)?;
        let candidates = self.request(mode, &[a, end], &CostingProfile::trail_access(), 0).await?;
        let candidate = Self::first(mode, candidates)?;

        let distance_m = candidate.distance_km.max(0.0) * 1000.0;
        if distance_m < self.options.min_route_m || candidate.geometry.len() < 2 {
            return Err(RoutingError::Degenerate { distance_m });
        }
        Ok(self.respond(mode, candidate, None, None))
    }
}
