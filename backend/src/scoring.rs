use std::{cmp::Ordering, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::elevation::DifficultyThresholds;
use crate::models::{
    ComponentWeights, Difficulty, EdgeInfo, EdgeUse, ElevationProfile, RoadClass, RouteCandidate,
    RouteMode, ScoreBreakdown, ScoreComponents, Weather,
};

const LANDMARK_WORDS: &[&str] = &[
    "park", "lake", "river", "creek", "garden", "trail", "greenway", "promenade", "waterfront",
    "boardwalk", "esplanade", "view",
];
const GREEN_WORDS: &[&str] = &[
    "park", "garden", "forest", "wood", "green", "meadow", "botanical", "nature", "reserve",
];
const WATER_WORDS: &[&str] = &[
    "river", "lake", "creek", "harbor", "harbour", "waterfront", "pier", "canal", "beach", "bay",
    "pond", "marina", "quay", "brook",
];

#[derive(Debug, thiserror::Error)]
pub enum ScoringConfigError {
    #[error("failed to read scoring config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid scoring config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Weight vector per route mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeWeights {
    pub shortest: ComponentWeights,
    pub safe: ComponentWeights,
    pub scenic: ComponentWeights,
    pub explore: ComponentWeights,
    pub elevation: ComponentWeights,
    pub best: ComponentWeights,
    #[serde(rename = "loop")]
    pub loop_: ComponentWeights,
}

const fn weights(
    safety: f64,
    scenic: f64,
    greenery: f64,
    water: f64,
    slope: f64,
    weather: f64,
) -> ComponentWeights {
    ComponentWeights {
        safety,
        scenic,
        greenery,
        water,
        slope,
        weather,
    }
}

impl Default for ModeWeights {
    fn default() -> Self {
        Self {
            shortest: weights(0.30, 0.20, 0.15, 0.10, 0.25, 0.00),
            safe: weights(0.55, 0.10, 0.10, 0.05, 0.20, 0.00),
            scenic: weights(0.10, 0.35, 0.25, 0.20, 0.10, 0.00),
            explore: weights(0.20, 0.25, 0.15, 0.15, 0.10, 0.15),
            elevation: weights(0.15, 0.05, 0.05, 0.05, 0.70, 0.00),
            best: weights(0.25, 0.20, 0.10, 0.10, 0.20, 0.15),
            loop_: weights(0.20, 0.25, 0.20, 0.15, 0.20, 0.00),
        }
    }
}

impl ModeWeights {
    pub fn for_mode(&self, mode: RouteMode) -> &ComponentWeights {
        match mode {
            RouteMode::Shortest => &self.shortest,
            RouteMode::Safe => &self.safe,
            RouteMode::Scenic => &self.scenic,
            RouteMode::Explore => &self.explore,
            RouteMode::Elevation => &self.elevation,
            RouteMode::Best => &self.best,
            RouteMode::Loop => &self.loop_,
        }
    }

    fn normalized(self) -> Self {
        Self {
            shortest: self.shortest.normalized(),
            safe: self.safe.normalized(),
            scenic: self.scenic.normalized(),
            explore: self.explore.normalized(),
            elevation: self.elevation.normalized(),
            best: self.best.normalized(),
            loop_: self.loop_.normalized(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherSeverity {
    pub clear: f64,
    pub rain: f64,
    pub snow: f64,
    pub hot: f64,
    pub cold: f64,
}

impl Default for WeatherSeverity {
    fn default() -> Self {
        Self {
            clear: 0.0,
            rain: 0.5,
            snow: 0.7,
            hot: 0.3,
            cold: 0.2,
        }
    }
}

impl WeatherSeverity {
    fn of(&self, weather: Weather) -> f64 {
        match weather {
            Weather::Clear => self.clear,
            Weather::Rain => self.rain,
            Weather::Snow => self.snow,
            Weather::Hot => self.hot,
            Weather::Cold => self.cold,
        }
    }
}

/// Weights of the trail ranking composite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailWeights {
    pub scenic: f64,
    pub safety: f64,
    pub length: f64,
    pub difficulty: f64,
    /// Trail length that earns a full length score.
    pub ideal_length_m: f64,
}

impl Default for TrailWeights {
    fn default() -> Self {
        Self {
            scenic: 0.35,
            safety: 0.25,
            length: 0.20,
            difficulty: 0.20,
            ideal_length_m: 3_000.0,
        }
    }
}

impl TrailWeights {
    fn normalized(self) -> Self {
        let total = self.scenic + self.safety + self.length + self.difficulty;
        if !(total.is_finite() && total > 0.0) {
            return Self::default();
        }
        Self {
            scenic: self.scenic / total,
            safety: self.safety / total,
            length: self.length / total,
            difficulty: self.difficulty / total,
            ideal_length_m: self.ideal_length_m,
        }
    }
}

/// Scoring tables, loadable from JSON. Missing sections keep their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ModeWeights,
    pub night_safety_boost: f64,
    pub slope_ceiling: f64,
    pub weather_severity: WeatherSeverity,
    pub difficulty: DifficultyThresholds,
    pub trail: TrailWeights,
    pub loop_closeness_weight: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ModeWeights::default(),
            night_safety_boost: 1.25,
            slope_ceiling: 0.15,
            weather_severity: WeatherSeverity::default(),
            difficulty: DifficultyThresholds::default(),
            trail: TrailWeights::default(),
            loop_closeness_weight: 0.4,
        }
    }
}

impl ScoringConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ScoringConfigError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ScoringConfigError> {
        let config: ScoringConfig = serde_json::from_str(raw)?;
        Ok(config.normalized())
    }

    /// Renormalizes every weight vector to sum to 1.
    pub fn normalized(mut self) -> Self {
        self.weights = self.weights.normalized();
        self.trail = self.trail.normalized();
        self.slope_ceiling = if self.slope_ceiling > 0.0 { self.slope_ceiling } else { 0.15 };
        self.loop_closeness_weight = self.loop_closeness_weight.clamp(0.0, 1.0);
        self
    }
}

/// Per-request inputs that affect scoring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreContext {
    pub mode: RouteMode,
    pub weather: Weather,
    pub is_night: bool,
}

/// Trail ranking terms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailScore {
    pub breakdown: ScoreBreakdown,
    pub length_score: f64,
    pub difficulty_score: f64,
    pub rank: f64,
}

#[derive(Debug, Clone)]
pub struct Scorer {
    config: ScoringConfig,
}

fn edge_safety(edge: &EdgeInfo) -> f64 {
    let base: f64 = match &edge.use_class {
        EdgeUse::Footway | EdgeUse::Sidewalk | EdgeUse::Pedestrian | EdgeUse::PedestrianCrossing => 0.8,
        EdgeUse::LivingStreet => 0.75,
        EdgeUse::Path | EdgeUse::Track => 0.55,
        EdgeUse::Steps | EdgeUse::Cycleway | EdgeUse::Bridleway => 0.5,
        EdgeUse::Alley => 0.2,
        EdgeUse::Road | EdgeUse::ServiceRoad => match edge.road_class {
            RoadClass::Residential | RoadClass::Unclassified | RoadClass::Service => 0.6,
            RoadClass::Tertiary => 0.5,
            RoadClass::Secondary => 0.4,
            RoadClass::Primary => 0.25,
            RoadClass::Trunk | RoadClass::Motorway => 0.1,
            RoadClass::Unknown => 0.45,
        },
        EdgeUse::Ferry | EdgeUse::Rail | EdgeUse::Other(_) => 0.4,
    };
    let lit = match edge.lit {
        Some(true) => 0.2,
        Some(false) => -0.15,
        None => 0.0,
    };
    let sidewalk = if edge.sidewalk { 0.1 } else { 0.0 };
    (base + lit + sidewalk).clamp(0.0, 1.0)
}

fn edge_scenic(edge: &EdgeInfo) -> f64 {
    let base: f64 = match &edge.use_class {
        EdgeUse::Path | EdgeUse::Track | EdgeUse::Bridleway => 0.7,
        EdgeUse::Footway => 0.55,
        EdgeUse::Pedestrian | EdgeUse::LivingStreet => 0.5,
        EdgeUse::Sidewalk => 0.35,
        EdgeUse::Road if edge.road_class.is_major() => 0.05,
        EdgeUse::Road => 0.2,
        _ => 0.3,
    };
    let landmark = if edge.names_contain(LANDMARK_WORDS) { 0.3 } else { 0.0 };
    let natural = if edge.is_unpaved() { 0.1 } else { 0.0 };
    (base + landmark + natural).clamp(0.0, 1.0)
}

fn edge_greenery(edge: &EdgeInfo) -> f64 {
    if edge.names_contain(GREEN_WORDS) {
        return 1.0;
    }
    match edge.use_class {
        EdgeUse::Path | EdgeUse::Track | EdgeUse::Bridleway => 0.6,
        EdgeUse::Footway => 0.2,
        _ => 0.0,
    }
}

fn edge_water(edge: &EdgeInfo) -> f64 {
    if edge.names_contain(WATER_WORDS) {
        1.0
    } else {
        0.0
    }
}

/// Length-weighted mean of a per-edge signal; `None` without edges.
fn length_weighted(edges: &[EdgeInfo], signal: impl Fn(&EdgeInfo) -> f64) -> Option<f64> {
    let (sum, total) = edges.iter().fold((0.0, 0.0), |(sum, total), edge| {
        let weight = edge.length_km.max(1e-6);
        (sum + signal(edge) * weight, total + weight)
    });
    (total > 0.0).then(|| sum / total)
}

impl Scorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn weights(&self, mode: RouteMode) -> &ComponentWeights {
        self.config.weights.for_mode(mode)
    }

    fn slope_penalty(&self, elevation: Option<&ElevationProfile>) -> f64 {
        match elevation {
            Some(profile) if profile.difficulty != Difficulty::Unknown => {
                1.0 - profile.sustained_slope / self.config.slope_ceiling
            }
            _ => 0.5,
        }
    }

    fn weather_penalty(&self, edges: &[EdgeInfo], elevation: Option<&ElevationProfile>, ctx: &ScoreContext) -> f64 {
        if !matches!(ctx.mode, RouteMode::Explore | RouteMode::Best) {
            return 1.0;
        }
        let severity = self.config.weather_severity.of(ctx.weather);
        let unpaved = length_weighted(edges, |e| if e.is_unpaved() { 1.0 } else { 0.0 }).unwrap_or(0.0);
        let steepness = elevation
            .map(|p| (p.sustained_slope / self.config.slope_ceiling).clamp(0.0, 1.0))
            .unwrap_or(0.0);
        let exposure = 0.5 + 0.5 * unpaved.max(steepness);
        1.0 - severity * exposure
    }

    /// Component scores and composite for one candidate's edges and elevation.
    pub fn score(
        &self,
        edges: &[EdgeInfo],
        elevation: Option<&ElevationProfile>,
        ctx: &ScoreContext,
    ) -> ScoreBreakdown {
        let mut safety = length_weighted(edges, edge_safety).unwrap_or(0.5);
        if ctx.is_night && matches!(ctx.mode, RouteMode::Safe | RouteMode::Explore) {
            safety *= self.config.night_safety_boost;
        }
        let components = ScoreComponents {
            safety,
            scenic: length_weighted(edges, edge_scenic).unwrap_or(0.3),
            greenery: length_weighted(edges, edge_greenery).unwrap_or(0.0),
            water: length_weighted(edges, edge_water).unwrap_or(0.0),
            slope_penalty: self.slope_penalty(elevation),
            weather_penalty: self.weather_penalty(edges, elevation, ctx),
        };
        ScoreBreakdown::weighted(components, self.weights(ctx.mode))
    }

    pub fn score_candidate(&self, candidate: &RouteCandidate, ctx: &ScoreContext) -> ScoreBreakdown {
        self.score(&candidate.edges, candidate.elevation.as_ref(), ctx)
    }

    /// Loop ranking value: closeness of the distance to the target blended with the composite.
    pub fn loop_score(&self, composite: f64, distance_km: f64, target_km: f64) -> f64 {
        let closeness = if target_km > 0.0 {
            (1.0 - (distance_km - target_km).abs() / target_km).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let w = self.config.loop_closeness_weight;
        w * closeness + (1.0 - w) * composite
    }

    pub fn trail_score(&self, edges: &[EdgeInfo], elevation: &ElevationProfile, length_m: f64) -> TrailScore {
        let ctx = ScoreContext {
            mode: RouteMode::Scenic,
            weather: Weather::Clear,
            is_night: false,
        };
        let breakdown = self.score(edges, Some(elevation), &ctx);
        let tw = &self.config.trail;

        let ideal = tw.ideal_length_m.max(1.0);
        let length_score = if length_m <= 0.0 {
            0.0
        } else if length_m <= ideal {
            length_m / ideal
        } else {
            ideal / length_m
        };
        let difficulty_score = match elevation.difficulty {
            Difficulty::Easy => 1.0,
            Difficulty::Moderate => 0.8,
            Difficulty::Hard => 0.55,
            Difficulty::Severe => 0.3,
            Difficulty::Unknown => 0.6,
        };
        let rank = tw.scenic * breakdown.scenic()
            + tw.safety * breakdown.safety()
            + tw.length * length_score
            + tw.difficulty * difficulty_score;

        TrailScore {
            breakdown,
            length_score,
            difficulty_score,
            rank,
        }
    }
}

/// Candidate order: composite descending, then distance ascending, then start bearing ascending.
pub fn rank_order(a: &RouteCandidate, b: &RouteCandidate) -> Ordering {
    b.composite()
        .total_cmp(&a.composite())
        .then_with(|| a.distance_km.total_cmp(&b.distance_km))
        .then_with(|| a.start_bearing().total_cmp(&b.start_bearing()))
}
