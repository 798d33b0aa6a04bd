use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,
}

impl GeoPoint {
    /// Coordinate tolerance (degrees) used for equality.
    pub const EPSILON: f64 = 1e-7;

    pub const fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            elevation: None,
        }
    }

    pub fn with_elevation(self, elevation: f64) -> Self {
        Self {
            elevation: Some(elevation),
            ..self
        }
    }

    pub fn interpolate(self, other: Self, t: f64) -> Self {
        Self::new(
            self.lat + (other.lat - self.lat) * t,
            self.lon + (other.lon - self.lon) * t,
        )
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

impl PartialEq for GeoPoint {
    fn eq(&self, other: &Self) -> bool {
        (self.lat - other.lat).abs() <= Self::EPSILON && (self.lon - other.lon).abs() <= Self::EPSILON
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteMode {
    #[default]
    Shortest,
    Safe,
    Scenic,
    Explore,
    Elevation,
    Best,
    Loop,
}

impl RouteMode {
    pub const ALL: [RouteMode; 7] = [
        RouteMode::Shortest,
        RouteMode::Safe,
        RouteMode::Scenic,
        RouteMode::Explore,
        RouteMode::Elevation,
        RouteMode::Best,
        RouteMode::Loop,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RouteMode::Shortest => "shortest",
            RouteMode::Safe => "safe",
            RouteMode::Scenic => "scenic",
            RouteMode::Explore => "explore",
            RouteMode::Elevation => "elevation",
            RouteMode::Best => "best",
            RouteMode::Loop => "loop",
        }
    }
}

impl fmt::Display for RouteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weather {
    #[default]
    Clear,
    Rain,
    Snow,
    Hot,
    Cold,
}

impl Weather {
    pub fn is_adverse(self) -> bool {
        !matches!(self, Weather::Clear)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Moderate,
    Hard,
    Severe,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElevationProfile {
    /// Raw samples, one per geometry point.
    pub samples: Vec<f64>,
    pub smoothed: Vec<f64>,
    /// Grade per segment (rise over run), one fewer than `samples`.
    pub slopes: Vec<f64>,
    pub gain_m: f64,
    pub loss_m: f64,
    pub max_slope: f64,
    pub sustained_slope: f64,
    pub difficulty: Difficulty,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub safety: f64,
    pub scenic: f64,
    pub greenery: f64,
    pub water: f64,
    pub slope_penalty: f64,
    pub weather_penalty: f64,
}

impl ScoreComponents {
    pub fn clamped(self) -> Self {
        let unit = |v: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        Self {
            safety: unit(self.safety),
            scenic: unit(self.scenic),
            greenery: unit(self.greenery),
            water: unit(self.water),
            slope_penalty: unit(self.slope_penalty),
            weather_penalty: unit(self.weather_penalty),
        }
    }
}

/// One weight per score component; a mode's weights sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentWeights {
    pub safety: f64,
    pub scenic: f64,
    pub greenery: f64,
    pub water: f64,
    pub slope: f64,
    pub weather: f64,
}

impl ComponentWeights {
    pub fn sum(&self) -> f64 {
        self.safety + self.scenic + self.greenery + self.water + self.slope + self.weather
    }

    /// Rescales so the weights sum to 1. Negative weights are treated as 0.
    pub fn normalized(self) -> Self {
        let clean = Self {
            safety: self.safety.max(0.0),
            scenic: self.scenic.max(0.0),
            greenery: self.greenery.max(0.0),
            water: self.water.max(0.0),
            slope: self.slope.max(0.0),
            weather: self.weather.max(0.0),
        };
        let total = clean.sum();
        if total <= f64::EPSILON {
            return Self {
                safety: 1.0,
                scenic: 0.0,
                greenery: 0.0,
                water: 0.0,
                slope: 0.0,
                weather: 0.0,
            };
        }
        Self {
            safety: clean.safety / total,
            scenic: clean.scenic / total,
            greenery: clean.greenery / total,
            water: clean.water / total,
            slope: clean.slope / total,
            weather: clean.weather / total,
        }
    }

    pub fn dot(&self, c: &ScoreComponents) -> f64 {
        self.safety * c.safety
            + self.scenic * c.scenic
            + self.greenery * c.greenery
            + self.water * c.water
            + self.slope * c.slope_penalty
            + self.weather * c.weather_penalty
    }
}

/// Clamped components plus the weighted composite derived from them.
///
/// The only constructor computes `composite` from the components it stores, so
/// the two can never disagree.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    #[serde(flatten)]
    components: ScoreComponents,
    composite: f64,
}

impl ScoreBreakdown {
    pub fn weighted(components: ScoreComponents, weights: &ComponentWeights) -> Self {
        let components = components.clamped();
        Self {
            composite: weights.dot(&components),
            components,
        }
    }

    pub fn components(&self) -> &ScoreComponents {
        &self.components
    }

    pub fn composite(&self) -> f64 {
        self.composite
    }

    pub fn safety(&self) -> f64 {
        self.components.safety
    }

    pub fn scenic(&self) -> f64 {
        self.components.scenic
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Maneuver {
    pub kind: String,
    pub instruction: String,
    pub begin_shape_index: usize,
    pub end_shape_index: usize,
    pub length_km: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConditionsSummary {
    pub weather: Weather,
    pub night: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteResult {
    pub mode: RouteMode,
    /// Name of the costing profile that produced the returned geometry.
    pub costing: String,
    pub geometry: Vec<GeoPoint>,
    /// Simplified geometry for AR anchors.
    pub waypoints: Vec<GeoPoint>,
    pub maneuvers: Vec<Maneuver>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_turn: Option<Maneuver>,
    pub distance_km: f64,
    pub duration_s: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<ScoreBreakdown>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation: Option<ElevationProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<ConditionsSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_distance_km: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailCandidate {
    pub id: String,
    pub name: String,
    pub use_class: String,
    pub surface: String,
    pub geometry: Vec<GeoPoint>,
    pub center: GeoPoint,
    pub length_m: f64,
    pub distance_from_user_m: f64,
    pub est_time_min: u32,
    pub elevation: ElevationProfile,
    pub score: ScoreBreakdown,
    pub length_score: f64,
    pub difficulty_score: f64,
    /// Ranking value: weighted scenic, safety, length and difficulty.
    pub rank_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRequest {
    pub start: GeoPoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<GeoPoint>,
    #[serde(default)]
    pub mode: RouteMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_min: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailRequest {
    pub start: GeoPoint,
    #[serde(default = "default_trail_radius_m")]
    pub radius_m: f64,
    #[serde(default = "default_trail_limit")]
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailRouteRequest {
    pub start: GeoPoint,
    pub end: GeoPoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
}

pub fn default_trail_radius_m() -> f64 {
    2_000.0
}

pub fn default_trail_limit() -> usize {
    5
}
