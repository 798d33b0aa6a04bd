use serde::Serialize;

use crate::models::Weather;

/// Pedestrian costing knobs forwarded to the engine as `costing_options.pedestrian`.
/// Unset knobs are omitted so the engine keeps its own defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PedestrianCosting {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_roads: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_tracks: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_hills: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_lit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alley_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub walkway_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hill_penalty: Option<f64>,
}

/// Immutable engine costing built once per mode invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CostingProfile {
    pub name: &'static str,
    pub costing: &'static str,
    pub options: PedestrianCosting,
}

impl CostingProfile {
    fn pedestrian(name: &'static str, options: PedestrianCosting) -> Self {
        Self {
            name,
            costing: "pedestrian",
            options,
        }
    }

    pub fn base() -> Self {
        Self::pedestrian(
            "base",
            PedestrianCosting {
                use_roads: Some(0.5),
                use_hills: Some(0.5),
                use_lit: Some(0.5),
                ..Default::default()
            },
        )
    }

    pub fn scenic() -> Self {
        Self::pedestrian(
            "scenic",
            PedestrianCosting {
                use_roads: Some(0.2),
                use_tracks: Some(0.7),
                use_hills: Some(0.4),
                use_lit: Some(0.5),
                walkway_factor: Some(0.8),
                ..Default::default()
            },
        )
    }

    pub fn safe_day() -> Self {
        Self::pedestrian(
            "safe_day",
            PedestrianCosting {
                use_roads: Some(0.2),
                use_tracks: Some(0.2),
                use_hills: Some(0.3),
                use_lit: Some(0.4),
                safety_factor: Some(0.7),
                ..Default::default()
            },
        )
    }

    pub fn safe_night() -> Self {
        Self::pedestrian(
            "safe_night",
            PedestrianCosting {
                use_roads: Some(0.1),
                use_tracks: Some(0.0),
                use_hills: Some(0.3),
                use_lit: Some(1.5),
                alley_factor: Some(8.0),
                safety_factor: Some(1.5),
                ..Default::default()
            },
        )
    }

    pub fn safe(night: bool) -> Self {
        if night {
            Self::safe_night()
        } else {
            Self::safe_day()
        }
    }

    /// Rebuilt per request from live conditions.
    pub fn explore(weather: Weather, night: bool) -> Self {
        let mut options = PedestrianCosting {
            use_roads: Some(0.1),
            use_tracks: Some(0.6),
            use_hills: Some(0.4),
            use_lit: Some(0.6),
            alley_factor: Some(1.4),
            walkway_factor: Some(0.5),
            safety_factor: Some(0.9),
            ..Default::default()
        };
        if matches!(weather, Weather::Rain | Weather::Snow | Weather::Cold) {
            options.use_tracks = Some(0.2);
        }
        if night {
            options.use_tracks = Some(0.0);
            options.use_lit = Some(1.2);
        }
        Self::pedestrian("explore", options)
    }

    pub fn elevation() -> Self {
        Self::pedestrian(
            "elevation",
            PedestrianCosting {
                use_roads: Some(0.3),
                use_tracks: Some(0.3),
                use_hills: Some(0.0),
                hill_penalty: Some(15.0),
                safety_factor: Some(1.0),
                ..Default::default()
            },
        )
    }

    /// Profile used when routing a user to a discovered trail.
    pub fn trail_access() -> Self {
        Self::pedestrian("trail", PedestrianCosting::default())
    }
}

/// The fixed preset set raced by the BEST mode.
pub fn best_presets(weather: Weather, night: bool) -> [CostingProfile; 5] {
    [
        CostingProfile::base(),
        CostingProfile::scenic(),
        CostingProfile::safe_day(),
        CostingProfile::safe_night(),
        CostingProfile::explore(weather, night),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_knobs_are_not_serialized() {
        let json = serde_json::to_value(CostingProfile::base().options).unwrap();
        let object = json.as_object().unwrap();
        assert_eq!(object.len(), 3);
        assert!(object.get("alley_factor").is_none());
    }

    #[test]
    fn explore_reacts_to_conditions() {
        let day = CostingProfile::explore(Weather::Clear, false);
        let rain = CostingProfile::explore(Weather::Rain, false);
        let night = CostingProfile::explore(Weather::Clear, true);
        assert_eq!(day.options.use_tracks, Some(0.6));
        assert_eq!(rain.options.use_tracks, Some(0.2));
        assert_eq!(night.options.use_tracks, Some(0.0));
        assert_eq!(night.options.use_lit, Some(1.2));
    }

    #[test]
    fn best_presets_have_distinct_names() {
        let names: Vec<_> = best_presets(Weather::Snow, true).iter().map(|p| p.name).collect();
        assert_eq!(names, ["base", "scenic", "safe_day", "safe_night", "explore"]);
    }
}
