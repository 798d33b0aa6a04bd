use std::fmt;

use thiserror::Error;

use crate::engine::EngineError;
use crate::models::RouteMode;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("encoded geometry is empty")]
    Empty,
    #[error("encoded geometry truncated at byte {offset}")]
    Truncated { offset: usize },
    #[error("invalid byte {byte:#04x} at offset {offset}")]
    InvalidByte { offset: usize, byte: u8 },
    #[error("coordinate value overflows at offset {offset}")]
    Overflow { offset: usize },
    #[error("decoded point #{index} is out of range ({lat}, {lon})")]
    OutOfRange { index: usize, lat: f64, lon: f64 },
}

/// Step of the per-request routing state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingStage {
    ParseInput,
    GenerateCandidates,
    Decode,
    Score,
    Simplify,
}

impl fmt::Display for RoutingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RoutingStage::ParseInput => "parse_input",
            RoutingStage::GenerateCandidates => "generate_candidates",
            RoutingStage::Decode => "decode",
            RoutingStage::Score => "score",
            RoutingStage::Simplify => "simplify",
        })
    }
}

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("mode {mode} requires a destination")]
    MissingDestination { mode: RouteMode },
    #[error("invalid route request: {0}")]
    InvalidInput(String),
    #[error("loop duration must be positive, got {minutes} min")]
    InvalidDuration { minutes: u32 },
    #[error("routing engine unavailable for {mode} ({stage}): {source}")]
    EngineUnavailable {
        mode: RouteMode,
        stage: RoutingStage,
        #[source]
        source: EngineError,
    },
    #[error("no viable {mode} candidate ({stage}): {reason}")]
    NoCandidates {
        mode: RouteMode,
        stage: RoutingStage,
        reason: String,
    },
    #[error("engine returned a degenerate route of {distance_m:.1} m")]
    Degenerate { distance_m: f64 },
}

impl RoutingError {
    pub fn stage(&self) -> RoutingStage {
        match self {
            RoutingError::MissingDestination { .. }
            | RoutingError::InvalidInput(_)
            | RoutingError::InvalidDuration { .. } => RoutingStage::ParseInput,
            RoutingError::EngineUnavailable { stage, .. } | RoutingError::NoCandidates { stage, .. } => {
                *stage
            }
            RoutingError::Degenerate { .. } => RoutingStage::Decode,
        }
    }
}

#[derive(Debug, Error)]
pub enum TrailDiscoveryError {
    #[error("isochrone request failed: {0}")]
    Isochrone(#[source] EngineError),
    #[error("isochrone returned no usable boundary")]
    EmptyIsochrone,
    #[error("edge trace failed for every boundary chunk: {0}")]
    EdgeTrace(#[source] EngineError),
}
