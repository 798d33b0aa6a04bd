use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use walkwithme::{
    config::Config,
    elevation::ElevationPipeline,
    geometry::{destination_point, path_length_m},
    models::GeoPoint,
};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Resolve an elevation profile through the configured source chain"
)]
struct Args {
    /// Start latitude
    #[arg(long)]
    lat: f64,
    #[arg(long)]
    lon: f64,

    /// Length of the probe line in meters
    #[arg(long, default_value_t = 1_000.0)]
    length_m: f64,

    /// Compass bearing of the probe line
    #[arg(long, default_value_t = 0.0)]
    bearing: f64,

    #[arg(long, default_value_t = 20)]
    samples: usize,

    /// Comma-separated source order, overriding ELEVATION_SOURCES
    #[arg(long, value_delimiter = ',')]
    sources: Vec<String>,

    /// Local ArcInfo ASCII grid, overriding LOCAL_DEM_PATH
    #[arg(long)]
    dem: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = Config::from_env()?;
    if let Some(dem) = args.dem {
        config.elevation.dem_path = Some(dem);
    }
    if !args.sources.is_empty() {
        config.elevation.sources = args.sources;
    }

    let start = GeoPoint::new(args.lat, args.lon);
    if !start.is_valid() {
        return Err(format!("({}, {}) is not a valid coordinate", args.lat, args.lon).into());
    }
    let steps = args.samples.max(2) - 1;
    let points: Vec<GeoPoint> = (0..=steps)
        .map(|i| destination_point(start, args.length_m * i as f64 / steps as f64, args.bearing))
        .collect();

    tracing::info!(
        "probing {} points over {:.0}m with sources {:?}",
        points.len(),
        path_length_m(&points),
        config.elevation.sources
    );
    let pipeline = ElevationPipeline::from_settings(&config.elevation, config.scoring.difficulty)?;
    let profile = pipeline.profile(&points).await;

    for (point, (raw, smooth)) in points.iter().zip(profile.samples.iter().zip(&profile.smoothed)) {
        println!("{:>10.5} {:>10.5} {:>8.1} m {:>8.1} m", point.lat, point.lon, raw, smooth);
    }
    println!(
        "gain {:.0} m, loss {:.0} m, max slope {:.1}%, sustained {:.1}%, difficulty {:?}",
        profile.gain_m,
        profile.loss_m,
        profile.max_slope * 100.0,
        profile.sustained_slope * 100.0,
        profile.difficulty
    );
    Ok(())
}
