use std::time::Duration;

use chrono::{DateTime, NaiveTime, TimeDelta, Timelike, Utc};
use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::models::{GeoPoint, Weather};

/// Weather and local wall-clock time at a point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conditions {
    pub weather: Weather,
    pub local_time: NaiveTime,
}

/// Live conditions lookup. Never fails: implementations fall back to clear weather
/// and solar time.
pub trait ConditionsProvider: Send + Sync {
    fn current<'a>(&'a self, at: GeoPoint) -> BoxFuture<'a, Conditions>;
}

/// Hours considered daytime, `[start_hour, end_hour)` in local time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DayWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for DayWindow {
    fn default() -> Self {
        Self {
            start_hour: 6,
            end_hour: 20,
        }
    }
}

impl DayWindow {
    pub fn is_night(&self, local_time: NaiveTime) -> bool {
        let hour = local_time.hour();
        hour < self.start_hour || hour >= self.end_hour
    }
}

/// Local mean solar time from longitude.
pub fn solar_time(lon: f64, now: DateTime<Utc>) -> NaiveTime {
    let offset_s = (lon / 15.0 * 3600.0).round() as i64;
    (now + TimeDelta::seconds(offset_s)).time()
}

/// Open-Meteo weather code and temperature to the coarse weather classes.
pub fn classify_weather(code: u32, temperature_c: f64) -> Weather {
    match code {
        61 | 63 | 65 | 80 | 81 | 82 => Weather::Rain,
        71 | 73 | 75 | 85 | 86 => Weather::Snow,
        _ if temperature_c > 30.0 => Weather::Hot,
        _ if temperature_c < 5.0 => Weather::Cold,
        _ => Weather::Clear,
    }
}

pub struct OpenMeteoWeather {
    http: Client,
    url: String,
}

#[derive(Deserialize)]
struct ForecastBody {
    #[serde(default)]
    utc_offset_seconds: Option<i64>,
    current_weather: CurrentWeather,
}

#[derive(Deserialize)]
struct CurrentWeather {
    temperature: f64,
    weathercode: u32,
}

impl OpenMeteoWeather {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
            url: url.into(),
        })
    }

    async fn lookup(&self, at: GeoPoint) -> Result<ForecastBody, reqwest::Error> {
        self.http
            .get(&self.url)
            .query(&[
                ("latitude", format!("{:.4}", at.lat)),
                ("longitude", format!("{:.4}", at.lon)),
                ("current_weather", "true".to_string()),
                ("timezone", "auto".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

impl ConditionsProvider for OpenMeteoWeather {
    fn current<'a>(&'a self, at: GeoPoint) -> BoxFuture<'a, Conditions> {
        Box::pin(async move {
            let now = Utc::now();
            match self.lookup(at).await {
                Ok(body) => {
                    let weather = classify_weather(body.current_weather.weathercode, body.current_weather.temperature);
                    let local_time = match body.utc_offset_seconds {
                        Some(offset) => (now + TimeDelta::seconds(offset)).time(),
                        None => solar_time(at.lon, now),
                    };
                    tracing::debug!(?weather, %local_time, "conditions resolved");
                    Conditions { weather, local_time }
                }
                Err(err) => {
                    tracing::warn!("weather lookup failed, assuming clear: {}", err);
                    Conditions {
                        weather: Weather::Clear,
                        local_time: solar_time(at.lon, now),
                    }
                }
            }
        })
    }
}

/// Constant conditions, for offline runs and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedConditions(pub Conditions);

impl FixedConditions {
    pub fn new(weather: Weather, hour: u32) -> Self {
        let local_time = NaiveTime::from_hms_opt(hour % 24, 0, 0).unwrap_or(NaiveTime::MIN);
        Self(Conditions { weather, local_time })
    }
}

impl ConditionsProvider for FixedConditions {
    fn current<'a>(&'a self, _at: GeoPoint) -> BoxFuture<'a, Conditions> {
        Box::pin(async move { self.0 })
    }
}
