use std::{
    fs::File,
    io::{BufRead, BufReader, Read},
    path::{Path, PathBuf},
    str::FromStr,
};

use futures::future::BoxFuture;
use thiserror::Error;

use crate::elevation::{ElevationError, ElevationSource};
use crate::models::GeoPoint;

#[derive(Debug, Error)]
pub enum DemLoadError {
    #[error("failed to read DEM file {path:?}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("DEM file missing header field `{0}`")]
    MissingHeader(&'static str),
    #[error("DEM file has an invalid value for `{field}`: {raw}")]
    InvalidValue { field: &'static str, raw: String },
    #[error("DEM grid has {expected} cells but file provided {actual}")]
    UnexpectedCellCount { expected: usize, actual: usize },
}

/// ArcInfo ASCII grid in geographic coordinates (x = lon, y = lat, cellsize in degrees).
#[derive(Debug)]
pub struct ArcAsciiDem {
    ncols: usize,
    nrows: usize,
    lon_min: f64,
    lat_min: f64,
    cellsize: f64,
    nodata: f64,
    lat_max: f64,
    lon_max: f64,
    values: Vec<f64>,
}

fn parse_field<T: FromStr>(field: &'static str, raw: &str) -> Result<T, DemLoadError> {
    raw.parse().map_err(|_| DemLoadError::InvalidValue {
        field,
        raw: raw.to_string(),
    })
}

impl ArcAsciiDem {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DemLoadError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| DemLoadError::Io {
            source,
            path: path.into(),
        })?;
        Self::from_reader(file, path)
    }

    pub fn from_reader(reader: impl Read, origin: &Path) -> Result<Self, DemLoadError> {
        let io_err = |source| DemLoadError::Io {
            source,
            path: origin.into(),
        };
        let mut ncols = None;
        let mut nrows = None;
        let mut lon_min = None;
        let mut lat_min = None;
        let mut cellsize = None;
        let mut nodata = None;
        let mut values = Vec::new();

        for line in BufReader::new(reader).lines() {
            let line = line.map_err(io_err)?;
            let mut parts = line.split_whitespace();
            let Some(first) = parts.next() else {
                continue;
            };
            if first.starts_with(|c: char| c.is_ascii_alphabetic()) {
                let Some(value) = parts.next() else {
                    continue;
                };
                match first.to_ascii_lowercase().as_str() {
                    "ncols" => ncols = Some(parse_field::<usize>("ncols", value)?),
                    "nrows" => nrows = Some(parse_field::<usize>("nrows", value)?),
                    "xllcorner" | "xllcenter" => lon_min = Some(parse_field::<f64>("xllcorner", value)?),
                    "yllcorner" | "yllcenter" => lat_min = Some(parse_field::<f64>("yllcorner", value)?),
                    "cellsize" => cellsize = Some(parse_field::<f64>("cellsize", value)?),
                    "nodata_value" => nodata = Some(parse_field::<f64>("nodata_value", value)?),
                    _ => {}
                }
                continue;
            }
            for token in std::iter::once(first).chain(parts) {
                values.push(parse_field::<f64>("value", token)?);
            }
        }

        let ncols = ncols.ok_or(DemLoadError::MissingHeader("ncols"))?;
        let nrows = nrows.ok_or(DemLoadError::MissingHeader("nrows"))?;
        let lon_min = lon_min.ok_or(DemLoadError::MissingHeader("xllcorner"))?;
        let lat_min = lat_min.ok_or(DemLoadError::MissingHeader("yllcorner"))?;
        let cellsize = cellsize.ok_or(DemLoadError::MissingHeader("cellsize"))?;
        let nodata = nodata.unwrap_or(-9999.0);

        let expected = ncols * nrows;
        if expected == 0 || values.len() != expected {
            return Err(DemLoadError::UnexpectedCellCount {
                expected,
                actual: values.len(),
            });
        }

        Ok(Self {
            ncols,
            nrows,
            lon_min,
            lat_min,
            cellsize,
            nodata,
            lat_max: lat_min + cellsize * ((nrows - 1) as f64),
            lon_max: lon_min + cellsize * ((ncols - 1) as f64),
            values,
        })
    }

    pub fn contains(&self, point: GeoPoint) -> bool {
        (self.lat_min..=self.lat_max).contains(&point.lat)
            && (self.lon_min..=self.lon_max).contains(&point.lon)
    }

    /// Bilinear sample; averages the valid corners when some are nodata.
    pub fn sample(&self, point: GeoPoint) -> Option<f64> {
        if !self.contains(point) {
            return None;
        }
        let col = ((point.lon - self.lon_min) / self.cellsize).clamp(0.0, (self.ncols - 1) as f64);
        let row = ((self.lat_max - point.lat) / self.cellsize).clamp(0.0, (self.nrows - 1) as f64);

        let x0 = col.floor() as usize;
        let y0 = row.floor() as usize;
        let x1 = (x0 + 1).min(self.ncols - 1);
        let y1 = (y0 + 1).min(self.nrows - 1);
        let corners = [
            self.value(y0, x0),
            self.value(y0, x1),
            self.value(y1, x0),
            self.value(y1, x1),
        ];

        let tx = col - x0 as f64;
        let ty = row - y0 as f64;
        match corners {
            [Some(a), Some(b), Some(c), Some(d)] => {
                let top = a * (1.0 - tx) + b * tx;
                let bottom = c * (1.0 - tx) + d * tx;
                Some(top * (1.0 - ty) + bottom * ty)
            }
            _ => {
                let valid: Vec<f64> = corners.into_iter().flatten().collect();
                (!valid.is_empty()).then(|| valid.iter().sum::<f64>() / valid.len() as f64)
            }
        }
    }

    fn value(&self, row: usize, col: usize) -> Option<f64> {
        let value = *self.values.get(row * self.ncols + col)?;
        ((value - self.nodata).abs() >= f64::EPSILON).then_some(value)
    }
}

impl ElevationSource for ArcAsciiDem {
    fn name(&self) -> &'static str {
        "dem"
    }

    fn covers(&self, batch: &[GeoPoint]) -> bool {
        batch.iter().all(|p| self.contains(*p))
    }

    fn fetch<'a>(&'a self, batch: &'a [GeoPoint]) -> BoxFuture<'a, Result<Vec<f64>, ElevationError>> {
        Box::pin(async move {
            batch
                .iter()
                .map(|p| self.sample(*p).ok_or(ElevationError::Incomplete { provider: "dem" }))
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRID: &str = "ncols 3\nnrows 3\nxllcorner 5.0\nyllcorner 45.0\ncellsize 0.01\nNODATA_value -9999\n\
                        120 130 140\n110 120 130\n100 110 -9999\n";

    fn grid() -> ArcAsciiDem {
        ArcAsciiDem::from_reader(GRID.as_bytes(), Path::new("inline.asc")).unwrap()
    }

    #[test]
    fn samples_grid_corners_and_interpolates() {
        let dem = grid();
        // Top row is the northern edge.
        let north_west = dem.sample(GeoPoint::new(45.02, 5.0)).unwrap();
        let south_west = dem.sample(GeoPoint::new(45.0, 5.0)).unwrap();
        assert!((north_west - 120.0).abs() < 1e-6);
        assert!((south_west - 100.0).abs() < 1e-6);
        let mid = dem.sample(GeoPoint::new(45.015, 5.005)).unwrap();
        assert!((mid - 120.0).abs() < 1e-9);
    }

    #[test]
    fn nodata_corners_are_skipped() {
        let dem = grid();
        let value = dem.sample(GeoPoint::new(45.005, 5.015)).unwrap();
        assert!((value - 120.0).abs() < 1e-6);
    }

    #[test]
    fn outside_bounds_is_not_covered() {
        let dem = grid();
        assert_eq!(dem.sample(GeoPoint::new(44.9, 5.0)), None);
        assert!(!dem.covers(&[GeoPoint::new(45.01, 5.01), GeoPoint::new(46.0, 5.0)]));
        assert!(dem.covers(&[GeoPoint::new(45.01, 5.01)]));
    }

    #[test]
    fn rejects_short_grid() {
        let err = ArcAsciiDem::from_reader(
            "ncols 2\nnrows 2\nxllcorner 0\nyllcorner 0\ncellsize 1\n1 2 3\n".as_bytes(),
            Path::new("short.asc"),
        )
        .unwrap_err();
        assert!(matches!(err, DemLoadError::UnexpectedCellCount { expected: 4, actual: 3 }));
    }

    #[test]
    fn rejects_missing_header() {
        let err = ArcAsciiDem::from_reader("ncols 1\nnrows 1\n5\n".as_bytes(), Path::new("x.asc")).unwrap_err();
        assert!(matches!(err, DemLoadError::MissingHeader("xllcorner")));
    }
}
