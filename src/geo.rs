use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::data::model::Table;
use crate::taxonomy::{CITY_ID, PROVINCE};

/// Property naming the prefecture in the boundary files.
pub const PREFECTURE: &str = "Perfecture";

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("expected a GeoJSON FeatureCollection")]
    NotFeatureCollection,

    #[error("feature {0} has no 'Perfecture' or 'City_ID' property")]
    MissingId(usize),

    #[error("feature {index}: {reason}")]
    BadGeometry { index: usize, reason: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Region – one prefecture outline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub id: String,
    pub province: Option<String>,
    /// Exterior rings as `[lon, lat]`; holes are dropped.
    pub polygons: Vec<Vec<[f64; 2]>>,
}

impl Region {
    /// `[min_lon, min_lat, max_lon, max_lat]`.
    pub fn bounds(&self) -> Option<[f64; 4]> {
        bounds_of(self.polygons.iter().flatten())
    }

    /// Whether `[lon, lat]` falls inside any of the outlines (even-odd rule).
    pub fn contains(&self, point: [f64; 2]) -> bool {
        self.polygons.iter().any(|ring| ring_contains(ring, point))
    }
}

fn ring_contains(ring: &[[f64; 2]], [x, y]: [f64; 2]) -> bool {
    let mut inside = false;
    let mut j = ring.len().wrapping_sub(1);
    for (i, a) in ring.iter().enumerate() {
        let b = ring[j];
        if (a[1] > y) != (b[1] > y) && x < (b[0] - a[0]) * (y - a[1]) / (b[1] - a[1]) + a[0] {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn bounds_of<'a>(points: impl Iterator<Item = &'a [f64; 2]>) -> Option<[f64; 4]> {
    points.fold(None, |acc, p| {
        Some(match acc {
            None => [p[0], p[1], p[0], p[1]],
            Some([x0, y0, x1, y1]) => [x0.min(p[0]), y0.min(p[1]), x1.max(p[0]), y1.max(p[1])],
        })
    })
}

// ---------------------------------------------------------------------------
// Boundaries – region lookup by city id
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Boundaries {
    regions: BTreeMap<String, Region>,
}

impl Boundaries {
    pub fn load(path: &Path) -> Result<Boundaries> {
        let text = std::fs::read_to_string(path).context("reading boundary file")?;
        let boundaries = Boundaries::from_geojson_str(&text)
            .with_context(|| format!("parsing {}", path.display()))?;
        log::info!("Loaded {} prefecture outlines", boundaries.len());
        Ok(boundaries)
    }

    pub fn from_geojson_str(text: &str) -> Result<Boundaries, GeoError> {
        let root: JsonValue = serde_json::from_str(text)?;
        let features = match (root.get("type").and_then(JsonValue::as_str), root.get("features")) {
            (Some("FeatureCollection"), Some(JsonValue::Array(features))) => features,
            _ => return Err(GeoError::NotFeatureCollection),
        };

        let mut regions = BTreeMap::new();
        for (index, feature) in features.iter().enumerate() {
            let props = feature.get("properties");
            let id = [PREFECTURE, CITY_ID]
                .iter()
                .find_map(|key| match props?.get(key)? {
                    JsonValue::String(s) => Some(s.clone()),
                    JsonValue::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .ok_or(GeoError::MissingId(index))?;
            let province = props
                .and_then(|p| p.get(PROVINCE))
                .and_then(JsonValue::as_str)
                .map(str::to_string);

            let polygons = match feature.get("geometry") {
                None | Some(JsonValue::Null) => Vec::new(),
                Some(geometry) => parse_geometry(geometry)
                    .map_err(|reason| GeoError::BadGeometry { index, reason })?,
            };

            regions.insert(
                id.clone(),
                Region {
                    id,
                    province,
                    polygons,
                },
            );
        }
        Ok(Boundaries { regions })
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Region> {
        self.regions.get(id)
    }

    /// Regions for the given ids, in the order asked. Ids without an outline
    /// are logged and skipped.
    pub fn geometries_for<'a, I>(&self, ids: I) -> Vec<&Region>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut missing = Vec::new();
        let found = ids
            .into_iter()
            .filter_map(|id| {
                let region = self.regions.get(id);
                if region.is_none() {
                    missing.push(id);
                }
                region
            })
            .collect();
        if !missing.is_empty() {
            log::warn!("No outline for {} cities: {missing:?}", missing.len());
        }
        found
    }

    /// The region under `[lon, lat]`, if any.
    pub fn region_at(&self, point: [f64; 2]) -> Option<&Region> {
        self.regions.values().find(|r| r.contains(point))
    }

    /// Bounding box of every outline.
    pub fn bounds(&self) -> Option<[f64; 4]> {
        bounds_of(self.regions.values().flat_map(|r| r.polygons.iter().flatten()))
    }
}

fn parse_geometry(geometry: &JsonValue) -> std::result::Result<Vec<Vec<[f64; 2]>>, String> {
    let coords = geometry.get("coordinates").ok_or("missing coordinates")?;
    match geometry.get("type").and_then(JsonValue::as_str) {
        Some("Polygon") => Ok(exterior(coords)?.into_iter().collect()),
        Some("MultiPolygon") => coords
            .as_array()
            .ok_or("MultiPolygon coordinates are not an array")?
            .iter()
            .filter_map(|polygon| exterior(polygon).transpose())
            .collect(),
        Some(other) => Err(format!("unsupported geometry type {other}")),
        None => Err("geometry without a type".to_string()),
    }
}

/// First ring of a polygon's coordinate array.
fn exterior(polygon: &JsonValue) -> std::result::Result<Option<Vec<[f64; 2]>>, String> {
    let Some(ring) = polygon.as_array().and_then(|rings| rings.first()) else {
        return Ok(None);
    };
    let points = ring.as_array().ok_or("ring is not an array")?;
    points
        .iter()
        .map(|p| match p.as_array().map(Vec::as_slice) {
            Some([x, y, ..]) => match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => Ok([x, y]),
                _ => Err(format!("non-numeric position {p}")),
            },
            _ => Err(format!("bad position {p}")),
        })
        .collect::<std::result::Result<Vec<_>, _>>()
        .map(Some)
}

// ---------------------------------------------------------------------------
// Per-city values for the choropleth
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Aggregation {
    /// Mean over the visible years.
    #[default]
    Mean,
    /// The value recorded in one year.
    Year(i32),
}

/// Reduce a column of the view to one value per city. Cities with no
/// observed value are left out. `None` when the column is not in the view.
pub fn aggregate(table: &Table, column: &str, aggregation: Aggregation) -> Option<BTreeMap<String, f64>> {
    let idx = table.column_index(column)?;
    let mut sums: BTreeMap<&str, (f64, usize)> = BTreeMap::new();

    for row in &table.rows {
        if let Aggregation::Year(year) = aggregation {
            if row.year != year {
                continue;
            }
        }
        if let Some(v) = row.values[idx] {
            let entry = sums.entry(&row.city_id).or_default();
            entry.0 += v;
            entry.1 += 1;
        }
    }

    Some(
        sums.into_iter()
            .map(|(city, (sum, n))| (city.to_string(), sum / n as f64))
            .collect(),
    )
}
