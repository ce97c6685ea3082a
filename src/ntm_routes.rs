// Static route geometry loaded once from a GeoJSON feature collection
use crate::ntm_models::{NTMError, Result, RouteSelection};
use geo::BoundingRect;
use geo_types::{coord, Coord, LineString, MultiLineString, Rect};
use geojson::{Feature, FeatureCollection, GeoJson};
use log::{debug, info};
use reqwest::blocking;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fs;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RouteGeometry {
    pub route_id: String,
    /// `#rrggbb` display color.
    pub color: String,
    pub lines: MultiLineString<f64>,
}

impl RouteGeometry {
    pub const DEFAULT_COLOR: &'static str = "#646464";

    pub fn rgb(&self) -> (u8, u8, u8) {
        parse_hex_color(&self.color)
    }
}

/// Route id to geometry, in first-seen order. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct RouteGeometryIndex {
    entries: Vec<RouteGeometry>,
    positions: HashMap<String, usize>,
}

impl RouteGeometryIndex {
    const REQUEST_TIMEOUT_SECS: u64 = 15;

    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads reference data from a local path or an http(s) URL.
    pub fn load(source: &str) -> Result<Self> {
        let text = if source.starts_with("http://") || source.starts_with("https://") {
            Self::fetch(source)?
        } else {
            fs::read_to_string(source)
                .map_err(|e| NTMError::FileError(format!("Failed to read route geometry {}: {}", source, e)))?
        };

        let index = Self::from_geojson_str(&text)?;
        info!("Loaded geometry for {} routes from {}", index.len(), source);
        Ok(index)
    }

    fn fetch(url: &str) -> Result<String> {
        let client = blocking::Client::builder()
            .timeout(Duration::from_secs(Self::REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| NTMError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        let response = client
            .get(url)
            .send()
            .map_err(|e| NTMError::NetworkError(format!("Failed to fetch route geometry: {}", e)))?;

        if !response.status().is_success() {
            return Err(NTMError::NetworkError(format!("Route geometry request returned {}", response.status())));
        }

        response
            .text()
            .map_err(|e| NTMError::NetworkError(format!("Failed to read response: {}", e)))
    }

    pub fn from_geojson_str(text: &str) -> Result<Self> {
        let geojson: GeoJson = text
            .parse()
            .map_err(|e| NTMError::ParseError(format!("Invalid GeoJSON: {}", e)))?;

        match geojson {
            GeoJson::FeatureCollection(collection) => Ok(Self::from_feature_collection(collection)),
            _ => Err(NTMError::ParseError("Route geometry must be a FeatureCollection".to_string())),
        }
    }

    /// Keeps only `MultiLineString` features that carry a `route_id`.
    pub fn from_feature_collection(collection: FeatureCollection) -> Self {
        let mut index = Self::empty();
        let mut skipped = 0usize;

        for feature in collection.features {
            match route_from_feature(&feature) {
                Some(route) => index.insert(route),
                None => skipped += 1,
            }
        }

        debug!("Route geometry: {} routes indexed, {} features ignored", index.len(), skipped);
        index
    }

    fn insert(&mut self, route: RouteGeometry) {
        match self.positions.get(&route.route_id) {
            Some(&pos) => self.entries[pos] = route,
            None => {
                self.positions.insert(route.route_id.clone(), self.entries.len());
                self.entries.push(route);
            }
        }
    }

    /// Empty selection yields every route in index order; otherwise the selected
    /// routes in selection order, skipping ids with no known geometry.
    pub fn filter(&self, selection: &RouteSelection) -> Vec<&RouteGeometry> {
        if selection.shows_all() {
            return self.entries.iter().collect();
        }
        selection.values().filter_map(|id| self.get(id)).collect()
    }

    pub fn get(&self, route_id: &str) -> Option<&RouteGeometry> {
        self.positions.get(route_id).map(|&pos| &self.entries[pos])
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteGeometry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bounding box (x = lon, y = lat) of all indexed geometry.
    pub fn bounds(&self) -> Option<Rect<f64>> {
        self.entries
            .iter()
            .filter_map(|r| r.lines.bounding_rect())
            .reduce(|a, b| {
                Rect::new(
                    coord! { x: a.min().x.min(b.min().x), y: a.min().y.min(b.min().y) },
                    coord! { x: a.max().x.max(b.max().x), y: a.max().y.max(b.max().y) },
                )
            })
    }
}

fn route_from_feature(feature: &Feature) -> Option<RouteGeometry> {
    let geometry = feature.geometry.as_ref()?;
    let lines = match &geometry.value {
        geojson::Value::MultiLineString(lines) => lines,
        _ => return None,
    };

    let route_id = match feature.property("route_id")? {
        JsonValue::String(s) if !s.is_empty() => s.clone(),
        JsonValue::Number(n) => n.to_string(),
        _ => return None,
    };

    let color = feature
        .property("route_color")
        .and_then(JsonValue::as_str)
        .map(normalize_color)
        .unwrap_or_else(|| RouteGeometry::DEFAULT_COLOR.to_string());

    let lines = MultiLineString::new(
        lines
            .iter()
            .map(|line| {
                LineString::new(
                    line.iter()
                        .filter(|pos| pos.len() >= 2)
                        .map(|pos| Coord { x: pos[0], y: pos[1] })
                        .collect(),
                )
            })
            .collect(),
    );

    Some(RouteGeometry { route_id, color, lines })
}

/// GTFS colors are often bare hex (`A0522D`); display colors carry a `#`.
/// Anything that is not six hex digits falls back to the default color.
fn normalize_color(raw: &str) -> String {
    let digits = raw.trim().trim_start_matches('#');
    if is_hex_triplet(digits) {
        format!("#{}", digits)
    } else {
        RouteGeometry::DEFAULT_COLOR.to_string()
    }
}

fn is_hex_triplet(digits: &str) -> bool {
    digits.len() == 6 && digits.chars().all(|c| c.is_ascii_hexdigit())
}

pub fn parse_hex_color(hex: &str) -> (u8, u8, u8) {
    let hex = hex.trim_start_matches('#');
    if is_hex_triplet(hex) {
        if let (Ok(r), Ok(g), Ok(b)) = (
            u8::from_str_radix(&hex[0..2], 16),
            u8::from_str_radix(&hex[2..4], 16),
            u8::from_str_radix(&hex[4..6], 16),
        ) {
            return (r, g, b);
        }
    }
    (100, 100, 100)
}
