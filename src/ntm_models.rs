// Data model for the NOLA transit map: vehicle records, snapshots and route selection
//
// Feed message format (one message = one snapshot):
//   [{"vid":"153","rt":"57","des":"Franklin","lat":"29.95","lon":"-90.07","hdg":"148","tmstmp":"20240501 14:31"}, ...]
// Coordinates and heading arrive as text and are validated here before they reach any view.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum NTMError {
    NetworkError(String),
    ParseError(String),
    FileError(String),
    StorageError(String),
    TeardownError(String),
}

impl fmt::Display for NTMError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NTMError::NetworkError(e) => write!(f, "Network error: {}", e),
            NTMError::ParseError(e) => write!(f, "Parse error: {}", e),
            NTMError::FileError(e) => write!(f, "File error: {}", e),
            NTMError::StorageError(e) => write!(f, "Storage error: {}", e),
            NTMError::TeardownError(e) => write!(f, "Teardown error: {}", e),
        }
    }
}

impl std::error::Error for NTMError {}

pub type Result<T> = std::result::Result<T, NTMError>;

// ============================================================================
// Vehicle Records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleRecord {
    pub vid: String,
    pub rt: String,
    pub des: String,
    pub lat: f64,
    pub lon: f64,
    /// Degrees clockwise from north, always in 0..=359.
    pub hdg: u16,
    /// Opaque report time, shown as received.
    pub tmstmp: String,
}

impl VehicleRecord {
    /// Popup text shown next to a vehicle marker.
    pub fn summary(&self) -> String {
        format!("{} - {} - {}", self.rt, self.des, self.tmstmp)
    }
}

/// Some feeds send numbers where text is documented; accept both.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum FeedText {
    Text(String),
    Number(serde_json::Number),
}

impl FeedText {
    fn into_string(self) -> String {
        match self {
            FeedText::Text(s) => s,
            FeedText::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawVehicle {
    vid: FeedText,
    rt: FeedText,
    #[serde(default)]
    des: Option<FeedText>,
    lat: FeedText,
    lon: FeedText,
    hdg: FeedText,
    #[serde(default)]
    tmstmp: Option<FeedText>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordErrorKind {
    Malformed(String),
    InvalidLatitude(String),
    InvalidLongitude(String),
    InvalidHeading(String),
    DuplicateVehicle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordError {
    /// Position of the record inside the feed message.
    pub index: usize,
    pub vid: Option<String>,
    pub kind: RecordErrorKind,
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let vid = self.vid.as_deref().unwrap_or("?");
        match &self.kind {
            RecordErrorKind::Malformed(e) => write!(f, "record #{} (vid {}): malformed: {}", self.index, vid, e),
            RecordErrorKind::InvalidLatitude(v) => write!(f, "record #{} (vid {}): invalid lat {:?}", self.index, vid, v),
            RecordErrorKind::InvalidLongitude(v) => write!(f, "record #{} (vid {}): invalid lon {:?}", self.index, vid, v),
            RecordErrorKind::InvalidHeading(v) => write!(f, "record #{} (vid {}): invalid hdg {:?}", self.index, vid, v),
            RecordErrorKind::DuplicateVehicle => write!(f, "record #{} (vid {}): duplicate vehicle id", self.index, vid),
        }
    }
}

fn parse_coordinate(text: &str, limit: f64) -> Option<f64> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && v.abs() <= limit)
}

fn parse_heading(text: &str) -> Option<u16> {
    let text = text.trim();
    let whole = text.parse::<i64>().ok().or_else(|| {
        text.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(|v| v.trunc() as i64)
    })?;
    Some(whole.rem_euclid(360) as u16)
}

impl VehicleRecord {
    fn from_raw(index: usize, raw: RawVehicle) -> std::result::Result<Self, RecordError> {
        let vid = raw.vid.into_string();
        let fail = |kind| RecordError { index, vid: Some(vid.clone()), kind };

        let lat_text = raw.lat.into_string();
        let lat = parse_coordinate(&lat_text, 90.0)
            .ok_or_else(|| fail(RecordErrorKind::InvalidLatitude(lat_text.clone())))?;
        let lon_text = raw.lon.into_string();
        let lon = parse_coordinate(&lon_text, 180.0)
            .ok_or_else(|| fail(RecordErrorKind::InvalidLongitude(lon_text.clone())))?;
        let hdg_text = raw.hdg.into_string();
        let hdg = parse_heading(&hdg_text)
            .ok_or_else(|| fail(RecordErrorKind::InvalidHeading(hdg_text.clone())))?;

        Ok(VehicleRecord {
            vid: vid.clone(),
            rt: raw.rt.into_string(),
            des: raw.des.map(FeedText::into_string).unwrap_or_default(),
            lat,
            lon,
            hdg,
            tmstmp: raw.tmstmp.map(FeedText::into_string).unwrap_or_default(),
        })
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// The complete set of vehicles delivered by one feed message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub vehicles: Vec<VehicleRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct DecodedSnapshot {
    pub snapshot: Snapshot,
    pub rejected: Vec<RecordError>,
}

/// Decodes one feed message.
///
/// A payload that is not a JSON array fails as a whole. Individual records that
/// fail validation are reported in `rejected` and left out of the snapshot.
pub fn decode_snapshot(payload: &[u8]) -> Result<DecodedSnapshot> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| NTMError::ParseError(format!("Invalid JSON feed message: {}", e)))?;

    let items = match value {
        Value::Array(items) => items,
        other => {
            return Err(NTMError::ParseError(format!(
                "Feed message is not an array of vehicles (got {})",
                json_kind(&other)
            )));
        }
    };

    let mut decoded = DecodedSnapshot::default();
    let mut seen: HashSet<String> = HashSet::new();

    for (index, item) in items.into_iter().enumerate() {
        let vid_hint = item.get("vid").map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });

        let raw: RawVehicle = match serde_json::from_value(item) {
            Ok(raw) => raw,
            Err(e) => {
                decoded.rejected.push(RecordError {
                    index,
                    vid: vid_hint,
                    kind: RecordErrorKind::Malformed(e.to_string()),
                });
                continue;
            }
        };

        match VehicleRecord::from_raw(index, raw) {
            Ok(record) => {
                if !seen.insert(record.vid.clone()) {
                    decoded.rejected.push(RecordError {
                        index,
                        vid: Some(record.vid),
                        kind: RecordErrorKind::DuplicateVehicle,
                    });
                    continue;
                }
                decoded.snapshot.vehicles.push(record);
            }
            Err(e) => decoded.rejected.push(e),
        }
    }

    Ok(decoded)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ============================================================================
// Route Selection
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteOption {
    pub value: String,
    pub label: String,
}

impl RouteOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        RouteOption { value: value.into(), label: label.into() }
    }

    /// Option labelled with its own route id.
    pub fn for_route(route_id: &str) -> Self {
        Self::new(route_id, route_id)
    }
}

/// The user's chosen routes, unique by `value`. Empty means "show all routes".
///
/// `shows_all` and `admits` are the one filtering contract shared by the vehicle
/// dataset and the route geometry overlay, so both always agree on a selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RouteSelection(Vec<RouteOption>);

impl RouteSelection {
    pub fn empty() -> Self {
        RouteSelection(Vec::new())
    }

    /// Builds a selection, keeping the first occurrence of every route id.
    pub fn new(options: impl IntoIterator<Item = RouteOption>) -> Self {
        let mut seen = HashSet::new();
        RouteSelection(
            options
                .into_iter()
                .filter(|o| seen.insert(o.value.clone()))
                .collect(),
        )
    }

    pub fn from_route_ids<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(ids.into_iter().map(RouteOption::for_route))
    }

    pub fn shows_all(&self) -> bool {
        self.0.is_empty()
    }

    pub fn admits(&self, route_id: &str) -> bool {
        self.shows_all() || self.contains(route_id)
    }

    pub fn contains(&self, route_id: &str) -> bool {
        self.0.iter().any(|o| o.value == route_id)
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|o| o.value.as_str())
    }

    pub fn options(&self) -> &[RouteOption] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a copy with `option` added (at the end) or removed.
    pub fn toggled(&self, option: &RouteOption, on: bool) -> Self {
        let mut options = self.0.clone();
        if on {
            options.push(option.clone());
        } else {
            options.retain(|o| o.value != option.value);
        }
        Self::new(options)
    }
}

impl<'de> Deserialize<'de> for RouteSelection {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Vec::<RouteOption>::deserialize(deserializer).map(RouteSelection::new)
    }
}

// ============================================================================
// Vehicle Dataset
// ============================================================================

/// Holds exactly one snapshot: the most recent one received.
#[derive(Debug, Clone, Default)]
pub struct VehicleDataset {
    current: Snapshot,
}

impl VehicleDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&mut self, snapshot: Snapshot) {
        self.current = snapshot;
    }

    pub fn filter(&self, selection: &RouteSelection) -> Vec<&VehicleRecord> {
        self.current
            .vehicles
            .iter()
            .filter(|v| selection.admits(&v.rt))
            .collect()
    }

    pub fn vehicles(&self) -> &[VehicleRecord] {
        &self.current.vehicles
    }

    pub fn len(&self) -> usize {
        self.current.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.vehicles.is_empty()
    }

    /// Distinct observed routes, in first-seen order.
    pub fn route_options(&self) -> Vec<RouteOption> {
        let mut seen = HashSet::new();
        self.current
            .vehicles
            .iter()
            .filter(|v| seen.insert(v.rt.as_str()))
            .map(|v| RouteOption::for_route(&v.rt))
            .collect()
    }
}
