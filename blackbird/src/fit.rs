//! FIT activity decoding.
//!
//! Pulls the track points and session totals the record XML needs out
//! of a `.fit` file; everything else in the file is ignored.

use std::path::Path;

use fitparser::profile::MesgNum;
use fitparser::{FitDataRecord, Value};
use tracing::{debug, info};

use crate::BlackbirdError;

// FIT encodes coordinates as 32-bit semicircles
const SEMICIRCLE_DEGREES: f64 = 180.0 / 2_147_483_648.0;

/// One sample of the recorded track.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackPoint {
    pub lat: f64,
    pub lng: f64,
    pub alt: i32,
    /// Meters per second.
    pub speed: f64,
    pub heart_rate: u32,
    pub cadence: u32,
    pub power: u32,
    /// Unix seconds.
    pub timestamp: f64,
}

/// A decoded activity: the track plus the session summary.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SportActivity {
    pub points: Vec<TrackPoint>,
    /// Unix milliseconds of the session start.
    pub start_time_ms: i64,
    /// Seconds.
    pub total_duration: f64,
    /// Meters.
    pub total_distance: f64,
    /// Meters per second.
    pub max_speed: f64,
    /// Meters per second.
    pub avg_speed: f64,
}

/// Decodes a `.fit` file from disk.
pub fn parse_file(path: &Path) -> Result<SportActivity, BlackbirdError> {
    info!("parsing {}", path.display());
    let mut file = std::fs::File::open(path)?;
    let records =
        fitparser::from_reader(&mut file).map_err(|e| BlackbirdError::FitParse(e.to_string()))?;
    let activity = from_records(&records);
    debug!("{} track points", activity.points.len());
    Ok(activity)
}

fn from_records(records: &[FitDataRecord]) -> SportActivity {
    let mut activity = SportActivity::default();
    for record in records {
        match record.kind() {
            MesgNum::Record => activity.points.push(track_point(record)),
            MesgNum::Session => session_summary(record, &mut activity),
            _ => {}
        }
    }
    activity
}

fn track_point(record: &FitDataRecord) -> TrackPoint {
    let mut point = TrackPoint::default();
    // both halves of the position or neither
    if let (Some(lat), Some(lng)) = (
        field_f64(record, "position_lat"),
        field_f64(record, "position_long"),
    ) {
        point.lat = lat * SEMICIRCLE_DEGREES;
        point.lng = lng * SEMICIRCLE_DEGREES;
    }
    if let Some(alt) = field_f64(record, "altitude") {
        point.alt = alt as i32;
    }
    point.speed = field_f64(record, "enhanced_speed")
        .or_else(|| field_f64(record, "speed"))
        .unwrap_or(0.0);
    point.heart_rate = field_f64(record, "heart_rate").unwrap_or(0.0) as u32;
    point.cadence = field_f64(record, "cadence").unwrap_or(0.0) as u32;
    point.power = field_f64(record, "power").unwrap_or(0.0) as u32;
    point.timestamp = field_f64(record, "timestamp").unwrap_or(0.0);
    point
}

fn session_summary(record: &FitDataRecord, activity: &mut SportActivity) {
    if let Some(elapsed) = field_f64(record, "total_elapsed_time") {
        activity.total_duration = elapsed;
    }
    if let Some(distance) = field_f64(record, "total_distance") {
        activity.total_distance = distance;
    }
    if let Some(start) = field_f64(record, "start_time") {
        activity.start_time_ms = (start * 1000.0) as i64;
    }
    if let Some(max_speed) = field_f64(record, "max_speed") {
        activity.max_speed = max_speed;
    }
    if let Some(avg_speed) = field_f64(record, "avg_speed") {
        activity.avg_speed = avg_speed;
    }
}

fn field_f64(record: &FitDataRecord, name: &str) -> Option<f64> {
    record
        .fields()
        .iter()
        .find(|field| field.name() == name)
        .and_then(|field| value_f64(field.value()))
}

fn value_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Timestamp(t) => Some(t.timestamp() as f64),
        Value::SInt8(v) => Some(f64::from(*v)),
        Value::UInt8(v) | Value::UInt8z(v) | Value::Byte(v) | Value::Enum(v) => {
            Some(f64::from(*v))
        }
        Value::SInt16(v) => Some(f64::from(*v)),
        Value::UInt16(v) | Value::UInt16z(v) => Some(f64::from(*v)),
        Value::SInt32(v) => Some(f64::from(*v)),
        Value::UInt32(v) | Value::UInt32z(v) => Some(f64::from(*v)),
        Value::SInt64(v) => Some(*v as f64),
        Value::UInt64(v) | Value::UInt64z(v) => Some(*v as f64),
        Value::Float32(v) => Some(f64::from(*v)),
        Value::Float64(v) => Some(*v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semicircles_cover_the_globe() {
        assert_eq!(2_147_483_648.0 * SEMICIRCLE_DEGREES, 180.0);
        let beijing = 463_087_304.0 * SEMICIRCLE_DEGREES;
        assert!((beijing - 38.815).abs() < 0.01);
    }

    #[test]
    fn numeric_values_convert() {
        assert_eq!(value_f64(&Value::UInt8(42)), Some(42.0));
        assert_eq!(value_f64(&Value::SInt32(-7)), Some(-7.0));
        assert_eq!(value_f64(&Value::Float64(2.5)), Some(2.5));
        assert_eq!(value_f64(&Value::String("x".into())), None);
    }
}
