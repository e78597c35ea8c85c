//! Proprietary record serialization and upload identity.
//!
//! The server ingests a version-5 `<record>` XML document zipped as
//! `sportRecord_<record_id>.xml`. Pace, calories and score are carried
//! as zeros; the device never computes them and neither do we.

use chrono::{FixedOffset, TimeZone, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::BlackbirdError;
use crate::fit::SportActivity;

/// The record id and `fittime` are expressed in the stock app's fixed
/// UTC+8 zone regardless of where the activity happened.
const RECORD_TZ_SECONDS: i32 = 8 * 3600;
/// Milliseconds between the Unix epoch and the FIT epoch (1989-12-31).
const FIT_EPOCH_OFFSET_MS: i64 = 631_065_600_000;

#[derive(Serialize)]
#[serde(rename = "record", rename_all = "camelCase")]
struct RecordXml {
    version: u8,
    track: String,
    track_time_frame: u8,
    pace: String,
    segments: String,
    start: EndpointXml,
    end: EndpointXml,
    duration: String,
    distance: String,
    max_pace: String,
    avg_pace: String,
    max_speed: String,
    avg_speed: String,
    sum_height: String,
    sum_height_distance: String,
    sum_height_time: String,
    calories: String,
    score: String,
    max_temperature: String,
    min_temperature: String,
    avg_temperature: String,
    source: String,
    close: String,
    finger_print: String,
}

#[derive(Serialize)]
struct EndpointXml {
    lat: String,
    lng: String,
    height: String,
    time: String,
}

/// Renders the upload XML for one activity.
pub fn generate_xml(activity: &SportActivity, account_id: i64) -> Result<String, BlackbirdError> {
    debug!("generating record xml");
    let now_ms = Utc::now().timestamp_millis();

    let (start_ms, end_ms) = match (activity.points.first(), activity.points.last()) {
        (Some(first), Some(last)) => (
            (first.timestamp * 1000.0) as i64,
            (last.timestamp * 1000.0) as i64,
        ),
        _ => {
            warn!("no track points, generating an empty record");
            (now_ms, now_ms)
        }
    };

    let start_ts = activity.points.first().map_or(0.0, |p| p.timestamp);
    let mut track = String::new();
    for point in &activity.points {
        let elapsed = (point.timestamp - start_ts) as i64;
        let speed_mh = (point.speed * 3600.0) as i64;
        track.push_str(&format!(
            "{:.6},{:.6},{},{},{},{},{},{},{};",
            point.lat,
            point.lng,
            point.alt,
            speed_mh,
            point.heart_rate,
            point.cadence,
            point.power,
            elapsed,
            elapsed
        ));
    }

    let distance = activity.total_distance as i64;
    let score = 0i64;
    let close = start_ms + distance + score;
    let finger_print = format!(
        "{:x}",
        md5::compute(format!("{account_id},{start_ms},{distance},{score}"))
    );

    let endpoint = |point: Option<&crate::fit::TrackPoint>, time_ms: i64| EndpointXml {
        lat: format!("{:.6}", point.map_or(39.0, |p| p.lat)),
        lng: format!("{:.6}", point.map_or(116.0, |p| p.lng)),
        height: point.map_or(0, |p| p.alt).to_string(),
        time: time_ms.to_string(),
    };

    let record = RecordXml {
        version: 5,
        track,
        track_time_frame: 10,
        pace: String::new(),
        segments: String::new(),
        start: endpoint(activity.points.first(), start_ms),
        end: endpoint(activity.points.last(), end_ms),
        duration: (activity.total_duration as i64).to_string(),
        distance: distance.to_string(),
        max_pace: "0".into(),
        avg_pace: "0".into(),
        max_speed: ((activity.max_speed * 3600.0) as i64).to_string(),
        avg_speed: ((activity.avg_speed * 3600.0) as i64).to_string(),
        sum_height: "0".into(),
        sum_height_distance: "0".into(),
        sum_height_time: "0".into(),
        calories: "0".into(),
        score: score.to_string(),
        max_temperature: String::new(),
        min_temperature: String::new(),
        avg_temperature: String::new(),
        source: "android".into(),
        close: close.to_string(),
        finger_print,
    };

    let mut xml = String::from("<?xml version=\"1.0\" ?>\n");
    let mut serializer = quick_xml::se::Serializer::new(&mut xml);
    serializer.indent(' ', 4);
    record.serialize(serializer)?;
    xml.push('\n');
    Ok(xml)
}

/// Zips the XML the way the upload endpoint expects it.
pub async fn compress_record(xml: &str, record_id: &str) -> Result<Vec<u8>, BlackbirdError> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    let mut writer = async_zip::tokio::write::ZipFileWriter::with_tokio(&mut cursor);
    let entry = async_zip::ZipEntryBuilder::new(
        format!("sportRecord_{record_id}.xml").into(),
        async_zip::Compression::Deflate,
    );
    writer.write_entry_whole(entry, xml.as_bytes()).await?;
    writer.close().await?;
    Ok(cursor.into_inner())
}

/// Derives the server-side identity of a record from its start time:
/// the local record id (`%Y%m%d%H%M%S` in UTC+8) and `fittime`,
/// seconds since the FIT epoch shifted into the same zone.
pub fn record_params(start_time_ms: i64) -> Result<(String, String), BlackbirdError> {
    let tz = FixedOffset::east_opt(RECORD_TZ_SECONDS).unwrap();
    let local = tz
        .timestamp_millis_opt(start_time_ms)
        .single()
        .ok_or(BlackbirdError::InvalidTimestamp(start_time_ms))?;
    let record_id = local.format("%Y%m%d%H%M%S").to_string();

    let fittime = (start_time_ms + i64::from(RECORD_TZ_SECONDS) * 1000 - FIT_EPOCH_OFFSET_MS) / 1000;
    Ok((record_id, fittime.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::TrackPoint;

    fn activity() -> SportActivity {
        SportActivity {
            points: vec![
                TrackPoint {
                    lat: 39.9075,
                    lng: 116.3972,
                    alt: 44,
                    speed: 2.5,
                    heart_rate: 150,
                    cadence: 80,
                    power: 200,
                    timestamp: 100.0,
                },
                TrackPoint {
                    lat: 39.9076,
                    lng: 116.3973,
                    alt: 45,
                    speed: 3.0,
                    heart_rate: 155,
                    cadence: 82,
                    power: 210,
                    timestamp: 110.0,
                },
            ],
            start_time_ms: 100_000,
            total_duration: 10.0,
            total_distance: 27.5,
            max_speed: 3.0,
            avg_speed: 2.75,
        }
    }

    #[test]
    fn xml_carries_track_totals_and_fingerprint() {
        let xml = generate_xml(&activity(), 123456).unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" ?>"));
        assert!(xml.contains("<version>5</version>"));
        assert!(xml.contains(
            "39.907500,116.397200,44,9000,150,80,200,0,0;\
             39.907600,116.397300,45,10800,155,82,210,10,10;"
        ));
        assert!(xml.contains("<trackTimeFrame>10</trackTimeFrame>"));
        assert!(xml.contains("<duration>10</duration>"));
        assert!(xml.contains("<distance>27</distance>"));
        assert!(xml.contains("<maxSpeed>10800</maxSpeed>"));
        assert!(xml.contains("<avgSpeed>9900</avgSpeed>"));
        assert!(xml.contains("<source>android</source>"));
        // close = start_ms + distance + score
        assert!(xml.contains("<close>100027</close>"));
        // md5 of "123456,100000,27,0"
        assert!(xml.contains("<fingerPrint>ecf2c2d5a6e2efb64db692f656d4f72a</fingerPrint>"));
        // start/end blocks carry the first and last samples
        assert!(xml.contains("<time>100000</time>"));
        assert!(xml.contains("<time>110000</time>"));
    }

    #[test]
    fn record_params_use_the_fixed_offset() {
        // 2021-01-01T00:00:00Z is 08:00 in the record zone
        let (record_id, fittime) = record_params(1_609_459_200_000).unwrap();
        assert_eq!(record_id, "20210101080000");
        assert_eq!(fittime, "978422400");
    }

    #[tokio::test]
    async fn compressed_record_is_a_zip_archive() {
        let data = compress_record("<record/>", "20210101080000").await.unwrap();
        // local file header magic
        assert_eq!(&data[..4], b"PK\x03\x04");
        assert!(
            data.windows(b"sportRecord_20210101080000.xml".len())
                .any(|w| w == b"sportRecord_20210101080000.xml")
        );
    }
}
