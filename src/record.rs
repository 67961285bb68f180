//! Module that contains all record types stored and served by this application.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::score::Category;

/// Format used for every timestamp in the json api.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Serde helpers writing timestamps as `TIMESTAMP_FORMAT` in UTC.
///
/// Deserialization also accepts RFC 3339 strings.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    use super::TIMESTAMP_FORMAT;

    pub fn serialize<S>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&timestamp.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp '{}'", raw)))
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT) {
            return Some(Utc.from_utc_datetime(&naive));
        }
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|timestamp| timestamp.with_timezone(&Utc))
    }

    /// Same as the parent module, for optional fields.
    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{de, Deserialize, Deserializer};

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            match Option::<String>::deserialize(deserializer)? {
                Some(raw) => super::parse(&raw)
                    .map(Some)
                    .ok_or_else(|| de::Error::custom(format!("invalid timestamp '{}'", raw))),
                None => Ok(None),
            }
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
/// The measured values of a single sensor reading. Every value is optional.
pub struct SensorValues {
    /// Temperature value in celsius.
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Relative humidity value.
    #[serde(default)]
    pub humidity: Option<f64>,
    /// Equivalent CO2 concentration in ppm.
    #[serde(default)]
    pub co2eq: Option<f64>,
    /// Total volatile organic compounds.
    #[serde(default)]
    pub tvoc: Option<f64>,
    /// PM1.0 concentration in µg/m³.
    #[serde(default)]
    pub pm1_0: Option<f64>,
    /// PM2.5 concentration in µg/m³.
    #[serde(default)]
    pub pm2_5: Option<f64>,
    /// PM10 concentration in µg/m³.
    #[serde(default)]
    pub pm10: Option<f64>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
/// Payload accepted by the ingestion endpoint.
pub struct SensorPayload {
    #[serde(flatten)]
    pub values: SensorValues,
    /// Time of measurement, assigned by the server when missing.
    #[serde(default, with = "timestamp::option")]
    pub measured_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
/// A stored sensor reading.
pub struct SensorReading {
    pub id: i64,
    #[serde(flatten)]
    pub values: SensorValues,
    #[serde(with = "timestamp")]
    pub measured_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
/// A score derived from a sensor reading.
pub struct EnvironmentScore {
    pub id: i64,
    pub sensor_data_id: i64,
    pub score: f64,
    #[serde(with = "timestamp")]
    pub calculated_at: DateTime<Utc>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
/// A score joined with the reading it was calculated from.
pub struct ScoredReading {
    pub id: i64,
    pub score: f64,
    #[serde(with = "timestamp")]
    pub calculated_at: DateTime<Utc>,
    pub sensor_data: Option<SensorReading>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
/// Air quality measured by a public AirKorea station. Unique per timestamp.
pub struct ReferenceReading {
    #[serde(with = "timestamp")]
    pub measured_at: DateTime<Utc>,
    pub pm10_value: Option<f64>,
    pub pm25_value: Option<f64>,
    pub pm10_category: Option<Category>,
    pub pm25_category: Option<Category>,
    /// Sulfur dioxide in ppm.
    pub so2_value: Option<f64>,
    /// Carbon monoxide in ppm.
    pub co_value: Option<f64>,
    /// Ozone in ppm.
    pub o3_value: Option<f64>,
    /// Nitrogen dioxide in ppm.
    pub no2_value: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn payload_accepts_integers_and_nulls() {
        let payload: SensorPayload =
            serde_json::from_str(r#"{"co2eq": 400, "pm2_5": 3.5, "pm10": null}"#).unwrap();
        assert_eq!(payload.values.co2eq, Some(400.0));
        assert_eq!(payload.values.pm2_5, Some(3.5));
        assert_eq!(payload.values.pm10, None);
        assert_eq!(payload.measured_at, None);
    }

    #[test]
    fn payload_accepts_both_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();

        let payload: SensorPayload =
            serde_json::from_str(r#"{"measured_at": "2024-05-01 12:30:00"}"#).unwrap();
        assert_eq!(payload.measured_at, Some(expected));

        let payload: SensorPayload =
            serde_json::from_str(r#"{"measured_at": "2024-05-01T14:30:00+02:00"}"#).unwrap();
        assert_eq!(payload.measured_at, Some(expected));
    }

    #[test]
    fn payload_rejects_strings_for_values() {
        assert!(serde_json::from_str::<SensorPayload>(r#"{"pm10": "high"}"#).is_err());
    }

    #[test]
    fn reading_serializes_flat_with_formatted_timestamp() {
        let reading = SensorReading {
            id: 7,
            values: SensorValues {
                pm2_5: Some(10.0),
                ..Default::default()
            },
            measured_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 5).unwrap(),
        };
        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["pm2_5"], 10.0);
        assert!(json["pm10"].is_null());
        assert_eq!(json["measured_at"], "2024-05-01 08:00:05");
    }
}
