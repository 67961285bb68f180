//! Ingestion and query operations on sensor readings.
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::forward::Forwarder;
use crate::record::{ReferenceReading, ScoredReading, SensorPayload, SensorReading};
use crate::score::ScoringProfile;
use crate::storage::{Storage, StorageError};

#[derive(Debug, Error)]
pub enum ClientInputError {
    #[error("Content-Type must be application/json")]
    UnsupportedMediaType,
    #[error("Empty or invalid JSON payload")]
    EmptyPayload,
    #[error("Invalid JSON payload: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    ClientInput(#[from] ClientInputError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Serialize, Debug, Clone, PartialEq)]
/// A stored reading together with its score.
pub struct IngestOutcome {
    pub sensor_data: SensorReading,
    pub environmental_score: f64,
}

/// Parses a request body into a sensor payload.
///
/// The body must be a non empty json object.
pub fn parse_payload(body: &[u8]) -> Result<SensorPayload, ClientInputError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ClientInputError::EmptyPayload);
    }
    let json: Value = serde_json::from_slice(body).map_err(|_| ClientInputError::EmptyPayload)?;
    match &json {
        Value::Object(fields) if !fields.is_empty() => {}
        _ => return Err(ClientInputError::EmptyPayload),
    }
    serde_json::from_value(json).map_err(|err| ClientInputError::Malformed(err.to_string()))
}

pub struct IngestService {
    storage: Arc<dyn Storage>,
    profile: ScoringProfile,
    forwarder: Option<Forwarder>,
}

impl IngestService {
    pub fn new(storage: Arc<dyn Storage>, profile: ScoringProfile, forwarder: Option<Forwarder>) -> Self {
        IngestService { storage, profile, forwarder }
    }

    /// Stores a reading with its score and forwards the score.
    ///
    /// Forwarding failures are logged and never fail the ingestion.
    pub fn ingest(&self, body: &[u8]) -> Result<IngestOutcome, IngestError> {
        let payload = parse_payload(body)?;
        let measured_at = payload.measured_at.unwrap_or_else(Utc::now);
        let score = self.profile.score(&payload.values);

        let (sensor_data, environment_score) =
            self.storage.insert_scored_reading(&payload.values, measured_at, score, Utc::now())?;
        log::info!(target: "aqlogd::ingest", "Stored sensor data {} with score {}", sensor_data.id, environment_score.score);

        if let Some(forwarder) = &self.forwarder {
            if let Err(err) = forwarder.forward(environment_score.score, sensor_data.measured_at) {
                log::warn!(target: "aqlogd::forward", "Could not forward score of sensor data {}: \'{}\'", sensor_data.id, err);
            }
        }

        Ok(IngestOutcome {
            sensor_data,
            environmental_score: environment_score.score,
        })
    }

    pub fn sensor_readings(&self) -> Result<Vec<SensorReading>, StorageError> {
        self.storage.sensor_readings()
    }

    pub fn scores(&self) -> Result<Vec<ScoredReading>, StorageError> {
        self.storage.scores()
    }

    pub fn reference_readings(&self, limit: usize) -> Result<Vec<ReferenceReading>, StorageError> {
        self.storage.latest_references(limit)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::forward::tests::unreachable_url;
    use crate::forward::ForwardParameters;
    use crate::record::{EnvironmentScore, SensorValues};
    use crate::storage::MemoryStorage;
    use chrono::DateTime;

    /// Storage refusing every operation.
    pub(crate) struct FailingStorage;

    impl Storage for FailingStorage {
        fn insert_scored_reading(
            &self,
            _values: &SensorValues,
            _measured_at: DateTime<Utc>,
            _score: f64,
            _calculated_at: DateTime<Utc>,
        ) -> Result<(SensorReading, EnvironmentScore), StorageError> {
            Err(StorageError::Unavailable(String::from("disk on fire")))
        }

        fn sensor_readings(&self) -> Result<Vec<SensorReading>, StorageError> {
            Err(StorageError::Unavailable(String::from("disk on fire")))
        }

        fn scores(&self) -> Result<Vec<ScoredReading>, StorageError> {
            Err(StorageError::Unavailable(String::from("disk on fire")))
        }

        fn insert_reference_if_absent(&self, _reading: &ReferenceReading) -> Result<bool, StorageError> {
            Err(StorageError::Unavailable(String::from("disk on fire")))
        }

        fn latest_references(&self, _limit: usize) -> Result<Vec<ReferenceReading>, StorageError> {
            Err(StorageError::Unavailable(String::from("disk on fire")))
        }
    }

    fn service(storage: Arc<dyn Storage>) -> IngestService {
        IngestService::new(storage, ScoringProfile::Categorical, None)
    }

    #[test]
    fn empty_bodies_are_rejected() {
        for body in &["", "  \n", "{}", "null", "[]", "42", "not json"] {
            assert!(
                matches!(parse_payload(body.as_bytes()), Err(ClientInputError::EmptyPayload)),
                "body {:?} must be rejected",
                body
            );
        }
    }

    #[test]
    fn wrongly_typed_values_are_malformed() {
        assert!(matches!(
            parse_payload(br#"{"pm2_5": "ten"}"#),
            Err(ClientInputError::Malformed(_))
        ));
    }

    #[test]
    fn clean_reading_is_stored_with_good_score() {
        let storage = Arc::new(MemoryStorage::new());
        let outcome = service(storage.clone())
            .ingest(br#"{"pm2_5": 10, "pm10": 20}"#)
            .unwrap();

        assert_eq!(outcome.environmental_score, 1.0);
        assert_eq!(outcome.sensor_data.id, 1);
        assert_eq!(outcome.sensor_data.values.pm2_5, Some(10.0));

        let scores = storage.scores().unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].sensor_data.as_ref(), Some(&outcome.sensor_data));
    }

    #[test]
    fn supplied_timestamp_is_kept() {
        let storage = Arc::new(MemoryStorage::new());
        let outcome = service(storage)
            .ingest(br#"{"pm10": 90, "measured_at": "2024-05-01 12:00:00"}"#)
            .unwrap();
        assert_eq!(outcome.environmental_score, 3.0);
        assert_eq!(outcome.sensor_data.measured_at.to_rfc3339(), "2024-05-01T12:00:00+00:00");
    }

    #[test]
    fn rejected_payload_stores_nothing() {
        let storage = Arc::new(MemoryStorage::new());
        assert!(service(storage.clone()).ingest(b"").is_err());
        assert!(storage.sensor_readings().unwrap().is_empty());
        assert!(storage.scores().unwrap().is_empty());
    }

    #[test]
    fn storage_failure_is_reported() {
        let result = service(Arc::new(FailingStorage)).ingest(br#"{"pm10": 1}"#);
        assert!(matches!(result, Err(IngestError::Storage(_))));
    }

    #[test]
    fn forwarding_failure_does_not_fail_ingestion() {
        let forwarder = Forwarder::new(&ForwardParameters {
            url: unreachable_url(),
            timeout_secs: 2,
        })
        .unwrap();
        let storage = Arc::new(MemoryStorage::new());
        let service = IngestService::new(storage.clone(), ScoringProfile::Categorical, Some(forwarder));

        let outcome = service.ingest(br#"{"pm2_5": 50}"#).unwrap();
        assert_eq!(outcome.environmental_score, 3.0);
        assert_eq!(storage.sensor_readings().unwrap().len(), 1);
    }

    #[test]
    fn configured_profile_is_used() {
        let storage = Arc::new(MemoryStorage::new());
        let service = IngestService::new(storage, ScoringProfile::Weighted, None);
        let outcome = service.ingest(br#"{"pm2_5": 20}"#).unwrap();
        assert_eq!(outcome.environmental_score, 1.5);
    }
}
