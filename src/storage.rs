//! Storage abstraction shared by the http handlers and the collector.
//!
//! `database::PostgresStorage` is the production backend; `MemoryStorage`
//! keeps everything in process and backs the tests.
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::record::{EnvironmentScore, ReferenceReading, ScoredReading, SensorReading, SensorValues};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] postgres::Error),
    #[error("tls setup failed: {0}")]
    Tls(#[from] openssl::error::ErrorStack),
    #[error("invalid database configuration: {0}")]
    Configuration(String),
    #[error("inconsistent database state: {0}")]
    Inconsistent(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Persistence operations of the daemon.
///
/// Implementations must be safe to call from several http workers and the
/// collector thread at the same time.
pub trait Storage: Send + Sync {
    /// Stores a reading together with its score.
    ///
    /// Either both rows are committed or neither is.
    fn insert_scored_reading(
        &self,
        values: &SensorValues,
        measured_at: DateTime<Utc>,
        score: f64,
        calculated_at: DateTime<Utc>,
    ) -> Result<(SensorReading, EnvironmentScore), StorageError>;

    /// All readings, newest `measured_at` first.
    fn sensor_readings(&self) -> Result<Vec<SensorReading>, StorageError>;

    /// All scores joined with their reading, newest `calculated_at` first.
    fn scores(&self) -> Result<Vec<ScoredReading>, StorageError>;

    /// Inserts the reading unless one with the same timestamp exists.
    ///
    /// Returns `true` when a row was inserted.
    fn insert_reference_if_absent(&self, reading: &ReferenceReading) -> Result<bool, StorageError>;

    /// The `limit` most recent reference readings, newest first.
    fn latest_references(&self, limit: usize) -> Result<Vec<ReferenceReading>, StorageError>;
}

#[derive(Default)]
struct MemoryState {
    readings: Vec<SensorReading>,
    scores: Vec<EnvironmentScore>,
    references: BTreeMap<DateTime<Utc>, ReferenceReading>,
}

/// In process storage.
#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Default::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StorageError> {
        self.state
            .lock()
            .map_err(|_| StorageError::Unavailable(String::from("memory storage lock poisoned")))
    }
}

impl Storage for MemoryStorage {
    fn insert_scored_reading(
        &self,
        values: &SensorValues,
        measured_at: DateTime<Utc>,
        score: f64,
        calculated_at: DateTime<Utc>,
    ) -> Result<(SensorReading, EnvironmentScore), StorageError> {
        let mut state = self.lock()?;

        let reading = SensorReading {
            id: state.readings.len() as i64 + 1,
            values: *values,
            measured_at,
        };
        let environment_score = EnvironmentScore {
            id: state.scores.len() as i64 + 1,
            sensor_data_id: reading.id,
            score,
            calculated_at,
        };
        state.readings.push(reading.clone());
        state.scores.push(environment_score.clone());
        Ok((reading, environment_score))
    }

    fn sensor_readings(&self) -> Result<Vec<SensorReading>, StorageError> {
        let state = self.lock()?;
        let mut readings = state.readings.clone();
        readings.sort_by(|a, b| b.measured_at.cmp(&a.measured_at).then(b.id.cmp(&a.id)));
        Ok(readings)
    }

    fn scores(&self) -> Result<Vec<ScoredReading>, StorageError> {
        let state = self.lock()?;
        let mut scores: Vec<ScoredReading> = state
            .scores
            .iter()
            .map(|score| ScoredReading {
                id: score.id,
                score: score.score,
                calculated_at: score.calculated_at,
                sensor_data: state
                    .readings
                    .iter()
                    .find(|reading| reading.id == score.sensor_data_id)
                    .cloned(),
            })
            .collect();
        scores.sort_by(|a, b| b.calculated_at.cmp(&a.calculated_at).then(b.id.cmp(&a.id)));
        Ok(scores)
    }

    fn insert_reference_if_absent(&self, reading: &ReferenceReading) -> Result<bool, StorageError> {
        let mut state = self.lock()?;
        if state.references.contains_key(&reading.measured_at) {
            return Ok(false);
        }
        state.references.insert(reading.measured_at, reading.clone());
        Ok(true)
    }

    fn latest_references(&self, limit: usize) -> Result<Vec<ReferenceReading>, StorageError> {
        let state = self.lock()?;
        Ok(state.references.values().rev().take(limit).cloned().collect())
    }
}
