//! Periodic collection of reference air quality readings.
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::airkorea::ReferenceSource;
use crate::shutdown::Shutdown;
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq)]
/// Result of a single collection cycle.
pub enum CollectOutcome {
    /// A new reading was stored.
    Stored(DateTime<Utc>),
    /// A reading with this timestamp was already stored.
    Skipped(DateTime<Utc>),
    /// The provider had no reading.
    NoData,
    /// Fetching or storing failed, the error was logged.
    Failed,
}

pub struct Collector {
    source: Box<dyn ReferenceSource>,
    storage: Arc<dyn Storage>,
}

impl Collector {
    pub fn new(source: Box<dyn ReferenceSource>, storage: Arc<dyn Storage>) -> Self {
        Collector { source, storage }
    }

    /// Fetches the latest reading and stores it unless already present.
    pub fn run_once(&self) -> CollectOutcome {
        let reading = match self.source.fetch_latest() {
            Ok(Some(reading)) => reading,
            Ok(None) => {
                log::info!(target: "aqlogd::collector", "Air quality api returned no data!");
                return CollectOutcome::NoData;
            }
            Err(err) => {
                log::error!(target: "aqlogd::collector", "Could not fetch reference reading: \'{}\'", err);
                return CollectOutcome::Failed;
            }
        };

        match self.storage.insert_reference_if_absent(&reading) {
            Ok(true) => {
                log::info!(target: "aqlogd::collector", "Stored reference reading of \'{}\'", reading.measured_at);
                CollectOutcome::Stored(reading.measured_at)
            }
            Ok(false) => {
                log::debug!(target: "aqlogd::collector", "Reference reading of \'{}\' already stored, skipping!", reading.measured_at);
                CollectOutcome::Skipped(reading.measured_at)
            }
            Err(err) => {
                log::error!(target: "aqlogd::collector", "Could not store reference reading: \'{}\'", err);
                CollectOutcome::Failed
            }
        }
    }
}

/// Thread function for the collector.
///
/// Runs a collection cycle immediately and then once per `interval` until
/// `shutdown` is cancelled.
pub fn collector_thread(collector: Collector, shutdown: Shutdown, interval: Duration) {
    log::info!(target: "aqlogd::collector", "Collecting reference readings every {} seconds", interval.as_secs());
    while !shutdown.is_cancelled() {
        collector.run_once();
        if shutdown.wait_timeout(interval) {
            break;
        }
    }
    log::debug!(target: "aqlogd::collector", "Collector finished!");
}
