//! Module for connecting to a postgres database and storing the readings, scores and
//! reference data of the daemon in it.
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use openssl::ssl::{SslConnector, SslFiletype, SslMethod, SslVerifyMode};
use postgres::{Client, Row};
use postgres_openssl::MakeTlsConnector;
use serde::{Deserialize, Serialize};

use crate::record::{EnvironmentScore, ReferenceReading, ScoredReading, SensorReading, SensorValues};
use crate::score::Category;
use crate::storage::{Storage, StorageError};

static SQL_CREATE_DATABASE: &'static str = include_str!("sql/create_database.sql");

static SQL_INSERT_SENSOR_DATA: &'static str = include_str!("sql/insert_sensor_data.sql");
static SQL_INSERT_SCORE: &'static str = include_str!("sql/insert_score.sql");
static SQL_INSERT_AIRKOREA: &'static str = include_str!("sql/insert_airkorea.sql");

static SQL_SELECT_SENSOR_DATA: &'static str = include_str!("sql/select_sensor_data.sql");
static SQL_SELECT_SCORES: &'static str = include_str!("sql/select_scores.sql");
static SQL_SELECT_AIRKOREA: &'static str = include_str!("sql/select_airkorea.sql");

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Struct modeling the parameters required for a database connection.
///
/// This includes SSL/TLS encryption.
pub struct DatabaseParameters
{
    /// The hostname of the database server.
    pub hostname: String,
    /// The port for the database server.
    pub port: u32,
    /// The username to connect as.
    pub username: String,
    /// The password to connect with.
    pub password: String,
    /// The database to open on the server.
    pub database: String,
    /// Flag to enable tls for the database server connection.
    pub tls_enable: bool,
    /// Parameters for the tls connection to the database server.
    pub tls_params: Option<DatabaseTlsParameters>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Struct for the parameters required for a tls connection to the database.
pub struct DatabaseTlsParameters {
    /// The path to the server certificate for TLS encryption.
    pub server_ca_path: String,
    /// The path to the client certificate for TLS encryption.
    pub client_cert_path: String,
    /// The path to the client key for TLS encryption.
    pub client_key_path: String,
}

impl DatabaseParameters {
    fn connection_string(&self) -> String {
        format!("user={} password={} host={} port={} dbname={} application_name=aqlogd",
                self.username,
                self.password,
                self.hostname,
                self.port,
                self.database)
    }
}

/// Storage backed by a single postgres connection.
///
/// The connection is shared between all threads of the daemon and is
/// reestablished when the server closed it.
pub struct PostgresStorage {
    client: Mutex<Client>,
    connection_parameters: DatabaseParameters,
}

/// Opens a new connection to the database server.
///
/// # Errors
///
/// Errors occur when one of the following conditions is met:
///
/// * TLS is enabled without TLS parameters.
///
/// * The files for the TLS connection cannot be found.
///
/// * The connection cannot be established.
///
/// * The the user is not authorized for the database.
fn open_client(connection_parameters: &DatabaseParameters) -> Result<Client, StorageError> {
    let connection_string = connection_parameters.connection_string();

    let client = match connection_parameters.tls_enable {
        true => {
            let tls_params = match &connection_parameters.tls_params {
                Some(tls_params) => tls_params,
                None => {
                    return Err(StorageError::Configuration(
                        String::from("TLS enabled but no TLS parameters specified!")));
                }
            };

            let mut ssl_connection_builder = SslConnector::builder(SslMethod::tls())?;
            ssl_connection_builder.set_verify(SslVerifyMode::NONE);
            ssl_connection_builder.set_ca_file(&tls_params.server_ca_path)?;
            ssl_connection_builder.set_certificate_file(&tls_params.client_cert_path, SslFiletype::PEM)?;
            ssl_connection_builder.set_private_key_file(&tls_params.client_key_path, SslFiletype::PEM)?;

            let tls_connector = MakeTlsConnector::new(ssl_connection_builder.build());
            Client::connect(connection_string.as_str(), tls_connector)?
        },
        false => Client::connect(connection_string.as_str(), postgres::NoTls)?
    };
    log::info!(target: "aqlogd::db", "Database connection established!");
    Ok(client)
}

/// Replaces `client` with a freshly opened one when `is_closed` reports it closed.
///
/// Returns true if the client was replaced. A failed reopen leaves the closed
/// client in place, so the next caller tries again.
fn reopen_if_closed<C, F>(client: &mut C, is_closed: fn(&C) -> bool, open: F) -> Result<bool, StorageError>
    where F: FnOnce() -> Result<C, StorageError>
{
    if !is_closed(client) {
        return Ok(false);
    }
    log::warn!(target: "aqlogd::db", "Database connection was closed, reconnecting!");
    *client = open()?;
    Ok(true)
}

impl PostgresStorage {
    /// Establishes the database connection and creates missing tables.
    ///
    /// # Errors
    ///
    /// See [`open_client`], additionally the schema creation may fail.
    pub fn connect(connection_parameters: &DatabaseParameters) -> Result<PostgresStorage, StorageError> {
        let mut client = open_client(connection_parameters)?;

        client.batch_execute(SQL_CREATE_DATABASE)?;
        log::debug!(target: "aqlogd::db", "Database schema is up to date!");

        Ok(PostgresStorage {
            client: Mutex::new(client),
            connection_parameters: connection_parameters.clone(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Client>, StorageError> {
        let mut client = self.client
            .lock()
            .map_err(|_| StorageError::Unavailable(String::from("database connection lock poisoned")))?;
        reopen_if_closed(&mut *client, Client::is_closed, || open_client(&self.connection_parameters))?;
        Ok(client)
    }
}

fn sensor_values_from_row(row: &Row) -> Result<SensorValues, StorageError> {
    Ok(SensorValues {
        temperature: row.try_get("temperature")?,
        humidity: row.try_get("humidity")?,
        co2eq: row.try_get("co2eq")?,
        tvoc: row.try_get("tvoc")?,
        pm1_0: row.try_get("pm1_0")?,
        pm2_5: row.try_get("pm2_5")?,
        pm10: row.try_get("pm10")?,
    })
}

fn category_from_row(row: &Row, column: &str) -> Result<Option<Category>, StorageError> {
    let label: Option<String> = row.try_get(column)?;
    Ok(label.as_deref().and_then(Category::from_label))
}

impl Storage for PostgresStorage {
    fn insert_scored_reading(
        &self,
        values: &SensorValues,
        measured_at: DateTime<Utc>,
        score: f64,
        calculated_at: DateTime<Utc>,
    ) -> Result<(SensorReading, EnvironmentScore), StorageError> {
        let mut client = self.lock()?;
        let mut transaction = client.transaction()?;

        let new_records_result = transaction.query(SQL_INSERT_SENSOR_DATA,
                                                   &[&values.temperature,
                                                     &values.humidity,
                                                     &values.co2eq,
                                                     &values.tvoc,
                                                     &values.pm1_0,
                                                     &values.pm2_5,
                                                     &values.pm10,
                                                     &measured_at])?;
        if new_records_result.len() != 1 {
            log::warn!(target: "aqlogd::db", "Found non unique sensor data id result, please ensure database consistency!");
            return Err(StorageError::Inconsistent(String::from("Found non unique sensor data id result")));
        }
        let sensor_data_id: i64 = new_records_result[0].try_get("id")?;

        let new_scores_result = transaction.query(SQL_INSERT_SCORE,
                                                  &[&sensor_data_id, &score, &calculated_at])?;
        if new_scores_result.len() != 1 {
            log::warn!(target: "aqlogd::db", "Found non unique score id result, please ensure database consistency!");
            return Err(StorageError::Inconsistent(String::from("Found non unique score id result")));
        }
        let score_id: i64 = new_scores_result[0].try_get("id")?;

        transaction.commit()?;
        log::debug!(target: "aqlogd::db", "Stored sensor data {} with score {}", sensor_data_id, score_id);

        Ok((
            SensorReading { id: sensor_data_id, values: *values, measured_at },
            EnvironmentScore { id: score_id, sensor_data_id, score, calculated_at },
        ))
    }

    fn sensor_readings(&self) -> Result<Vec<SensorReading>, StorageError> {
        let mut client = self.lock()?;
        let rows = client.query(SQL_SELECT_SENSOR_DATA, &[])?;
        rows.iter()
            .map(|row| -> Result<SensorReading, StorageError> {
                Ok(SensorReading {
                    id: row.try_get("id")?,
                    values: sensor_values_from_row(row)?,
                    measured_at: row.try_get("measured_at")?,
                })
            })
            .collect()
    }

    fn scores(&self) -> Result<Vec<ScoredReading>, StorageError> {
        let mut client = self.lock()?;
        let rows = client.query(SQL_SELECT_SCORES, &[])?;
        rows.iter()
            .map(|row| -> Result<ScoredReading, StorageError> {
                let sensor_data_id: Option<i64> = row.try_get("sensor_data_id")?;
                let measured_at: Option<DateTime<Utc>> = row.try_get("measured_at")?;
                let sensor_data = match (sensor_data_id, measured_at) {
                    (Some(id), Some(measured_at)) => Some(SensorReading {
                        id,
                        values: sensor_values_from_row(row)?,
                        measured_at,
                    }),
                    _ => None,
                };
                Ok(ScoredReading {
                    id: row.try_get("id")?,
                    score: row.try_get("score")?,
                    calculated_at: row.try_get("calculated_at")?,
                    sensor_data,
                })
            })
            .collect()
    }

    fn insert_reference_if_absent(&self, reading: &ReferenceReading) -> Result<bool, StorageError> {
        let mut client = self.lock()?;
        let inserted = client.execute(SQL_INSERT_AIRKOREA,
                                      &[&reading.measured_at,
                                        &reading.pm10_value,
                                        &reading.pm25_value,
                                        &reading.pm10_category.map(Category::label),
                                        &reading.pm25_category.map(Category::label),
                                        &reading.so2_value,
                                        &reading.co_value,
                                        &reading.o3_value,
                                        &reading.no2_value])?;
        Ok(inserted == 1)
    }

    fn latest_references(&self, limit: usize) -> Result<Vec<ReferenceReading>, StorageError> {
        let limit = limit as i64;
        let mut client = self.lock()?;
        let rows = client.query(SQL_SELECT_AIRKOREA, &[&limit])?;
        rows.iter()
            .map(|row| -> Result<ReferenceReading, StorageError> {
                Ok(ReferenceReading {
                    measured_at: row.try_get("measured_at")?,
                    pm10_value: row.try_get("pm10_value")?,
                    pm25_value: row.try_get("pm25_value")?,
                    pm10_category: category_from_row(row, "pm10_category")?,
                    pm25_category: category_from_row(row, "pm25_category")?,
                    so2_value: row.try_get("so2_value")?,
                    co_value: row.try_get("co_value")?,
                    o3_value: row.try_get("o3_value")?,
                    no2_value: row.try_get("no2_value")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_string_names_the_application() {
        let params = DatabaseParameters {
            hostname: String::from("db.local"),
            port: 5432,
            username: String::from("aq"),
            password: String::from("secret"),
            database: String::from("environmental_monitoring"),
            tls_enable: false,
            tls_params: None,
        };
        assert_eq!(params.connection_string(),
                   "user=aq password=secret host=db.local port=5432 dbname=environmental_monitoring application_name=aqlogd");
    }

    #[test]
    fn tls_without_parameters_is_rejected() {
        let params = DatabaseParameters {
            hostname: String::from("db.local"),
            port: 5432,
            username: String::from("aq"),
            password: String::from("secret"),
            database: String::from("environmental_monitoring"),
            tls_enable: true,
            tls_params: None,
        };
        match PostgresStorage::connect(&params) {
            Err(StorageError::Configuration(_)) => {}
            Err(err) => panic!("unexpected error: {}", err),
            Ok(_) => panic!("connection must not be attempted"),
        }
    }

    struct FakeClient {
        closed: bool,
        generation: u32,
    }

    fn fake_is_closed(client: &FakeClient) -> bool {
        client.closed
    }

    #[test]
    fn open_client_is_kept() {
        let mut client = FakeClient { closed: false, generation: 1 };
        let reopened = reopen_if_closed(&mut client, fake_is_closed, || -> Result<FakeClient, StorageError> {
            panic!("an open client must not be replaced")
        }).unwrap();
        assert!(!reopened);
        assert_eq!(client.generation, 1);
    }

    #[test]
    fn closed_client_is_replaced() {
        let mut client = FakeClient { closed: true, generation: 1 };
        let reopened = reopen_if_closed(&mut client, fake_is_closed, || {
            Ok(FakeClient { closed: false, generation: 2 })
        }).unwrap();
        assert!(reopened);
        assert!(!client.closed);
        assert_eq!(client.generation, 2);
    }

    #[test]
    fn failed_reopen_keeps_closed_client_for_next_attempt() {
        let mut client = FakeClient { closed: true, generation: 1 };
        let result = reopen_if_closed(&mut client, fake_is_closed, || {
            Err(StorageError::Unavailable(String::from("server down")))
        });
        assert!(matches!(result, Err(StorageError::Unavailable(_))));
        assert!(client.closed);

        let reopened = reopen_if_closed(&mut client, fake_is_closed, || {
            Ok(FakeClient { closed: false, generation: 2 })
        }).unwrap();
        assert!(reopened);
        assert_eq!(client.generation, 2);
    }
}
