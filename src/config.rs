//! Configuration file of the daemon.
use std::fs::File;
use std::io::Read;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::airkorea::CollectorParameters;
use crate::api::HttpParameters;
use crate::database::DatabaseParameters;
use crate::forward::ForwardParameters;
use crate::score::ScoringProfile;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot open the configuration file '{path}': {source}")]
    Open { path: String, source: std::io::Error },
    #[error("Cannot read the configuration from file '{path}': {source}")]
    Read { path: String, source: std::io::Error },
    #[error("Cannot deserialize the configuration: {0}")]
    Deserialize(#[from] serde_yaml::Error),
    #[error("Invalid configuration value: {0}")]
    Invalid(String),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Configuration {
    pub database_connection_parameters: DatabaseParameters,
    pub http: HttpParameters,
    #[serde(default)]
    pub scoring_profile: ScoringProfile,
    /// Forwarding of scores is disabled when missing.
    #[serde(default)]
    pub forward: Option<ForwardParameters>,
    /// Collection of reference readings is disabled when missing.
    #[serde(default)]
    pub collector: Option<CollectorParameters>,
}

impl Configuration {
    pub fn from_yaml(yaml: &str) -> Result<Configuration, ConfigError> {
        let configuration = serde_yaml::from_str::<Configuration>(yaml)?;
        configuration.validate()?;
        Ok(configuration)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(collector) = &self.collector {
            if collector.interval_secs == 0 {
                return Err(ConfigError::Invalid(String::from("collector.interval_secs must be at least 1")));
            }
        }
        Ok(())
    }

    pub fn from_file(path: &str) -> Result<Configuration, ConfigError> {
        let mut configuration_file = File::open(path).map_err(|source| ConfigError::Open {
            path: path.to_string(),
            source,
        })?;

        let mut configuration_string = String::new();
        configuration_file
            .read_to_string(&mut configuration_string)
            .map_err(|source| ConfigError::Read {
                path: path.to_string(),
                source,
            })?;

        Configuration::from_yaml(&configuration_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipped_configuration_is_valid() {
        let configuration = Configuration::from_yaml(include_str!("../resources/aqlogd.yml")).unwrap();
        assert_eq!(configuration.http.port, 5000);
        assert_eq!(configuration.scoring_profile, ScoringProfile::Categorical);
        assert!(configuration.forward.is_some());
        let collector = configuration.collector.unwrap();
        assert_eq!(collector.interval_secs, 3600);
        assert_eq!(collector.data_term, "DAILY");
    }

    #[test]
    fn optional_sections_default() {
        let yaml = r#"
database_connection_parameters:
  hostname: localhost
  port: 5432
  username: aqlogd
  password: aqlogd
  database: environmental_monitoring
  tls_enable: false
http:
  address: 127.0.0.1
  port: 8080
"#;
        let configuration = Configuration::from_yaml(yaml).unwrap();
        assert_eq!(configuration.http.workers, 4);
        assert_eq!(configuration.http.reference_limit, 10);
        assert_eq!(configuration.scoring_profile, ScoringProfile::Categorical);
        assert!(configuration.forward.is_none());
        assert!(configuration.collector.is_none());
        assert!(configuration.database_connection_parameters.tls_params.is_none());
    }

    #[test]
    fn unknown_profile_is_rejected() {
        let yaml = r#"
database_connection_parameters: {hostname: h, port: 1, username: u, password: p, database: d, tls_enable: false}
http: {address: 127.0.0.1, port: 8080}
scoring_profile: fancy
"#;
        assert!(matches!(Configuration::from_yaml(yaml), Err(ConfigError::Deserialize(_))));
    }

    #[test]
    fn zero_collector_interval_is_rejected() {
        let yaml = r#"
database_connection_parameters: {hostname: h, port: 1, username: u, password: p, database: d, tls_enable: false}
http: {address: 127.0.0.1, port: 8080}
collector: {service_key: key, station_name: station, interval_secs: 0}
"#;
        assert!(matches!(Configuration::from_yaml(yaml), Err(ConfigError::Invalid(_))));

        let yaml = yaml.replace("interval_secs: 0", "interval_secs: 1");
        assert_eq!(Configuration::from_yaml(&yaml).unwrap().collector.unwrap().interval_secs, 1);
    }

    #[test]
    fn missing_file_is_reported() {
        assert!(matches!(
            Configuration::from_file("/nonexistent/aqlogd.yml"),
            Err(ConfigError::Open { .. })
        ));
    }
}
