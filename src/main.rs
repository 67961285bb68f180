extern crate postgres;
extern crate chrono;
extern crate serde_json;
extern crate log;
extern crate log4rs;
extern crate ctrlc;
extern crate clap;

use std::process::exit;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::App;

mod airkorea;
mod api;
mod collector;
mod config;
mod database;
mod forward;
mod ingest;
mod record;
mod score;
mod shutdown;
mod storage;

static DEFAULT_CONFIG_PATH: &'static str = "resources/aqlogd.yml";
static DEFAULT_LOG_CONFIG_PATH: &'static str = "resources/log.yml";

fn main() {
    let cli_yaml = clap::load_yaml!("cli.yml");
    let matches = App::from(cli_yaml).get_matches();
    let config_path = matches.value_of("config").unwrap_or(DEFAULT_CONFIG_PATH);
    let log_config_path = matches.value_of("log-config").unwrap_or(DEFAULT_LOG_CONFIG_PATH);

    match log4rs::init_file(log_config_path, Default::default()) {
        Ok(_) => {},
        Err(err) => {
            eprintln!("Could not create logger from yaml configuration: {}", err);
            exit(-100);
        }
    };

    let configuration = match config::Configuration::from_file(config_path) {
        Ok(configuration) => configuration,
        Err(err) => {
            log::error!(target: "aqlogd", "{}", err);
            exit(101);
        }
    };

    let shutdown = shutdown::Shutdown::new();
    let shutdown_signal = shutdown.clone();

    let storage: Arc<dyn storage::Storage> = match database::PostgresStorage::connect(&configuration.database_connection_parameters) {
        Ok(storage) => Arc::new(storage),
        Err(err) => {
            log::error!(target: "aqlogd::db", "Could not establish database connection: \'{}\'", err);
            exit(102);
        }
    };

    let forwarder = match &configuration.forward {
        Some(forward_parameters) => match forward::Forwarder::new(forward_parameters) {
            Ok(forwarder) => {
                log::info!(target: "aqlogd::forward", "Forwarding scores to \'{}\'", forward_parameters.url);
                Some(forwarder)
            }
            Err(err) => {
                log::error!(target: "aqlogd::forward", "Cannot create the score forwarder: \'{}\'", err);
                exit(103);
            }
        },
        None => None,
    };

    log::info!(target: "aqlogd", "Scoring readings with the {:?} profile", configuration.scoring_profile);
    let service = Arc::new(ingest::IngestService::new(Arc::clone(&storage), configuration.scoring_profile, forwarder));
    let router = Arc::new(api::Router::new(service, configuration.http.reference_limit));

    let http_address = format!("{}:{}", configuration.http.address, configuration.http.port);
    let server = match tiny_http::Server::http(http_address.as_str()) {
        Ok(server) => Arc::new(server),
        Err(err) => {
            log::error!(target: "aqlogd::http", "Could not open http server on \'{}\': \'{}\'", http_address, err);
            exit(201);
        }
    };
    log::info!(target: "aqlogd::http", "Listening on \'{}\'", http_address);

    let http_threads = match api::spawn_workers(server, router, shutdown.clone(), configuration.http.workers) {
        Ok(handles) => handles,
        Err(err) => {
            log::error!(target: "aqlogd", "Cannot start the http worker threads: \'{}\'", err);
            exit(202);
        }
    };

    let collector_thread = match configuration.collector.clone() {
        Some(collector_parameters) => {
            let interval = Duration::from_secs(collector_parameters.interval_secs);
            let source = match airkorea::AirKoreaClient::new(collector_parameters) {
                Ok(source) => source,
                Err(err) => {
                    log::error!(target: "aqlogd::collector", "Cannot create the air quality client: \'{}\'", err);
                    exit(203);
                }
            };
            let collector = collector::Collector::new(Box::new(source), Arc::clone(&storage));
            let collector_shutdown = shutdown.clone();
            match thread::Builder::new()
                .name("collector".to_string())
                .spawn(move || {
                    collector::collector_thread(collector, collector_shutdown, interval);
                }) {
                Ok(handle) => Some(handle),
                Err(err) => {
                    log::error!(target: "aqlogd", "Cannot start the collector thread: \'{}\'", err);
                    exit(204);
                }
            }
        }
        None => {
            log::info!(target: "aqlogd::collector", "No collector configured, reference readings are not collected!");
            None
        }
    };

    match ctrlc::set_handler(move || {
        log::info!(target: "aqlogd", "Termination signal received!");
        shutdown_signal.cancel();
    }) {
        Ok(_) => {},
        Err(err) => {
            log::error!(target: "aqlogd", "Error setting termination handler: \'{}\'", err);
            shutdown.cancel();
        }
    };

    for http_thread in http_threads {
        match http_thread.join() {
            Ok(_) => log::debug!(target: "aqlogd", "Joined http thread!"),
            Err(_) => {
                log::error!(target: "aqlogd", "Could not join a http thread!");
                exit(301);
            }
        };
    }
    if let Some(collector_thread) = collector_thread {
        match collector_thread.join() {
            Ok(_) => log::debug!(target: "aqlogd", "Joined collector thread!"),
            Err(_) => {
                log::error!(target: "aqlogd", "Could not join the collector thread!");
                exit(302);
            }
        };
    }

    log::info!(target: "aqlogd", "Exiting");
    exit(0);
}
