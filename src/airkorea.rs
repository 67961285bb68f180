//! Client for the AirKorea real time measurement api of a single station.
//!
//! The api answers with a json envelope:
//!
//! ```json
//! {"response": {
//!     "header": {"resultCode": "00", "resultMsg": "NORMAL_CODE"},
//!     "body": {"items": [{"dataTime": "2024-05-01 14:00", "pm10Value": "35", ...}]}
//! }}
//! ```
//!
//! Measurement values are strings, `"-"` marks a missing value. Timestamps are
//! local korean time and the last hour of a day is written as `24:00`.
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::record::ReferenceReading;
use crate::score::Category;

const RESULT_CODE_OK: &str = "00";
const KST_OFFSET_SECS: i32 = 9 * 3600;

fn default_url() -> String {
    String::from("http://apis.data.go.kr/B552584/ArpltnInforInqireSvc/getMsrstnAcctoRltmMesureDnsty")
}

fn default_data_term() -> String {
    String::from("DAILY")
}

fn default_page_size() -> u32 {
    1
}

fn default_version() -> String {
    String::from("1.0")
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Parameters of the reference data collector.
pub struct CollectorParameters {
    /// Endpoint of the measurement api.
    #[serde(default = "default_url")]
    pub url: String,
    /// The service key issued by data.go.kr.
    pub service_key: String,
    /// Name of the measuring station.
    pub station_name: String,
    /// Date range mode, one of `DAILY`, `MONTH`, `3MONTH`.
    #[serde(default = "default_data_term")]
    pub data_term: String,
    /// Number of items requested per page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Api version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Seconds between two collection cycles.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Timeout for a single request in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("could not reach air quality api: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("air quality api answered with status {0}")]
    Status(StatusCode),
    #[error("air quality api reported error {code}: {message}")]
    ResultCode { code: String, message: String },
    #[error("unexpected air quality api response: {0}")]
    Schema(String),
}

/// A provider of reference air quality readings.
pub trait ReferenceSource: Send {
    /// Fetches the most recent reading, `None` if the provider has none.
    fn fetch_latest(&self) -> Result<Option<ReferenceReading>, UpstreamError>;
}

#[derive(Deserialize, Debug)]
struct Envelope {
    response: ResponseBody,
}

#[derive(Deserialize, Debug)]
struct ResponseBody {
    header: ResponseHeader,
    body: Option<Body>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ResponseHeader {
    result_code: String,
    #[serde(default)]
    result_msg: String,
}

#[derive(Deserialize, Debug)]
struct Body {
    #[serde(default)]
    items: Vec<Item>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct Item {
    data_time: Option<String>,
    pm10_value: Option<Value>,
    pm25_value: Option<Value>,
    pm10_grade: Option<Value>,
    pm25_grade: Option<Value>,
    so2_value: Option<Value>,
    co_value: Option<Value>,
    o3_value: Option<Value>,
    no2_value: Option<Value>,
}

/// Reads a measurement that may be a number, a numeric string or a no data marker.
fn measurement(value: &Option<Value>) -> Option<f64> {
    match value {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => match text.trim() {
            "" | "-" => None,
            text => text.parse().ok(),
        },
        _ => None,
    }
}

fn grade(value: &Option<Value>) -> Option<Category> {
    measurement(value)
        .filter(|grade| grade.fract() == 0.0 && *grade >= 1.0 && *grade <= 4.0)
        .and_then(|grade| Category::from_grade(grade as u8))
}

/// Parses `YYYY-MM-DD HH:MM` in korean standard time.
fn parse_data_time(raw: &str) -> Option<DateTime<Utc>> {
    let (date, time) = raw.trim().split_at(raw.trim().find(' ')?);
    let mut date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let (hour, minute) = time.trim().split_at(time.trim().find(':')?);
    let mut hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute[1..].parse().ok()?;
    if hour == 24 && minute == 0 {
        hour = 0;
        date = date.succ_opt()?;
    }
    let local = date.and_hms_opt(hour, minute, 0)?;
    let kst = FixedOffset::east_opt(KST_OFFSET_SECS)?;
    kst.from_local_datetime(&local)
        .single()
        .map(|timestamp| timestamp.with_timezone(&Utc))
}

/// Extracts the first reading of an api answer.
pub fn parse_response(body: &str) -> Result<Option<ReferenceReading>, UpstreamError> {
    let envelope: Envelope =
        serde_json::from_str(body).map_err(|err| UpstreamError::Schema(err.to_string()))?;
    let header = envelope.response.header;
    if header.result_code != RESULT_CODE_OK {
        return Err(UpstreamError::ResultCode {
            code: header.result_code,
            message: header.result_msg,
        });
    }

    let item = match envelope.response.body.and_then(|body| body.items.into_iter().next()) {
        Some(item) => item,
        None => return Ok(None),
    };

    let raw_time = item
        .data_time
        .as_deref()
        .ok_or_else(|| UpstreamError::Schema(String::from("item without dataTime")))?;
    let measured_at = parse_data_time(raw_time)
        .ok_or_else(|| UpstreamError::Schema(format!("invalid dataTime '{}'", raw_time)))?;

    Ok(Some(ReferenceReading {
        measured_at,
        pm10_value: measurement(&item.pm10_value),
        pm25_value: measurement(&item.pm25_value),
        pm10_category: grade(&item.pm10_grade),
        pm25_category: grade(&item.pm25_grade),
        so2_value: measurement(&item.so2_value),
        co_value: measurement(&item.co_value),
        o3_value: measurement(&item.o3_value),
        no2_value: measurement(&item.no2_value),
    }))
}

pub struct AirKoreaClient {
    client: Client,
    params: CollectorParameters,
}

impl AirKoreaClient {
    pub fn new(params: CollectorParameters) -> Result<AirKoreaClient, UpstreamError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(params.timeout_secs))
            .build()?;
        Ok(AirKoreaClient { client, params })
    }
}

impl ReferenceSource for AirKoreaClient {
    fn fetch_latest(&self) -> Result<Option<ReferenceReading>, UpstreamError> {
        let page_size = self.params.page_size.to_string();
        let response = self
            .client
            .get(&self.params.url)
            .query(&[
                ("serviceKey", self.params.service_key.as_str()),
                ("returnType", "json"),
                ("numOfRows", page_size.as_str()),
                ("pageNo", "1"),
                ("stationName", self.params.station_name.as_str()),
                ("dataTerm", self.params.data_term.as_str()),
                ("ver", self.params.version.as_str()),
            ])
            .send()?;

        if response.status() != StatusCode::OK {
            return Err(UpstreamError::Status(response.status()));
        }
        let body = response.text()?;
        parse_response(&body)
    }
}
