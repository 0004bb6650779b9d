//! The [Kinesis](https://aws.amazon.com/kinesis/) `PutRecords` speaking
//! transport.
//!
//! Requests use the JSON 1.1 protocol with base64 record data. Requests are
//! not signed: point `endpoint` at a local emulator or a signing proxy, or
//! supply whatever headers the receiving end requires through `headers`.
//!
//! A record counts as ingested only if the response carries a result entry
//! for it without an `ErrorCode`. Records with no result entry are reported
//! as rejected with the code [`UNACCOUNTED`].

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{PutResponse, Record, Rejection};

const TARGET: &str = "Kinesis_20131202.PutRecords";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// Rejection code for records the response has no result entry for.
pub const UNACCOUNTED: &str = "Unaccounted";

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_timeout_millis() -> u64 {
    10_000
}

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Kinesis`].
pub enum Error {
    /// Wrapper around [`reqwest::Error`].
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    /// Wrapper around [`serde_json::Error`].
    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),
    /// The configured endpoint is not a valid URL
    #[error("Invalid endpoint {endpoint}: {reason}")]
    Endpoint {
        /// The endpoint as configured
        endpoint: String,
        /// Why it was refused
        reason: String,
    },
    /// Error making the HTTP request
    #[error("Failed to send PutRecords request to {endpoint}: {source}")]
    RequestFailed {
        /// Target endpoint
        endpoint: String,
        /// Underlying reqwest error
        #[source]
        source: Box<reqwest::Error>,
    },
    /// The response claims more failures than it identifies, so no record
    /// can be trusted as ingested
    #[error(
        "PutRecords to {endpoint} reported {failed_record_count} failures but identified {identified}"
    )]
    Inconsistent {
        /// Target endpoint
        endpoint: String,
        /// The response's `FailedRecordCount`
        failed_record_count: usize,
        /// Rejections the response's entries account for
        identified: usize,
    },
    /// The service answered with a non-success status
    #[error("PutRecords to {endpoint} returned {status}: {body}")]
    Status {
        /// Target endpoint
        endpoint: String,
        /// HTTP status code
        status: u16,
        /// Response body, as much as could be read
        body: String,
    },
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
/// Configuration of this transport.
pub struct Config {
    /// The region hosting the stream. Used to derive the endpoint when none
    /// is given.
    #[serde(default = "default_region")]
    pub region: String,
    /// Explicit endpoint URL, for instance a local emulator
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Headers to include in every request
    #[serde(default, with = "http_serde::header_map")]
    pub headers: HeaderMap,
    /// Timeout for a single `PutRecords` call, in milliseconds
    #[serde(default = "default_timeout_millis")]
    pub timeout_millis: u64,
}

impl Config {
    /// The endpoint requests are sent to.
    #[must_use]
    pub fn endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://kinesis.{}.amazonaws.com", self.region))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PutRecordsRequest<'a> {
    stream_name: &'a str,
    records: Vec<RequestEntry<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct RequestEntry<'a> {
    data: String,
    partition_key: &'a str,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct PutRecordsResponse {
    #[serde(default)]
    failed_record_count: usize,
    #[serde(default)]
    records: Vec<ResultEntry>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct ResultEntry {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

/// The Kinesis transport.
#[derive(Debug)]
pub struct Kinesis {
    client: reqwest::Client,
    endpoint: reqwest::Url,
    headers: HeaderMap,
}

impl Kinesis {
    /// Create a new [`Kinesis`] instance
    ///
    /// # Errors
    ///
    /// Creation will fail if the endpoint is not a valid URL or the HTTP
    /// client cannot be built.
    pub fn new(config: &Config) -> Result<Self, Error> {
        let endpoint = config.endpoint();
        let endpoint = reqwest::Url::parse(&endpoint).map_err(|err| Error::Endpoint {
            endpoint,
            reason: err.to_string(),
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_millis))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            headers: config.headers.clone(),
        })
    }

    async fn put(&self, stream_name: &str, records: &[Record]) -> Result<PutResponse, Error> {
        let engine = base64::engine::general_purpose::STANDARD;
        let body = PutRecordsRequest {
            stream_name,
            records: records
                .iter()
                .map(|record| RequestEntry {
                    data: engine.encode(&record.data),
                    partition_key: &record.partition_key,
                })
                .collect(),
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(self.headers.clone())
            .header(http::header::CONTENT_TYPE, CONTENT_TYPE)
            .header("X-Amz-Target", TARGET)
            .body(serde_json::to_vec(&body)?)
            .send()
            .await
            .map_err(|source| Error::RequestFailed {
                endpoint: self.endpoint.to_string(),
                source: Box::new(source),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Status {
                endpoint: self.endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let response: PutRecordsResponse = response.json().await?;
        if response.records.len() != records.len() {
            warn!(
                "PutRecords returned {entries} result entries for {submitted} records",
                entries = response.records.len(),
                submitted = records.len(),
            );
        }

        let mut entries = response.records.into_iter();
        let failed: Vec<Rejection> = (0..records.len())
            .filter_map(|index| match entries.next() {
                Some(ResultEntry {
                    error_code: None, ..
                }) => None,
                Some(ResultEntry {
                    error_code: Some(code),
                    error_message,
                }) => Some(Rejection {
                    index,
                    code,
                    message: error_message.unwrap_or_default(),
                }),
                None => Some(Rejection {
                    index,
                    code: UNACCOUNTED.to_string(),
                    message: "no result entry in response".to_string(),
                }),
            })
            .collect();

        if failed.len() < response.failed_record_count {
            warn!(
                "FailedRecordCount {count} exceeds {identified} identified rejections",
                count = response.failed_record_count,
                identified = failed.len(),
            );
            return Err(Error::Inconsistent {
                endpoint: self.endpoint.to_string(),
                failed_record_count: response.failed_record_count,
                identified: failed.len(),
            });
        }
        Ok(PutResponse { failed })
    }
}

#[async_trait]
impl super::Transport for Kinesis {
    async fn put_records(
        &self,
        stream_name: &str,
        records: &[Record],
    ) -> Result<PutResponse, super::Error> {
        Ok(self.put(stream_name, records).await?)
    }
}
