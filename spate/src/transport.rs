//! Stream transports
//!
//! A transport takes an ordered collection of records, each an opaque payload
//! plus a partition key, and ingests them into a named stream in one call. A
//! call may succeed as a whole while still rejecting individual records; the
//! indices of those records are reported in [`PutResponse`].

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub mod kinesis;

#[derive(thiserror::Error, Debug)]
/// Errors produced by a [`Transport`].
pub enum Error {
    /// See [`crate::transport::kinesis::Error`] for details.
    #[error(transparent)]
    Kinesis(#[from] kinesis::Error),
}

/// A single record bound for the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// The opaque payload
    pub data: Bytes,
    /// The key routing this record to a shard
    pub partition_key: String,
}

/// A record the stream service refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Position of the record in the submitted collection
    pub index: usize,
    /// Service error code, for instance `ProvisionedThroughputExceededException`
    pub code: String,
    /// Human readable detail, possibly empty
    pub message: String,
}

/// Response to a successful ingest call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutResponse {
    /// Records the service did not accept, in submission order
    pub failed: Vec<Rejection>,
}

#[async_trait]
/// Batch ingest into an append-only stream
pub trait Transport {
    /// Ingest `records` into `stream_name` in a single call.
    ///
    /// # Errors
    ///
    /// An error means the call as a whole failed and no record should be
    /// assumed ingested.
    async fn put_records(
        &self,
        stream_name: &str,
        records: &[Record],
    ) -> Result<PutResponse, Error>;
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
/// Configuration for [`Client`]
pub enum Config {
    /// See [`crate::transport::kinesis::Config`] for details.
    Kinesis(kinesis::Config),
    /// Accept and discard every record, useful for exercising the generator
    /// without a stream.
    Discard,
}

/// The transport client.
///
/// All transports supported by spate are a variant of this enum.
#[derive(Debug)]
pub enum Client {
    /// See [`crate::transport::kinesis::Kinesis`] for details.
    Kinesis(kinesis::Kinesis),
    /// See [`Discard`] for details.
    Discard(Discard),
}

impl Client {
    /// Create a new [`Client`]
    ///
    /// # Errors
    ///
    /// Function will return an error if the underlying client cannot be
    /// constructed from `config`.
    pub fn new(config: &Config) -> Result<Self, Error> {
        let client = match config {
            Config::Kinesis(conf) => Self::Kinesis(kinesis::Kinesis::new(conf)?),
            Config::Discard => Self::Discard(Discard),
        };
        Ok(client)
    }
}

#[async_trait]
impl Transport for Client {
    async fn put_records(
        &self,
        stream_name: &str,
        records: &[Record],
    ) -> Result<PutResponse, Error> {
        match self {
            Client::Kinesis(inner) => inner.put_records(stream_name, records).await,
            Client::Discard(inner) => inner.put_records(stream_name, records).await,
        }
    }
}

/// A transport that accepts every record and keeps none of them.
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

#[async_trait]
impl Transport for Discard {
    async fn put_records(
        &self,
        _stream_name: &str,
        _records: &[Record],
    ) -> Result<PutResponse, Error> {
        Ok(PutResponse::default())
    }
}
