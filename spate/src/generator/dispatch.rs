//! Batch dispatch
//!
//! The dispatcher turns a batch of pool indices into one transport call. Each
//! entity in the batch is advanced in place, its update is encoded, and the
//! encoded records are shipped together. Nothing here is fatal: encode
//! failures drop the one record, transport failures are handed back to the
//! caller in the [`Outcome`].
//!
//! ## Metrics
//!
//! `requests_sent`: Transport calls made
//! `request_failure`: Transport calls that failed outright
//! `records_sent`: Records accepted by the stream
//! `records_failed`: Records rejected by the stream or lost to a failed call
//! `encode_failure`: Entities skipped because their update did not encode
//! `bytes_written`: Payload bytes carried by calls the transport completed
//!

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use metrics::counter;
use rand::{Rng, rngs::StdRng};
use spate_payload::{Encoder, Pool, Variant};
use tracing::{debug, error, warn};

use crate::transport::{Record, Transport};

/// Score deltas are drawn uniformly from `[0, MAXIMUM_SCORE_DELTA)`.
pub const MAXIMUM_SCORE_DELTA: i32 = 100;

/// The result of one dispatch or resubmission.
#[derive(Debug, Default)]
pub struct Outcome {
    /// Records handed to the transport
    pub submitted: usize,
    /// Records the stream accepted
    pub accepted: usize,
    /// Entities dropped from the batch because they failed to encode
    pub encode_failures: usize,
    /// Records that did not make it into the stream
    pub failed: Vec<Record>,
}

/// Encodes and submits batches to a [`Transport`].
#[derive(Debug)]
pub struct Dispatcher<T, E = Variant> {
    stream_name: String,
    encoder: E,
    transport: T,
    rng: StdRng,
    metric_labels: Vec<(String, String)>,
}

impl<T, E> Dispatcher<T, E>
where
    T: Transport + Sync,
    E: Encoder,
{
    /// Create a new [`Dispatcher`] writing into `stream_name`.
    pub fn new(
        stream_name: String,
        encoder: E,
        transport: T,
        rng: StdRng,
        metric_labels: Vec<(String, String)>,
    ) -> Self {
        Self {
            stream_name,
            encoder,
            transport,
            rng,
            metric_labels,
        }
    }

    /// The stream this dispatcher writes into.
    #[must_use]
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Advance, encode and submit every entity in `batch`, in order.
    ///
    /// Indices not present in `pool` are skipped. If no record survives
    /// encoding no transport call is made.
    pub async fn dispatch(&mut self, pool: &mut Pool, batch: &[usize]) -> Outcome {
        let mut records = Vec::with_capacity(batch.len());
        let mut encode_failures = 0;

        for &idx in batch {
            let Some(entity) = pool.get_mut(idx) else {
                debug!("Batch index {idx} is outside the pool, skipping");
                continue;
            };
            entity.advance(now_millis(), self.rng.random_range(0..MAXIMUM_SCORE_DELTA));

            let mut data = Vec::with_capacity(64);
            match self.encoder.encode(&entity.update(), &mut data) {
                Ok(()) => records.push(Record {
                    data: Bytes::from(data),
                    partition_key: entity.partition_key().to_string(),
                }),
                Err(err) => {
                    warn!("Skipping {user_id}: {err}", user_id = entity.user_id());
                    counter!("encode_failure", &self.metric_labels).increment(1);
                    encode_failures += 1;
                }
            }
        }

        let mut outcome = self.submit(records).await;
        outcome.encode_failures = encode_failures;
        outcome
    }

    /// Submit previously encoded `records` again, as-is.
    pub async fn resubmit(&mut self, records: Vec<Record>) -> Outcome {
        self.submit(records).await
    }

    async fn submit(&self, records: Vec<Record>) -> Outcome {
        if records.is_empty() {
            return Outcome::default();
        }
        let submitted = records.len();
        let submitted_bytes: usize = records.iter().map(|r| r.data.len()).sum();

        counter!("requests_sent", &self.metric_labels).increment(1);
        match self
            .transport
            .put_records(&self.stream_name, &records)
            .await
        {
            Ok(response) => {
                let mut rejected = vec![false; submitted];
                for rejection in &response.failed {
                    if let Some(slot) = rejected.get_mut(rejection.index) {
                        *slot = true;
                    }
                }
                let failed: Vec<Record> = records
                    .into_iter()
                    .zip(rejected)
                    .filter_map(|(record, rejected)| rejected.then_some(record))
                    .collect();
                let accepted = submitted - failed.len();

                if let Some(first) = response.failed.first() {
                    warn!(
                        "{count} of {submitted} records rejected by {stream}, first: {code} {message}",
                        count = failed.len(),
                        stream = self.stream_name,
                        code = first.code,
                        message = first.message,
                    );
                    counter!("records_failed", &self.metric_labels)
                        .increment(failed.len() as u64);
                }
                counter!("records_sent", &self.metric_labels).increment(accepted as u64);
                counter!("bytes_written", &self.metric_labels).increment(submitted_bytes as u64);

                Outcome {
                    submitted,
                    accepted,
                    encode_failures: 0,
                    failed,
                }
            }
            Err(err) => {
                error!(
                    "Failed to submit {submitted} records to {stream}: {err}",
                    stream = self.stream_name
                );
                counter!("request_failure", &self.metric_labels).increment(1);
                counter!("records_failed", &self.metric_labels).increment(submitted as u64);
                Outcome {
                    submitted,
                    accepted: 0,
                    encode_failures: 0,
                    failed: records,
                }
            }
        }
    }
}

/// Wall-clock milliseconds since the epoch. A clock set before the epoch
/// reads as zero.
fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}
