//! The spate driver loop
//!
//! The generator walks a fixed pool of entities in index order, wrapping at
//! the end, and gathers them into batches. Each full batch is admitted against
//! the throttle, which is to say the loop sleeps for as long as the token
//! bucket demands, and then handed to the [`Dispatcher`] to be advanced,
//! encoded and shipped in one transport call. Nothing after startup stops the
//! loop: encode failures cost a record, transport failures cost a batch or are
//! retried per [`FailurePolicy`].
//!
//! ## Metrics
//!
//! `admission_rejected`: Admission requests refused outright by the throttle
//! `records_retried`: Records resubmitted after a failure
//! `records_dropped`: Records abandoned after a failure
//! `units_per_second`: Configured throttle rate
//!
//! Additional metrics are emitted by the [`dispatch`] module and the
//! transport.
//!

use std::num::{NonZeroU32, NonZeroU64, NonZeroUsize};

use metrics::{counter, gauge};
use rand::{SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use spate_payload::{Encoder, Pool, Variant};
use spate_throttle::{Clock, RealClock, Throttle};
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::transport::{self, Record, Transport};

pub mod batch;
pub mod common;
pub mod dispatch;

pub use batch::Accumulator;
pub use common::FailurePolicy;
pub use dispatch::{Dispatcher, Outcome};

use common::MetricsBuilder;

/// Pause taken after the throttle refuses a request outright.
pub const REJECTION_BACKOFF: Duration = Duration::from_micros(100);

fn default_entities() -> usize {
    100_000
}

fn default_batch_size() -> u32 {
    500
}

fn default_progress_interval() -> u64 {
    1_000
}

fn default_stream_name() -> String {
    "leaderboard".to_string()
}

/// Default throttle rate, in records per second.
pub const DEFAULT_UNITS_PER_SECOND: NonZeroU32 = match NonZeroU32::new(990) {
    Some(rate) => rate,
    None => unreachable!(),
};

fn default_throttle() -> spate_throttle::Config {
    spate_throttle::Config::Stable {
        units_per_second: DEFAULT_UNITS_PER_SECOND,
        burst: None,
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
/// Configuration of the generator.
pub struct Config {
    /// Identifier attached to this generator's metrics
    #[serde(default)]
    pub id: Option<String>,
    /// The seed for random operations. Without one every run draws fresh
    /// partition keys and score deltas.
    #[serde(default)]
    pub seed: Option<[u8; 32]>,
    /// Number of entities in the pool
    #[serde(default = "default_entities")]
    pub entities: usize,
    /// Number of records shipped per transport call
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Log progress every time this many records have been sent
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
    /// The stream records are written into
    #[serde(default = "default_stream_name")]
    pub stream_name: String,
    /// The payload encoding
    #[serde(default)]
    pub variant: spate_payload::Config,
    /// The admission throttle, in records per second
    #[serde(default = "default_throttle")]
    pub throttle: spate_throttle::Config,
    /// What to do with records that failed to reach the stream
    #[serde(default)]
    pub on_failure: FailurePolicy,
    /// The stream transport
    pub transport: transport::Config,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Errors produced by [`Generator`].
pub enum Error {
    /// A configuration value that must be positive was zero
    #[error("{field} must not be zero")]
    Zero {
        /// The offending configuration field
        field: &'static str,
    },
    /// A batch would never be admitted by the throttle
    #[error("Batch size {batch_size} exceeds throttle burst capacity of {burst}")]
    BatchExceedsBurst {
        /// The configured batch size
        batch_size: u32,
        /// The throttle's burst capacity
        burst: u32,
    },
}

/// Summary of one pass of [`Generator::next_batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Report {
    /// Entities drained from the accumulator
    pub batch_len: usize,
    /// Time spent waiting on the throttle before dispatch
    pub waited: Duration,
    /// Records the stream accepted, retries included
    pub accepted: usize,
    /// Entities skipped because they did not encode
    pub encode_failures: usize,
    /// Records resubmitted under [`FailurePolicy::Retry`]
    pub retried: usize,
    /// Records given up on
    pub dropped: usize,
    /// Running total of entities dispatched, this batch included
    pub total_sent: u64,
}

/// The driver loop.
///
/// Owns the pool, the accumulator, the throttle and the dispatcher for the
/// life of the process.
#[derive(Debug)]
pub struct Generator<T, E = Variant, C = RealClock> {
    pool: Pool,
    accumulator: Accumulator,
    throttle: Throttle<C>,
    dispatcher: Dispatcher<T, E>,
    on_failure: FailurePolicy,
    cursor: usize,
    total_sent: u64,
    progress_interval: NonZeroU64,
    metric_labels: Vec<(String, String)>,
}

impl<T> Generator<T>
where
    T: Transport + Sync,
{
    /// Create a new [`Generator`] shipping through `transport` in real time.
    ///
    /// # Errors
    ///
    /// See [`Generator::with_clock`].
    pub fn new(config: &Config, transport: T) -> Result<Self, Error> {
        Self::with_clock(
            config,
            transport,
            config.variant.encoder(),
            RealClock::default(),
        )
    }
}

impl<T, E, C> Generator<T, E, C>
where
    T: Transport + Sync,
    E: Encoder,
    C: Clock + Sync + Send,
{
    /// Create a new [`Generator`] encoding with `encoder` and keeping time by
    /// `clock`.
    ///
    /// # Errors
    ///
    /// Creation fails if `entities`, `batch_size` or `progress_interval` are
    /// zero, or if a whole batch could never fit the throttle's burst
    /// capacity.
    pub fn with_clock(config: &Config, transport: T, encoder: E, clock: C) -> Result<Self, Error> {
        let entities =
            NonZeroUsize::new(config.entities).ok_or(Error::Zero { field: "entities" })?;
        let batch_size =
            NonZeroU32::new(config.batch_size).ok_or(Error::Zero { field: "batch_size" })?;
        let progress_interval = NonZeroU64::new(config.progress_interval).ok_or(Error::Zero {
            field: "progress_interval",
        })?;
        if let Some(burst) = config.throttle.burst().filter(|burst| *burst < batch_size) {
            return Err(Error::BatchExceedsBurst {
                batch_size: batch_size.get(),
                burst: burst.get(),
            });
        }
        let batch_size =
            NonZeroUsize::try_from(batch_size).map_err(|_| Error::Zero { field: "batch_size" })?;

        let mut rng = match config.seed {
            Some(seed) => StdRng::from_seed(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let pool = Pool::new(entities.get(), &mut rng);
        let labels = MetricsBuilder::new("stream")
            .with_id(config.id.clone())
            .build();

        if let spate_throttle::Config::Stable {
            units_per_second, ..
        } = config.throttle
        {
            gauge!("units_per_second", &labels).set(f64::from(units_per_second.get()));
        }

        let dispatcher = Dispatcher::new(
            config.stream_name.clone(),
            encoder,
            transport,
            StdRng::from_rng(&mut rng),
            labels.clone(),
        );

        Ok(Self {
            pool,
            accumulator: Accumulator::new(batch_size),
            throttle: Throttle::with_clock(config.throttle, clock),
            dispatcher,
            on_failure: config.on_failure,
            cursor: 0,
            total_sent: 0,
            progress_interval,
            metric_labels: labels,
        })
    }

    /// The entity pool.
    #[must_use]
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Entities dispatched so far.
    #[must_use]
    pub fn total_sent(&self) -> u64 {
        self.total_sent
    }

    /// Gather, admit and dispatch one batch.
    pub async fn next_batch(&mut self) -> Report {
        while !self.accumulator.is_full() {
            self.accumulator.add(self.cursor);
            self.cursor = (self.cursor + 1) % self.pool.len();
        }

        let batch_len = self.accumulator.len();
        let waited = self.admit(batch_len).await;
        let batch = self.accumulator.drain();
        let outcome = self.dispatcher.dispatch(&mut self.pool, &batch).await;

        let mut report = Report {
            batch_len,
            waited,
            accepted: outcome.accepted,
            encode_failures: outcome.encode_failures,
            ..Report::default()
        };
        self.settle(outcome.failed, &mut report).await;

        let before = self.total_sent;
        self.total_sent += batch_len as u64;
        report.total_sent = self.total_sent;
        if crossed(before, self.total_sent, self.progress_interval) {
            info!(
                "{total} updates sent to {stream}",
                total = self.total_sent,
                stream = self.dispatcher.stream_name()
            );
        }
        report
    }

    /// Run the loop forever.
    ///
    /// # Errors
    ///
    /// None past startup. This function only returns if the surrounding
    /// future is dropped.
    pub async fn spin(mut self) -> Result<(), Error> {
        info!(
            "Generating {entities} entities into {stream}",
            entities = self.pool.len(),
            stream = self.dispatcher.stream_name()
        );
        loop {
            let report = self.next_batch().await;
            debug!("{report:?}");
        }
    }

    // Block until `units` are admitted, returning the time spent waiting on
    // the throttle. A request larger than the burst capacity is refused by
    // the throttle; after backing off it is admitted in burst-sized pieces.
    async fn admit(&mut self, units: usize) -> Duration {
        let request = u32::try_from(units).unwrap_or(u32::MAX);
        let burst = match self.throttle.wait_for(request).await {
            Ok(waited) => return waited,
            Err(spate_throttle::Error::Capacity { burst, .. }) => burst,
        };

        warn!("Admission of {request} refused, burst capacity is {burst}");
        counter!("admission_rejected", &self.metric_labels).increment(1);
        self.throttle.pause(REJECTION_BACKOFF).await;

        let mut waited = Duration::ZERO;
        let mut remaining = request;
        while remaining > 0 {
            let piece = remaining.min(burst.max(1));
            // A piece no larger than the burst is never refused.
            waited += self.throttle.wait_for(piece).await.unwrap_or_default();
            remaining -= piece;
        }
        waited
    }

    // Apply the failure policy to records that did not make it into the
    // stream.
    async fn settle(&mut self, mut failed: Vec<Record>, report: &mut Report) {
        if let FailurePolicy::Retry {
            max_attempts,
            backoff_millis,
        } = self.on_failure
        {
            let mut attempts = 0;
            while !failed.is_empty() && attempts < max_attempts {
                attempts += 1;
                self.throttle
                    .pause(Duration::from_millis(backoff_millis))
                    .await;
                self.admit(failed.len()).await;

                report.retried += failed.len();
                counter!("records_retried", &self.metric_labels).increment(failed.len() as u64);
                let outcome = self.dispatcher.resubmit(failed).await;
                report.accepted += outcome.accepted;
                failed = outcome.failed;
            }
        }

        if !failed.is_empty() {
            warn!(
                "Dropping {count} records bound for {stream}",
                count = failed.len(),
                stream = self.dispatcher.stream_name()
            );
            counter!("records_dropped", &self.metric_labels).increment(failed.len() as u64);
            report.dropped += failed.len();
        }
    }
}

// Whether moving the total from `before` to `after` passed a multiple of
// `interval`.
fn crossed(before: u64, after: u64, interval: NonZeroU64) -> bool {
    after / interval > before / interval
}
