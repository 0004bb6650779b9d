//! The spate configuration file
//!
//! A single YAML document with an optional `telemetry` section and a
//! `generator` section. Unknown fields are refused and malformed input is
//! reported as an [`Error`]; every other problem with a configuration is left
//! for [`crate::generator::Generator`] to catch when it is built.

use std::net::SocketAddr;

use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::generator;

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
}

/// Main configuration struct for this program
#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The method by which to express telemetry. No telemetry is exported
    /// when absent.
    #[serde(default)]
    pub telemetry: Option<Telemetry>,
    /// The generator driving load into the stream
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub generator: generator::Config,
}

#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
#[serde(untagged)]
/// Defines the manner of spate's telemetry.
pub enum Telemetry {
    /// In prometheus mode spate will emit its internal telemetry for scraping
    /// at a prometheus poll endpoint.
    Prometheus {
        /// Address and port for prometheus exporter
        addr: SocketAddr,
        /// Additional labels to include in every metric
        #[serde(default)]
        global_labels: FxHashMap<String, String>,
    },
}

impl Config {
    /// Parse a [`Config`] from YAML `contents`.
    ///
    /// # Errors
    ///
    /// Returns an error if `contents` is not a valid configuration.
    pub fn parse(contents: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(contents)?)
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;

    use http::HeaderValue;

    use super::{Config, Telemetry};
    use crate::{
        generator::FailurePolicy,
        transport::{self, kinesis},
    };

    #[test]
    fn config_deserializes() {
        let contents = r#"
telemetry:
  addr: "0.0.0.0:9000"
  global_labels:
    experiment: leaderboard
generator:
  seed: [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97, 101, 103, 107, 109, 113, 127, 131]
  entities: 100000
  batch_size: 500
  progress_interval: 1000
  stream_name: leaderboard
  variant: msg_pack
  throttle:
    stable:
      units_per_second: 990
      burst: 1000
  on_failure:
    retry:
      max_attempts: 3
      backoff_millis: 100
  transport:
    kinesis:
      region: us-west-2
      endpoint: "http://localhost:4566"
      headers:
        authorization: dummy
      timeout_millis: 2000
"#;
        let config = Config::parse(contents).unwrap();

        let Some(Telemetry::Prometheus {
            addr,
            global_labels,
        }) = &config.telemetry
        else {
            panic!("expected prometheus telemetry");
        };
        assert_eq!(addr.port(), 9000);
        assert_eq!(
            global_labels.get("experiment").map(String::as_str),
            Some("leaderboard")
        );

        let generator = &config.generator;
        assert_eq!(generator.seed.map(|s| s[31]), Some(131));
        assert_eq!(generator.entities, 100_000);
        assert_eq!(generator.batch_size, 500);
        assert_eq!(generator.progress_interval, 1_000);
        assert_eq!(generator.stream_name, "leaderboard");
        assert_eq!(generator.variant, spate_payload::Config::MsgPack);
        assert_eq!(
            generator.throttle,
            spate_throttle::Config::Stable {
                units_per_second: NonZeroU32::new(990).unwrap(),
                burst: NonZeroU32::new(1_000),
            }
        );
        assert_eq!(
            generator.on_failure,
            FailurePolicy::Retry {
                max_attempts: 3,
                backoff_millis: 100
            }
        );
        let transport::Config::Kinesis(kinesis::Config {
            region,
            endpoint,
            headers,
            timeout_millis,
        }) = &generator.transport
        else {
            panic!("expected kinesis transport");
        };
        assert_eq!(region, "us-west-2");
        assert_eq!(endpoint.as_deref(), Some("http://localhost:4566"));
        assert_eq!(
            headers.get("authorization"),
            Some(&HeaderValue::from_static("dummy"))
        );
        assert_eq!(*timeout_millis, 2_000);
    }

    #[test]
    fn defaults_fill_the_rest() {
        let config = Config::parse("generator:\n  transport: discard\n").unwrap();
        assert_eq!(config.telemetry, None);
        let generator = config.generator;
        assert_eq!(generator.id, None);
        assert_eq!(generator.seed, None);
        assert_eq!(generator.entities, 100_000);
        assert_eq!(generator.batch_size, 500);
        assert_eq!(generator.progress_interval, 1_000);
        assert_eq!(generator.stream_name, "leaderboard");
        assert_eq!(generator.variant, spate_payload::Config::Json);
        assert_eq!(
            generator.throttle.burst(),
            NonZeroU32::new(990),
            "throttle defaults to 990 per second"
        );
        assert_eq!(generator.on_failure, FailurePolicy::Drop);
        assert_eq!(generator.transport, transport::Config::Discard);
    }

    #[test]
    fn unknown_fields_are_refused() {
        assert!(Config::parse("generator:\n  transport: discard\n  shards: 4\n").is_err());
        assert!(Config::parse("generator:\n  transport: discard\nblackhole: []\n").is_err());
        assert!(Config::parse("generator:\n  batch_size: 10\n").is_err());
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let err = Config::parse("generator: [\n").unwrap_err();
        assert!(matches!(err, super::Error::SerdeYaml(_)));
        let err = Config::parse("telemetry:\n  addr: not-an-addr\ngenerator:\n  transport: discard\n")
            .unwrap_err();
        assert!(err.to_string().starts_with("Failed to deserialize yaml"));
    }

    #[test]
    fn all_out_throttle() {
        let config =
            Config::parse("generator:\n  throttle: all_out\n  transport: discard\n").unwrap();
        assert_eq!(config.generator.throttle, spate_throttle::Config::AllOut);
    }
}
