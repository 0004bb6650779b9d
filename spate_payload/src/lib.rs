//! The spate payloads
//!
//! This library holds the simulated entities spate mutates and the encodings
//! it ships them in. Only the externally visible fields of an entity, its
//! [`Update`], are ever encoded; the partition key is transport metadata.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::multiple_crate_versions)]

use std::io::{self, Write};

use serde::Deserialize;

pub use entity::{Entity, Pool, Update};
pub use json::Json;
pub use msgpack::MsgPack;

pub mod entity;
pub mod json;
pub mod msgpack;

/// Errors related to serialization
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// `MsgPack` payload could not be encoded
    #[error("MsgPack payload could not be encoded: {0}")]
    MsgPack(#[from] rmp_serde::encode::Error),
    /// Json payload could not be encoded
    #[error("Json payload could not be encoded: {0}")]
    Json(#[from] serde_json::Error),
    /// IO operation failed
    #[error("IO operation failed: {0}")]
    Io(#[from] io::Error),
}

/// To encode an [`Update`] into bytes
pub trait Encoder {
    /// Write the encoding of `update` into `writer`.
    ///
    /// # Errors
    ///
    /// Errors are serialization crackups. Nothing is promised about the state
    /// of `writer` after a failure.
    fn encode<W>(&self, update: &Update<'_>, writer: &mut W) -> Result<(), Error>
    where
        W: Write;
}

/// Configuration for the payload encoding
#[derive(Debug, Deserialize, serde::Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum Config {
    /// Compact JSON objects
    #[default]
    Json,
    /// `MessagePack` maps with the same field names as the JSON variant
    MsgPack,
}

impl Config {
    /// Build the encoder this configuration names.
    #[must_use]
    pub fn encoder(self) -> Variant {
        match self {
            Config::Json => Variant::Json(Json),
            Config::MsgPack => Variant::MsgPack(MsgPack),
        }
    }
}

/// The encoder selected by [`Config`]
#[derive(Debug, Clone, Copy)]
pub enum Variant {
    /// See [`Json`]
    Json(Json),
    /// See [`MsgPack`]
    MsgPack(MsgPack),
}

impl Encoder for Variant {
    fn encode<W>(&self, update: &Update<'_>, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        match self {
            Variant::Json(inner) => inner.encode(update, writer),
            Variant::MsgPack(inner) => inner.encode(update, writer),
        }
    }
}
