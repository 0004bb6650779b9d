//! The spate stream load generator.
//!
//! This library supports the spate binary found elsewhere in this project. A
//! fixed pool of simulated entities is cycled through in order, gathered into
//! batches, admitted against a units-per-second budget and shipped to an
//! append-only stream service. The loop never ends on its own; every failure
//! past startup is reported and absorbed.

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
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod generator;
pub mod transport;
