//! JSON payload.

use std::io::Write;

use crate::{Encoder, Error, Update};

/// Compact JSON encoding of an [`Update`], one object per record.
#[derive(Debug, Default, Clone, Copy)]
pub struct Json;

impl Encoder for Json {
    fn encode<W>(&self, update: &Update<'_>, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        serde_json::to_writer(writer, update)?;
        Ok(())
    }
}
