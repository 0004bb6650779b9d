//! `MessagePack` payload.

use std::io::Write;

use crate::{Encoder, Error, Update};

/// `MessagePack` encoding of an [`Update`]. Structs are written as maps so the
/// field names match the JSON variant.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgPack;

impl Encoder for MsgPack {
    fn encode<W>(&self, update: &Update<'_>, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        rmp_serde::encode::write_named(writer, update)?;
        Ok(())
    }
}
