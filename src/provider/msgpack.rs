use super::file::{EnvelopeCodec, FileSaveProvider};
use crate::core::{Result, SaveEnvelope, SaveError};

/// Compact MessagePack binary encoding.
pub struct MsgpackCodec;

impl EnvelopeCodec for MsgpackCodec {
    fn encode(envelope: &SaveEnvelope) -> Result<Vec<u8>> {
        rmp_serde::to_vec(envelope)
            .map_err(|e| SaveError::Serialization(format!("Failed to encode msgpack save: {}", e)))
    }

    fn decode(bytes: &[u8]) -> Result<SaveEnvelope> {
        rmp_serde::from_slice(bytes)
            .map_err(|e| SaveError::Serialization(format!("Failed to decode msgpack save: {}", e)))
    }
}

/// File-per-save backend storing saves as MessagePack binary.
pub type MsgpackSaveProvider = FileSaveProvider<MsgpackCodec>;
