use super::file::{EnvelopeCodec, FileSaveProvider};
use crate::core::{Result, SaveEnvelope, SaveError};

/// Human-readable JSON encoding.
pub struct JsonCodec;

impl EnvelopeCodec for JsonCodec {
    fn encode(envelope: &SaveEnvelope) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(envelope)
            .map_err(|e| SaveError::Serialization(format!("Failed to encode json save: {}", e)))
    }

    fn decode(bytes: &[u8]) -> Result<SaveEnvelope> {
        serde_json::from_slice(bytes)
            .map_err(|e| SaveError::Serialization(format!("Failed to decode json save: {}", e)))
    }
}

/// File-per-save backend storing saves as JSON text.
pub type JsonSaveProvider = FileSaveProvider<JsonCodec>;
