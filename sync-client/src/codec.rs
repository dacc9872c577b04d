//! Envelope codec seam.
//!
//! The engine never encodes frames itself; it goes through an
//! [`EnvelopeCodec`] so the protocol handler can be swapped.

use outbox_sync_types::{Envelope, SyncError};

/// Encodes envelopes to frames and back.
pub trait EnvelopeCodec: Send + Sync {
    /// Encode an envelope into a transport frame.
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, SyncError>;

    /// Decode a transport frame into an envelope.
    fn decode(&self, frame: &[u8]) -> Result<Envelope, SyncError>;
}

/// MessagePack codec (the protocol's native encoding).
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgpackCodec;

impl EnvelopeCodec for MsgpackCodec {
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, SyncError> {
        envelope.to_bytes()
    }

    fn decode(&self, frame: &[u8]) -> Result<Envelope, SyncError> {
        Envelope::from_bytes(frame)
    }
}
