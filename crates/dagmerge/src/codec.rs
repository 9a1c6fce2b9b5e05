//! Section encoding.

use crate::error::CodecError;
use crate::section::Section;

/// Converts sections to and from their on-disk bytes.
///
/// Implementations must be stateless so one instance can be shared by every worker.
pub trait Codec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<Section, CodecError>;

    fn encode(&self, section: &Section) -> Result<Vec<u8>, CodecError>;
}

/// JSON section documents, `{"transactions": [{"hash": ..}, ..], ..}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    /// Pretty-print output
    pub pretty: bool,
}

impl Codec for JsonCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Section, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn encode(&self, section: &Section) -> Result<Vec<u8>, CodecError> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(section)?
        } else {
            serde_json::to_vec(section)?
        };
        Ok(bytes)
    }
}
