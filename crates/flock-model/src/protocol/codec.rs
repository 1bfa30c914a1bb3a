use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty line")]
    Empty,
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Serialize a message as a single `\n`-terminated JSON line.
pub fn encode_line<T: Serialize>(msg: &T) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(msg).map_err(ProtocolError::Encode)?;
    line.push('\n');
    Ok(line)
}

/// Parse one line (surrounding whitespace ignored).
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, ProtocolError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ProtocolError::Empty);
    }
    serde_json::from_str(line).map_err(ProtocolError::Decode)
}
