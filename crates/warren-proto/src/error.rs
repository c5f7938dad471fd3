use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("provided data was too short ({0} bytes)")]
    TooShort(usize),

    #[error("data failed signature verification")]
    BadSignature,

    #[error("CBOR encode error: {0}")]
    Encode(String),

    #[error("CBOR decode error: {0}")]
    Decode(String),
}

impl CodecError {
    /// Malformed inputs (short or undecodable) are dropped silently on the
    /// receive path; bad signatures may additionally be logged.
    pub fn is_malformed(&self) -> bool {
        matches!(self, CodecError::TooShort(_) | CodecError::Decode(_))
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity is not a hex-encoded string")]
    Hex(#[from] hex::FromHexError),

    #[error("identity has incorrect length (is {got}, should be {expected})")]
    Length { expected: usize, got: usize },

    #[error("identity is not a valid Ed25519 key")]
    Key,
}
