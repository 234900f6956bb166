//! Error types shared by the envelope codec and the carrier engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StegoError>;

#[derive(Error, Debug)]
pub enum StegoError {
    /// Compression level outside the accepted range.
    #[error("compression level must be between -1 and 9, inclusive (got {0})")]
    InvalidCompressionLevel(i8),

    /// Content value outside the 6-bit symbol alphabet.
    #[error("content value {0} is outside the 6-bit symbol range")]
    InvalidSymbol(u8),

    /// Pixel data that is neither 8-bit grayscale nor 8-bit RGB.
    #[error("unsupported pixel layout: {0}")]
    UnsupportedLayout(String),

    /// The carrier has fewer pixel groups than the payload has symbols.
    #[error("payload needs {required} pixel groups but the carrier only has {available}")]
    CapacityExceeded { required: usize, available: usize },

    /// Embedding without override onto a carrier that already holds a payload.
    #[error("carrier already contains a payload")]
    PayloadPresent,

    /// Extraction from a carrier with no detectable payload.
    #[error("carrier does not contain a payload")]
    NoPayload,

    /// Recovered data does not match the envelope format.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The symbol stream does not decode as base64.
    #[error("envelope is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
