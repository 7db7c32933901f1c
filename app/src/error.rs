pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("cbor: truncated input at offset {offset}")]
    Truncated { offset: usize },
    #[error("cbor: {0} not supported")]
    Unsupported(&'static str),
    #[error("cbor: simple value {0} not supported")]
    UnsupportedSimple(u8),
    #[error("cbor: invalid utf-8 in text string at offset {offset}")]
    InvalidUtf8 { offset: usize },
    #[error("cbor: negative integer out of range")]
    NegativeOutOfRange,
    #[error("cbor: nesting deeper than {0} levels")]
    TooDeep(usize),
    #[error("cbor: unexpected document shape: {0}")]
    Shape(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlobError {
    #[error("device blob: too short ({len} bytes)")]
    TooShort { len: usize },
    #[error("device blob: bad magic 0x{found:08x}")]
    BadMagic { found: u32 },
    #[error("device blob: unsupported version {0}")]
    UnsupportedVersion(u16),
    #[error("device blob: short payload {actual} < {expected}")]
    ShortPayload { actual: usize, expected: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{method} {path} failed: {status}{}", details_suffix(.details))]
    Status {
        method: String,
        path: String,
        status: u16,
        details: String,
    },
    #[error("{method} {path} failed: {source}")]
    Request {
        method: String,
        path: String,
        #[source]
        source: reqwest_middleware::Error,
    },
    #[error("{method} {path} failed reading body: {source}")]
    Body {
        method: String,
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid gateway url {0}")]
    Url(String),
    #[error("stream: {0}")]
    Stream(String),
}

fn details_suffix(details: &str) -> String {
    if details.is_empty() {
        String::new()
    } else {
        format!(" {}", details)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("device_uid {0:?} is not 0x followed by 16 hex digits")]
    DeviceUid(String),
    #[error("endpoint {0} out of range 1..=240")]
    Endpoint(u64),
    #[error("{field}: {message}")]
    Field { field: &'static str, message: String },
}

impl ValidationError {
    pub fn field(field: &'static str, message: impl Into<String>) -> Self {
        Self::Field {
            field,
            message: message.into(),
        }
    }
}
