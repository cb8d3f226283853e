use thiserror::Error;

#[derive(Error, Debug)]
pub enum SkySenseError {
    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Unknown user status: {0}")]
    UnknownStatus(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    #[error("Token is not valid base64")]
    Encoding,

    #[error("Token payload is malformed")]
    Malformed,

    #[error("Token signature is invalid")]
    BadSignature,

    #[error("Token has expired")]
    Expired,

    #[error("Invalid key bytes")]
    InvalidKey,

    #[error("Token lifetime out of range")]
    TtlOutOfRange,
}
