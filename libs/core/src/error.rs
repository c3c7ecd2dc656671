use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Unsupported encoding version {major}.{minor}")]
    UnsupportedEncoding { major: u8, minor: u8 },

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("{0}")]
    Custom(String),
}

impl Error {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedEnvelope(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
