use thiserror::Error;

use crate::template::DescriptorKind;

pub type Result<A, E = Error> = std::result::Result<A, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error in {context}: {reason}")]
    Configuration { context: String, reason: String },
    #[error("decoding {template}.{field} failed at byte {offset}: {reason}")]
    Decoding {
        template: String,
        field: String,
        offset: usize,
        reason: String,
    },
    #[error("encoding {template}.{field} failed: {reason}")]
    Encoding {
        template: String,
        field: String,
        reason: String,
    },
    #[error("no coder registered for {0:?} descriptors")]
    CoderMissing(DescriptorKind),
    #[error("protocol version violation: {0}")]
    Version(String),
    #[error("buffer exhausted at byte {0}")]
    BufferExhausted(usize),
    #[error("value does not fit in {bits} bits")]
    Overflow { bits: u32 },
    #[error("expression error: {0}")]
    Expression(String),
    #[error("{0}")]
    Value(String),
}

impl Error {
    pub(crate) fn config(context: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Configuration {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn in_decode(self, template: &str, field: &str, offset: usize) -> Self {
        match self {
            e @ Error::Decoding { .. } | e @ Error::Version(_) => e,
            e => Error::Decoding {
                template: template.to_owned(),
                field: field.to_owned(),
                offset,
                reason: e.to_string(),
            },
        }
    }

    pub(crate) fn in_encode(self, template: &str, field: &str) -> Self {
        match self {
            e @ Error::Encoding { .. } | e @ Error::Version(_) => e,
            e => Error::Encoding {
                template: template.to_owned(),
                field: field.to_owned(),
                reason: e.to_string(),
            },
        }
    }
}
