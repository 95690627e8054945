//! Failure classification.
//!
//! Collaborator calls return `anyhow::Error`. A failure is permanent when it
//! is (or wraps) one of the core validation errors or a [`Permanent`]
//! marker; everything else (network, timeouts, throttling) is transient.
//! Neither class is retried in-process; the class is recorded so that an
//! external scheduler can decide whether re-triggering is worthwhile.

use std::fmt;

use thiserror::Error;

use crate::chunk::ChunkerError;
use crate::embedding::MalformedEmbedding;
use crate::provider::ProviderError;
use crate::vector_index::IndexError;

/// Marks a collaborator failure that retrying cannot fix (unsupported file
/// type, 4xx response, missing object).
#[derive(Debug, Error)]
#[error("{0}")]
pub struct Permanent(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Transient => f.write_str("transient"),
            ErrorClass::Permanent => f.write_str("permanent"),
        }
    }
}

pub fn classify(err: &anyhow::Error) -> ErrorClass {
    let permanent = err.chain().any(|cause| {
        cause.is::<Permanent>()
            || cause.is::<IndexError>()
            || cause.is::<ProviderError>()
            || cause.is::<ChunkerError>()
            || cause.is::<MalformedEmbedding>()
    });
    if permanent {
        ErrorClass::Permanent
    } else {
        ErrorClass::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_validation_errors_are_permanent() {
        let err = anyhow::Error::from(IndexError::InvalidDims);
        assert_eq!(classify(&err), ErrorClass::Permanent);

        let wrapped: anyhow::Result<()> =
            Err(ProviderError::UnknownProvider("x".into())).context("configuring session");
        assert_eq!(classify(&wrapped.unwrap_err()), ErrorClass::Permanent);

        let marked = anyhow::Error::from(Permanent("unsupported file type".into()));
        assert_eq!(classify(&marked), ErrorClass::Permanent);
    }

    #[test]
    fn test_other_errors_are_transient() {
        let err = anyhow::anyhow!("connection reset by peer");
        assert_eq!(classify(&err), ErrorClass::Transient);
    }
}
