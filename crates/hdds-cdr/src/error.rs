// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type shared by the CDR codec and the serdata layer.

use std::fmt;

/// Errors surfaced by the codec and serdata operations.
///
/// Validation failures are reported without retry; the offending sample is
/// dropped by the caller. Resource failures leave any in-progress output in
/// an unspecified (but safe to discard) state.
#[derive(Debug, Clone)]
pub enum CdrError {
    /// The sample violates a type constraint (bounded length exceeded,
    /// enum value out of range, discriminator without a matching case).
    Encoding { reason: String },
    /// Received CDR failed validation/normalization.
    Validation { offset: u32, reason: &'static str },
    /// An allocation through the stream allocator failed.
    OutOfResources,
    /// Caller misuse: unknown encoding identifier, keyhash request on a
    /// variable-key type, descriptor nested too deeply.
    Contract { reason: String },
}

impl fmt::Display for CdrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CdrError::Encoding { reason } => write!(f, "encoding rejected: {}", reason),
            CdrError::Validation { offset, reason } => {
                write!(f, "validation failed at offset {}: {}", offset, reason)
            }
            CdrError::OutOfResources => write!(f, "allocation failed"),
            CdrError::Contract { reason } => write!(f, "contract violation: {}", reason),
        }
    }
}

impl std::error::Error for CdrError {}

pub type CdrResult<T> = core::result::Result<T, CdrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_variants() {
        let err = CdrError::Validation {
            offset: 12,
            reason: "string not NUL terminated",
        };
        assert_eq!(
            format!("{}", err),
            "validation failed at offset 12: string not NUL terminated"
        );

        let err = CdrError::Encoding {
            reason: "bounded string exceeds 3 characters".into(),
        };
        assert_eq!(
            format!("{}", err),
            "encoding rejected: bounded string exceeds 3 characters"
        );

        assert_eq!(format!("{}", CdrError::OutOfResources), "allocation failed");
    }
}
