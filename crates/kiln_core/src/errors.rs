//! Error Types
//!
//! This module defines the error type shared by every Kiln crate.
//!
//! # Overview
//!
//! [`KilnError`] covers the whole shader build path:
//! - Template loading and include resolution
//! - Directive and conditional parsing
//! - Define substitution
//! - Backend compilation and linking
//! - Geometry shader synthesis
//!
//! # Usage
//!
//! Fallible operations return [`Result<T>`], an alias for
//! `std::result::Result<T, KilnError>`. The `ShaderManager` front door
//! (`get_shader` / `get_program`) logs the error and hands back `None`, so
//! failures never reach the caches.
//!
//! ```rust,ignore
//! use kiln_core::errors::{KilnError, Result};
//!
//! fn load(name: &str) -> Result<String> {
//!     Err(KilnError::DirectiveParse {
//!         template: name.to_string(),
//!         line: 1,
//!         message: "unexpected @endforeach".to_string(),
//!     })
//! }
//! ```

use thiserror::Error;

use crate::stage::ShaderStage;

/// The main error type for Kiln.
#[derive(Error, Debug)]
pub enum KilnError {
    // ========================================================================
    // Template Errors
    // ========================================================================
    /// The requested template has no backing source.
    #[error("Shader template not found: {name}")]
    TemplateNotFound {
        /// Template name as requested by the caller.
        name: String,
        /// Underlying I/O failure reported by the template source.
        #[source]
        source: std::io::Error,
    },

    /// An `#include` re-entered a template that is already being expanded.
    #[error("Shader {template}: cyclic #include of \"{include}\"")]
    IncludeCycle {
        /// Template being expanded when the cycle was detected.
        template: String,
        /// The include target that closes the cycle.
        include: String,
    },

    // ========================================================================
    // Preprocessing Errors
    // ========================================================================
    /// Malformed directive (`#include`, `@foreach`, `@if`, ...).
    #[error("Shader {template}:{line}: {message}")]
    DirectiveParse {
        /// Template in which the directive appears.
        template: String,
        /// 1-based line in `template` where the offending text was written.
        line: usize,
        /// Human-readable description of the problem.
        message: String,
    },

    /// A substitution token or condition names a define that is neither local nor global.
    #[error("Shader {template}: undefined symbol @{symbol}")]
    UndefinedSymbol {
        /// The missing define name.
        symbol: String,
        /// Template that referenced it.
        template: String,
    },

    // ========================================================================
    // Backend Errors
    // ========================================================================
    /// The backend compiler rejected the generated source.
    #[error("Failed to compile {stage} shader {template}: {log}")]
    Compile {
        /// Template the source was generated from.
        template: String,
        /// Target pipeline stage.
        stage: ShaderStage,
        /// Backend diagnostic output.
        log: String,
    },

    /// The backend linker rejected a shader pairing.
    #[error("Failed to link program ({vertex} + {fragment}): {log}")]
    Link {
        /// Debug name of the vertex shader.
        vertex: String,
        /// Debug name of the fragment shader.
        fragment: String,
        /// Backend diagnostic output.
        log: String,
    },

    /// The stereo geometry shader could not be generated for a vertex shader.
    #[error("Failed to synthesize geometry shader for {vertex}: {message}")]
    Synthesis {
        /// Debug name of the vertex shader.
        vertex: String,
        /// Description of the failure.
        message: String,
    },
}

impl KilnError {
    /// Convenience constructor for [`KilnError::DirectiveParse`].
    pub fn parse(template: &str, line: usize, message: impl Into<String>) -> Self {
        Self::DirectiveParse {
            template: template.to_string(),
            line,
            message: message.into(),
        }
    }

    /// Convenience constructor for [`KilnError::UndefinedSymbol`].
    pub fn undefined(template: &str, symbol: &str) -> Self {
        Self::UndefinedSymbol {
            symbol: symbol.to_string(),
            template: template.to_string(),
        }
    }
}

/// Alias for `Result<T, KilnError>`.
pub type Result<T> = std::result::Result<T, KilnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_names_template_and_line() {
        let err = KilnError::parse("water.vert", 12, "@endforeach without @foreach");
        assert_eq!(
            err.to_string(),
            "Shader water.vert:12: @endforeach without @foreach"
        );
    }

    #[test]
    fn template_not_found_keeps_io_source() {
        let err = KilnError::TemplateNotFound {
            name: "missing.frag".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("missing.frag"));
    }
}
