//! Error types for the Skein graph engine.
//!
//! This module provides the error taxonomy for the whole engine lifecycle:
//! graph construction, provider resolution, evaluation, plugin calls, and
//! cancellation.

use thiserror::Error;

use crate::diag::Diagnostics;

/// The main error type for the Skein engine.
#[derive(Debug, Error)]
pub enum SkeinError {
    /// Static problems in the configuration tree, produced by transformers.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration problem.
        message: String,
        /// Canonical address of the offending object, if known.
        address: Option<String>,
    },

    /// An address or reference could not be resolved.
    #[error("Resolution error: {message}")]
    Resolution {
        /// Description of what failed to resolve.
        message: String,
        /// Canonical address of the consumer that required the resolution.
        consumer: Option<String>,
    },

    /// The final graph contains one or more cycles.
    #[error("Cycle in dependency graph: {}", cycles.join("; "))]
    Cycle {
        /// One entry per cycle, listing the member vertex names.
        cycles: Vec<String>,
    },

    /// Schema violation or provider-reported invalidity.
    #[error("Validation failed: {0}")]
    Validation(Diagnostics),

    /// Plugin call failure, protocol mismatch, or provider-reported
    /// runtime error.
    #[error("Provider plugin error: {message}")]
    Plugin {
        /// Description of the plugin failure.
        message: String,
        /// Name of the plugin that failed.
        plugin: String,
    },

    /// Expression evaluation failure.
    #[error("Evaluation error: {0}")]
    Eval(Diagnostics),

    /// The stop signal was observed; the walk wound down cooperatively.
    #[error("Operation canceled")]
    Canceled,

    /// Invariant violation; should be reported as a bug.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, SkeinError>;

impl SkeinError {
    /// Creates a configuration error without a subject address.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            address: None,
        }
    }

    /// Creates a resolution error naming the consumer that needed it.
    #[must_use]
    pub fn resolution(message: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self::Resolution {
            message: message.into(),
            consumer: Some(consumer.into()),
        }
    }

    /// Creates a plugin error for the named plugin.
    #[must_use]
    pub fn plugin(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Plugin {
            message: message.into(),
            plugin: plugin.into(),
        }
    }

    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error came from the cooperative stop signal.
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Converts this error into a diagnostics bundle with a single error
    /// entry, preserving existing bundles where the variant carries one.
    #[must_use]
    pub fn into_diagnostics(self) -> Diagnostics {
        use crate::diag::Diagnostic;
        match self {
            Self::Validation(diags) | Self::Eval(diags) => diags,
            Self::Resolution {
                ref message,
                ref consumer,
            } => {
                let mut diag = Diagnostic::error(message.clone());
                if let Some(consumer) = consumer {
                    diag = diag.with_subject(consumer.clone());
                }
                diag.into()
            }
            other => Diagnostic::error(other.to_string()).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::Diagnostic;

    #[test]
    fn test_cycle_error_lists_members() {
        let err = SkeinError::Cycle {
            cycles: vec![String::from("p_thing.a, p_thing.b")],
        };
        let rendered = err.to_string();
        assert!(rendered.contains("p_thing.a"));
        assert!(rendered.contains("p_thing.b"));
    }

    #[test]
    fn test_resolution_into_diagnostics_keeps_consumer() {
        let err = SkeinError::resolution("provider.p couldn't be found", "module.m.p_thing.a");
        let diags = err.into_diagnostics();
        let diag = diags.iter().next().expect("one diagnostic");
        assert_eq!(diag.subject.as_deref(), Some("module.m.p_thing.a"));
    }

    #[test]
    fn test_validation_round_trips_bundle() {
        let bundle = Diagnostics::from(Diagnostic::error("bad attribute"));
        let err = SkeinError::Validation(bundle.clone());
        assert_eq!(err.into_diagnostics(), bundle);
    }
}
