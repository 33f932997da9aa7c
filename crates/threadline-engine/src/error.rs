//! Threadline — start-up error types.

use thiserror::Error;

/// Errors that stop the host binary before the engine runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable holds a value that cannot be used.
    #[error("invalid {var}={value:?}: {reason}")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The story graph file could not be read.
    #[error("cannot read story graph {path}: {source}")]
    StoryRead {
        /// File path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The story graph is malformed.
    #[error("invalid story graph: {0}")]
    StoryFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_message_names_variable_and_value() {
        let err = ConfigError::Invalid {
            var: "THREADLINE_REOPEN_SECONDS",
            value: "soon".into(),
            reason: "not a number".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid THREADLINE_REOPEN_SECONDS=\"soon\": not a number"
        );
    }
}
