//! Error types and handling for the caravanes pipeline

use thiserror::Error;

/// Main error type for the caravanes pipeline
#[derive(Error, Debug)]
pub enum CaravaneError {
    /// Transport-level failure while querying the geocoding service
    #[error("Geocoding lookup failed for '{town}': {message}")]
    LookupFailed { town: String, message: String },

    /// The geocoding service returned zero candidates
    #[error("No geocoding match found for '{town}'")]
    NoMatchFound { town: String },

    /// An itinerary references a town with no geocoded feature
    #[error("Itinerary '{itinerary}' references unresolved town '{town}'")]
    UnresolvedTown { itinerary: String, town: String },

    /// Itinerary or boundary data is missing required fields
    #[error("Malformed input: {message}")]
    MalformedInput { message: String },

    /// An external geospatial tool failed to run or exited non-zero
    #[error("External tool '{tool}' failed: {message}")]
    ExternalTool { tool: String, message: String },

    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Cache operation errors
    #[error("Cache error: {message}")]
    Cache { message: String },

    /// I/O operation errors
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl CaravaneError {
    /// Create a new lookup error
    pub fn lookup_failed<T: Into<String>, S: Into<String>>(town: T, message: S) -> Self {
        Self::LookupFailed {
            town: town.into(),
            message: message.into(),
        }
    }

    /// Create a new no-match error
    pub fn no_match<T: Into<String>>(town: T) -> Self {
        Self::NoMatchFound { town: town.into() }
    }

    /// Create a new unresolved-town error
    pub fn unresolved<I: Into<String>, T: Into<String>>(itinerary: I, town: T) -> Self {
        Self::UnresolvedTown {
            itinerary: itinerary.into(),
            town: town.into(),
        }
    }

    /// Create a new malformed-input error
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self::MalformedInput {
            message: message.into(),
        }
    }

    /// Create a new external tool error
    pub fn external_tool<T: Into<String>, S: Into<String>>(tool: T, message: S) -> Self {
        Self::ExternalTool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new cache error
    pub fn cache<S: Into<String>>(message: S) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// Whether retrying the same operation later could succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::LookupFailed { .. })
    }

    /// Get a user-friendly error message
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            CaravaneError::LookupFailed { town, .. } => format!(
                "Unable to reach the geocoding service for '{town}'. Please check your internet connection."
            ),
            CaravaneError::NoMatchFound { town } => {
                format!("The town '{town}' could not be found. Please check its spelling in the itineraries.")
            }
            CaravaneError::UnresolvedTown { itinerary, town } => {
                format!("Itinerary '{itinerary}' cannot be built because '{town}' was not geocoded.")
            }
            CaravaneError::MalformedInput { message } => format!("Invalid input: {message}"),
            CaravaneError::ExternalTool { tool, .. } => format!(
                "The '{tool}' tool failed. Make sure it is installed (npm install) and on the tool path."
            ),
            CaravaneError::Config { .. } => {
                "Configuration error. Please check your caravanes.toml and CARAVANES_* variables."
                    .to_string()
            }
            CaravaneError::Cache { .. } => {
                "Cache operation failed. You may need to delete the cache directory.".to_string()
            }
            CaravaneError::Io { .. } => {
                "File operation failed. Please check file permissions.".to_string()
            }
        }
    }
}

impl From<serde_json::Error> for CaravaneError {
    fn from(err: serde_json::Error) -> Self {
        CaravaneError::malformed(err.to_string())
    }
}
