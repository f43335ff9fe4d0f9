//! Error types shared across the catalog-index crates.

use thiserror::Error;

/// Unified error type for configuration and domain validation.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CatalogError::Config("bad prefix".to_string());
        assert_eq!(err.to_string(), "Configuration error: bad prefix");

        let err = CatalogError::InvalidInput("empty container id".to_string());
        assert_eq!(err.to_string(), "Invalid input: empty container id");
    }
}
