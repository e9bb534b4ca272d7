//! Error types for ragchat operations

/// Result type for ragchat operations
pub type Result<T> = std::result::Result<T, RagError>;

/// Error types for the retrieval-augmented chat pipeline
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    /// Missing or invalid setting; aborts startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The system prompt, tool schema and new user content alone exceed the ceiling
    #[error("Token budget exceeded: {required} tokens required, limit is {limit}")]
    BudgetExceeded { required: usize, limit: usize },

    /// Malformed JSON arguments in a single tool invocation
    #[error("Invalid arguments for tool '{function}': {source}")]
    ToolArgumentParse {
        function: String,
        #[source]
        source: serde_json::Error,
    },

    /// Search service call failed or was unreachable
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// Completion service call failed
    #[error("Completion error: {0}")]
    Completion(String),

    /// Completion service returned no usable content
    #[error("Empty completion: {0}")]
    EmptyCompletion(String),

    /// Console input failed
    #[error("Input error: {0}")]
    Input(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for RagError {
    fn from(err: figment::Error) -> Self {
        RagError::Configuration(err.to_string())
    }
}
