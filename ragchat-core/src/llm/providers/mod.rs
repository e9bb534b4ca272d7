//! Completion provider implementations

pub mod azure;

pub use azure::AzureOpenAIProvider;
