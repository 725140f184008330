use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O failure: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("Environment variable {var} needs to be set")]
    MissingEnvironment { var: &'static str },

    #[error("Environment variable {var} has an invalid value: {value:?}")]
    InvalidEnvironment { var: &'static str, value: String },

    #[error("Cannot build a hierarchy out of an empty node list")]
    EmptyHierarchy,

    #[error("Branching factor must be at least 2, got {0}")]
    InvalidBranchingFactor(usize),

    #[error("Expected a {expected} response while {context}")]
    MissingResponse { expected: &'static str, context: String },

    #[error("Job inventory is inconsistent: {0}")]
    InconsistentInventory(String),

    #[error("Failed to discover the public IP address: {0}")]
    AddressDiscovery(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
