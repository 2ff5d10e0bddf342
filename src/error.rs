use thiserror::Error;

use crate::construct::Variable;

#[derive(Error, Debug)]
pub enum LdfjoinError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Match store error: {0}")]
    Store(String),
    #[error("Match store did not answer within {millis} ms for {variable}")]
    StoreTimeout { variable: Variable, millis: u64 },
    #[error("Pattern node error: {0}")]
    Node(String),
    #[error("Fetch error: {0}")]
    Fetch(String),
    #[error("Request failed: {url} (status {status})")]
    RequestFailed { url: String, status: u16 },
    #[error("Request timed out: {url}")]
    Timeout { url: String },
    #[error("Cancelled")]
    Cancelled,
    #[error("Update of {variable} abandoned by {abandoned} node(s)")]
    UpdateAbandoned { variable: Variable, abandoned: usize },
    #[error("Unknown variable: {0}")]
    UnknownVariable(Variable),
    #[error("Internal invariant violated: {0}")]
    Invariant(String),
}

pub type Result<T> = std::result::Result<T, LdfjoinError>;

// Helper conversions
impl From<config::ConfigError> for LdfjoinError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
impl From<reqwest::Error> for LdfjoinError {
    fn from(e: reqwest::Error) -> Self { Self::Fetch(e.to_string()) }
}
