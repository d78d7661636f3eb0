use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Session lifecycle error: {0}")]
    SessionLifecycle(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Tool error: {0}")]
    Tool(#[from] sauti_tools::ToolError),
    #[error("Resource error: {0}")]
    Resource(String),
}
