//!
//! Errors which can stop relish from starting or serving
//!

#[derive(Debug, thiserror::Error)]
pub enum RelishError {
    #[error("failed to load settings: {0}")]
    Settings(#[from] config::ConfigError),
    #[error("failed to set up metrics: {0}")]
    Metrics(String),
    #[error("failed to install the interrupt handler: {0}")]
    Signal(#[from] ctrlc::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
