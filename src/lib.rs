//! Vision-driven browser workflow: a computer-use model looks at screenshots,
//! the agent turns its replies into clicks and keystrokes, and the per-result
//! descriptions are compiled into a trends report.

pub mod actions;
pub mod blocklist;
pub mod brain;
pub mod compiler;
pub mod config;
pub mod confirm;
pub mod hands;
pub mod parsers;
pub mod report;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use actions::ActionHandler;
pub use blocklist::Blocklist;
pub use brain::{Brain, Model};
pub use compiler::{Compilation, Compiler, CompilerEvent};
pub use config::{Config, Pacing};
pub use confirm::ConfirmationLoop;
pub use hands::{BrowserOptions, BrowserSession, Driver};
pub use types::{
    Action, ActionDescriptor, BoundingBox, ImageAnalysis, InputMessage, InputPart, Point,
    ResponseItem, Screenshot, WorkflowState,
};

/// Result type for agent operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the agent's components.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("missing required configuration: {}", .0.join(", "))]
    MissingConfig(Vec<&'static str>),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("{action} action missing argument '{argument}'")]
    MissingArgument {
        action: &'static str,
        argument: &'static str,
    },

    #[error("blocked URL: {0}")]
    Blocklisted(String),

    #[error("no active page")]
    NoActivePage,
}
