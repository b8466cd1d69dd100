//! Errors raised while tokenizing or parsing the LLM's XML dialect (§4.1,
//! §4.2). These never cross into `OrchestratorError` directly — the Session
//! Loop maps them onto `error`/`observation` steps per §7.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenizeError {
    #[error("unclosed tool block exceeded {0} bytes")]
    BlockTooLarge(usize),
    #[error("tool block nesting exceeds one level")]
    NestingTooDeep,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("tool block is empty")]
    EmptyBlock,
    #[error("unknown server: {0}")]
    UnknownServer(String),
    #[error("unknown action {1} on server {0}")]
    UnknownAction(String, String),
    #[error("missing required parameter {0}")]
    MissingParameter(String),
    #[error("malformed xml: {0}")]
    Malformed(String),
    #[error("placeholder {{results[{0}]}} on child {1} does not refer to an earlier sibling")]
    BadPlaceholder(usize, usize),
}
