//! nestlog core: log and prompt tunneling between nested processes and a remote viewer.

pub mod api;
pub mod config;
pub mod error;
pub mod frame;
pub mod headless;
pub mod prompt;
pub mod protocol;
pub mod sink;
pub mod tunnel;
