#[allow(clippy::module_inception)]
pub mod error;
pub mod tunnel;

pub use error::{CliError, ConfigError};
pub use tunnel::{TunnelError, TunnelErrorKind};
