pub mod console;
pub mod tracing;

pub use console::{summarize_structured, ConsoleSink};
pub use self::tracing::TracingSink;
