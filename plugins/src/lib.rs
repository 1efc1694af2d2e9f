pub mod factory;
pub mod prompt;
pub mod runner;
pub mod sink;
