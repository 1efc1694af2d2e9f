pub mod cli;
pub mod emit;
pub mod run;
pub mod serve;
