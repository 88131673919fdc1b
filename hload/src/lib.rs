pub mod cfg;
pub mod client;
pub mod cmd;
pub mod engine;
pub mod logging;
pub mod report;
pub mod runtime;
pub mod stat;
