pub mod cli;
pub mod commands;
pub mod http;
pub mod logging;
pub mod shutdown;
