#![forbid(unsafe_code)]

pub mod app;
pub mod assemble;
pub mod cli;
pub mod config;
pub mod details;
pub mod discover;
pub mod fetch;
pub mod formats;
pub mod images;
pub mod logging;
pub mod merge;
pub mod parse;
pub mod pool;
pub mod stage;
pub mod store;
