//! Plugins built purely on the public hook contract

mod logger;

pub use logger::LoggerPlugin;
