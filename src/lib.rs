#![forbid(unsafe_code)]

pub mod catalog;
pub mod classify;
pub mod cli;
pub mod config;
pub mod discover;
pub mod fetch;
pub mod formats;
pub mod logging;
pub mod matcher;
pub mod media;
pub mod merge;
pub mod normalize;
pub mod pipeline;
pub mod store;
