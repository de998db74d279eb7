pub mod archive;
pub mod catalog;
pub mod commands;
pub mod config;
pub mod dump;
pub mod git;
pub mod k8s;
pub mod notify;
pub mod pipeline;
pub mod sanitize;
pub mod snapshot;
pub mod telemetry;
#[cfg(test)]
pub mod test_utils;
pub mod yaml;
