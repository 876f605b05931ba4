pub mod assistant;
pub mod batch;
pub mod clock;
pub mod config;
pub mod dataset;
pub mod error;
pub mod jobs;
pub mod lifecycle;
pub mod pipeline;
pub mod publish;
pub mod service;
pub mod terminal;

#[cfg(test)]
pub mod testing;
