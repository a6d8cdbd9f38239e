pub mod candidates;
pub mod config;
pub mod dataset;
pub mod errors;
pub mod orchestrator;
pub mod report;
pub mod sandbox;
pub mod verdict;
