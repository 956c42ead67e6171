pub mod orchestrator;
pub mod target;
