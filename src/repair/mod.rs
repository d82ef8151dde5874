pub mod compat;
pub mod extract;
pub mod orchestrator;
pub mod patcher;
pub mod syntax;
