// ABOUTME: Library root for clawgate — a permission gate in front of agent tool calls.
// ABOUTME: The binary entry point is in main.rs, which uses this crate as a library.

pub mod approval;
pub mod audit;
pub mod config;
pub mod error;
pub mod gate;
pub mod logging;
pub mod permission;
pub mod registry;
pub mod risk;
