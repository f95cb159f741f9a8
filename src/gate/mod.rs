// ABOUTME: Gate module — the orchestration layer that every tool invocation passes through.
// ABOUTME: State machine, policy evaluation, and the Gatekeeper facade.

pub mod gatekeeper;
pub mod policy;
pub mod state;

pub use gatekeeper::*;
pub use policy::*;
pub use state::*;
