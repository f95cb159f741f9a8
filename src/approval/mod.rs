// ABOUTME: Approval queue — operations deferred by the gate until a human or policy decides.
// ABOUTME: Per-session FIFO with batch resolution, expiry, and async waiters.

pub mod queue;

pub use queue::*;
