// ABOUTME: Layered permission store — session rules, persisted rules, and category defaults.
// ABOUTME: The sensitive-path ceiling is applied after every lookup.

pub mod rules_file;
pub mod sensitive;
pub mod store;
pub mod types;

pub use rules_file::*;
pub use sensitive::*;
pub use store::*;
pub use types::*;
