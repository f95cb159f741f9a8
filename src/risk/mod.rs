// ABOUTME: Risk classification — command analysis, the ordered rule table, and the classifier.
// ABOUTME: Pure and stateless; every input string yields a Classification.

pub mod analysis;
pub mod classifier;
pub mod rules;
pub mod types;

pub use analysis::*;
pub use classifier::*;
pub use rules::*;
pub use types::*;
