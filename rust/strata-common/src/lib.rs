//! Core definitions (error taxonomy, result helpers, identifier aliases), relied upon
//! by all strata-* crates.

pub mod error;
pub mod ids;
pub mod macros;
pub mod result;

pub use result::Result;
