//! Core domain types for the signing service.

mod types;

pub use types::*;
