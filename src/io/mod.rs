//! Input/output helpers.
//!
//! - light-file parsing (`lightfile`)
//! - whitespace dictionary tables (`dictfile`)
//! - matrix artifacts, JSON and text (`matrix`)
//! - per-object fit outputs (`export`)
//! - per-night aggregation inputs and outputs (`nightfile`)

pub mod dictfile;
pub mod export;
pub mod lightfile;
pub mod matrix;
pub mod nightfile;

pub use dictfile::*;
pub use export::*;
pub use lightfile::*;
pub use matrix::*;
pub use nightfile::*;
