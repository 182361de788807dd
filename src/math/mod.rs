//! Mathematical utilities: dense solvers and matrix surgery.

pub mod linalg;

pub use linalg::*;
