//! Fitting.
//!
//! Responsibilities:
//!
//! - accumulate and solve the per-object normal equations (`accumulator`)
//! - run the simultaneous multi-epoch fit, one worker per object (`engine`)
//! - group exposures into nights (`nights`)
//! - collapse exposure fluxes into robust nightly fluxes (`night`)

pub mod accumulator;
pub mod engine;
pub mod night;
pub mod nights;

pub use accumulator::*;
pub use engine::*;
pub use night::*;
pub use nights::*;
