#![doc = include_str!("../README.md")]

//! Unwinding engine of the verifier.
//!
//! The engine unwinds a procedure's control-flow graph backward from its
//! return point, checks each path that reaches the procedure entry through
//! an error unit, and uses interpolants from infeasible paths to label and
//! cover vertices so that the unwinding terminates.

pub mod cover;
pub mod encoder;
pub mod graph;
pub mod registry;
pub mod result;
pub mod session;
pub mod visualization;
