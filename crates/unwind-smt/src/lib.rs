#![doc = include_str!("../README.md")]

//! Term language, solver backends, and the interpolating oracle used by
//! the unwinding engine to check candidate error paths and to refine
//! vertex labels when a path is infeasible.

pub mod backends;
pub mod interpolation;
pub mod oracle;
pub mod solver;
pub mod sorts;
pub mod terms;
