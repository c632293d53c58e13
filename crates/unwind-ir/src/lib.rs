#![doc = include_str!("../README.md")]

//! Program representation for the unwind verifier.
//!
//! This crate defines the statement language, the control-flow graph
//! provider consumed by the unwinding engine, and the unit classification
//! policy that marks error, source, and sink units.

pub mod cfg;
pub mod policy;
#[cfg(any(test, feature = "proptest"))]
pub mod proptest_generators;
pub mod statement;
