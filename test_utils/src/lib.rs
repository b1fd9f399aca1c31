//! Shared helpers for property-based tests of the rewriter.

pub mod ir;
