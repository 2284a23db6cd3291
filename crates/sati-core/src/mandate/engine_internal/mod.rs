//! Implementation modules for `mandate::engine`.
//!
//! `src/mandate/engine.rs` is the stable facade; operation bodies live here.

pub(crate) mod drift;
pub(crate) mod lifecycle;
