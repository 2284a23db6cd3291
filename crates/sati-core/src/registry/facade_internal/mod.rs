//! Implementation modules for `registry::facade`.

pub(crate) mod feedback;
pub(crate) mod mandates;
