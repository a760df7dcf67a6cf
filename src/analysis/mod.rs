//! Post-run analysis of emitted escalations.

pub mod aggregator;

pub use aggregator::*;
