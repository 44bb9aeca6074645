//! Element identifiers and feature selections.
//!
//! Selections live in session state with provenance, so a later command can
//! refer to "the selected holes" and the same staleness rules apply to them as
//! to the model itself.

pub mod naming;
pub use naming::*;

pub mod selection;
pub use selection::{FeatureSelection, Provenance, ResolutionReport, SelectionSet, SelectionSummary};

#[cfg(test)]
mod tests_selection;
