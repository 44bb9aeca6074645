use super::naming::{ElementId, ElementKind, ElementRemap};
use crate::ids::{CommandId, StateVersion};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Which command produced a selection, and at which committed version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub command_id: CommandId,
    pub tool: String,
    /// Version the selection was committed at. For query results that are never
    /// committed this is the version the query ran against.
    pub version: StateVersion,
}

/// Named, ordered set of element ids produced by a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSelection {
    pub name: String,
    pub elements: Vec<ElementId>,
    pub provenance: Provenance,
}

impl FeatureSelection {
    /// Builds a selection, dropping duplicate ids while keeping first-seen order.
    pub fn new(name: impl Into<String>, elements: impl IntoIterator<Item = ElementId>, provenance: Provenance) -> Self {
        let mut seen = HashSet::new();
        let elements = elements.into_iter().filter(|id| seen.insert(*id)).collect();
        Self {
            name: name.into(),
            elements,
            provenance,
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn contains(&self, id: &ElementId) -> bool {
        self.elements.contains(id)
    }

    /// Element indices of one kind, in selection order.
    pub fn indices_of(&self, kind: ElementKind) -> Vec<u32> {
        self.elements
            .iter()
            .filter(|id| id.kind == kind)
            .map(|id| id.index)
            .collect()
    }
}

/// Short description of a stored selection, as handed to intent resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionSummary {
    pub name: String,
    pub count: usize,
    pub kinds: Vec<ElementKind>,
    pub is_current: bool,
    pub produced_by: CommandId,
    pub version: StateVersion,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionReport {
    /// Ids as they are named in the new model.
    pub kept: Vec<ElementId>,
    /// Old ids with no counterpart in the new model, per selection name.
    pub lost: Vec<(String, ElementId)>,
}

/// All named selections of a session, plus which one is current.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionSet {
    selections: BTreeMap<String, FeatureSelection>,
    current: Option<String>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a selection under its name, overwriting any previous one, and
    /// makes it the current selection.
    pub fn insert(&mut self, selection: FeatureSelection) {
        self.current = Some(selection.name.clone());
        self.selections.insert(selection.name.clone(), selection);
    }

    pub fn get(&self, name: &str) -> Option<&FeatureSelection> {
        self.selections.get(name)
    }

    pub fn current(&self) -> Option<&FeatureSelection> {
        self.current.as_deref().and_then(|name| self.selections.get(name))
    }

    pub fn current_name(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Removes a named selection. Returns true if it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        let removed = self.selections.remove(name).is_some();
        if removed && self.current.as_deref() == Some(name) {
            self.current = None;
        }
        removed
    }

    pub fn clear(&mut self) {
        self.selections.clear();
        self.current = None;
    }

    pub fn len(&self) -> usize {
        self.selections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeatureSelection> {
        self.selections.values()
    }

    /// Lists all selections sorted by name.
    pub fn summaries(&self) -> Vec<SelectionSummary> {
        self.selections
            .values()
            .map(|selection| {
                let mut kinds: Vec<ElementKind> = selection.elements.iter().map(|id| id.kind).collect();
                kinds.sort();
                kinds.dedup();
                SelectionSummary {
                    name: selection.name.clone(),
                    count: selection.len(),
                    kinds,
                    is_current: self.current.as_deref() == Some(selection.name.as_str()),
                    produced_by: selection.provenance.command_id.clone(),
                    version: selection.provenance.version,
                }
            })
            .collect()
    }

    /// Rewrites every stored id through `remap` and drops the ones that did
    /// not survive. Selections left empty are kept (they still record that the
    /// query matched nothing that survives).
    pub fn carry_over(&mut self, remap: &impl ElementRemap) -> ResolutionReport {
        let mut report = ResolutionReport::default();
        for selection in self.selections.values_mut() {
            let mut kept = Vec::with_capacity(selection.elements.len());
            for id in selection.elements.drain(..) {
                match remap.remap(&id) {
                    Some(new_id) => {
                        report.kept.push(new_id);
                        kept.push(new_id);
                    }
                    None => report.lost.push((selection.name.clone(), id)),
                }
            }
            selection.elements = kept;
        }
        report
    }
}
