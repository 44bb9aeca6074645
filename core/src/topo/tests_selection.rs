use crate::ids::CommandId;
use crate::topo::naming::{ElementId, ElementKind, ElementRemap};
use crate::topo::selection::{FeatureSelection, Provenance, SelectionSet};

fn provenance(command: &str, version: u64) -> Provenance {
    Provenance {
        command_id: CommandId::new(command),
        tool: "select_holes".to_string(),
        version,
    }
}

/// Keeps the first `n` faces and shifts holes down by one; hole 0 is gone.
struct Renumbered(u32);

impl ElementRemap for Renumbered {
    fn remap(&self, id: &ElementId) -> Option<ElementId> {
        match id.kind {
            ElementKind::Face => (id.index < self.0).then_some(*id),
            ElementKind::Hole => id.index.checked_sub(1).map(ElementId::hole),
            _ => None,
        }
    }
}

#[test]
fn test_selection_dedups_and_keeps_order() {
    let selection = FeatureSelection::new(
        "holes",
        vec![ElementId::hole(3), ElementId::hole(1), ElementId::hole(3)],
        provenance("c1", 1),
    );
    assert_eq!(selection.elements, vec![ElementId::hole(3), ElementId::hole(1)]);
    assert_eq!(selection.indices_of(ElementKind::Hole), vec![3, 1]);
    assert!(selection.indices_of(ElementKind::Face).is_empty());
}

#[test]
fn test_insert_makes_selection_current() {
    let mut set = SelectionSet::new();
    set.insert(FeatureSelection::new("a", vec![ElementId::face(0)], provenance("c1", 1)));
    set.insert(FeatureSelection::new("b", vec![ElementId::face(1)], provenance("c2", 2)));

    assert_eq!(set.current_name(), Some("b"));
    assert_eq!(set.len(), 2);
    assert_eq!(set.current().unwrap().elements, vec![ElementId::face(1)]);
}

#[test]
fn test_overwrite_by_name() {
    let mut set = SelectionSet::new();
    set.insert(FeatureSelection::new("holes", vec![ElementId::hole(0)], provenance("c1", 1)));
    set.insert(FeatureSelection::new("holes", vec![ElementId::hole(2)], provenance("c2", 2)));

    assert_eq!(set.len(), 1);
    let holes = set.get("holes").unwrap();
    assert_eq!(holes.elements, vec![ElementId::hole(2)]);
    assert_eq!(holes.provenance.command_id, CommandId::new("c2"));
}

#[test]
fn test_remove_current_clears_pointer() {
    let mut set = SelectionSet::new();
    set.insert(FeatureSelection::new("a", vec![ElementId::face(0)], provenance("c1", 1)));
    assert!(set.remove("a"));
    assert!(set.current().is_none());
    assert!(!set.remove("a"));
}

#[test]
fn test_summaries_sorted_with_current_flag() {
    let mut set = SelectionSet::new();
    set.insert(FeatureSelection::new("zeta", vec![ElementId::face(0)], provenance("c1", 1)));
    set.insert(FeatureSelection::new(
        "alpha",
        vec![ElementId::edge(0), ElementId::face(2), ElementId::edge(4)],
        provenance("c2", 2),
    ));

    let summaries = set.summaries();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].name, "alpha");
    assert_eq!(summaries[0].count, 3);
    assert_eq!(summaries[0].kinds, vec![ElementKind::Edge, ElementKind::Face]);
    assert!(summaries[0].is_current);
    assert!(!summaries[1].is_current);
}

#[test]
fn test_carry_over_drops_missing_elements() {
    let mut set = SelectionSet::new();
    set.insert(FeatureSelection::new(
        "faces",
        vec![ElementId::face(0), ElementId::face(7), ElementId::face(2)],
        provenance("c1", 1),
    ));

    let report = set.carry_over(&Renumbered(5));

    assert_eq!(report.kept, vec![ElementId::face(0), ElementId::face(2)]);
    assert_eq!(report.lost, vec![("faces".to_string(), ElementId::face(7))]);
    assert_eq!(set.get("faces").unwrap().len(), 2);
}

#[test]
fn test_carry_over_follows_renumbered_ids() {
    let mut set = SelectionSet::new();
    set.insert(FeatureSelection::new(
        "holes",
        vec![ElementId::hole(0), ElementId::hole(2)],
        provenance("c1", 1),
    ));

    let report = set.carry_over(&Renumbered(0));

    assert_eq!(set.get("holes").unwrap().elements, vec![ElementId::hole(1)]);
    assert_eq!(report.lost, vec![("holes".to_string(), ElementId::hole(0))]);
}
