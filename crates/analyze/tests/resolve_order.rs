//! Emission-order scenarios over the public API.

use std::collections::BTreeMap;

use sprocket_analyze::{resolve_order, ResolveError};
use sprocket_core::EntityDef;

fn entity(name: &str, references: &[&str]) -> EntityDef {
    EntityDef {
        name: name.to_string(),
        schema: "crm".to_string(),
        fields: BTreeMap::new(),
        references: references.iter().map(|r| r.to_string()).collect(),
    }
}

#[test]
fn test_chain_resolves_dependencies_first() {
    // C depends on B depends on A.
    let entities = vec![
        entity("C", &["B"]),
        entity("B", &["A"]),
        entity("A", &[]),
    ];
    assert_eq!(resolve_order(&entities).unwrap(), vec!["A", "B", "C"]);
}

#[test]
fn test_cycle_names_both_nodes() {
    let entities = vec![entity("A", &["B"]), entity("B", &["A"])];
    let err = resolve_order(&entities).unwrap_err();
    match err {
        ResolveError::CyclicDependency { cycle } => {
            assert_eq!(cycle.first(), cycle.last());
            assert!(cycle.contains(&"A".to_string()));
            assert!(cycle.contains(&"B".to_string()));
        }
    }
}

#[test]
fn test_diamond_is_name_ordered_within_ties() {
    let entities = vec![
        entity("Zeta", &["Base"]),
        entity("Alpha", &["Base"]),
        entity("Base", &[]),
        entity("Top", &["Alpha", "Zeta"]),
    ];
    assert_eq!(
        resolve_order(&entities).unwrap(),
        vec!["Base", "Alpha", "Zeta", "Top"]
    );
}
