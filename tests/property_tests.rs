//! Property-based tests for core domain types.
//!
//! These tests use proptest to verify invariants hold across
//! randomly generated inputs.

use std::collections::BTreeSet;

use proptest::prelude::*;

use sitestage::core::index::PathIndex;
use sitestage::core::naming::{next_free_name, suffixed, validate_name, DISALLOWED_CHARS};
use sitestage::core::tree::{NewNode, Tree};
use sitestage::core::types::{NodeId, NodeKind, NodeName, RelPath};

/// Strategy for generating valid name characters.
fn name_char() -> impl Strategy<Value = char> {
    prop_oneof![
        prop::char::range('a', 'z'),
        prop::char::range('A', 'Z'),
        prop::char::range('0', '9'),
        Just('-'),
        Just('_'),
        Just(' '),
    ]
}

/// Strategy for generating valid node names.
fn valid_name() -> impl Strategy<Value = String> {
    prop::collection::vec(name_char(), 1..20)
        .prop_map(|chars| chars.into_iter().collect::<String>())
        .prop_filter("must not be blank", |n| !n.trim().is_empty())
}

/// Strategy for generating paths from a small alphabet, so that generated
/// paths often share prefixes.
fn small_path() -> impl Strategy<Value = RelPath> {
    prop::collection::vec(prop::sample::select(vec!["a", "b", "c"]), 0..4).prop_map(|segments| {
        RelPath::from_segments(
            segments
                .into_iter()
                .map(|s| NodeName::new(s).unwrap())
                .collect(),
        )
    })
}

proptest! {
    /// Any valid name is accepted by both the validator and NodeName.
    #[test]
    fn valid_names_accepted(name in valid_name()) {
        prop_assert!(validate_name(&name).is_ok());
        prop_assert!(NodeName::new(name).is_ok());
    }

    /// A disallowed character anywhere in the name is rejected.
    #[test]
    fn disallowed_char_rejected(
        prefix in valid_name(),
        suffix in valid_name(),
        bad in prop::sample::select(DISALLOWED_CHARS.to_vec()),
    ) {
        let name = format!("{prefix}{bad}{suffix}");
        prop_assert!(validate_name(&name).is_err());
    }

    /// Percent-encoded disallowed characters are rejected in any case.
    #[test]
    fn encoded_char_rejected(
        prefix in valid_name(),
        bad in prop::sample::select(DISALLOWED_CHARS.to_vec()),
        lower in any::<bool>(),
    ) {
        let encoded = format!("%{:02X}", bad as u32);
        let encoded = if lower { encoded.to_lowercase() } else { encoded };
        let name = format!("{prefix}{encoded}");
        prop_assert!(validate_name(&name).is_err());
    }

    /// The chosen name is never one that is taken.
    #[test]
    fn free_name_never_taken(
        base in valid_name(),
        taken_suffixes in prop::collection::btree_set(0u32..12, 0..12),
    ) {
        let taken: BTreeSet<String> = taken_suffixes
            .iter()
            .map(|n| if *n == 0 { base.clone() } else { suffixed(&base, *n) })
            .collect();
        let name = next_free_name(&base, |n| taken.contains(n), 100).unwrap();
        prop_assert!(!taken.contains(&name));
    }

    /// A free base name is returned unchanged.
    #[test]
    fn free_base_returned(base in valid_name()) {
        let name = next_free_name(&base, |_| false, 100);
        prop_assert_eq!(name, Some(base));
    }

    /// With base, base-1 .. base-k taken, the next name is base-(k+1).
    #[test]
    fn free_name_is_sequential(base in valid_name(), k in 0u32..20) {
        let taken: BTreeSet<String> = std::iter::once(base.clone())
            .chain((1..=k).map(|n| suffixed(&base, n)))
            .collect();
        let name = next_free_name(&base, |n| taken.contains(n), 100);
        prop_assert_eq!(name, Some(suffixed(&base, k + 1)));
    }

    /// Parsing the display form of a path gives the same path.
    #[test]
    fn rel_path_display_roundtrip(segments in prop::collection::vec(valid_name(), 0..6)) {
        let path = RelPath::from_segments(
            segments.iter().map(|s| NodeName::new(s.as_str()).unwrap()).collect(),
        );
        let parsed = RelPath::parse(&path.to_string()).unwrap();
        prop_assert_eq!(parsed, path);
    }

    /// Index descendants are exactly the proper descendants by prefix.
    #[test]
    fn index_descendants_match_prefix(
        paths in prop::collection::btree_set(small_path(), 0..20),
        query in small_path(),
    ) {
        let mut index = PathIndex::new();
        for path in &paths {
            index.insert(path.clone(), NodeId::new());
        }

        let found: BTreeSet<RelPath> = index
            .descendants(&query)
            .map(|(p, _)| p.clone())
            .collect();
        let expected: BTreeSet<RelPath> = paths
            .iter()
            .filter(|p| query.is_ancestor_of(p))
            .cloned()
            .collect();
        prop_assert_eq!(found, expected);
    }

    /// Removing a subtree from the index leaves no path under it.
    #[test]
    fn index_remove_subtree_is_complete(
        paths in prop::collection::btree_set(small_path(), 0..20),
        query in small_path(),
    ) {
        let mut index = PathIndex::new();
        for path in &paths {
            index.insert(path.clone(), NodeId::new());
        }
        let removed = index.remove_subtree(&query);

        prop_assert!(index.iter().all(|(p, _)| !p.starts_with(&query)));
        prop_assert_eq!(removed.len() + index.len(), paths.len());
    }

    /// Trees built from the same paths hash the same, whatever their ids.
    #[test]
    fn fingerprint_ignores_ids(paths in prop::collection::btree_set(small_path(), 0..12)) {
        let build = || {
            let mut tree = Tree::new();
            for path in &paths {
                tree.ensure_path(path).unwrap();
            }
            tree
        };
        let (first, second) = (build(), build());
        prop_assert_ne!(first.root_id(), second.root_id());
        prop_assert_eq!(first.fingerprint(), second.fingerprint());
    }
}

#[test]
fn fingerprint_sees_kind_changes() {
    let mut tree = Tree::new();
    let root = tree.root_id();
    let id = tree
        .add_child(root, NewNode::new(NodeName::new("a").unwrap(), NodeKind::Folder), None)
        .unwrap();
    let before = tree.fingerprint();
    tree.replace_content(id, NodeKind::Page, Default::default())
        .unwrap();
    assert_ne!(tree.fingerprint(), before);
}
