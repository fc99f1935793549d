//! Model-based randomized tests against `BTreeMap`.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
extern crate std;

use std::collections::BTreeMap;
use std::vec::Vec;

use proptest::prelude::*;

use crate::{Rbt16, Rbt32};

/// Operations exercised against both the tree and the model. Keys come from
/// a small range so deletes and duplicate inserts actually collide.
#[derive(Debug, Clone)]
enum Action {
    Insert(u16, u32),
    Delete(u16),
    Get(u16),
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        (0u16..96, any::<u32>()).prop_map(|(key, value)| Action::Insert(key, value)),
        (0u16..96).prop_map(Action::Delete),
        (0u16..96).prop_map(Action::Get),
    ]
}

proptest! {
    #[test]
    fn matches_the_model(actions in proptest::collection::vec(action(), 1..300)) {
        // A tiny initial capacity forces growth along the way.
        let mut tree: Rbt32<u16, u32> = Rbt32::with_capacity(2).unwrap();
        let mut model: BTreeMap<u16, u32> = BTreeMap::new();
        for action in actions {
            match action {
                Action::Insert(key, value) => {
                    tree.insert(key, value).unwrap();
                    model.insert(key, value);
                }
                Action::Delete(key) => {
                    prop_assert_eq!(tree.delete(&key), model.remove(&key).is_some());
                }
                Action::Get(key) => {
                    prop_assert_eq!(tree.get(&key), model.get(&key));
                }
            }
            tree.check_invariants();
        }
        prop_assert_eq!(tree.len(), model.len());
        let collected: Vec<(u16, u32)> = tree.ordered_iter().map(|(key, value)| (*key, *value)).collect();
        let expected: Vec<(u16, u32)> = model.iter().map(|(key, value)| (*key, *value)).collect();
        prop_assert_eq!(collected, expected);
    }

    #[test]
    fn conditional_delete_agrees_with_retain(count in 1u32..400, modulus in 2u32..12) {
        // Sweeping the modulus crosses all three deletion strategies.
        let mut tree: Rbt32<u32, u32> = Rbt32::with_capacity(8).unwrap();
        let mut model: BTreeMap<u32, u32> = BTreeMap::new();
        for key in 0..count {
            let spread = key.wrapping_mul(2654435761) % 1024;
            tree.insert(spread, key).unwrap();
            model.insert(spread, key);
        }
        let before = tree.len() as u64;
        let deleted = tree.conditional_delete(|key, _| key % modulus == 0);
        model.retain(|key, _| key % modulus != 0);
        prop_assert_eq!(deleted, before - model.len() as u64);
        prop_assert_eq!(tree.len(), model.len());
        tree.check_invariants();
        let collected: Vec<u32> = tree.ordered_iter().map(|(key, _)| *key).collect();
        let expected: Vec<u32> = model.keys().copied().collect();
        prop_assert_eq!(collected, expected);
    }

    #[test]
    fn image_round_trips(keys in proptest::collection::btree_set(any::<u32>(), 0..80)) {
        let mut tree: Rbt32<u32, u64> = Rbt32::with_capacity(4).unwrap();
        for &key in &keys {
            tree.insert(key, u64::from(key) ^ 0xabcd).unwrap();
        }
        let image = tree.as_bytes().to_vec();
        let mut adopted: Rbt32<u32, u64> = Rbt32::with_capacity(1).unwrap();
        adopted.set_backing(&image).unwrap();
        adopted.check_invariants();
        prop_assert_eq!(adopted.len(), tree.len());
        let original: Vec<(u32, u64)> = tree.ordered_iter().map(|(key, value)| (*key, *value)).collect();
        let restored: Vec<(u32, u64)> = adopted.ordered_iter().map(|(key, value)| (*key, *value)).collect();
        prop_assert_eq!(restored, original);
    }

    #[test]
    fn transform_round_trips(keys in proptest::collection::btree_set(0u32..10_000, 0..120)) {
        let mut wide: Rbt32<u32, u32> = Rbt32::with_capacity(4).unwrap();
        for &key in &keys {
            wide.insert(key, key.wrapping_mul(7)).unwrap();
        }
        let mut narrow: Rbt16<u32, u32> = Rbt16::with_capacity(1).unwrap();
        narrow.transform(&wide).unwrap();
        narrow.check_invariants();
        let mut back: Rbt32<u32, u32> = Rbt32::with_capacity(1).unwrap();
        back.transform(&narrow).unwrap();
        back.check_invariants();
        let original: Vec<(u32, u32)> = wide.ordered_iter().map(|(key, value)| (*key, *value)).collect();
        let returned: Vec<(u32, u32)> = back.ordered_iter().map(|(key, value)| (*key, *value)).collect();
        prop_assert_eq!(returned, original);
    }
}
