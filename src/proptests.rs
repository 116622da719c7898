use super::*;

use proptest::prelude::*;
use proptest_derive::Arbitrary;
use std::collections::BTreeMap;

type Map = CowTree<(u8, u32), ByKey>;

fn validate_tree<T, C: Comparator<T>>(t: &CowTree<T, C>) {
    if let Err(violation) = t.validate() {
        panic!("tree invariant violated: {violation}");
    }
}

fn key_of(t: &Map, key: u8) -> Index {
    t.find_by(|e| e.0.cmp(&key))
}

#[derive(Clone, Debug, Arbitrary)]
enum MapOp {
    #[proptest(weight = 8)]
    Insert(u8, u32),
    #[proptest(weight = 4)]
    Remove(u8),
    #[proptest(weight = 2)]
    EraseAt(u8),
    #[proptest(weight = 3)]
    Get(u8),
    #[proptest(weight = 2)]
    Replace(u8, u32),
    /// Clone the current tree and keep the clone as a snapshot.
    #[proptest(weight = 1)]
    Fork,
    #[proptest(weight = 1)]
    Reserve(u8),
    #[proptest(weight = 1)]
    EraseRange(u8, u8),
}

#[derive(Clone, Debug)]
enum MultiOp {
    Insert(u8),
    RemoveOne(u8),
    RemoveAll(u8),
    Count(u8),
}

fn multi_ops() -> impl Strategy<Value = Vec<MultiOp>> {
    let key = 0u8..16;
    let op = prop_oneof![
        50 => key.clone().prop_map(MultiOp::Insert),
        20 => key.clone().prop_map(MultiOp::RemoveOne),
        5 => key.clone().prop_map(MultiOp::RemoveAll),
        25 => key.prop_map(MultiOp::Count),
    ];
    prop::collection::vec(op, 0..=600)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_map_equivalence(ops in prop::collection::vec(any::<MapOp>(), 0..=800)) {
        let _ = env_logger::try_init();
        let mut t: Map = CowTree::new();
        let mut m: BTreeMap<u8, u32> = BTreeMap::new();
        let mut snapshots: Vec<(Map, BTreeMap<u8, u32>)> = Vec::new();

        for op in ops {
            match op {
                MapOp::Insert(k, v) => {
                    let (_, inserted) = t.insert_unique((k, v));
                    let expected = !m.contains_key(&k);
                    if expected {
                        m.insert(k, v);
                    }
                    prop_assert_eq!(inserted, expected);
                }
                MapOp::Remove(k) => {
                    let got = t.remove(&(k, 0)).map(|e| e.1);
                    prop_assert_eq!(got, m.remove(&k));
                }
                MapOp::EraseAt(k) => {
                    let at = t.lower_bound_by(|e| e.0.cmp(&k));
                    if at.is_end() {
                        prop_assert!(m.range(k..).next().is_none());
                        prop_assert_eq!(t.try_erase(&at), Err(TreeError::EndSentinel));
                    } else {
                        let key = t[&at].0;
                        let next = t.erase(&at);
                        m.remove(&key);
                        prop_assert_eq!(t.get(&next).map(|e| e.0), m.range(key..).next().map(|(k, _)| *k));
                    }
                }
                MapOp::Get(k) => {
                    let got = t.get(&key_of(&t, k)).map(|e| e.1);
                    prop_assert_eq!(got, m.get(&k).copied());
                }
                MapOp::Replace(k, v) => {
                    let at = key_of(&t, k);
                    if let Some(old) = m.get_mut(&k) {
                        let prev = t.replace(&at, (k, v));
                        prop_assert_eq!(prev.1, *old);
                        *old = v;
                    } else {
                        prop_assert!(at.is_end());
                    }
                }
                MapOp::Fork => {
                    snapshots.push((t.clone(), m.clone()));
                }
                MapOp::Reserve(n) => {
                    t.ensure_capacity(t.len() + n as usize);
                    prop_assert!(t.is_unique());
                    prop_assert!(t.capacity() >= t.len() + n as usize);
                }
                MapOp::EraseRange(a, b) => {
                    let (lo, hi) = (a.min(b), a.max(b));
                    let first = t.lower_bound_by(|e| e.0.cmp(&lo));
                    let last = t.lower_bound_by(|e| e.0.cmp(&hi));
                    t.erase_range(&first, &last);
                    m.retain(|k, _| !(lo..hi).contains(k));
                }
            }

            prop_assert_eq!(t.len(), m.len());
        }

        validate_tree(&t);
        let got: Vec<(u8, u32)> = t.iter().copied().collect();
        let expected: Vec<(u8, u32)> = m.iter().map(|(k, v)| (*k, *v)).collect();
        prop_assert_eq!(got, expected);

        // Writes after a fork never leak into the snapshot.
        for (snapshot, model) in &snapshots {
            validate_tree(snapshot);
            let got: Vec<(u8, u32)> = snapshot.iter().copied().collect();
            let expected: Vec<(u8, u32)> = model.iter().map(|(k, v)| (*k, *v)).collect();
            prop_assert_eq!(got, expected);
        }
    }

    #[test]
    fn prop_multi_equivalence(ops in multi_ops()) {
        let mut t: CowTree<(u8, u32), ByKey> = CowTree::new();
        let mut m: BTreeMap<u8, Vec<u32>> = BTreeMap::new();

        for (seq, op) in ops.into_iter().enumerate() {
            let seq = seq as u32;
            match op {
                MultiOp::Insert(k) => {
                    t.insert_multi((k, seq));
                    m.entry(k).or_default().push(seq);
                }
                MultiOp::RemoveOne(k) => {
                    let got = t.remove(&(k, 0)).map(|e| e.1);
                    let expected = match m.get_mut(&k) {
                        Some(seqs) if !seqs.is_empty() => Some(seqs.remove(0)),
                        _ => None,
                    };
                    prop_assert_eq!(got, expected);
                }
                MultiOp::RemoveAll(k) => {
                    let got = t.remove_all(&(k, 0));
                    let expected = m.remove(&k).map_or(0, |seqs| seqs.len());
                    prop_assert_eq!(got, expected);
                }
                MultiOp::Count(k) => {
                    let expected = m.get(&k).map_or(0, |seqs| seqs.len());
                    prop_assert_eq!(t.count(&(k, 0)), expected);
                }
            }
        }

        validate_tree(&t);
        // Equal keys stay in insertion order.
        let got: Vec<(u8, u32)> = t.iter().copied().collect();
        let expected: Vec<(u8, u32)> = m
            .iter()
            .flat_map(|(k, seqs)| seqs.iter().map(move |s| (*k, *s)))
            .collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_handles_survive_copy(
        keys in prop::collection::btree_set(any::<u16>(), 1..200),
        extra in any::<u16>(),
    ) {
        let mut t: CowTree<u16> = keys.iter().copied().collect();
        let handles: Vec<Index> = t.indices().collect();
        let alias = t.clone();

        let (_, inserted) = t.insert_unique(extra);
        prop_assert_eq!(inserted, !t.shares_buffer_with(&alias));
        if inserted {
            prop_assert_eq!(t.bucket_count(), 1);
        }
        for (handle, key) in handles.iter().zip(&keys) {
            prop_assert_eq!(alias.get(handle), Some(key));
            let fresh = t.revalidate(handle).unwrap();
            prop_assert_eq!(t.get(&fresh), Some(key));
        }
        validate_tree(&t);
        validate_tree(&alias);
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

#[test]
fn exhaustive_insert_order_small_set() {
    let keys: Vec<u32> = vec![10, 20, 30, 40, 50, 60, 70];

    for_each_permutation(&keys, |perm| {
        let mut t: CowTree<u32> = CowTree::new();
        for k in &perm {
            let (_, inserted) = t.insert_unique(*k);
            assert!(inserted);
            assert!(t.tree_invariant_holds_strict());
        }
        let got: Vec<u32> = t.iter().copied().collect();
        assert_eq!(got, keys);
        assert_eq!(t.get(&t.begin()), Some(&10));
    });
}

#[test]
fn exhaustive_remove_order_small_set() {
    let keys: Vec<u32> = vec![1, 2, 3, 4, 5, 6, 7];
    let base: CowTree<u32> = keys.iter().copied().collect();

    for_each_permutation(&keys, |perm| {
        let mut t = base.clone();
        let mut remaining = keys.clone();

        for k in perm {
            assert_eq!(t.remove(&k), Some(k));
            remaining.retain(|r| *r != k);
            validate_tree(&t);
            assert_eq!(t.iter().copied().collect::<Vec<_>>(), remaining);
        }
        assert!(t.is_empty());
        assert!(t.begin().is_end());
        // Every erased slot is back on the recycle list.
        assert_eq!(t.raw().recycled_len(), keys.len());
    });

    assert_eq!(base.len(), keys.len());
}
