use arbtest::{arbitrary, arbtest};
use coppice::{ArrayMap, HashMap, HashSet, SortedMap, Vector};

#[derive(arbitrary::Arbitrary, Debug)]
enum MapOp {
    Insert(u8, u32),
    Remove(u8),
    Get(u8),
    Snapshot,
    Update(Vec<(u8, u32)>),
}

#[test]
fn hash_map_matches_oracle() {
    arbtest(|u| {
        let ops: Vec<MapOp> = u.arbitrary()?;
        let mut map = HashMap::new();
        let mut oracle = std::collections::HashMap::new();
        let mut snapshots: Vec<(HashMap<u8, u32>, std::collections::HashMap<u8, u32>)> = Vec::new();

        for op in &ops {
            match op {
                MapOp::Insert(key, value) => {
                    map = map.insert(*key, *value);
                    oracle.insert(*key, *value);
                }
                MapOp::Remove(key) => {
                    map = map.remove(key);
                    oracle.remove(key);
                }
                MapOp::Get(key) => {
                    assert_eq!(map.get(key), oracle.get(key));
                }
                MapOp::Snapshot => {
                    snapshots.push((map.clone(), oracle.clone()));
                }
                MapOp::Update(pairs) => {
                    map = map.update_from(pairs.iter().copied());
                    oracle.extend(pairs.iter().copied());
                }
            }
            map.check_invariants();
            assert_eq!(map.len(), oracle.len());
        }

        let rebuilt: std::collections::HashMap<u8, u32> =
            map.iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(rebuilt, oracle);

        // Earlier versions never observe later operations.
        for (snapshot, expected) in snapshots {
            snapshot.check_invariants();
            assert_eq!(snapshot.len(), expected.len());
            for (key, value) in &expected {
                assert_eq!(snapshot.get(key), Some(value));
            }
        }
        Ok(())
    });
}

#[derive(arbitrary::Arbitrary, Debug)]
enum SetOp {
    Insert(u8),
    Remove(u8),
    Contains(u8),
}

#[test]
fn hash_set_matches_oracle() {
    arbtest(|u| {
        let ops: Vec<SetOp> = u.arbitrary()?;
        let mut set = HashSet::new();
        let mut oracle = std::collections::HashSet::new();
        for op in &ops {
            match op {
                SetOp::Insert(value) => {
                    set = set.insert(*value);
                    oracle.insert(*value);
                }
                SetOp::Remove(value) => {
                    set = set.remove(value);
                    oracle.remove(value);
                }
                SetOp::Contains(value) => {
                    assert_eq!(set.contains(value), oracle.contains(value));
                }
            }
            set.check_invariants();
            assert_eq!(set.len(), oracle.len());
        }
        Ok(())
    });
}

#[test]
fn set_algebra_matches_oracle() {
    arbtest(|u| {
        let left: Vec<u8> = u.arbitrary()?;
        let right: Vec<u8> = u.arbitrary()?;
        let a: HashSet<u8> = left.iter().copied().collect();
        let b: HashSet<u8> = right.iter().copied().collect();
        let oa: std::collections::HashSet<u8> = left.iter().copied().collect();
        let ob: std::collections::HashSet<u8> = right.iter().copied().collect();

        let union: std::collections::HashSet<u8> = a.union(&b).iter().copied().collect();
        assert_eq!(union, oa.union(&ob).copied().collect());
        let inter: std::collections::HashSet<u8> = a.intersection(&b).iter().copied().collect();
        assert_eq!(inter, oa.intersection(&ob).copied().collect());
        let diff: std::collections::HashSet<u8> = a.difference(&b).iter().copied().collect();
        assert_eq!(diff, oa.difference(&ob).copied().collect());
        let sym: std::collections::HashSet<u8> =
            a.symmetric_difference(&b).iter().copied().collect();
        assert_eq!(sym, oa.symmetric_difference(&ob).copied().collect());

        assert_eq!(a.is_subset(&b), oa.is_subset(&ob));
        assert_eq!(a.is_superset(&b), oa.is_superset(&ob));
        assert_eq!(a.is_disjoint(&b), oa.is_disjoint(&ob));
        Ok(())
    });
}

#[derive(arbitrary::Arbitrary, Debug)]
enum VectorOp {
    Push(u32),
    Pop,
    Update(usize, u32),
    Snapshot,
    Slice(isize, isize),
}

#[test]
fn vector_matches_oracle() {
    arbtest(|u| {
        let ops: Vec<VectorOp> = u.arbitrary()?;
        let mut vector = Vector::new();
        let mut oracle: Vec<u32> = Vec::new();
        let mut snapshots: Vec<(Vector<u32>, Vec<u32>)> = Vec::new();

        for op in &ops {
            match op {
                VectorOp::Push(value) => {
                    vector = vector.push(*value);
                    oracle.push(*value);
                }
                VectorOp::Pop => {
                    match vector.pop() {
                        Ok(smaller) => {
                            assert!(oracle.pop().is_some());
                            vector = smaller;
                        }
                        Err(_) => assert!(oracle.is_empty()),
                    };
                }
                VectorOp::Update(index, value) => {
                    if oracle.is_empty() {
                        assert!(vector.update(*index, *value).is_err());
                    } else {
                        let index = index % oracle.len();
                        vector = vector.update(index, *value).unwrap();
                        oracle[index] = *value;
                    }
                }
                VectorOp::Snapshot => {
                    snapshots.push((vector.clone(), oracle.clone()));
                }
                VectorOp::Slice(start, end) => {
                    let sliced = vector.slice(*start, *end);
                    sliced.check_invariants();
                }
            }
            vector.check_invariants();
            assert_eq!(vector.len(), oracle.len());
        }

        let collected: Vec<u32> = vector.iter().copied().collect();
        assert_eq!(collected, oracle);
        for (index, value) in oracle.iter().enumerate() {
            assert_eq!(vector.get(index), Some(value));
        }

        for (snapshot, expected) in snapshots {
            let collected: Vec<u32> = snapshot.iter().copied().collect();
            assert_eq!(collected, expected);
        }
        Ok(())
    });
}

#[derive(arbitrary::Arbitrary, Debug)]
enum SortedOp {
    Insert(u8, u32),
    Remove(u8),
    Get(u8),
    Range(u8, u8),
}

#[test]
fn sorted_map_matches_oracle() {
    arbtest(|u| {
        let ops: Vec<SortedOp> = u.arbitrary()?;
        let mut map = SortedMap::new();
        let mut oracle = std::collections::BTreeMap::new();

        for op in &ops {
            match op {
                SortedOp::Insert(key, value) => {
                    map = map.insert(*key, *value);
                    oracle.insert(*key, *value);
                }
                SortedOp::Remove(key) => {
                    map = map.remove(key);
                    oracle.remove(key);
                }
                SortedOp::Get(key) => {
                    assert_eq!(map.get(key), oracle.get(key));
                }
                SortedOp::Range(a, b) => {
                    let (lo, hi) = if a <= b { (*a, *b) } else { (*b, *a) };
                    let expected: Vec<(u8, u32)> =
                        oracle.range(lo..hi).map(|(k, v)| (*k, *v)).collect();
                    let sub = map.range(&lo, &hi);
                    sub.check_invariants();
                    let got: Vec<(u8, u32)> = sub.iter().map(|(k, v)| (*k, *v)).collect();
                    assert_eq!(got, expected);
                    let mut rev: Vec<(u8, u32)> =
                        map.range_rev(&lo, &hi).map(|(k, v)| (*k, *v)).collect();
                    rev.reverse();
                    assert_eq!(rev, expected);
                }
            }
            map.check_invariants();
            assert_eq!(map.len(), oracle.len());
        }

        let collected: Vec<(u8, u32)> = map.iter().map(|(k, v)| (*k, *v)).collect();
        let expected: Vec<(u8, u32)> = oracle.iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(collected, expected);
        assert_eq!(
            map.first().map(|(k, v)| (*k, *v)),
            oracle.first_key_value().map(|(k, v)| (*k, *v))
        );
        assert_eq!(
            map.last().map(|(k, v)| (*k, *v)),
            oracle.last_key_value().map(|(k, v)| (*k, *v))
        );
        Ok(())
    });
}

#[derive(arbitrary::Arbitrary, Debug)]
enum ArrayOp {
    Insert(u8, u32),
    Remove(u8),
    Get(u8),
}

#[test]
fn array_map_matches_oracle() {
    arbtest(|u| {
        let ops: Vec<ArrayOp> = u.arbitrary()?;
        let mut map = ArrayMap::new();
        // The oracle is an association list, mirroring insertion order.
        let mut oracle: Vec<(u8, u32)> = Vec::new();

        for op in &ops {
            match op {
                ArrayOp::Insert(key, value) => {
                    match map.insert(*key, *value) {
                        Ok(next) => {
                            map = next;
                            match oracle.iter_mut().find(|(k, _)| k == key) {
                                Some(slot) => slot.1 = *value,
                                None => oracle.push((*key, *value)),
                            }
                        }
                        Err(_) => {
                            assert_eq!(oracle.len(), 8);
                            assert!(!oracle.iter().any(|(k, _)| k == key));
                        }
                    };
                }
                ArrayOp::Remove(key) => {
                    map = map.remove(key);
                    oracle.retain(|(k, _)| k != key);
                }
                ArrayOp::Get(key) => {
                    let expected = oracle.iter().find(|(k, _)| k == key).map(|(_, v)| v);
                    assert_eq!(map.get(key), expected);
                }
            }
            assert_eq!(map.len(), oracle.len());
            assert!(map.len() <= 8);
        }

        let collected: Vec<(u8, u32)> = map.iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(collected, oracle);
        Ok(())
    });
}
