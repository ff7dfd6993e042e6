//! Bottom-up bulk construction for the hash map.
//!
//! Building a large map by repeated `insert` pays a full root-to-leaf path
//! copy per entry. The bulk builder instead hashes every entry once,
//! partitions the entry list by hash chunk level by level, and materializes
//! each node exactly once. Transient build nodes live in a typed arena:
//! `bumpalo`-style bump allocation would be a fit for speed, but build nodes
//! own entry handles and slot vectors that must be dropped, and
//! `typed-arena` runs destructors where a plain bump allocator does not. The
//! finished tree is cloned onto the heap (entry handles are shared, not
//! copied) and the whole arena is released at once; nothing allocated in it
//! escapes.

use std::hash::Hash;
use std::sync::Arc;

use imbl_sized_chunks::Chunk;
use typed_arena::Arena;

use crate::hash_map::{hash_of, Node, Slot, HASH_BITS, HASH_MASK, MAX_SHIFT, NODE_SIZE};
use crate::Entry;

enum BuildSlot<'a, K, V> {
    Item(Arc<Entry<K, V>>),
    Child(&'a BuildNode<'a, K, V>),
}

enum BuildNode<'a, K, V> {
    Bitmap {
        bitmap: u32,
        slots: Vec<BuildSlot<'a, K, V>>,
    },
    Collision {
        hash: u64,
        entries: Vec<Arc<Entry<K, V>>>,
    },
}

/// Builds a trie from owned pairs; later pairs win on duplicate keys.
pub(crate) fn from_pairs<K, V>(pairs: Vec<(K, V)>) -> (Option<Arc<Node<K, V>>>, usize)
where
    K: Hash + Eq,
{
    let hashed = pairs
        .into_iter()
        .map(|(key, value)| (hash_of(&key), Arc::new(Entry { key, value })))
        .collect();
    let entries = dedup_last_wins(hashed);
    let count = entries.len();
    if count == 0 {
        return (None, 0);
    }
    if count == 1 {
        let (hash, entry) = entries.into_iter().next().expect("one entry");
        let root = Node::Bitmap {
            bitmap: 1 << ((hash & HASH_MASK) as u32),
            slots: Chunk::unit(Slot::Item(entry)),
        };
        return (Some(Arc::new(root)), 1);
    }

    let arena = Arena::new();
    let built = build_node(&arena, entries, 0);
    let root = Arc::new(reify(built));
    (Some(root), count)
}

/// Drops all but the last occurrence of each key. Equal keys hash equally, so
/// a stable sort by hash brings candidates together and the scan over each
/// equal-hash run stays short.
fn dedup_last_wins<K, V>(mut entries: Vec<(u64, Arc<Entry<K, V>>)>) -> Vec<(u64, Arc<Entry<K, V>>)>
where
    K: Eq,
{
    entries.sort_by_key(|(hash, _)| *hash);
    let mut deduped: Vec<(u64, Arc<Entry<K, V>>)> = Vec::with_capacity(entries.len());
    for (hash, entry) in entries {
        let run_start = deduped
            .iter()
            .rposition(|(h, _)| *h != hash)
            .map_or(0, |pos| pos + 1);
        if let Some(existing) = deduped[run_start..]
            .iter_mut()
            .find(|(_, e)| e.key == entry.key)
        {
            existing.1 = entry;
        } else {
            deduped.push((hash, entry));
        }
    }
    deduped
}

fn build_node<'a, K, V>(
    arena: &'a Arena<BuildNode<'a, K, V>>,
    entries: Vec<(u64, Arc<Entry<K, V>>)>,
    shift: u32,
) -> &'a BuildNode<'a, K, V> {
    debug_assert!(entries.len() >= 2);
    if shift > MAX_SHIFT {
        // Every hash chunk is spent; the survivors genuinely collide.
        let hash = entries[0].0;
        debug_assert!(entries.iter().all(|(h, _)| *h == hash));
        return arena.alloc(BuildNode::Collision {
            hash,
            entries: entries.into_iter().map(|(_, entry)| entry).collect(),
        });
    }

    let mut buckets: Vec<Vec<(u64, Arc<Entry<K, V>>)>> = (0..NODE_SIZE).map(|_| Vec::new()).collect();
    for (hash, entry) in entries {
        let chunk = ((hash >> shift) & HASH_MASK) as usize;
        buckets[chunk].push((hash, entry));
    }

    let mut bitmap = 0u32;
    let mut slots = Vec::new();
    for (chunk, bucket) in buckets.into_iter().enumerate() {
        match bucket.len() {
            0 => continue,
            1 => {
                let (_, entry) = bucket.into_iter().next().expect("one entry");
                slots.push(BuildSlot::Item(entry));
            }
            _ => {
                slots.push(BuildSlot::Child(build_node(arena, bucket, shift + HASH_BITS)));
            }
        }
        bitmap |= 1 << chunk;
    }
    arena.alloc(BuildNode::Bitmap { bitmap, slots })
}

/// Deep-clones a build tree onto the heap so the arena can be dropped.
fn reify<K, V>(node: &BuildNode<'_, K, V>) -> Node<K, V> {
    match node {
        BuildNode::Bitmap { bitmap, slots } => Node::Bitmap {
            bitmap: *bitmap,
            slots: slots
                .iter()
                .map(|slot| match slot {
                    BuildSlot::Item(entry) => Slot::Item(entry.clone()),
                    BuildSlot::Child(child) => Slot::Child(Arc::new(reify(child))),
                })
                .collect(),
        },
        BuildNode::Collision { hash, entries } => Node::Collision {
            hash: *hash,
            entries: entries.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HashMap;

    #[test]
    fn bulk_build_matches_iterative() {
        let pairs: Vec<(String, u32)> = (0..5_000u32).map(|i| (format!("key-{i}"), i)).collect();
        let bulk: HashMap<String, u32> = pairs.clone().into_iter().collect();
        bulk.check_invariants();

        let mut iterative = HashMap::new();
        for (key, value) in pairs {
            iterative = iterative.insert(key, value);
        }
        assert_eq!(bulk, iterative);
        assert_eq!(bulk.len(), 5_000);
    }

    #[test]
    fn bulk_build_duplicates_last_wins() {
        let mut pairs: Vec<(u32, u32)> = (0..2_000u32).map(|i| (i % 700, i)).collect();
        let map: HashMap<u32, u32> = pairs.clone().into_iter().collect();
        map.check_invariants();
        assert_eq!(map.len(), 700);
        // The last pair for each key is the binding that survives.
        pairs.reverse();
        for key in 0..700u32 {
            let (_, expected) = pairs.iter().find(|(k, _)| *k == key).expect("key present");
            assert_eq!(map.get(&key), Some(expected));
        }
    }

    #[test]
    fn bulk_build_empty_and_tiny() {
        let empty: HashMap<u32, u32> = Vec::new().into_iter().collect();
        assert!(empty.is_empty());
        let (root, count) = from_pairs::<u32, u32>(vec![(1, 2)]);
        assert!(root.is_some());
        assert_eq!(count, 1);
    }
}
