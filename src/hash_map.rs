//! A persistent hash map, implemented as a hash array mapped trie (HAMT).
//!
//! The trie consumes the key's 64-bit hash five bits per level, so lookups and
//! updates touch at most thirteen nodes. Updates copy only the nodes on the
//! root-to-slot path; everything else is shared with the source map through
//! [`Arc`] edges.

use std::borrow::Borrow;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{BuildHasher, BuildHasherDefault, Hash};
use std::sync::Arc;

use imbl_sized_chunks::Chunk;

use crate::bulk;
use crate::Entry;

pub(crate) const HASH_BITS: u32 = 5;
pub(crate) const HASH_MASK: u64 = (1 << HASH_BITS) - 1;
pub(crate) const NODE_SIZE: usize = 1 << HASH_BITS;

/// The last level at which a 64-bit hash still has bits to consume. Keys that
/// collide on every chunk up to and including this shift have equal hashes and
/// are stored in a collision node.
pub(crate) const MAX_SHIFT: u32 = 60;

/// Below this many incoming entries, folding `insert` beats the structural
/// merge's setup cost.
const MERGE_THRESHOLD: usize = 100;

/// Below this many entries, folding `insert` beats the arena bulk build.
pub(crate) const BULK_THRESHOLD: usize = 1000;

/// The engine's hasher is fixed and deterministic so that independently built
/// maps agree on every key's hash; the structural merge and the bulk builder
/// align subtrees on that agreement.
pub(crate) fn hash_of<Q: Hash + ?Sized>(key: &Q) -> u64 {
    BuildHasherDefault::<DefaultHasher>::default().hash_one(key)
}

#[inline]
fn chunk_at(hash: u64, shift: u32) -> usize {
    ((hash >> shift) & HASH_MASK) as usize
}

#[inline]
fn bit_for(hash: u64, shift: u32) -> u32 {
    1 << chunk_at(hash, shift)
}

/// Packed-array index of `bit` within `bitmap`: the number of occupied slots
/// below it.
#[inline]
fn index_of(bitmap: u32, bit: u32) -> usize {
    (bitmap & (bit - 1)).count_ones() as usize
}

/// A slot of a bitmap node: either a stored entry or a deeper subtree.
pub(crate) enum Slot<K, V> {
    Item(Arc<Entry<K, V>>),
    Child(Arc<Node<K, V>>),
}

impl<K, V> Clone for Slot<K, V> {
    fn clone(&self) -> Self {
        match self {
            Slot::Item(entry) => Slot::Item(entry.clone()),
            Slot::Child(child) => Slot::Child(child.clone()),
        }
    }
}

pub(crate) enum Node<K, V> {
    /// A 32-bit occupancy bitmap over the current hash chunk, with one packed
    /// slot per set bit, in ascending chunk order.
    Bitmap {
        bitmap: u32,
        slots: Chunk<Slot<K, V>, NODE_SIZE>,
    },
    /// Two or more entries whose keys share a full 64-bit hash.
    Collision {
        hash: u64,
        entries: Vec<Arc<Entry<K, V>>>,
    },
}

impl<K, V> Clone for Node<K, V> {
    fn clone(&self) -> Self {
        match self {
            Node::Bitmap { bitmap, slots } => Node::Bitmap {
                bitmap: *bitmap,
                slots: slots.clone(),
            },
            Node::Collision { hash, entries } => Node::Collision {
                hash: *hash,
                entries: entries.clone(),
            },
        }
    }
}

/// Outcome of inserting an entry into a subtree.
enum Inserted<K, V> {
    /// The key was present and the conflict policy kept the stored entry.
    Unchanged,
    /// The key was present; its entry was replaced.
    Updated(Node<K, V>),
    /// The key was absent; the subtree gained an entry.
    Added(Node<K, V>),
}

#[derive(Clone, Copy)]
enum OnConflict {
    Replace,
    Keep,
}

/// Outcome of removing a key from a subtree.
enum Removed<K, V> {
    NotFound,
    /// The subtree lost its last entry and dissolves.
    Empty,
    /// A collision node dropped to one entry; the parent inlines it.
    Single(Arc<Entry<K, V>>),
    Replaced(Node<K, V>),
}

impl<K, V> Node<K, V>
where
    K: Hash + Eq,
{
    fn get<'a, Q>(&'a self, hash: u64, shift: u32, key: &Q) -> Option<&'a Entry<K, V>>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        match self {
            Node::Bitmap { bitmap, slots } => {
                let bit = bit_for(hash, shift);
                if bitmap & bit == 0 {
                    return None;
                }
                match &slots[index_of(*bitmap, bit)] {
                    Slot::Item(entry) => (entry.key.borrow() == key).then_some(&**entry),
                    Slot::Child(child) => child.get(hash, shift + HASH_BITS, key),
                }
            }
            Node::Collision { entries, .. } => entries
                .iter()
                .find(|entry| entry.key.borrow() == key)
                .map(|entry| &**entry),
        }
    }

    fn insert(
        &self,
        hash: u64,
        shift: u32,
        entry: Arc<Entry<K, V>>,
        on_conflict: OnConflict,
    ) -> Inserted<K, V> {
        match self {
            Node::Bitmap { bitmap, slots } => {
                let bit = bit_for(hash, shift);
                let idx = index_of(*bitmap, bit);
                if bitmap & bit == 0 {
                    let mut new_slots = slots.clone();
                    new_slots.insert(idx, Slot::Item(entry));
                    return Inserted::Added(Node::Bitmap {
                        bitmap: bitmap | bit,
                        slots: new_slots,
                    });
                }
                match &slots[idx] {
                    Slot::Item(existing) => {
                        if existing.key == entry.key {
                            match on_conflict {
                                OnConflict::Keep => Inserted::Unchanged,
                                OnConflict::Replace => {
                                    let mut new_slots = slots.clone();
                                    new_slots[idx] = Slot::Item(entry);
                                    Inserted::Updated(Node::Bitmap {
                                        bitmap: *bitmap,
                                        slots: new_slots,
                                    })
                                }
                            }
                        } else {
                            // Two distinct keys in one slot: push both a level
                            // down until their chunks diverge.
                            let existing_hash = hash_of(&existing.key);
                            let child = node_from_two(
                                existing.clone(),
                                existing_hash,
                                entry,
                                hash,
                                shift + HASH_BITS,
                            );
                            let mut new_slots = slots.clone();
                            new_slots[idx] = Slot::Child(Arc::new(child));
                            Inserted::Added(Node::Bitmap {
                                bitmap: *bitmap,
                                slots: new_slots,
                            })
                        }
                    }
                    Slot::Child(child) => {
                        match child.insert(hash, shift + HASH_BITS, entry, on_conflict) {
                            Inserted::Unchanged => Inserted::Unchanged,
                            Inserted::Updated(node) => {
                                let mut new_slots = slots.clone();
                                new_slots[idx] = Slot::Child(Arc::new(node));
                                Inserted::Updated(Node::Bitmap {
                                    bitmap: *bitmap,
                                    slots: new_slots,
                                })
                            }
                            Inserted::Added(node) => {
                                let mut new_slots = slots.clone();
                                new_slots[idx] = Slot::Child(Arc::new(node));
                                Inserted::Added(Node::Bitmap {
                                    bitmap: *bitmap,
                                    slots: new_slots,
                                })
                            }
                        }
                    }
                }
            }
            Node::Collision {
                hash: stored_hash,
                entries,
            } => {
                // A collision node sits past the last hash chunk, so any key
                // routed here shares the full hash.
                debug_assert_eq!(hash, *stored_hash);
                if let Some(pos) = entries.iter().position(|e| e.key == entry.key) {
                    match on_conflict {
                        OnConflict::Keep => Inserted::Unchanged,
                        OnConflict::Replace => {
                            let mut new_entries = entries.clone();
                            new_entries[pos] = entry;
                            Inserted::Updated(Node::Collision {
                                hash: *stored_hash,
                                entries: new_entries,
                            })
                        }
                    }
                } else {
                    let mut new_entries = entries.clone();
                    new_entries.push(entry);
                    Inserted::Added(Node::Collision {
                        hash: *stored_hash,
                        entries: new_entries,
                    })
                }
            }
        }
    }

    fn remove<Q>(&self, hash: u64, shift: u32, key: &Q) -> Removed<K, V>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        match self {
            Node::Bitmap { bitmap, slots } => {
                let bit = bit_for(hash, shift);
                if bitmap & bit == 0 {
                    return Removed::NotFound;
                }
                let idx = index_of(*bitmap, bit);
                match &slots[idx] {
                    Slot::Item(entry) => {
                        if entry.key.borrow() != key {
                            return Removed::NotFound;
                        }
                        if slots.len() == 1 {
                            return Removed::Empty;
                        }
                        let mut new_slots = slots.clone();
                        new_slots.remove(idx);
                        Removed::Replaced(Node::Bitmap {
                            bitmap: bitmap & !bit,
                            slots: new_slots,
                        })
                    }
                    Slot::Child(child) => match child.remove(hash, shift + HASH_BITS, key) {
                        Removed::NotFound => Removed::NotFound,
                        Removed::Empty => {
                            if slots.len() == 1 {
                                return Removed::Empty;
                            }
                            let mut new_slots = slots.clone();
                            new_slots.remove(idx);
                            Removed::Replaced(Node::Bitmap {
                                bitmap: bitmap & !bit,
                                slots: new_slots,
                            })
                        }
                        Removed::Single(entry) => {
                            let mut new_slots = slots.clone();
                            new_slots[idx] = Slot::Item(entry);
                            Removed::Replaced(Node::Bitmap {
                                bitmap: *bitmap,
                                slots: new_slots,
                            })
                        }
                        Removed::Replaced(node) => {
                            let mut new_slots = slots.clone();
                            new_slots[idx] = Slot::Child(Arc::new(node));
                            Removed::Replaced(Node::Bitmap {
                                bitmap: *bitmap,
                                slots: new_slots,
                            })
                        }
                    },
                }
            }
            Node::Collision {
                hash: stored_hash,
                entries,
            } => {
                let Some(pos) = entries.iter().position(|e| e.key.borrow() == key) else {
                    return Removed::NotFound;
                };
                debug_assert!(entries.len() >= 2);
                if entries.len() == 2 {
                    Removed::Single(entries[1 - pos].clone())
                } else {
                    let mut new_entries = entries.clone();
                    new_entries.remove(pos);
                    Removed::Replaced(Node::Collision {
                        hash: *stored_hash,
                        entries: new_entries,
                    })
                }
            }
        }
    }

    pub(crate) fn count_entries(&self) -> usize {
        match self {
            Node::Bitmap { slots, .. } => slots
                .iter()
                .map(|slot| match slot {
                    Slot::Item(_) => 1,
                    Slot::Child(child) => child.count_entries(),
                })
                .sum(),
            Node::Collision { entries, .. } => entries.len(),
        }
    }
}

/// Builds the smallest subtree distinguishing two entries whose hashes agree
/// on all chunks below `shift`.
pub(crate) fn node_from_two<K, V>(
    first: Arc<Entry<K, V>>,
    first_hash: u64,
    second: Arc<Entry<K, V>>,
    second_hash: u64,
    shift: u32,
) -> Node<K, V> {
    if shift > MAX_SHIFT {
        debug_assert_eq!(first_hash, second_hash);
        return Node::Collision {
            hash: first_hash,
            entries: vec![first, second],
        };
    }
    let first_chunk = chunk_at(first_hash, shift);
    let second_chunk = chunk_at(second_hash, shift);
    if first_chunk == second_chunk {
        let child = node_from_two(first, first_hash, second, second_hash, shift + HASH_BITS);
        Node::Bitmap {
            bitmap: 1 << first_chunk,
            slots: Chunk::unit(Slot::Child(Arc::new(child))),
        }
    } else {
        let bitmap = (1 << first_chunk) | (1 << second_chunk);
        let slots = if first_chunk < second_chunk {
            Chunk::pair(Slot::Item(first), Slot::Item(second))
        } else {
            Chunk::pair(Slot::Item(second), Slot::Item(first))
        };
        Node::Bitmap { bitmap, slots }
    }
}

/// Merges two subtrees at the same level. Entries from `right` win on key
/// conflicts. Runs in time proportional to the overlapping structure instead
/// of one full descent per entry.
fn merge_nodes<K, V>(left: &Node<K, V>, right: &Node<K, V>, shift: u32) -> Node<K, V>
where
    K: Hash + Eq,
{
    match (left, right) {
        (
            Node::Bitmap {
                bitmap: left_bitmap,
                slots: left_slots,
            },
            Node::Bitmap {
                bitmap: right_bitmap,
                slots: right_slots,
            },
        ) => {
            let union = left_bitmap | right_bitmap;
            let mut slots = Chunk::new();
            for chunk in 0..NODE_SIZE as u32 {
                let bit = 1 << chunk;
                if union & bit == 0 {
                    continue;
                }
                let in_left = left_bitmap & bit != 0;
                let in_right = right_bitmap & bit != 0;
                let slot = if in_left && in_right {
                    merge_slots(
                        &left_slots[index_of(*left_bitmap, bit)],
                        &right_slots[index_of(*right_bitmap, bit)],
                        shift + HASH_BITS,
                    )
                } else if in_left {
                    left_slots[index_of(*left_bitmap, bit)].clone()
                } else {
                    right_slots[index_of(*right_bitmap, bit)].clone()
                };
                slots.push_back(slot);
            }
            Node::Bitmap {
                bitmap: union,
                slots,
            }
        }
        (
            Node::Collision {
                hash: left_hash,
                entries: left_entries,
            },
            Node::Collision {
                hash: right_hash,
                entries: right_entries,
            },
        ) => {
            debug_assert_eq!(left_hash, right_hash);
            let mut entries = right_entries.clone();
            for entry in left_entries {
                if !right_entries.iter().any(|e| e.key == entry.key) {
                    entries.push(entry.clone());
                }
            }
            Node::Collision {
                hash: *right_hash,
                entries,
            }
        }
        // Mixed shapes are rare; fold the collision side through ordinary
        // inserts with the appropriate win direction.
        (Node::Bitmap { .. }, Node::Collision { hash, entries }) => {
            let mut node = left.clone();
            for entry in entries {
                node = match node.insert(*hash, shift, entry.clone(), OnConflict::Replace) {
                    Inserted::Unchanged => node,
                    Inserted::Updated(next) | Inserted::Added(next) => next,
                };
            }
            node
        }
        (Node::Collision { hash, entries }, Node::Bitmap { .. }) => {
            let mut node = right.clone();
            for entry in entries {
                node = match node.insert(*hash, shift, entry.clone(), OnConflict::Keep) {
                    Inserted::Unchanged => node,
                    Inserted::Updated(next) | Inserted::Added(next) => next,
                };
            }
            node
        }
    }
}

fn merge_slots<K, V>(left: &Slot<K, V>, right: &Slot<K, V>, shift: u32) -> Slot<K, V>
where
    K: Hash + Eq,
{
    match (left, right) {
        (Slot::Item(left_entry), Slot::Item(right_entry)) => {
            if left_entry.key == right_entry.key {
                Slot::Item(right_entry.clone())
            } else {
                Slot::Child(Arc::new(node_from_two(
                    left_entry.clone(),
                    hash_of(&left_entry.key),
                    right_entry.clone(),
                    hash_of(&right_entry.key),
                    shift,
                )))
            }
        }
        (Slot::Item(entry), Slot::Child(child)) => {
            // The right subtree keeps its binding if the key is already there.
            match child.insert(hash_of(&entry.key), shift, entry.clone(), OnConflict::Keep) {
                Inserted::Unchanged => Slot::Child(child.clone()),
                Inserted::Updated(node) | Inserted::Added(node) => Slot::Child(Arc::new(node)),
            }
        }
        (Slot::Child(child), Slot::Item(entry)) => {
            match child.insert(
                hash_of(&entry.key),
                shift,
                entry.clone(),
                OnConflict::Replace,
            ) {
                Inserted::Unchanged => Slot::Child(child.clone()),
                Inserted::Updated(node) | Inserted::Added(node) => Slot::Child(Arc::new(node)),
            }
        }
        (Slot::Child(left_child), Slot::Child(right_child)) => {
            Slot::Child(Arc::new(merge_nodes(left_child, right_child, shift)))
        }
    }
}

/// A persistent hash map with copy-on-write updates and structural sharing.
pub struct HashMap<K, V> {
    root: Option<Arc<Node<K, V>>>,
    count: usize,
}

impl<K, V> Clone for HashMap<K, V> {
    fn clone(&self) -> Self {
        HashMap {
            root: self.root.clone(),
            count: self.count,
        }
    }
}

impl<K, V> Default for HashMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> HashMap<K, V> {
    pub fn new() -> Self {
        HashMap {
            root: None,
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter::new(self.root.as_deref(), self.count)
    }

    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { inner: self.iter() }
    }

    pub fn values(&self) -> Values<'_, K, V> {
        Values { inner: self.iter() }
    }
}

impl<K, V> HashMap<K, V>
where
    K: Hash + Eq,
{
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get_entry(key).map(|entry| &entry.value)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get_entry(key).is_some()
    }

    fn get_entry<Q>(&self, key: &Q) -> Option<&Entry<K, V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let root = self.root.as_ref()?;
        root.get(hash_of(key), 0, key)
    }

    /// Returns a map with `key` bound to `value`. When the stored value
    /// already compares equal, the original map is returned unchanged, root
    /// and all.
    pub fn insert(&self, key: K, value: V) -> Self
    where
        V: PartialEq,
    {
        if let Some(entry) = self.get_entry(&key) {
            if entry.value == value {
                return self.clone();
            }
        }
        self.insert_entry(Arc::new(Entry { key, value }))
    }

    /// Shares the entry handle into this map, replacing any existing binding.
    pub(crate) fn insert_entry(&self, entry: Arc<Entry<K, V>>) -> Self {
        let hash = hash_of(&entry.key);
        let Some(root) = &self.root else {
            let node = Node::Bitmap {
                bitmap: bit_for(hash, 0),
                slots: Chunk::unit(Slot::Item(entry)),
            };
            return HashMap {
                root: Some(Arc::new(node)),
                count: 1,
            };
        };
        match root.insert(hash, 0, entry, OnConflict::Replace) {
            Inserted::Unchanged => self.clone(),
            Inserted::Updated(node) => HashMap {
                root: Some(Arc::new(node)),
                count: self.count,
            },
            Inserted::Added(node) => HashMap {
                root: Some(Arc::new(node)),
                count: self.count + 1,
            },
        }
    }

    /// Returns a map without `key`. An absent key returns the original map
    /// unchanged.
    pub fn remove<Q>(&self, key: &Q) -> Self
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let Some(root) = &self.root else {
            return self.clone();
        };
        let hash = hash_of(key);
        match root.remove(hash, 0, key) {
            Removed::NotFound => self.clone(),
            Removed::Empty => HashMap::new(),
            Removed::Single(entry) => {
                // A root-level collision collapsed to one entry; rebuild a
                // bitmap root around it.
                let entry_hash = hash_of(&entry.key);
                let node = Node::Bitmap {
                    bitmap: bit_for(entry_hash, 0),
                    slots: Chunk::unit(Slot::Item(entry)),
                };
                HashMap {
                    root: Some(Arc::new(node)),
                    count: self.count - 1,
                }
            }
            Removed::Replaced(node) => HashMap {
                root: Some(Arc::new(node)),
                count: self.count - 1,
            },
        }
    }

    /// Folds `other`'s entries into this map; `other` wins on key conflicts.
    ///
    /// Large inputs are merged structurally, aligning the two tries node by
    /// node so shared shape costs O(|self| + |other|) instead of one full
    /// descent per entry.
    pub fn update(&self, other: &Self) -> Self {
        match (&self.root, &other.root) {
            (_, None) => self.clone(),
            (None, Some(_)) => other.clone(),
            (Some(left), Some(right)) => {
                if other.count >= MERGE_THRESHOLD {
                    let root = Arc::new(merge_nodes(left, right, 0));
                    // The merge recounts rather than guessing overlap.
                    let count = root.count_entries();
                    HashMap {
                        root: Some(root),
                        count,
                    }
                } else {
                    let mut result = self.clone();
                    let mut entries = Iter::new(other.root.as_deref(), other.count);
                    while let Some(entry) = entries.next_entry() {
                        result = result.insert_entry(entry.clone());
                    }
                    result
                }
            }
        }
    }

    /// Folds owned key/value pairs into this map; later pairs win.
    pub fn update_from<I>(&self, iterable: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let mut result = self.clone();
        for (key, value) in iterable {
            result = result.insert_entry(Arc::new(Entry { key, value }));
        }
        result
    }

    /// Asserts the structural invariants of the trie. Test support.
    pub fn check_invariants(&self) {
        fn check_node<K: Hash + Eq, V>(node: &Node<K, V>, shift: u32) -> usize {
            match node {
                Node::Bitmap { bitmap, slots } => {
                    assert_eq!(bitmap.count_ones() as usize, slots.len());
                    assert!(!slots.is_empty(), "empty bitmap node");
                    let mut total = 0;
                    let mut idx = 0;
                    for chunk in 0..NODE_SIZE as u32 {
                        if bitmap & (1 << chunk) == 0 {
                            continue;
                        }
                        match &slots[idx] {
                            Slot::Item(entry) => {
                                assert_eq!(chunk_at(hash_of(&entry.key), shift), chunk as usize);
                                total += 1;
                            }
                            Slot::Child(child) => {
                                total += check_node(child, shift + HASH_BITS);
                            }
                        }
                        idx += 1;
                    }
                    total
                }
                Node::Collision { hash, entries } => {
                    assert!(entries.len() >= 2, "collision node below two entries");
                    for entry in entries {
                        assert_eq!(hash_of(&entry.key), *hash);
                    }
                    entries.len()
                }
            }
        }

        let counted = self.root.as_ref().map_or(0, |root| check_node(root, 0));
        assert_eq!(counted, self.count);
    }
}

impl<K, V> PartialEq for HashMap<K, V>
where
    K: Hash + Eq,
    V: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.count == other.count
            && self
                .iter()
                .all(|(key, value)| other.get(key) == Some(value))
    }
}

impl<K, V> Eq for HashMap<K, V>
where
    K: Hash + Eq,
    V: Eq,
{
}

impl<K, V> fmt::Debug for HashMap<K, V>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V> FromIterator<(K, V)> for HashMap<K, V>
where
    K: Hash + Eq,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iterable: I) -> Self {
        let pairs: Vec<(K, V)> = iterable.into_iter().collect();
        if pairs.len() >= BULK_THRESHOLD {
            let (root, count) = bulk::from_pairs(pairs);
            HashMap { root, count }
        } else {
            HashMap::new().update_from(pairs)
        }
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for HashMap<K, V>
where
    K: Hash + Eq,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// Stack-based entry cursor: one frame per trie level, O(depth) memory.
pub struct Iter<'a, K, V> {
    stack: Vec<(&'a Node<K, V>, usize)>,
    remaining: usize,
}

impl<'a, K, V> Iter<'a, K, V> {
    fn new(root: Option<&'a Node<K, V>>, remaining: usize) -> Self {
        Iter {
            stack: root.map(|node| (node, 0)).into_iter().collect(),
            remaining,
        }
    }

    pub(crate) fn next_entry(&mut self) -> Option<&'a Arc<Entry<K, V>>> {
        loop {
            let (node, idx) = *self.stack.last()?;
            match node {
                Node::Bitmap { slots, .. } => {
                    if idx >= slots.len() {
                        self.stack.pop();
                        continue;
                    }
                    self.stack.last_mut().expect("frame just read").1 = idx + 1;
                    match &slots[idx] {
                        Slot::Item(entry) => {
                            self.remaining -= 1;
                            return Some(entry);
                        }
                        Slot::Child(child) => self.stack.push((child.as_ref(), 0)),
                    }
                }
                Node::Collision { entries, .. } => {
                    if idx >= entries.len() {
                        self.stack.pop();
                        continue;
                    }
                    self.stack.last_mut().expect("frame just read").1 = idx + 1;
                    self.remaining -= 1;
                    return Some(&entries[idx]);
                }
            }
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().map(|entry| (&entry.key, &entry.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

pub struct Keys<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(key, _)| key)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

pub struct Values<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Values<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, value)| value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a, K, V> IntoIterator for &'a HashMap<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(feature = "serde")]
impl<K, V> serde::Serialize for HashMap<K, V>
where
    K: serde::Serialize,
    V: serde::Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, value) in self.iter() {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[cfg(feature = "serde")]
impl<'de, K, V> serde::Deserialize<'de> for HashMap<K, V>
where
    K: serde::Deserialize<'de> + Hash + Eq,
    V: serde::Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct MapVisitor<K, V>(std::marker::PhantomData<(K, V)>);

        impl<'de, K, V> serde::de::Visitor<'de> for MapVisitor<K, V>
        where
            K: serde::Deserialize<'de> + Hash + Eq,
            V: serde::Deserialize<'de>,
        {
            type Value = HashMap<K, V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let mut pairs = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(pair) = access.next_entry()? {
                    pairs.push(pair);
                }
                Ok(pairs.into_iter().collect())
            }
        }

        deserializer.deserialize_map(MapVisitor(std::marker::PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A key that hands the hasher a chosen value, for forcing full-hash
    /// collisions.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub(crate) struct Colliding {
        pub hash: u64,
        pub id: u32,
    }

    impl Hash for Colliding {
        fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
            self.hash.hash(state);
        }
    }

    #[test]
    fn basic() {
        let map = HashMap::new()
            .insert("a", 1)
            .insert("b", 2)
            .insert("c", 3);
        map.check_invariants();
        assert_eq!(map.len(), 3);
        assert_eq!(map.get("b"), Some(&2));
        assert!(!map.contains_key("z"));

        let smaller = map.remove("b");
        smaller.check_invariants();
        assert_eq!(smaller.len(), 2);
        assert!(!smaller.contains_key("b"));
        assert_eq!(smaller.get("a"), Some(&1));
        // The original is untouched.
        assert_eq!(map.get("b"), Some(&2));
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn insert_equal_value_shares_root() {
        let map = HashMap::new().insert("k", 7).insert("x", 9);
        let same = map.insert("k", 7);
        assert!(Arc::ptr_eq(
            map.root.as_ref().unwrap(),
            same.root.as_ref().unwrap()
        ));
    }

    #[test]
    fn remove_absent_shares_root() {
        let map = HashMap::new().insert(1, 1).insert(2, 2);
        let same = map.remove(&3);
        assert!(Arc::ptr_eq(
            map.root.as_ref().unwrap(),
            same.root.as_ref().unwrap()
        ));
    }

    #[test]
    fn derived_versions_diverge() {
        let base: HashMap<u32, u32> = (0..10_000u32).map(|k| (k, k * 2)).collect();
        let derived = base.insert(5_000, u32::MAX);
        assert_eq!(base.get(&5_000), Some(&10_000));
        assert_eq!(derived.get(&5_000), Some(&u32::MAX));
        assert_eq!(base.len(), 10_000);
        assert_eq!(derived.len(), 10_000);
    }

    #[test]
    fn collisions_form_and_collapse() {
        let a = Colliding { hash: 42, id: 0 };
        let b = Colliding { hash: 42, id: 1 };
        let c = Colliding { hash: 42, id: 2 };
        let map = HashMap::new()
            .insert(a.clone(), "a")
            .insert(b.clone(), "b")
            .insert(c.clone(), "c");
        map.check_invariants();
        assert_eq!(map.len(), 3);
        assert_eq!(map.get(&b), Some(&"b"));

        // Dropping to one entry collapses the collision node.
        let map = map.remove(&a).remove(&c);
        map.check_invariants();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&b), Some(&"b"));
        assert_eq!(map.get(&a), None);
    }

    #[test]
    fn collision_overwrite() {
        let a = Colliding { hash: 9, id: 0 };
        let b = Colliding { hash: 9, id: 1 };
        let map = HashMap::new().insert(a.clone(), 1).insert(b.clone(), 2);
        let map = map.insert(b.clone(), 20);
        map.check_invariants();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&b), Some(&20));
        assert_eq!(map.get(&a), Some(&1));
    }

    #[test]
    fn update_small_and_structural() {
        let left: HashMap<u32, u32> = (0..300u32).map(|k| (k, k)).collect();
        let small: HashMap<u32, u32> = (0..10u32).map(|k| (k, k + 100)).collect();
        let big: HashMap<u32, u32> = (200..500u32).map(|k| (k, k + 1000)).collect();

        let merged = left.update(&small);
        merged.check_invariants();
        assert_eq!(merged.len(), 300);
        assert_eq!(merged.get(&3), Some(&103));
        assert_eq!(merged.get(&200), Some(&200));

        let merged = left.update(&big);
        merged.check_invariants();
        assert_eq!(merged.len(), 500);
        // Later entries win on overlap.
        assert_eq!(merged.get(&250), Some(&1250));
        assert_eq!(merged.get(&100), Some(&100));
    }

    #[test]
    fn update_merges_collisions() {
        let a = Colliding { hash: 7, id: 0 };
        let b = Colliding { hash: 7, id: 1 };
        let mut left: HashMap<Colliding, i32> = (0..200u32)
            .map(|i| (Colliding { hash: 1000 + i as u64, id: i }, 0))
            .collect();
        left = left.insert(a.clone(), 1).insert(b.clone(), 2);
        let mut right: HashMap<Colliding, i32> = (0..200u32)
            .map(|i| (Colliding { hash: 5000 + i as u64, id: i }, 0))
            .collect();
        right = right.insert(b.clone(), 22);

        let merged = left.update(&right);
        merged.check_invariants();
        assert_eq!(merged.get(&a), Some(&1));
        assert_eq!(merged.get(&b), Some(&22));
        assert_eq!(merged.len(), 402);
    }

    #[test]
    fn iteration_is_stable_and_complete() {
        let map: HashMap<u32, u32> = (0..500u32).map(|k| (k, k)).collect();
        let first: Vec<_> = map.iter().collect();
        let second: Vec<_> = map.iter().collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 500);
        let mut keys: Vec<u32> = map.keys().copied().collect();
        keys.sort_unstable();
        assert_eq!(keys, (0..500u32).collect::<Vec<_>>());
    }

    #[test]
    fn equality_ignores_build_order() {
        let forward: HashMap<u32, u32> = (0..100u32).map(|k| (k, k * 3)).collect();
        let backward: HashMap<u32, u32> = (0..100u32).rev().map(|k| (k, k * 3)).collect();
        assert_eq!(forward, backward);
        assert_ne!(forward, forward.insert(5, 0));
        assert_ne!(forward, forward.remove(&5));
    }
}
