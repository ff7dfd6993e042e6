//! A small-map optimization: a persistent map stored as a flat array of at
//! most eight entries, searched by linear scan.
//!
//! Below the capacity bound a scan beats hashing. Callers that outgrow the
//! bound get [`Error::CapacityExceeded`] and are expected to promote to a
//! [`HashMap`], either preemptively or by catching the error; [`promote`]
//! does the conversion while sharing the stored entries.
//!
//! [`promote`]: ArrayMap::promote

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::{Entry, HashMap};

/// Host-visible capacity bound of [`ArrayMap`].
pub const ARRAY_MAP_CAPACITY: usize = 8;

/// A persistent map of at most [`ARRAY_MAP_CAPACITY`] entries.
///
/// Iteration is in insertion order, modulo removals shifting later entries
/// left. Equality ignores order.
pub struct ArrayMap<K, V> {
    entries: Arc<Vec<Arc<Entry<K, V>>>>,
}

impl<K, V> Clone for ArrayMap<K, V> {
    fn clone(&self) -> Self {
        ArrayMap {
            entries: self.entries.clone(),
        }
    }
}

impl<K, V> Default for ArrayMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ArrayMap<K, V> {
    pub fn new() -> Self {
        ArrayMap {
            entries: Arc::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: self.entries.iter(),
        }
    }
}

impl<K, V> ArrayMap<K, V>
where
    K: Eq,
{
    fn position<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        self.entries.iter().position(|e| e.key.borrow() == key)
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        self.position(key).map(|idx| &self.entries[idx].value)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        self.position(key).is_some()
    }

    /// Returns a map with `key` bound to `value`, or
    /// [`Error::CapacityExceeded`] if the key is new and the map is full.
    /// Binding a key to a value equal to the stored one returns the original
    /// map unchanged.
    pub fn insert(&self, key: K, value: V) -> Result<Self>
    where
        V: PartialEq,
    {
        match self.position(&key) {
            Some(idx) => {
                if self.entries[idx].value == value {
                    return Ok(self.clone());
                }
                let mut entries = (*self.entries).clone();
                entries[idx] = Arc::new(Entry { key, value });
                Ok(ArrayMap {
                    entries: Arc::new(entries),
                })
            }
            None => {
                if self.len() >= ARRAY_MAP_CAPACITY {
                    return Err(Error::CapacityExceeded {
                        cap: ARRAY_MAP_CAPACITY,
                    });
                }
                let mut entries = (*self.entries).clone();
                entries.push(Arc::new(Entry { key, value }));
                Ok(ArrayMap {
                    entries: Arc::new(entries),
                })
            }
        }
    }

    /// Returns a map without `key`; an absent key returns the original map
    /// unchanged. Later entries shift left.
    pub fn remove<Q>(&self, key: &Q) -> Self
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let Some(idx) = self.position(key) else {
            return self.clone();
        };
        let mut entries = (*self.entries).clone();
        entries.remove(idx);
        ArrayMap {
            entries: Arc::new(entries),
        }
    }

    /// Folds `other`'s entries into this map; `other` wins on key conflicts.
    pub fn update(&self, other: &Self) -> Result<Self> {
        let mut result = self.clone();
        for entry in other.entries.iter() {
            result = result.insert_entry(entry.clone())?;
        }
        Ok(result)
    }

    /// Folds owned key/value pairs into this map; later pairs win.
    pub fn update_from<I>(&self, iterable: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let mut result = self.clone();
        for (key, value) in iterable {
            result = result.insert_entry(Arc::new(Entry { key, value }))?;
        }
        Ok(result)
    }

    /// Shares an entry handle in, replacing any existing binding for its key.
    fn insert_entry(&self, entry: Arc<Entry<K, V>>) -> Result<Self> {
        match self.position(&entry.key) {
            Some(idx) => {
                let mut entries = (*self.entries).clone();
                entries[idx] = entry;
                Ok(ArrayMap {
                    entries: Arc::new(entries),
                })
            }
            None => {
                if self.len() >= ARRAY_MAP_CAPACITY {
                    return Err(Error::CapacityExceeded {
                        cap: ARRAY_MAP_CAPACITY,
                    });
                }
                let mut entries = (*self.entries).clone();
                entries.push(entry);
                Ok(ArrayMap {
                    entries: Arc::new(entries),
                })
            }
        }
    }

    /// Converts to a [`HashMap`], sharing the stored entries.
    pub fn promote(&self) -> HashMap<K, V>
    where
        K: Hash,
    {
        let mut map = HashMap::new();
        for entry in self.entries.iter() {
            map = map.insert_entry(entry.clone());
        }
        map
    }

    /// Builds a map from pairs, or fails once a ninth distinct key appears.
    pub fn try_from_iter<I>(iterable: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        ArrayMap::new().update_from(iterable)
    }
}

/// Compares as an unordered collection of entries.
impl<K, V> PartialEq for ArrayMap<K, V>
where
    K: Eq,
    V: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(key, value)| other.get(key) == Some(value))
    }
}

impl<K, V> Eq for ArrayMap<K, V>
where
    K: Eq,
    V: Eq,
{
}

impl<K, V> fmt::Debug for ArrayMap<K, V>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Panics when the input holds more than [`ARRAY_MAP_CAPACITY`] distinct
/// keys; use [`ArrayMap::try_from_iter`] to surface the error instead.
impl<K, V> FromIterator<(K, V)> for ArrayMap<K, V>
where
    K: Eq,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iterable: I) -> Self {
        ArrayMap::try_from_iter(iterable).expect("array map capacity exceeded")
    }
}

pub struct Iter<'a, K, V> {
    inner: std::slice::Iter<'a, Arc<Entry<K, V>>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|entry| (&entry.key, &entry.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

impl<'a, K, V> IntoIterator for &'a ArrayMap<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(feature = "serde")]
impl<K, V> serde::Serialize for ArrayMap<K, V>
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
impl<'de, K, V> serde::Deserialize<'de> for ArrayMap<K, V>
where
    K: serde::Deserialize<'de> + Eq,
    V: serde::Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct MapVisitor<K, V>(std::marker::PhantomData<(K, V)>);

        impl<'de, K, V> serde::de::Visitor<'de> for MapVisitor<K, V>
        where
            K: serde::Deserialize<'de> + Eq,
            V: serde::Deserialize<'de>,
        {
            type Value = ArrayMap<K, V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a map of at most {ARRAY_MAP_CAPACITY} entries")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let mut map = ArrayMap::new();
                while let Some((key, value)) = access.next_entry()? {
                    map = map
                        .update_from([(key, value)])
                        .map_err(serde::de::Error::custom)?;
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(MapVisitor(std::marker::PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic() {
        let map = ArrayMap::new()
            .insert("a", 1)
            .unwrap()
            .insert("b", 2)
            .unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("a"), Some(&1));
        assert!(!map.contains_key("z"));

        let smaller = map.remove("a");
        assert_eq!(smaller.len(), 1);
        assert!(!smaller.contains_key("a"));
        assert_eq!(map.get("a"), Some(&1));
    }

    #[test]
    fn capacity_bound() {
        let full: ArrayMap<u32, u32> = (0..8u32).map(|k| (k, k)).collect();
        assert_eq!(full.len(), 8);
        // Overwriting an existing key is still allowed at capacity.
        assert_eq!(full.insert(3, 30).unwrap().get(&3), Some(&30));
        assert_eq!(
            full.insert(9, 9),
            Err(Error::CapacityExceeded { cap: 8 })
        );
        // Removal opens a slot back up.
        assert!(full.remove(&0).insert(9, 9).is_ok());
    }

    #[test]
    fn insertion_order_and_removal_shift() {
        let map = ArrayMap::try_from_iter([(1, 'a'), (2, 'b'), (3, 'c')]).unwrap();
        let keys: Vec<u32> = map.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![1, 2, 3]);

        let keys: Vec<u32> = map.remove(&2).iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![1, 3]);
    }

    #[test]
    fn equality_is_unordered() {
        let forward = ArrayMap::try_from_iter([(1, 'a'), (2, 'b')]).unwrap();
        let backward = ArrayMap::try_from_iter([(2, 'b'), (1, 'a')]).unwrap();
        assert_eq!(forward, backward);
        assert_ne!(forward, forward.remove(&1));
    }

    #[test]
    fn equal_value_insert_shares_storage() {
        let map = ArrayMap::new().insert(1, 'x').unwrap();
        let same = map.insert(1, 'x').unwrap();
        assert!(Arc::ptr_eq(&map.entries, &same.entries));
    }

    #[test]
    fn promote_carries_entries() {
        let map: ArrayMap<u32, u32> = (0..8u32).map(|k| (k, k * 10)).collect();
        let promoted = map.promote();
        promoted.check_invariants();
        assert_eq!(promoted.len(), 8);
        assert_eq!(promoted.get(&5), Some(&50));
    }
}
