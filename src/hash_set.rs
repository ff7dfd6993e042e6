//! A persistent hash set: a thin layer over [`HashMap`] with unit values.
//!
//! Every element is a key bound to `()`; the unit sentinel never appears in
//! the public API. Set algebra iterates the cheaper operand and probes the
//! other, sharing element handles between the operands and the result.

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;

use crate::hash_map::{self, HashMap};

/// A persistent set with copy-on-write updates and structural sharing.
pub struct HashSet<T> {
    map: HashMap<T, ()>,
}

impl<T> Clone for HashSet<T> {
    fn clone(&self) -> Self {
        HashSet {
            map: self.map.clone(),
        }
    }
}

impl<T> Default for HashSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HashSet<T> {
    pub fn new() -> Self {
        HashSet {
            map: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            inner: self.map.keys(),
        }
    }
}

impl<T> HashSet<T>
where
    T: Hash + Eq,
{
    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.contains_key(value)
    }

    /// Returns a set containing `value`. Inserting a present element returns
    /// the original set unchanged.
    pub fn insert(&self, value: T) -> Self {
        HashSet {
            map: self.map.insert(value, ()),
        }
    }

    /// Returns a set without `value`; an absent element returns the original
    /// set unchanged.
    pub fn remove<Q>(&self, value: &Q) -> Self
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        HashSet {
            map: self.map.remove(value),
        }
    }

    pub fn union(&self, other: &Self) -> Self {
        // Fold the smaller operand's elements into the larger set.
        let (base, extra) = if self.len() >= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        let mut map = base.map.clone();
        let mut entries = extra.map.iter();
        while let Some(entry) = entries.next_entry() {
            map = map.insert_entry(entry.clone());
        }
        HashSet { map }
    }

    pub fn intersection(&self, other: &Self) -> Self {
        let (smaller, larger) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        let mut map = HashMap::new();
        let mut entries = smaller.map.iter();
        while let Some(entry) = entries.next_entry() {
            if larger.contains(&entry.key) {
                map = map.insert_entry(entry.clone());
            }
        }
        HashSet { map }
    }

    /// Elements of `self` not in `other`.
    pub fn difference(&self, other: &Self) -> Self {
        let mut map = self.map.clone();
        for value in other.iter() {
            map = map.remove(value);
        }
        HashSet { map }
    }

    pub fn symmetric_difference(&self, other: &Self) -> Self {
        self.difference(other).union(&other.difference(self))
    }

    pub fn is_subset(&self, other: &Self) -> bool {
        self.len() <= other.len() && self.iter().all(|value| other.contains(value))
    }

    pub fn is_superset(&self, other: &Self) -> bool {
        other.is_subset(self)
    }

    pub fn is_disjoint(&self, other: &Self) -> bool {
        let (smaller, larger) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        smaller.iter().all(|value| !larger.contains(value))
    }

    /// Asserts the structural invariants of the backing trie. Test support.
    pub fn check_invariants(&self) {
        self.map.check_invariants();
    }
}

impl<T> PartialEq for HashSet<T>
where
    T: Hash + Eq,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|value| other.contains(value))
    }
}

impl<T> Eq for HashSet<T> where T: Hash + Eq {}

impl<T> fmt::Debug for HashSet<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T> FromIterator<T> for HashSet<T>
where
    T: Hash + Eq,
{
    fn from_iter<I: IntoIterator<Item = T>>(iterable: I) -> Self {
        HashSet {
            map: iterable.into_iter().map(|value| (value, ())).collect(),
        }
    }
}

impl<T, const N: usize> From<[T; N]> for HashSet<T>
where
    T: Hash + Eq,
{
    fn from(values: [T; N]) -> Self {
        values.into_iter().collect()
    }
}

pub struct Iter<'a, T> {
    inner: hash_map::Keys<'a, T, ()>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a, T> IntoIterator for &'a HashSet<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(feature = "serde")]
impl<T> serde::Serialize for HashSet<T>
where
    T: serde::Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeSeq;

        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        for value in self.iter() {
            seq.serialize_element(value)?;
        }
        seq.end()
    }
}

#[cfg(feature = "serde")]
impl<'de, T> serde::Deserialize<'de> for HashSet<T>
where
    T: serde::Deserialize<'de> + Hash + Eq,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let values: Vec<T> = Vec::deserialize(deserializer)?;
        Ok(values.into_iter().collect())
    }
}
