//! A persistent sorted map, implemented as a left-leaning red-black tree
//! (Sedgewick 2008).
//!
//! Lookups, insertions and removals are O(log n); updates copy the search
//! path and share the rest. The rebalancing rotations work on owned transient
//! nodes whose children are [`Arc`] links, so a discarded transient releases
//! its children exactly once when it drops.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Color {
    Red,
    Black,
}

impl Color {
    fn flip(self) -> Self {
        match self {
            Color::Red => Color::Black,
            Color::Black => Color::Red,
        }
    }
}

type Link<K, V> = Option<Arc<TreeNode<K, V>>>;

#[derive(Clone)]
struct TreeNode<K, V> {
    key: K,
    value: V,
    color: Color,
    left: Link<K, V>,
    right: Link<K, V>,
}

impl<K, V> TreeNode<K, V> {
    fn red(key: K, value: V) -> Self {
        TreeNode {
            key,
            value,
            color: Color::Red,
            left: None,
            right: None,
        }
    }
}

fn is_red<K, V>(link: &Link<K, V>) -> bool {
    matches!(link, Some(node) if node.color == Color::Red)
}

/// Whether the left child of the node behind `link` is red.
fn is_red_left<K, V>(link: &Link<K, V>) -> bool {
    match link {
        Some(node) => is_red(&node.left),
        None => false,
    }
}

fn rotate_left<K: Clone, V: Clone>(mut h: TreeNode<K, V>) -> TreeNode<K, V> {
    let mut x = Arc::unwrap_or_clone(h.right.take().expect("rotate_left without a right child"));
    h.right = x.left.take();
    x.color = h.color;
    h.color = Color::Red;
    x.left = Some(Arc::new(h));
    x
}

fn rotate_right<K: Clone, V: Clone>(mut h: TreeNode<K, V>) -> TreeNode<K, V> {
    let mut x = Arc::unwrap_or_clone(h.left.take().expect("rotate_right without a left child"));
    h.left = x.right.take();
    x.color = h.color;
    h.color = Color::Red;
    x.right = Some(Arc::new(h));
    x
}

fn flip_link<K: Clone, V: Clone>(link: &mut Link<K, V>) {
    if let Some(node) = link.take() {
        let mut node = Arc::unwrap_or_clone(node);
        node.color = node.color.flip();
        *link = Some(Arc::new(node));
    }
}

fn flip_colors<K: Clone, V: Clone>(h: &mut TreeNode<K, V>) {
    h.color = h.color.flip();
    flip_link(&mut h.left);
    flip_link(&mut h.right);
}

/// The three insert fixups, applied bottom-up at every level.
fn balance<K: Clone, V: Clone>(mut h: TreeNode<K, V>) -> TreeNode<K, V> {
    if is_red(&h.right) && !is_red(&h.left) {
        h = rotate_left(h);
    }
    if is_red(&h.left) && is_red_left(&h.left) {
        h = rotate_right(h);
    }
    if is_red(&h.left) && is_red(&h.right) {
        flip_colors(&mut h);
    }
    h
}

fn move_red_left<K: Clone, V: Clone>(mut h: TreeNode<K, V>) -> TreeNode<K, V> {
    flip_colors(&mut h);
    if is_red_left(&h.right) {
        let right = Arc::unwrap_or_clone(h.right.take().expect("move_red_left without right child"));
        h.right = Some(Arc::new(rotate_right(right)));
        h = rotate_left(h);
        flip_colors(&mut h);
    }
    h
}

fn move_red_right<K: Clone, V: Clone>(mut h: TreeNode<K, V>) -> TreeNode<K, V> {
    flip_colors(&mut h);
    if is_red_left(&h.left) {
        h = rotate_right(h);
        flip_colors(&mut h);
    }
    h
}

fn insert_rec<K: Ord + Clone, V: Clone>(
    link: &Link<K, V>,
    key: K,
    value: V,
    added: &mut bool,
) -> TreeNode<K, V> {
    let Some(node) = link else {
        *added = true;
        return TreeNode::red(key, value);
    };
    let mut h = (**node).clone();
    match key.cmp(&node.key) {
        Ordering::Less => h.left = Some(Arc::new(insert_rec(&node.left, key, value, added))),
        Ordering::Greater => h.right = Some(Arc::new(insert_rec(&node.right, key, value, added))),
        Ordering::Equal => h.value = value,
    }
    balance(h)
}

/// Extracts the minimum entry of an owned subtree, rebalancing on the way
/// back up.
fn remove_min_rec<K: Clone, V: Clone>(mut h: TreeNode<K, V>) -> (Option<TreeNode<K, V>>, K, V) {
    if h.left.is_none() {
        // In a left-leaning tree a node without a left child has no right
        // child either.
        debug_assert!(h.right.is_none());
        return (None, h.key, h.value);
    }
    if !is_red(&h.left) && !is_red_left(&h.left) {
        h = move_red_left(h);
    }
    let left = Arc::unwrap_or_clone(h.left.take().expect("min descent without left child"));
    let (new_left, key, value) = remove_min_rec(left);
    h.left = new_left.map(Arc::new);
    (Some(balance(h)), key, value)
}

/// Sedgewick's left-leaning delete; the key is known to be present.
fn remove_rec<K, V, Q>(mut h: TreeNode<K, V>, key: &Q) -> Option<TreeNode<K, V>>
where
    K: Borrow<Q> + Ord + Clone,
    V: Clone,
    Q: Ord + ?Sized,
{
    if key < h.key.borrow() {
        if !is_red(&h.left) && !is_red_left(&h.left) {
            h = move_red_left(h);
        }
        let left = Arc::unwrap_or_clone(h.left.take().expect("descent towards a present key"));
        h.left = remove_rec(left, key).map(Arc::new);
    } else {
        if is_red(&h.left) {
            h = rotate_right(h);
        }
        if key == h.key.borrow() && h.right.is_none() {
            return None;
        }
        if !is_red(&h.right) && !is_red_left(&h.right) {
            h = move_red_right(h);
        }
        if key == h.key.borrow() {
            // Replace this entry with its successor and extract the
            // successor from the right subtree in the same pass.
            let right =
                Arc::unwrap_or_clone(h.right.take().expect("successor without right subtree"));
            let (new_right, min_key, min_value) = remove_min_rec(right);
            h.key = min_key;
            h.value = min_value;
            h.right = new_right.map(Arc::new);
        } else {
            let right = Arc::unwrap_or_clone(h.right.take().expect("descent towards a present key"));
            h.right = remove_rec(right, key).map(Arc::new);
        }
    }
    Some(balance(h))
}

/// A persistent map ordered by its keys, with copy-on-write updates and
/// structural sharing.
pub struct SortedMap<K, V> {
    root: Link<K, V>,
    count: usize,
}

impl<K, V> Clone for SortedMap<K, V> {
    fn clone(&self) -> Self {
        SortedMap {
            root: self.root.clone(),
            count: self.count,
        }
    }
}

impl<K, V> Default for SortedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SortedMap<K, V> {
    pub fn new() -> Self {
        SortedMap {
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

    /// The entry with the smallest key.
    pub fn first(&self) -> Option<(&K, &V)> {
        let mut node = self.root.as_deref()?;
        while let Some(left) = node.left.as_deref() {
            node = left;
        }
        Some((&node.key, &node.value))
    }

    /// The entry with the largest key.
    pub fn last(&self) -> Option<(&K, &V)> {
        let mut node = self.root.as_deref()?;
        while let Some(right) = node.right.as_deref() {
            node = right;
        }
        Some((&node.key, &node.value))
    }

    /// Entries in ascending key order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        let mut iter = Iter { stack: Vec::new() };
        iter.push_left(self.root.as_deref());
        iter
    }

    /// Entries in descending key order.
    pub fn iter_rev(&self) -> IterRev<'_, K, V> {
        let mut iter = IterRev { stack: Vec::new() };
        iter.push_right(self.root.as_deref());
        iter
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(key, _)| key)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, value)| value)
    }
}

impl<K, V> SortedMap<K, V>
where
    K: Ord,
{
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut node = self.root.as_deref();
        while let Some(n) = node {
            match key.cmp(n.key.borrow()) {
                Ordering::Less => node = n.left.as_deref(),
                Ordering::Greater => node = n.right.as_deref(),
                Ordering::Equal => return Some(&n.value),
            }
        }
        None
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.get(key).is_some()
    }

    /// Entries with `lo <= key < hi`, in descending key order.
    pub fn range_rev<'a, Q>(&'a self, lo: &Q, hi: &Q) -> RangeRev<'a, K, V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        fn collect_desc<'a, K, V, Q>(
            link: &'a Link<K, V>,
            lo: &Q,
            hi: &Q,
            out: &mut Vec<(&'a K, &'a V)>,
        ) where
            K: Borrow<Q> + Ord,
            Q: Ord + ?Sized,
        {
            let Some(node) = link else { return };
            let above_lo = node.key.borrow() >= lo;
            let below_hi = node.key.borrow() < hi;
            if below_hi {
                collect_desc(&node.right, lo, hi, out);
            }
            if above_lo && below_hi {
                out.push((&node.key, &node.value));
            }
            if above_lo {
                collect_desc(&node.left, lo, hi, out);
            }
        }

        let mut entries = Vec::new();
        collect_desc(&self.root, lo, hi, &mut entries);
        RangeRev {
            entries: entries.into_iter(),
        }
    }

    /// Asserts the red-black and ordering invariants. Test support.
    pub fn check_invariants(&self) {
        /// Returns the black height, asserting balance along the way.
        fn check<K: Ord, V>(link: &Link<K, V>) -> usize {
            let Some(node) = link else { return 1 };
            if node.color == Color::Red {
                assert!(!is_red(&node.left), "red node with a red left child");
                assert!(!is_red(&node.right), "red node with a red right child");
            }
            assert!(!is_red(&node.right), "right-leaning red link");
            if let Some(left) = node.left.as_deref() {
                assert!(left.key < node.key, "left child out of order");
            }
            if let Some(right) = node.right.as_deref() {
                assert!(right.key > node.key, "right child out of order");
            }
            let left_height = check(&node.left);
            let right_height = check(&node.right);
            assert_eq!(left_height, right_height, "unequal black height");
            left_height + usize::from(node.color == Color::Black)
        }

        assert!(!is_red(&self.root), "red root");
        check(&self.root);
        assert_eq!(self.iter().count(), self.count);
        let keys: Vec<&K> = self.keys().collect();
        assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
    }
}

impl<K, V> SortedMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    /// Returns a map with `key` bound to `value`; an existing binding is
    /// replaced.
    pub fn insert(&self, key: K, value: V) -> Self {
        let mut added = false;
        let mut root = insert_rec(&self.root, key, value, &mut added);
        root.color = Color::Black;
        SortedMap {
            root: Some(Arc::new(root)),
            count: self.count + usize::from(added),
        }
    }

    /// Returns a map without `key`; an absent key returns the original map
    /// unchanged.
    pub fn remove<Q>(&self, key: &Q) -> Self
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        if !self.contains_key(key) {
            return self.clone();
        }
        let root = self.root.as_deref().expect("present key implies a root");
        let mut h = root.clone();
        if !is_red(&h.left) && !is_red(&h.right) {
            h.color = Color::Red;
        }
        match remove_rec(h, key) {
            None => SortedMap {
                root: None,
                count: self.count - 1,
            },
            Some(mut root) => {
                root.color = Color::Black;
                SortedMap {
                    root: Some(Arc::new(root)),
                    count: self.count - 1,
                }
            }
        }
    }

    /// A new map holding the entries with `lo <= key < hi`.
    pub fn range<Q>(&self, lo: &Q, hi: &Q) -> Self
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        fn collect_asc<'a, K, V, Q>(
            link: &'a Link<K, V>,
            lo: &Q,
            hi: &Q,
            out: &mut Vec<(&'a K, &'a V)>,
        ) where
            K: Borrow<Q> + Ord,
            Q: Ord + ?Sized,
        {
            let Some(node) = link else { return };
            let above_lo = node.key.borrow() >= lo;
            let below_hi = node.key.borrow() < hi;
            if above_lo {
                collect_asc(&node.left, lo, hi, out);
            }
            if above_lo && below_hi {
                out.push((&node.key, &node.value));
            }
            if below_hi {
                collect_asc(&node.right, lo, hi, out);
            }
        }

        let mut entries = Vec::new();
        collect_asc(&self.root, lo, hi, &mut entries);
        let mut result = SortedMap::new();
        for (key, value) in entries {
            result = result.insert(key.clone(), value.clone());
        }
        result
    }
}

impl<K, V> PartialEq for SortedMap<K, V>
where
    K: PartialEq,
    V: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.count == other.count && self.iter().eq(other.iter())
    }
}

impl<K, V> Eq for SortedMap<K, V>
where
    K: Eq,
    V: Eq,
{
}

impl<K, V> fmt::Debug for SortedMap<K, V>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V> FromIterator<(K, V)> for SortedMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iterable: I) -> Self {
        let mut map = SortedMap::new();
        for (key, value) in iterable {
            map = map.insert(key, value);
        }
        map
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for SortedMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// Ascending in-order traversal: the stack holds the left spine of the part
/// of the tree not yet visited.
pub struct Iter<'a, K, V> {
    stack: Vec<&'a TreeNode<K, V>>,
}

impl<'a, K, V> Iter<'a, K, V> {
    fn push_left(&mut self, mut node: Option<&'a TreeNode<K, V>>) {
        while let Some(n) = node {
            self.stack.push(n);
            node = n.left.as_deref();
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.push_left(node.right.as_deref());
        Some((&node.key, &node.value))
    }
}

pub struct IterRev<'a, K, V> {
    stack: Vec<&'a TreeNode<K, V>>,
}

impl<'a, K, V> IterRev<'a, K, V> {
    fn push_right(&mut self, mut node: Option<&'a TreeNode<K, V>>) {
        while let Some(n) = node {
            self.stack.push(n);
            node = n.right.as_deref();
        }
    }
}

impl<'a, K, V> Iterator for IterRev<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.push_right(node.left.as_deref());
        Some((&node.key, &node.value))
    }
}

/// Descending iterator over a key range; see [`SortedMap::range_rev`].
pub struct RangeRev<'a, K, V> {
    entries: std::vec::IntoIter<(&'a K, &'a V)>,
}

impl<'a, K, V> Iterator for RangeRev<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl<'a, K, V> IntoIterator for &'a SortedMap<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(feature = "serde")]
impl<K, V> serde::Serialize for SortedMap<K, V>
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
impl<'de, K, V> serde::Deserialize<'de> for SortedMap<K, V>
where
    K: serde::Deserialize<'de> + Ord + Clone,
    V: serde::Deserialize<'de> + Clone,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct MapVisitor<K, V>(std::marker::PhantomData<(K, V)>);

        impl<'de, K, V> serde::de::Visitor<'de> for MapVisitor<K, V>
        where
            K: serde::Deserialize<'de> + Ord + Clone,
            V: serde::Deserialize<'de> + Clone,
        {
            type Value = SortedMap<K, V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let mut map = SortedMap::new();
                while let Some((key, value)) = access.next_entry()? {
                    map = map.insert(key, value);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(MapVisitor(std::marker::PhantomData))
    }
}
