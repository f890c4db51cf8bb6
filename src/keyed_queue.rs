use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};

/// Ordered lists of values grouped by key.
///
/// A key never maps to an empty list: whenever an operation leaves a list
/// empty the key is dropped, so [`KeyedQueue::keys`] only yields keys that
/// still hold work.
#[derive(Debug, Clone)]
pub struct KeyedQueue<K, V> {
    lists: BTreeMap<K, VecDeque<V>>,
    len: usize,
}

impl<K: Ord + Clone, V> KeyedQueue<K, V> {
    pub fn new() -> Self {
        Self {
            lists: BTreeMap::new(),
            len: 0,
        }
    }

    /// Append a value to the back of `key`'s list and return the new total size.
    pub fn push(&mut self, key: K, value: V) -> usize {
        self.lists.entry(key).or_default().push_back(value);
        self.len += 1;
        self.len
    }

    /// Put a value at the head of `key`'s list so it is the next one shifted.
    pub fn push_front(&mut self, key: K, value: V) -> usize {
        self.lists.entry(key).or_default().push_front(value);
        self.len += 1;
        self.len
    }

    /// Insert at `index` within `key`'s list, clamped to the list length.
    pub fn insert(&mut self, key: K, index: usize, value: V) -> usize {
        let list = self.lists.entry(key).or_default();
        let index = index.min(list.len());
        list.insert(index, value);
        self.len += 1;
        self.len
    }

    /// Remove and return the oldest value for `key`.
    pub fn shift(&mut self, key: &K) -> Option<V> {
        let list = self.lists.get_mut(key)?;
        let value = list.pop_front();
        if value.is_some() {
            self.len -= 1;
        }
        self.drop_if_empty(key);
        value
    }

    pub fn peek(&self, key: &K) -> Option<&V> {
        self.lists.get(key).and_then(VecDeque::front)
    }

    pub fn find<P>(&self, key: &K, predicate: P) -> Option<&V>
    where
        P: FnMut(&&V) -> bool,
    {
        self.lists.get(key).and_then(|list| list.iter().find(predicate))
    }

    pub fn find_mut<P>(&mut self, key: &K, mut predicate: P) -> Option<&mut V>
    where
        P: FnMut(&V) -> bool,
    {
        self.lists
            .get_mut(key)
            .and_then(|list| list.iter_mut().find(|value| predicate(value)))
    }

    pub fn get(&self, key: &K) -> Option<&VecDeque<V>> {
        self.lists.get(key)
    }

    pub fn iter_key(&self, key: &K) -> impl Iterator<Item = &V> {
        self.lists.get(key).into_iter().flatten()
    }

    /// Iterate every `(key, value)` pair, keys in order, values front to back.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.lists
            .iter()
            .flat_map(|(key, list)| list.iter().map(move |value| (key, value)))
    }

    /// Remove the first value under `key` matching `predicate`.
    pub fn remove_first<P>(&mut self, key: &K, mut predicate: P) -> Option<V>
    where
        P: FnMut(&V) -> bool,
    {
        let list = self.lists.get_mut(key)?;
        let position = list.iter().position(|value| predicate(value))?;
        let removed = list.remove(position);
        if removed.is_some() {
            self.len -= 1;
        }
        self.drop_if_empty(key);
        removed
    }

    /// Remove every value under `key` matching `predicate`, preserving the
    /// order of both the removed and the remaining values.
    pub fn remove_all<P>(&mut self, key: &K, mut predicate: P) -> Vec<V>
    where
        P: FnMut(&V) -> bool,
    {
        let Some(list) = self.lists.get_mut(key) else {
            return Vec::new();
        };

        let mut removed = Vec::new();
        let mut kept = VecDeque::with_capacity(list.len());
        for value in list.drain(..) {
            if predicate(&value) {
                removed.push(value);
            } else {
                kept.push_back(value);
            }
        }
        *list = kept;

        self.len -= removed.len();
        self.drop_if_empty(key);
        removed
    }

    /// Keep only the values under `key` for which `f` returns true. `f` gets
    /// mutable access so callers can update values they keep.
    pub fn retain<F>(&mut self, key: &K, f: F) -> usize
    where
        F: FnMut(&mut V) -> bool,
    {
        let Some(list) = self.lists.get_mut(key) else {
            return 0;
        };
        let before = list.len();
        list.retain_mut(f);
        let removed = before - list.len();

        self.len -= removed;
        self.drop_if_empty(key);
        removed
    }

    /// Remove and return the whole list for `key`.
    pub fn take(&mut self, key: &K) -> VecDeque<V> {
        let list = self.lists.remove(key).unwrap_or_default();
        self.len -= list.len();
        list
    }

    pub fn sort_by<F>(&mut self, key: &K, compare: F)
    where
        F: FnMut(&V, &V) -> Ordering,
    {
        if let Some(list) = self.lists.get_mut(key) {
            list.make_contiguous().sort_by(compare);
        }
    }

    /// Keys that currently hold at least one value.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.lists.keys()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.lists.contains_key(key)
    }

    pub fn size(&self, key: &K) -> usize {
        self.lists.get(key).map_or(0, VecDeque::len)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.lists.clear();
        self.len = 0;
    }

    fn drop_if_empty(&mut self, key: &K) {
        if self.lists.get(key).is_some_and(VecDeque::is_empty) {
            self.lists.remove(key);
        }
    }
}

impl<K: Ord + Clone, V> Default for KeyedQueue<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
