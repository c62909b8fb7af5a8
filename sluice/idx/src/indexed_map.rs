use super::index_trait::IndexRef;
use std::{marker::PhantomData, ops};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An arena. Elements are only ever appended, so a key handed out by
/// [`IndexedMap::push`] stays valid for the lifetime of the map.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct IndexedMap<K, D>
where
    K: IndexRef,
{
    data: Vec<D>,
    #[cfg_attr(feature = "serde", serde(skip))]
    phantom: PhantomData<K>,
}

impl<K, D> ops::IndexMut<K> for IndexedMap<K, D>
where
    K: IndexRef,
{
    fn index_mut(&mut self, index: K) -> &mut Self::Output {
        &mut self.data[index.index()]
    }
}

impl<K, D> ops::Index<K> for IndexedMap<K, D>
where
    K: IndexRef,
{
    type Output = D;

    fn index(&self, index: K) -> &Self::Output {
        &self.data[index.index()]
    }
}

impl<K, D> IndexedMap<K, D>
where
    K: IndexRef,
{
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            phantom: PhantomData,
        }
    }

    pub fn get(&self, index: K) -> Option<&D> {
        self.data.get(index.index())
    }

    pub fn get_mut(&mut self, index: K) -> Option<&mut D> {
        self.data.get_mut(index.index())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn push(&mut self, item: D) -> K {
        self.data.push(item);
        K::new(self.data.len() - 1)
    }

    /// The key the next call to [IndexedMap::push] will return.
    pub fn peek_next_idx(&self) -> K {
        K::new(self.data.len())
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (K, &D)> {
        self.data.iter().enumerate().map(|(i, v)| (K::new(i), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (K, &mut D)> {
        self.data.iter_mut().enumerate().map(|(i, v)| (K::new(i), v))
    }

    pub fn values(&self) -> impl Iterator<Item = &D> {
        self.data.iter()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut D> {
        self.data.iter_mut()
    }

    pub fn keys(&self) -> impl Iterator<Item = K> + use<K, D> {
        (0..self.data.len()).map(K::new)
    }
}

impl<K, D> Default for IndexedMap<K, D>
where
    K: IndexRef,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, D> FromIterator<D> for IndexedMap<K, D>
where
    K: IndexRef,
{
    fn from_iter<T: IntoIterator<Item = D>>(iter: T) -> Self {
        Self {
            data: iter.into_iter().collect(),
            phantom: PhantomData,
        }
    }
}

/// An append-only list whose entries can be retired but never removed.
///
/// Retiring an entry leaves a hole behind, so every key ever returned by
/// [`Tombstones::push`] keeps addressing the same slot and is never handed
/// out again.
#[derive(Debug, Clone)]
pub struct Tombstones<K, D>
where
    K: IndexRef,
{
    slots: IndexedMap<K, Option<D>>,
}

impl<K, D> Tombstones<K, D>
where
    K: IndexRef,
{
    pub fn new() -> Self {
        Self {
            slots: IndexedMap::new(),
        }
    }

    pub fn push(&mut self, item: D) -> K {
        self.slots.push(Some(item))
    }

    /// Returns the live entry at `key`, if the key was issued and has not
    /// been retired.
    pub fn get(&self, key: K) -> Option<&D> {
        self.slots.get(key).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut D> {
        self.slots.get_mut(key).and_then(Option::as_mut)
    }

    /// Retires the entry at `key` and hands it back. The slot stays occupied
    /// by a hole.
    pub fn retire(&mut self, key: K) -> Option<D> {
        self.slots.get_mut(key).and_then(Option::take)
    }

    /// Number of keys ever issued, holes included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn live(&self) -> impl Iterator<Item = (K, &D)> {
        self.slots
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k, v)))
    }

    /// Retires every live entry, returning them in key order.
    pub fn drain_live(&mut self) -> Vec<D> {
        self.slots.values_mut().filter_map(Option::take).collect()
    }
}

impl<K, D> Default for Tombstones<K, D>
where
    K: IndexRef,
{
    fn default() -> Self {
        Self::new()
    }
}
