//! Typed indices and the arenas they address.
//!
//! Every node of a compiled module, every engine slot and every task is
//! referred to by a small integer wrapped in a newtype. The newtypes
//! implement [`IndexRef`] through [`impl_index!`] and key into an
//! [`IndexedMap`](maps::IndexedMap) (the owning arena) or a
//! [`Tombstones`](maps::Tombstones) list whose keys are never reissued.

mod index_trait;
mod indexed_map;
mod macros;

pub use index_trait::IndexRef;

pub mod maps {
    pub use crate::indexed_map::{IndexedMap, Tombstones};
}
