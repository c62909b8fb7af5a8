use serde::{Deserialize, Serialize};
use sluice_idx::{impl_index, impl_index_nonzero};
use std::num::NonZeroU16;

/// A variable declared by a module.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
pub struct VarIdx(u32);
impl_index!(VarIdx);

/// A node in the expression arena.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
pub struct ExprIdx(u32);
impl_index!(ExprIdx);

/// A node in the statement arena.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
pub struct StmtIdx(u32);
impl_index!(StmtIdx);

/// An always block.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
pub struct BlockIdx(u32);
impl_index!(BlockIdx);

/// Identifier of an indexed task. Task ids travel through a 16-bit register
/// where zero means that no task is pending, so the raw value of the first
/// task is 1.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
pub struct TaskIdx(NonZeroU16);
impl_index_nonzero!(TaskIdx, NonZeroU16);

/// Value of the task-id register after a reset, before the first resume.
pub const UNRESOLVED_TASK: u16 = 0xffff;

impl TaskIdx {
    /// The value written into the task-id register for this task.
    pub fn raw(self) -> u16 {
        self.0.get()
    }

    /// Decodes a task-id register value. Zero decodes to `None`.
    pub fn from_raw(raw: u16) -> Option<Self> {
        NonZeroU16::new(raw).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_idx::IndexRef;

    #[test]
    fn task_ids_start_at_one() {
        let first = TaskIdx::new(0);
        assert_eq!(first.raw(), 1);
        assert_eq!(first.index(), 0);
        assert_eq!(TaskIdx::from_raw(1), Some(first));
        assert_eq!(TaskIdx::from_raw(0), None);
    }
}
