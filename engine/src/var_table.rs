//! The Variable/Control Table: where each variable and control signal lives
//! in a substrate's register file.
use crate::bits;
use crate::errors::RuntimeResult;
use crate::substrate::Substrate;
use baa::BitVecValue;
use sluice_idx::maps::IndexedMap;
use sluice_ir::{Module, VarIdx};
use sluice_utils::words_for;

/// The fixed control registers. They occupy the lowest addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    /// Write: pause every machine, return it to its terminal state and drop
    /// buffered updates.
    Reset,
    /// Write: let the machine with the pending task continue, or every
    /// paused machine when no task is pending.
    Resume,
    /// Read: non-zero while the substrate is still running.
    Wait,
    /// Remaining open-loop ticks.
    OpenLoop,
    /// Write: commit buffered non-blocking writes.
    ApplyUpdate,
    /// Read: whether any non-blocking write is buffered.
    ThereAreUpdates,
    /// Read: id of the pending task, zero if none.
    TaskId,
    /// Write `(fd << 1) | eof` to set the end-of-file flag of a stream.
    Feof,
}

impl Control {
    pub const ALL: [Control; 8] = [
        Control::Reset,
        Control::Resume,
        Control::Wait,
        Control::OpenLoop,
        Control::ApplyUpdate,
        Control::ThereAreUpdates,
        Control::TaskId,
        Control::Feof,
    ];

    pub fn addr(self) -> u64 {
        self as u64
    }

    pub fn from_addr(addr: u64) -> Option<Self> {
        Self::ALL.get(usize::try_from(addr).ok()?).copied()
    }
}

/// Where one variable lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub addr: u64,
    pub width: u32,
}

impl Slot {
    pub fn words(&self) -> u32 {
        words_for(self.width)
    }
}

/// Variables are laid out after the control registers in declaration
/// order, one register per 64-bit word.
#[derive(Debug, Clone)]
pub struct VarLayout {
    slots: IndexedMap<VarIdx, Slot>,
    end: u64,
}

impl VarLayout {
    pub fn new(module: &Module) -> Self {
        let mut next = Control::ALL.len() as u64;
        let slots = module
            .vars
            .values()
            .map(|decl| {
                let slot = Slot {
                    addr: next,
                    width: decl.width,
                };
                next += slot.words() as u64;
                slot
            })
            .collect();
        Self { slots, end: next }
    }

    pub fn slot(&self, var: VarIdx) -> Slot {
        self.slots[var]
    }

    /// One past the highest address in use.
    pub fn end(&self) -> u64 {
        self.end
    }

    /// The variable and word stored at `addr`.
    pub fn decode(&self, addr: u64) -> Option<(VarIdx, u32)> {
        self.slots
            .iter()
            .rev()
            .find(|(_, slot)| slot.addr <= addr)
            .filter(|(_, slot)| addr < slot.addr + slot.words() as u64)
            .map(|(var, slot)| (var, (addr - slot.addr) as u32))
    }
}

/// Typed access to a substrate through a layout.
pub struct VarTable<S> {
    layout: VarLayout,
    substrate: S,
}

impl<S: Substrate> VarTable<S> {
    pub fn new(layout: VarLayout, substrate: S) -> Self {
        Self { layout, substrate }
    }

    pub fn layout(&self) -> &VarLayout {
        &self.layout
    }

    pub fn substrate_mut(&mut self) -> &mut S {
        &mut self.substrate
    }

    pub fn read_var(&mut self, var: VarIdx) -> RuntimeResult<Vec<u64>> {
        let slot = self.layout.slot(var);
        (0..slot.words() as u64)
            .map(|w| self.substrate.read(slot.addr + w))
            .collect()
    }

    pub fn write_var(
        &mut self,
        var: VarIdx,
        words: &[u64],
    ) -> RuntimeResult<()> {
        let slot = self.layout.slot(var);
        for w in 0..slot.words() {
            let word = words.get(w as usize).copied().unwrap_or(0);
            self.substrate.write(slot.addr + w as u64, word)?;
        }
        Ok(())
    }

    pub fn read_bits(&mut self, var: VarIdx) -> RuntimeResult<BitVecValue> {
        let width = self.layout.slot(var).width;
        Ok(bits::from_words(&self.read_var(var)?, width))
    }

    pub fn write_bits(
        &mut self,
        var: VarIdx,
        value: &BitVecValue,
    ) -> RuntimeResult<()> {
        let width = self.layout.slot(var).width;
        self.write_var(var, &bits::to_words(value, width))
    }

    pub fn read_control(&mut self, control: Control) -> RuntimeResult<u64> {
        self.substrate.read(control.addr())
    }

    pub fn write_control(
        &mut self,
        control: Control,
        value: u64,
    ) -> RuntimeResult<()> {
        self.substrate.write(control.addr(), value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_ir::Builder;

    #[test]
    fn variables_follow_the_control_registers() {
        let mut m = Module::new("m");
        let mut b = Builder::new(&mut m);
        let a = b.input("a", 1);
        let wide = b.reg("wide", 130);
        let c = b.output("c", 64);
        let layout = VarLayout::new(&m);
        assert_eq!(layout.slot(a).addr, 8);
        assert_eq!(layout.slot(wide).addr, 9);
        assert_eq!(layout.slot(c).addr, 12);
        assert_eq!(layout.end(), 13);
        assert_eq!(layout.decode(11), Some((wide, 2)));
        assert_eq!(layout.decode(12), Some((c, 0)));
        assert_eq!(layout.decode(3), None);
        assert_eq!(layout.decode(13), None);
    }

    #[test]
    fn control_addresses_round_trip() {
        for control in Control::ALL {
            assert_eq!(Control::from_addr(control.addr()), Some(control));
        }
        assert_eq!(Control::from_addr(8), None);
    }
}
