use crate::errors::RuntimeResult;
use baa::BitVecValue;
use std::collections::BTreeMap;

/// Identifier of a variable as seen by the caller: the variable's position
/// in the module's declaration order.
pub type VId = u32;

/// Values of the non-volatile variables a module drives.
pub type State = BTreeMap<VId, BitVecValue>;

/// Values of a module's inputs.
pub type Input = BTreeMap<VId, BitVecValue>;

/// The capability set every back end implements, whether it simulates the
/// module in software, drives a device, or forwards to another server.
pub trait Engine: Send {
    fn get_state(&mut self) -> RuntimeResult<State>;

    /// Restores a snapshot. The engine resumes from a clean state with every
    /// pending update dropped.
    fn set_state(&mut self, state: &State) -> RuntimeResult<()>;

    fn get_input(&mut self) -> RuntimeResult<Input>;

    fn set_input(&mut self, input: &Input) -> RuntimeResult<()>;

    /// Called once after configuration and before the first evaluation.
    fn finalize(&mut self) -> RuntimeResult<()>;

    /// Delivers a single input value outside of a snapshot.
    fn read(&mut self, id: VId, bits: &BitVecValue) -> RuntimeResult<()>;

    /// Runs until no task is pending, then publishes every output.
    fn evaluate(&mut self) -> RuntimeResult<()>;

    fn there_are_updates(&mut self) -> RuntimeResult<bool>;

    /// Commits buffered non-blocking writes and evaluates.
    fn update(&mut self) -> RuntimeResult<()>;

    /// Whether the last `evaluate`, `update` or `open_loop` ran into a task
    /// only the caller can handle.
    fn there_were_tasks(&mut self) -> RuntimeResult<bool>;

    /// Updates if there is anything to update. Returns whether it did.
    fn conditional_update(&mut self) -> RuntimeResult<bool> {
        if self.there_are_updates()? {
            self.update()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Toggles `clk` for up to `itr` ticks, stopping after the tick in which
    /// a caller-visible task fires. Returns the number of ticks run.
    fn open_loop(
        &mut self,
        clk: VId,
        val: bool,
        itr: u32,
    ) -> RuntimeResult<u32>;

    fn overrides_done_step(&mut self) -> RuntimeResult<bool> {
        Ok(false)
    }

    fn done_step(&mut self) -> RuntimeResult<()> {
        Ok(())
    }

    fn overrides_done_simulation(&mut self) -> RuntimeResult<bool> {
        Ok(false)
    }

    fn done_simulation(&mut self) -> RuntimeResult<()> {
        Ok(())
    }
}
