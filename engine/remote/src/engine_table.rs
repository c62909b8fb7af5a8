//! Compiled engines by client, logical engine and instance.
use parking_lot::Mutex;
use sluice_engine::Engine;
use sluice_idx::impl_index;
use sluice_idx::maps::Tombstones;
use sluice_idx::IndexRef;
use std::collections::HashMap;
use std::sync::Arc;

/// Position of an engine in the instance list of its logical engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceIdx(u32);
impl_index!(InstanceIdx);

pub type EngineRef = Arc<Mutex<Box<dyn Engine>>>;

/// Every compile of a logical engine appends an instance. Torn down
/// instances leave a hole, so indices handed to clients stay valid and are
/// never reissued.
#[derive(Default)]
pub struct EngineTable {
    slots: HashMap<(u32, u32), Tombstones<InstanceIdx, EngineRef>>,
}

impl EngineTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        client: u32,
        engine: u32,
        instance: Box<dyn Engine>,
    ) -> u32 {
        let idx = self
            .slots
            .entry((client, engine))
            .or_default()
            .push(Arc::new(Mutex::new(instance)));
        idx.index() as u32
    }

    pub fn get(
        &self,
        client: u32,
        engine: u32,
        instance: u32,
    ) -> Option<EngineRef> {
        self.slots
            .get(&(client, engine))?
            .get(InstanceIdx::new(instance as usize))
            .cloned()
    }

    pub fn teardown(
        &mut self,
        client: u32,
        engine: u32,
        instance: u32,
    ) -> Option<EngineRef> {
        self.slots
            .get_mut(&(client, engine))?
            .retire(InstanceIdx::new(instance as usize))
    }

    /// Tears down every engine of a client. The slots are kept, so a client
    /// id is never able to see an index twice.
    pub fn teardown_client(&mut self, client: u32) -> Vec<EngineRef> {
        self.slots
            .iter_mut()
            .filter(|((c, _), _)| *c == client)
            .flat_map(|(_, slot)| slot.drain_live())
            .collect()
    }

    pub fn drain(&mut self) -> Vec<EngineRef> {
        self.slots
            .values_mut()
            .flat_map(|slot| slot.drain_live())
            .collect()
    }

    /// Instances ever issued for a logical engine, torn down ones included.
    pub fn issued(&self, client: u32, engine: u32) -> usize {
        self.slots.get(&(client, engine)).map_or(0, Tombstones::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baa::BitVecValue;
    use proptest::prelude::*;
    use sluice_engine::{Input, RuntimeResult, State, VId};

    struct Null;

    impl Engine for Null {
        fn get_state(&mut self) -> RuntimeResult<State> {
            Ok(State::new())
        }
        fn set_state(&mut self, _: &State) -> RuntimeResult<()> {
            Ok(())
        }
        fn get_input(&mut self) -> RuntimeResult<Input> {
            Ok(Input::new())
        }
        fn set_input(&mut self, _: &Input) -> RuntimeResult<()> {
            Ok(())
        }
        fn finalize(&mut self) -> RuntimeResult<()> {
            Ok(())
        }
        fn read(&mut self, _: VId, _: &BitVecValue) -> RuntimeResult<()> {
            Ok(())
        }
        fn evaluate(&mut self) -> RuntimeResult<()> {
            Ok(())
        }
        fn there_are_updates(&mut self) -> RuntimeResult<bool> {
            Ok(false)
        }
        fn update(&mut self) -> RuntimeResult<()> {
            Ok(())
        }
        fn there_were_tasks(&mut self) -> RuntimeResult<bool> {
            Ok(false)
        }
        fn open_loop(
            &mut self,
            _: VId,
            _: bool,
            itr: u32,
        ) -> RuntimeResult<u32> {
            Ok(itr)
        }
    }

    #[derive(Debug, Clone)]
    enum Op {
        Compile(u32, u32),
        Teardown(u32, u32, u32),
        Disconnect(u32),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..3u32, 0..3u32).prop_map(|(c, e)| Op::Compile(c, e)),
            (0..3u32, 0..3u32, 0..6u32)
                .prop_map(|(c, e, i)| Op::Teardown(c, e, i)),
            (0..3u32).prop_map(Op::Disconnect),
        ]
    }

    proptest! {
        #[test]
        fn indices_are_never_reissued(
            ops in prop::collection::vec(op(), 1..60),
        ) {
            let mut table = EngineTable::new();
            let mut issued: HashMap<(u32, u32), Vec<(EngineRef, bool)>> =
                HashMap::new();
            for op in ops {
                match op {
                    Op::Compile(c, e) => {
                        let idx = table.push(c, e, Box::new(Null));
                        let list = issued.entry((c, e)).or_default();
                        prop_assert_eq!(idx as usize, list.len());
                        let engine = table.get(c, e, idx).unwrap();
                        list.push((engine, true));
                    }
                    Op::Teardown(c, e, i) => {
                        table.teardown(c, e, i);
                        let entry = issued
                            .get_mut(&(c, e))
                            .and_then(|l| l.get_mut(i as usize));
                        if let Some(entry) = entry {
                            entry.1 = false;
                        }
                    }
                    Op::Disconnect(c) => {
                        table.teardown_client(c);
                        let lists = issued
                            .iter_mut()
                            .filter(|((k, _), _)| *k == c);
                        for (_, list) in lists {
                            list.iter_mut().for_each(|entry| entry.1 = false);
                        }
                    }
                }
            }
            for ((c, e), list) in &issued {
                prop_assert_eq!(table.issued(*c, *e), list.len());
                for (i, (engine, live)) in list.iter().enumerate() {
                    let found = table.get(*c, *e, i as u32);
                    prop_assert_eq!(found.is_some(), *live);
                    if let Some(found) = found {
                        prop_assert!(Arc::ptr_eq(&found, engine));
                    }
                }
            }
        }
    }

    #[test]
    fn unknown_engines_are_absent() {
        let mut table = EngineTable::new();
        assert!(table.get(0, 0, 0).is_none());
        assert!(table.teardown(0, 0, 0).is_none());
        table.push(0, 0, Box::new(Null));
        assert!(table.get(0, 0, 1).is_none());
        assert!(table.get(1, 0, 0).is_none());
    }
}
