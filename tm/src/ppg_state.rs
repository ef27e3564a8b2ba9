// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Translation between the PPG ids handed to clients and the PPG handles
//! used inside the driver.
//!
//! Each pipe has its own namespace of ids.  A second map, from the id of a
//! PPG's drop counter to the PPG's id, lets counter reports be attributed to
//! the PPG a client knows about.
//!
//! [`PpgStateMap`] takes its lock for each operation.  A caller that needs
//! several operations to happen together takes the lock once with
//! [`PpgStateMap::lock`] and works on the [`PpgState`] directly.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard};

use aal::PipeId;

use crate::types::{TmError, TmResult};

/// The id a client uses to name a PPG.
pub type PpgId = u32;

/// The driver's handle for a PPG.
pub type PpgHdl = u32;

/// The id of a PPG's drop counter.
pub type CounterId = u32;

#[derive(Debug, Default)]
struct PipePpgs {
    by_id: BTreeMap<PpgId, PpgHdl>,
    by_hdl: BTreeMap<PpgHdl, PpgId>,
    counters: BTreeMap<CounterId, PpgId>,
}

/// The id/handle maps of every pipe on a device, without any locking.
#[derive(Debug)]
pub struct PpgState {
    pipes: Vec<PipePpgs>,
}

impl PpgState {
    pub fn new(pipes: u8) -> Self {
        PpgState {
            pipes: (0..pipes).map(|_| PipePpgs::default()).collect(),
        }
    }

    fn pipe(&self, pipe: PipeId) -> TmResult<&PipePpgs> {
        self.pipes
            .get(usize::from(pipe))
            .ok_or_else(|| TmError::InvalidArg(format!("no such pipe: {pipe}")))
    }

    fn pipe_mut(&mut self, pipe: PipeId) -> TmResult<&mut PipePpgs> {
        self.pipes
            .get_mut(usize::from(pipe))
            .ok_or_else(|| TmError::InvalidArg(format!("no such pipe: {pipe}")))
    }

    pub fn add(
        &mut self,
        pipe: PipeId,
        id: PpgId,
        hdl: PpgHdl,
    ) -> TmResult<()> {
        let p = self.pipe_mut(pipe)?;
        if p.by_id.contains_key(&id) {
            return Err(TmError::AlreadyExists(format!(
                "ppg id {id} on pipe {pipe}"
            )));
        }
        if p.by_hdl.contains_key(&hdl) {
            return Err(TmError::AlreadyExists(format!(
                "ppg handle {hdl:#x} on pipe {pipe}"
            )));
        }
        if p.by_id.len() != p.by_hdl.len() {
            return Err(TmError::Unexpected(format!(
                "ppg maps for pipe {pipe} have {} ids but {} handles",
                p.by_id.len(),
                p.by_hdl.len()
            )));
        }
        p.by_id.insert(id, hdl);
        p.by_hdl.insert(hdl, id);
        Ok(())
    }

    /// Remove a PPG, returning its handle.
    pub fn del(&mut self, pipe: PipeId, id: PpgId) -> TmResult<PpgHdl> {
        let p = self.pipe_mut(pipe)?;
        let hdl = p.by_id.remove(&id).ok_or_else(|| {
            TmError::ObjectNotFound(format!("ppg id {id} on pipe {pipe}"))
        })?;
        p.by_hdl.remove(&hdl);
        Ok(hdl)
    }

    pub fn get(&self, pipe: PipeId, id: PpgId) -> TmResult<PpgHdl> {
        self.pipe(pipe)?.by_id.get(&id).copied().ok_or_else(|| {
            TmError::ObjectNotFound(format!("ppg id {id} on pipe {pipe}"))
        })
    }

    pub fn get_by_handle(&self, pipe: PipeId, hdl: PpgHdl) -> TmResult<PpgId> {
        self.pipe(pipe)?.by_hdl.get(&hdl).copied().ok_or_else(|| {
            TmError::ObjectNotFound(format!(
                "ppg handle {hdl:#x} on pipe {pipe}"
            ))
        })
    }

    /// The lowest PPG id on a pipe, with its handle.
    pub fn get_first(&self, pipe: PipeId) -> TmResult<(PpgId, PpgHdl)> {
        self.pipe(pipe)?
            .by_id
            .first_key_value()
            .map(|(id, hdl)| (*id, *hdl))
            .ok_or_else(|| {
                TmError::ObjectNotFound(format!("no ppgs on pipe {pipe}"))
            })
    }

    /// The lowest PPG id greater than `id`, with its handle.  `id` itself
    /// need not exist.
    pub fn get_next(
        &self,
        pipe: PipeId,
        id: PpgId,
    ) -> TmResult<(PpgId, PpgHdl)> {
        self.pipe(pipe)?
            .by_id
            .range((Bound::Excluded(id), Bound::Unbounded))
            .next()
            .map(|(id, hdl)| (*id, *hdl))
            .ok_or_else(|| {
                TmError::ObjectNotFound(format!(
                    "no ppg after {id} on pipe {pipe}"
                ))
            })
    }

    pub fn len(&self, pipe: PipeId) -> TmResult<usize> {
        Ok(self.pipe(pipe)?.by_id.len())
    }

    pub fn is_empty(&self, pipe: PipeId) -> TmResult<bool> {
        self.len(pipe).map(|len| len == 0)
    }

    pub fn counter_add(
        &mut self,
        pipe: PipeId,
        counter: CounterId,
        id: PpgId,
    ) -> TmResult<()> {
        let p = self.pipe_mut(pipe)?;
        if p.counters.contains_key(&counter) {
            return Err(TmError::AlreadyExists(format!(
                "counter {counter} on pipe {pipe}"
            )));
        }
        p.counters.insert(counter, id);
        Ok(())
    }

    pub fn counter_get(
        &self,
        pipe: PipeId,
        counter: CounterId,
    ) -> TmResult<PpgId> {
        self.pipe(pipe)?
            .counters
            .get(&counter)
            .copied()
            .ok_or_else(|| {
                TmError::ObjectNotFound(format!(
                    "counter {counter} on pipe {pipe}"
                ))
            })
    }

    pub fn counter_del(
        &mut self,
        pipe: PipeId,
        counter: CounterId,
    ) -> TmResult<PpgId> {
        self.pipe_mut(pipe)?.counters.remove(&counter).ok_or_else(|| {
            TmError::ObjectNotFound(format!("counter {counter} on pipe {pipe}"))
        })
    }

    /// Forget every PPG and counter on every pipe.
    pub fn clear(&mut self) {
        for p in &mut self.pipes {
            *p = PipePpgs::default();
        }
    }
}

/// A [`PpgState`] behind a mutex.
#[derive(Debug)]
pub struct PpgStateMap {
    state: Mutex<PpgState>,
}

impl PpgStateMap {
    pub fn new(pipes: u8) -> Self {
        PpgStateMap {
            state: Mutex::new(PpgState::new(pipes)),
        }
    }

    /// Take the lock, for a sequence of operations that must not be
    /// interleaved with any other.
    pub fn lock(&self) -> MutexGuard<'_, PpgState> {
        self.state.lock().unwrap()
    }

    pub fn add(&self, pipe: PipeId, id: PpgId, hdl: PpgHdl) -> TmResult<()> {
        self.lock().add(pipe, id, hdl)
    }

    pub fn del(&self, pipe: PipeId, id: PpgId) -> TmResult<PpgHdl> {
        self.lock().del(pipe, id)
    }

    pub fn get(&self, pipe: PipeId, id: PpgId) -> TmResult<PpgHdl> {
        self.lock().get(pipe, id)
    }

    pub fn get_by_handle(&self, pipe: PipeId, hdl: PpgHdl) -> TmResult<PpgId> {
        self.lock().get_by_handle(pipe, hdl)
    }

    pub fn get_first(&self, pipe: PipeId) -> TmResult<(PpgId, PpgHdl)> {
        self.lock().get_first(pipe)
    }

    pub fn get_next(
        &self,
        pipe: PipeId,
        id: PpgId,
    ) -> TmResult<(PpgId, PpgHdl)> {
        self.lock().get_next(pipe, id)
    }

    pub fn counter_add(
        &self,
        pipe: PipeId,
        counter: CounterId,
        id: PpgId,
    ) -> TmResult<()> {
        self.lock().counter_add(pipe, counter, id)
    }

    pub fn counter_get(
        &self,
        pipe: PipeId,
        counter: CounterId,
    ) -> TmResult<PpgId> {
        self.lock().counter_get(pipe, counter)
    }

    pub fn counter_del(
        &self,
        pipe: PipeId,
        counter: CounterId,
    ) -> TmResult<PpgId> {
        self.lock().counter_del(pipe, counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_get_del() {
        let map = PpgStateMap::new(2);
        map.add(1, 7, 0x1003).unwrap();
        assert_eq!(map.get(1, 7).unwrap(), 0x1003);
        assert_eq!(map.get_by_handle(1, 0x1003).unwrap(), 7);
        assert!(matches!(map.get(0, 7), Err(TmError::ObjectNotFound(_))));

        // Both directions are checked for collisions.
        assert!(matches!(
            map.add(1, 7, 0x2000),
            Err(TmError::AlreadyExists(_))
        ));
        assert!(matches!(
            map.add(1, 8, 0x1003),
            Err(TmError::AlreadyExists(_))
        ));
        assert!(matches!(map.add(2, 1, 1), Err(TmError::InvalidArg(_))));

        // The failed adds left both directions as they were.
        assert_eq!(map.lock().len(1).unwrap(), 1);
        assert_eq!(map.get(1, 7).unwrap(), 0x1003);
        assert!(matches!(
            map.get_by_handle(1, 0x2000),
            Err(TmError::ObjectNotFound(_))
        ));
        assert!(matches!(map.get(1, 8), Err(TmError::ObjectNotFound(_))));
        assert_eq!(map.lock().pipes[1].by_hdl.len(), 1);

        assert_eq!(map.del(1, 7).unwrap(), 0x1003);
        assert!(matches!(
            map.get_by_handle(1, 0x1003),
            Err(TmError::ObjectNotFound(_))
        ));
        assert!(matches!(map.del(1, 7), Err(TmError::ObjectNotFound(_))));
    }

    #[test]
    fn test_iteration() {
        let map = PpgStateMap::new(1);
        assert!(matches!(map.get_first(0), Err(TmError::ObjectNotFound(_))));
        for id in [30, 10, 20] {
            map.add(0, id, id + 100).unwrap();
        }
        assert_eq!(map.get_first(0).unwrap(), (10, 110));
        assert_eq!(map.get_next(0, 10).unwrap(), (20, 120));
        assert_eq!(map.get_next(0, 15).unwrap(), (20, 120));
        assert_eq!(map.get_next(0, 20).unwrap(), (30, 130));
        assert!(matches!(
            map.get_next(0, 30),
            Err(TmError::ObjectNotFound(_))
        ));
    }

    #[test]
    fn test_directions_stay_in_step() {
        let map = PpgStateMap::new(1);
        let steps: [(bool, PpgId, PpgHdl); 9] = [
            (true, 1, 10),
            (true, 2, 20),
            (true, 2, 30),
            (true, 3, 20),
            (false, 1, 0),
            (false, 1, 0),
            (true, 1, 20),
            (true, 4, 10),
            (false, 2, 0),
        ];
        for (add, id, hdl) in steps {
            let _ = if add {
                map.add(0, id, hdl)
            } else {
                map.del(0, id).map(|_| ())
            };
            let state = map.lock();
            let p = &state.pipes[0];
            assert_eq!(p.by_id.len(), p.by_hdl.len());
            for (id, hdl) in &p.by_id {
                assert_eq!(p.by_hdl.get(hdl), Some(id));
            }
        }
        assert_eq!(map.get_first(0).unwrap(), (4, 10));
        assert!(matches!(
            map.get_next(0, 4),
            Err(TmError::ObjectNotFound(_))
        ));
    }

    #[test]
    fn test_drifted_maps() {
        let map = PpgStateMap::new(1);
        map.add(0, 1, 1).unwrap();
        {
            let mut state = map.lock();
            state.pipes[0].by_hdl.insert(99, 42);
        }
        assert!(matches!(map.add(0, 2, 2), Err(TmError::Unexpected(_))));
    }

    #[test]
    fn test_counters() {
        let map = PpgStateMap::new(1);
        map.counter_add(0, 5, 70).unwrap();
        assert!(matches!(
            map.counter_add(0, 5, 71),
            Err(TmError::AlreadyExists(_))
        ));
        assert_eq!(map.counter_get(0, 5).unwrap(), 70);
        assert_eq!(map.counter_del(0, 5).unwrap(), 70);
        assert!(matches!(
            map.counter_get(0, 5),
            Err(TmError::ObjectNotFound(_))
        ));
    }

    #[test]
    fn test_locked_transaction() {
        let map = PpgStateMap::new(1);
        {
            let mut state = map.lock();
            state.add(0, 1, 10).unwrap();
            state.counter_add(0, 10, 1).unwrap();
            assert_eq!(state.len(0).unwrap(), 1);
        }
        map.lock().clear();
        assert!(map.lock().is_empty(0).unwrap());
    }
}
