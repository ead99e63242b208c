//! Update-driven systems.
//!
//! A [`System`] is anything that wants to run once per
//! [`World::update`](crate::world::World::update). Systems run in
//! registration order; there is no scheduling beyond that.

use serde::{Deserialize, Serialize};

use crate::world::World;

/// Behaviour run once per world update.
pub trait System {
    fn update(&mut self, world: &mut World, time: f32);
}

impl<F> System for F
where
    F: FnMut(&mut World, f32),
{
    fn update(&mut self, world: &mut World, time: f32) {
        self(world, time)
    }
}

/// Identifies a registered system for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SystemId(pub u32);

// ---------------------------------------------------------------------------
// SystemList
// ---------------------------------------------------------------------------

/// The world's ordered system list.
///
/// While an update runs, the entries are moved out so each system can
/// borrow the world mutably. Systems registered during that time land in
/// the (temporarily empty) list and are appended after the running ones
/// when the update finishes.
#[derive(Default)]
pub(crate) struct SystemList {
    entries: Vec<(SystemId, Box<dyn System>)>,
    next_id: u32,
}

impl SystemList {
    pub fn push(&mut self, system: Box<dyn System>) -> SystemId {
        let id = SystemId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, system));
        id
    }

    pub fn remove(&mut self, id: SystemId) -> bool {
        match self.entries.iter().position(|(sid, _)| *sid == id) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Move the current entries out for running.
    pub fn take(&mut self) -> Vec<(SystemId, Box<dyn System>)> {
        std::mem::take(&mut self.entries)
    }

    /// Put entries taken by [`take`](Self::take) back in front of anything
    /// registered meanwhile.
    pub fn restore(&mut self, mut ran: Vec<(SystemId, Box<dyn System>)>) {
        ran.append(&mut self.entries);
        self.entries = ran;
    }
}

impl std::fmt::Debug for SystemList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemList")
            .field("ids", &self.entries.iter().map(|(id, _)| *id).collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
