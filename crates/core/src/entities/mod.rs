//! Access to the game's live entities
//!
//! The game owns its instance list and may change or free any entry at any
//! time. This module only sees it through three capabilities: a traversal,
//! a removal request, and a pointer check. Production implementations live
//! in [`instances`]; [`sweep`] is the consumer.

pub mod instances;
pub mod sweep;

use std::fmt;

pub use instances::{game_sweep, InstanceLayout, InstanceList, ProcessValidator, RemoveInstance};
pub use sweep::{EntitySweep, SweepReport, SweepTimer};

/// Address of a live game instance
///
/// Never owned; may dangle as soon as the game frees the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityHandle(usize);

impl EntityHandle {
    /// Wrap a non-null instance address
    pub fn new(address: usize) -> Option<Self> {
        (address != 0).then_some(Self(address))
    }

    pub fn address(self) -> usize {
        self.0
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// One entry produced by an [`EntityList`] traversal
#[derive(Debug, Clone, Copy)]
pub struct VisitedEntity<'a> {
    /// The instance, or `None` for an empty slot
    pub handle: Option<EntityHandle>,
    /// Display name without terminator, or `None` when the object or its
    /// name is absent
    pub name: Option<&'a [u8]>,
}

/// Traversal over the game's live entities
pub trait EntityList: Send {
    /// Call `visitor` once per live entity
    ///
    /// The visitor must not mutate the list.
    fn for_each(&self, visitor: &mut dyn FnMut(VisitedEntity<'_>));
}

/// Removal of a live entity
pub trait EntityDestroyer: Send {
    /// Ask the game to remove `handle`
    ///
    /// `reserved` is passed through unchanged (always zero); `graceful =
    /// false` requests immediate removal.
    fn destroy(&mut self, handle: EntityHandle, reserved: i32, graceful: bool);
}

/// Check that a handle still points at readable memory
pub trait PointerValidator: Send {
    fn is_valid(&self, handle: EntityHandle, size: usize) -> bool;
}
