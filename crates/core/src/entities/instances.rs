//! The game's instance list
//!
//! Active instances form a singly linked list whose head pointer sits at a
//! fixed RVA. Each instance points at the object it was spawned from, and
//! the object points at its display name. None of these layouts are known at
//! build time; they come from gamedata.

use cdchook_engine::ModuleInfo;
use cdchook_sdk::signatures::offsets;
use cdchook_sdk::{Instance, RemoveInstanceFn, OBJECT_NAME_CAPACITY};

use crate::config::SweepConfig;
use crate::gamedata::{Gamedata, GamedataError};
use crate::memory::{is_readable, read_c_bytes, read_usize};

use super::{EntityDestroyer, EntityHandle, EntityList, EntitySweep, PointerValidator, VisitedEntity};

/// Upper bound on instances visited per traversal, guards against cycles
const MAX_INSTANCES: usize = 0x4000;

/// Addresses and field offsets of the instance list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceLayout {
    /// Absolute address of the pointer to the first instance
    pub list_head: usize,
    /// Absolute address of the removal routine
    pub remove_instance: usize,
    /// Offset of `Instance::next`
    pub next: usize,
    /// Offset of `Instance::object`
    pub object: usize,
    /// Offset of `Object::name`
    pub name: usize,
    /// Size of an instance, checked before removal
    pub size: usize,
}

impl InstanceLayout {
    /// Resolve the layout from gamedata offsets relative to the main module
    pub fn from_gamedata(gamedata: &Gamedata, module: &ModuleInfo) -> Result<Self, GamedataError> {
        let rva = |name: &str| -> Result<usize, GamedataError> {
            let rva = gamedata.offset_usize(name)?;
            module.rva(rva).ok_or_else(|| {
                GamedataError::OffsetNotFound(format!("{} ({:#x} outside main module)", name, rva))
            })
        };

        Ok(Self {
            list_head: rva(offsets::INSTANCE_LIST)?,
            remove_instance: rva(offsets::REMOVE_INSTANCE)?,
            next: gamedata.offset_usize(offsets::INSTANCE_NEXT)?,
            object: gamedata.offset_usize(offsets::INSTANCE_OBJECT)?,
            name: gamedata.offset_usize(offsets::OBJECT_NAME)?,
            size: gamedata.offset_usize(offsets::INSTANCE_SIZE)?,
        })
    }
}

/// Traversal of the live instance list through validated reads
pub struct InstanceList {
    layout: InstanceLayout,
}

impl InstanceList {
    /// # Safety
    /// `layout` must describe the running binary.
    pub unsafe fn new(layout: InstanceLayout) -> Self {
        Self { layout }
    }

    fn read_name(&self, instance: usize) -> Option<Vec<u8>> {
        let object = read_usize(instance + self.layout.object).filter(|&p| p != 0)?;
        let name = read_usize(object + self.layout.name).filter(|&p| p != 0)?;
        read_c_bytes(name, OBJECT_NAME_CAPACITY)
    }
}

impl EntityList for InstanceList {
    fn for_each(&self, visitor: &mut dyn FnMut(VisitedEntity<'_>)) {
        let mut current = read_usize(self.layout.list_head).unwrap_or(0);
        let mut visited = 0;

        while current != 0 {
            if visited == MAX_INSTANCES {
                tracing::warn!("Instance list exceeds {} entries, stopping", MAX_INSTANCES);
                break;
            }
            if !is_readable(current, self.layout.size) {
                tracing::debug!("Instance list entry {:#x} unreadable, stopping", current);
                break;
            }

            let name = self.read_name(current);
            visitor(VisitedEntity {
                handle: EntityHandle::new(current),
                name: name.as_deref(),
            });

            visited += 1;
            current = read_usize(current + self.layout.next).unwrap_or(0);
        }
    }
}

/// Calls the game's instance removal routine
pub struct RemoveInstance {
    function: RemoveInstanceFn,
}

impl RemoveInstance {
    /// # Safety
    /// `address` must be the entry of the game's removal routine.
    pub unsafe fn new(address: usize) -> Self {
        Self {
            function: std::mem::transmute::<usize, RemoveInstanceFn>(address),
        }
    }
}

impl EntityDestroyer for RemoveInstance {
    fn destroy(&mut self, handle: EntityHandle, reserved: i32, graceful: bool) {
        // SAFETY: handle was revalidated by the caller; the race with the game
        // freeing it is accepted
        unsafe { (self.function)(handle.address() as *mut Instance, reserved, graceful) }
    }
}

/// Validates handles against the process page table
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessValidator;

impl PointerValidator for ProcessValidator {
    fn is_valid(&self, handle: EntityHandle, size: usize) -> bool {
        is_readable(handle.address(), size)
    }
}

/// Build the sweep over the live instance list
///
/// Returns `None` when the sweep is disabled or gamedata does not describe
/// the instance layout.
pub fn game_sweep(config: &SweepConfig, gamedata: &Gamedata, module: &ModuleInfo) -> Option<EntitySweep> {
    if !config.enabled {
        tracing::info!("Entity sweep disabled by config");
        return None;
    }

    let layout = match InstanceLayout::from_gamedata(gamedata, module) {
        Ok(layout) => layout,
        Err(e) => {
            tracing::warn!("Entity sweep disabled, instance layout unknown: {}", e);
            return None;
        }
    };

    tracing::info!(
        "Entity sweep every {} tick(s), markers {:?}",
        config.interval_ticks.max(1),
        config.markers
    );

    // SAFETY: layout resolved from gamedata for this build
    let (list, destroyer) = unsafe {
        (
            InstanceList::new(layout),
            RemoveInstance::new(layout.remove_instance),
        )
    };

    Some(EntitySweep::new(
        config,
        layout.size,
        Box::new(list),
        Box::new(destroyer),
        Box::new(ProcessValidator),
    ))
}
