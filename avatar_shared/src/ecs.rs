//! Entity/component system (minimal ECS).
//!
//! Entities live in a generational arena: destroying an entity frees its slot
//! for reuse and bumps the slot generation, so ids held past `destroy` never
//! resolve to the slot's next occupant.
//!
//! Components are stored column-wise (one typed column per component type,
//! indexed by slot). Each slot carries a [`ComponentMask`] so capability-set
//! queries are a bitmask test rather than a per-type lookup.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::components::Columns;

bitflags::bitflags! {
    /// Capability set of an entity: one bit per component type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ComponentMask: u16 {
        const POSITION = 1 << 0;
        const SCALE = 1 << 1;
        const ROTATION = 1 << 2;
        const AVATAR = 1 << 3;
        const MOVEMENT = 1 << 4;
        const INPUT = 1 << 5;
        const NETWORK_ID = 1 << 6;
        const REMOTE_AVATAR = 1 << 7;
        const EVENT_QUEUE = 1 << 8;
        const RENDERABLE = 1 << 9;
    }
}

/// Opaque entity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    index: u32,
    generation: u32,
}

impl EntityId {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Typed storage for one component type, indexed by slot.
pub struct Column<T> {
    cells: Vec<Option<T>>,
}

impl<T> Default for Column<T> {
    fn default() -> Self {
        Self { cells: Vec::new() }
    }
}

impl<T> Column<T> {
    pub(crate) fn get(&self, index: usize) -> Option<&T> {
        self.cells.get(index).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.cells.get_mut(index).and_then(Option::as_mut)
    }

    pub(crate) fn set(&mut self, index: usize, value: T) {
        if index >= self.cells.len() {
            self.cells.resize_with(index + 1, || None);
        }
        self.cells[index] = Some(value);
    }

    pub(crate) fn take(&mut self, index: usize) -> Option<T> {
        self.cells.get_mut(index).and_then(Option::take)
    }
}

/// A component type with a fixed bit in [`ComponentMask`] and its own column.
pub trait Component: Sized + 'static {
    const MASK: ComponentMask;

    fn column(columns: &Columns) -> &Column<Self>;
    fn column_mut(columns: &mut Columns) -> &mut Column<Self>;
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    generation: u32,
    alive: bool,
    mask: ComponentMask,
}

/// Entity arena plus component columns.
#[derive(Default)]
pub struct World {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    columns: Columns,
}

impl World {
    /// Creates a new entity with no components.
    pub fn spawn(&mut self) -> EntityId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.alive = true;
            slot.mask = ComponentMask::empty();
            return EntityId {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            alive: true,
            mask: ComponentMask::empty(),
        });
        EntityId {
            index,
            generation: 0,
        }
    }

    /// Destroys an entity and all of its components.
    ///
    /// Returns false if the id is stale or was never issued.
    pub fn destroy(&mut self, entity: EntityId) -> bool {
        let index = entity.index as usize;
        let Some(slot) = self.slot_mut(entity) else {
            return false;
        };
        slot.alive = false;
        slot.mask = ComponentMask::empty();
        slot.generation = slot.generation.wrapping_add(1);

        self.columns.clear_slot(index);
        self.free.push(entity.index);
        self.live -= 1;
        true
    }

    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.slot(entity).is_some()
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Inserts/replaces a component for an entity.
    ///
    /// Returns false (and drops the component) for a dead entity.
    pub fn insert<T: Component>(&mut self, entity: EntityId, component: T) -> bool {
        match self.slot_mut(entity) {
            Some(slot) => slot.mask |= T::MASK,
            None => return false,
        }
        T::column_mut(&mut self.columns).set(entity.index as usize, component);
        true
    }

    /// Detaches a component, returning it if it was present.
    pub fn remove<T: Component>(&mut self, entity: EntityId) -> Option<T> {
        let slot = self.slot_mut(entity)?;
        if !slot.mask.contains(T::MASK) {
            return None;
        }
        slot.mask.remove(T::MASK);
        T::column_mut(&mut self.columns).take(entity.index as usize)
    }

    /// Gets a component reference.
    pub fn get<T: Component>(&self, entity: EntityId) -> Option<&T> {
        self.slot(entity)?;
        T::column(&self.columns).get(entity.index as usize)
    }

    /// Gets a mutable component reference.
    pub fn get_mut<T: Component>(&mut self, entity: EntityId) -> Option<&mut T> {
        self.slot(entity)?;
        T::column_mut(&mut self.columns).get_mut(entity.index as usize)
    }

    pub fn has<T: Component>(&self, entity: EntityId) -> bool {
        self.slot(entity)
            .is_some_and(|slot| slot.mask.contains(T::MASK))
    }

    /// Capability set of a live entity.
    pub fn mask(&self, entity: EntityId) -> Option<ComponentMask> {
        self.slot(entity).map(|slot| slot.mask)
    }

    /// Entities holding every component in `with`, in slot order.
    pub fn query(&self, with: ComponentMask) -> Vec<EntityId> {
        self.query_without(with, ComponentMask::empty())
    }

    /// Entities holding every component in `with` and none in `without`.
    pub fn query_without(&self, with: ComponentMask, without: ComponentMask) -> Vec<EntityId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                slot.alive && slot.mask.contains(with) && !slot.mask.intersects(without)
            })
            .map(|(index, slot)| EntityId {
                index: index as u32,
                generation: slot.generation,
            })
            .collect()
    }

    /// Iterates entities with a given component.
    pub fn iter<T: Component>(&self) -> impl Iterator<Item = (EntityId, &T)> {
        let column = T::column(&self.columns);
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.alive && slot.mask.contains(T::MASK))
            .filter_map(move |(index, slot)| {
                column.get(index).map(|c| {
                    (
                        EntityId {
                            index: index as u32,
                            generation: slot.generation,
                        },
                        c,
                    )
                })
            })
    }

    fn slot(&self, entity: EntityId) -> Option<&Slot> {
        self.slots
            .get(entity.index as usize)
            .filter(|slot| slot.alive && slot.generation == entity.generation)
    }

    fn slot_mut(&mut self, entity: EntityId) -> Option<&mut Slot> {
        self.slots
            .get_mut(entity.index as usize)
            .filter(|slot| slot.alive && slot.generation == entity.generation)
    }
}
