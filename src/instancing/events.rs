//! Per-instance event callbacks and the payloads routed to them.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use glam::{Mat4, Vec2, Vec3};
use winit::event::MouseButton;

use super::InstanceRef;
use crate::picking::Ray;

/// The fixed set of events an instance can handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    PointerDown,
    PointerUp,
    PointerMove,
    /// The pointer started hovering this instance.
    PointerOver,
    /// The pointer stopped hovering this instance.
    PointerOut,
    /// Primary press and release on the same instance.
    Click,
    DoubleClick,
    /// Secondary button press.
    ContextMenu,
    Wheel,
}

impl EventKind {
    pub const COUNT: usize = 9;

    pub const ALL: [EventKind; Self::COUNT] = [
        EventKind::PointerDown,
        EventKind::PointerUp,
        EventKind::PointerMove,
        EventKind::PointerOver,
        EventKind::PointerOut,
        EventKind::Click,
        EventKind::DoubleClick,
        EventKind::ContextMenu,
        EventKind::Wheel,
    ];

    const fn index(self) -> usize {
        self as usize
    }

    const fn bit(self) -> u16 {
        1 << self.index()
    }
}

/// A set of [`EventKind`]s, used as the batch's routing table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HandledEvents(u16);

impl HandledEvents {
    pub const NONE: HandledEvents = HandledEvents(0);

    pub fn contains(self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn insert(&mut self, kind: EventKind) {
        self.0 |= kind.bit();
    }

    pub fn union(self, other: HandledEvents) -> HandledEvents {
        HandledEvents(self.0 | other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = EventKind> {
        EventKind::ALL
            .into_iter()
            .filter(move |&kind| self.contains(kind))
    }
}

/// Callback invoked with the routed event.
pub type Handler = Rc<dyn Fn(&InstanceEvent)>;

/// One optional handler per [`EventKind`].
///
/// ```
/// use herd::{EventHandlers, EventKind};
///
/// let handlers = EventHandlers::new().on(EventKind::Click, |e| println!("slot {}", e.slot));
/// assert!(handlers.get(EventKind::Click).is_some());
/// assert!(handlers.get(EventKind::Wheel).is_none());
/// ```
#[derive(Clone, Default)]
pub struct EventHandlers {
    table: [Option<Handler>; EventKind::COUNT],
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`set`](Self::set).
    pub fn on(mut self, kind: EventKind, handler: impl Fn(&InstanceEvent) + 'static) -> Self {
        self.set(kind, handler);
        self
    }

    pub fn set(&mut self, kind: EventKind, handler: impl Fn(&InstanceEvent) + 'static) {
        self.table[kind.index()] = Some(Rc::new(handler));
    }

    pub fn remove(&mut self, kind: EventKind) -> Option<Handler> {
        self.table[kind.index()].take()
    }

    pub fn get(&self, kind: EventKind) -> Option<&Handler> {
        self.table[kind.index()].as_ref()
    }

    /// The kinds that have a handler.
    pub fn handled(&self) -> HandledEvents {
        let mut set = HandledEvents::NONE;
        for kind in EventKind::ALL {
            if self.get(kind).is_some() {
                set.insert(kind);
            }
        }
        set
    }
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handled().iter()).finish()
    }
}

/// Pointer state at the moment an event was raised.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointerEvent {
    /// World-space picking ray through the cursor.
    pub ray: Ray,
    /// World-space point where the ray struck the instance.
    pub point: Vec3,
    /// Distance from the ray origin to `point`.
    pub distance: f32,
    /// Cursor position in physical pixels.
    pub screen: Vec2,
    /// Button that changed state, for press/release events.
    pub button: Option<MouseButton>,
    /// Scroll amount in lines, for wheel events.
    pub wheel_delta: f32,
}

impl PointerEvent {
    /// A pointer event carrying only a ray, with no hit information.
    pub fn from_ray(ray: Ray) -> Self {
        Self {
            ray,
            point: ray.origin,
            distance: 0.0,
            screen: Vec2::ZERO,
            button: None,
            wheel_delta: 0.0,
        }
    }
}

/// The event handed to an instance's handler.
pub struct InstanceEvent {
    pub kind: EventKind,
    /// Slot the instance occupied when the event was routed.
    pub slot: usize,
    /// The instance that received the event.
    pub target: InstanceRef,
    pub pointer: PointerEvent,
    /// World matrix stored in the target's slot at the last sync.
    pub slot_matrix: Mat4,
    /// The batch's own world matrix.
    pub batch_world: Mat4,
    stopped: Cell<bool>,
}

impl InstanceEvent {
    pub(crate) fn new(
        kind: EventKind,
        slot: usize,
        target: InstanceRef,
        pointer: PointerEvent,
        slot_matrix: Mat4,
        batch_world: Mat4,
    ) -> Self {
        Self {
            kind,
            slot,
            target,
            pointer,
            slot_matrix,
            batch_world,
            stopped: Cell::new(false),
        }
    }

    /// World position of the target at the last sync.
    pub fn slot_position(&self) -> Vec3 {
        self.slot_matrix.w_axis.truncate()
    }

    /// Keep this event from reaching anything behind the instance
    /// (camera controls, for instance).
    pub fn stop_propagation(&self) {
        self.stopped.set(true);
    }

    pub fn propagation_stopped(&self) -> bool {
        self.stopped.get()
    }
}

impl fmt::Debug for InstanceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceEvent")
            .field("kind", &self.kind)
            .field("slot", &self.slot)
            .field("target", &self.target)
            .field("stopped", &self.stopped.get())
            .finish_non_exhaustive()
    }
}

/// Outcome of routing one event to a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Routed {
    /// No live occupant, or the occupant has no handler for the kind.
    Dropped,
    Delivered { propagation_stopped: bool },
}

impl Routed {
    pub fn is_delivered(self) -> bool {
        matches!(self, Routed::Delivered { .. })
    }

    pub fn propagation_stopped(self) -> bool {
        matches!(
            self,
            Routed::Delivered {
                propagation_stopped: true
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handled_set_tracks_registered_kinds() {
        let mut handlers = EventHandlers::new()
            .on(EventKind::PointerDown, |_| {})
            .on(EventKind::Wheel, |_| {});

        let handled = handlers.handled();
        assert!(handled.contains(EventKind::PointerDown));
        assert!(handled.contains(EventKind::Wheel));
        assert!(!handled.contains(EventKind::Click));
        assert_eq!(
            handled.iter().collect::<Vec<_>>(),
            vec![EventKind::PointerDown, EventKind::Wheel]
        );

        handlers.remove(EventKind::PointerDown);
        handlers.remove(EventKind::Wheel);
        assert!(handlers.handled().is_empty());
    }

    #[test]
    fn kinds_have_distinct_bits() {
        let mut all = HandledEvents::NONE;
        for kind in EventKind::ALL {
            assert!(!all.contains(kind));
            all.insert(kind);
        }
        assert_eq!(all.iter().count(), EventKind::COUNT);
    }
}
