//! The batch registry: live instances, their slots, and per-frame sync.

use std::cell::{Ref, RefCell};
use std::rc::{Rc, Weak};

use glam::Mat4;
use log::{debug, info};
use slotmap::{SlotMap, new_key_type};

use super::buffers::{InstanceBuffers, SlotLayout};
use super::events::{EventKind, EventHandlers, HandledEvents, InstanceEvent, PointerEvent, Routed};
use super::instance::{InstanceProps, InstanceRef};
use super::{InstancesConfig, InstancingError};
use crate::color::Color;
use crate::mesh::Transform;
use crate::picking::{Collider, InstanceHit, Ray};

new_key_type! {
    /// Generation-tagged identity of one subscribed instance.
    ///
    /// A key is never reused, so a stale key fails every lookup instead of
    /// resolving to whichever instance took the old one's place.
    pub struct InstanceKey;
}

pub(super) struct InstanceNode {
    pub(super) transform: Transform,
    pub(super) color: Color,
    pub(super) handlers: EventHandlers,
    pub(super) parent: Option<InstanceKey>,
}

pub(super) struct BatchState {
    pub(super) label: String,
    pub(super) nodes: SlotMap<InstanceKey, InstanceNode>,
    /// Subscription order; index is the slot.
    live: Vec<InstanceKey>,
    /// `live[..visible]` as of the last sync. Routing and raycasts use this.
    occupants: Vec<InstanceKey>,
    pub(super) buffers: InstanceBuffers,
    range: Option<usize>,
    pub(super) world: Mat4,
    collider: Collider,
    point_threshold: f32,
    point_size: f32,
    routes: Option<HandledEvents>,
    overflow_logged: bool,
}

impl BatchState {
    /// Local matrix of `key` composed with every live ancestor's.
    pub(super) fn local_chain(&self, key: InstanceKey) -> Option<Mat4> {
        let node = self.nodes.get(key)?;
        let mut matrix = node.transform.matrix();
        let mut parent = node.parent;
        while let Some(ancestor) = parent.and_then(|k| self.nodes.get(k)) {
            matrix = ancestor.transform.matrix() * matrix;
            parent = ancestor.parent;
        }
        Some(matrix)
    }

    pub(super) fn slot_of(&self, key: InstanceKey) -> Option<usize> {
        self.live
            .iter()
            .take(self.buffers.capacity())
            .position(|&k| k == key)
    }

    fn visible_target(&self) -> usize {
        let capacity = self.buffers.capacity();
        capacity
            .min(self.range.unwrap_or(capacity))
            .min(self.live.len())
    }

    fn insert(&mut self, node: InstanceNode) -> InstanceKey {
        let key = self.nodes.insert(node);
        self.live.push(key);
        self.routes = None;
        key
    }

    fn remove(&mut self, key: InstanceKey) -> Option<InstanceNode> {
        let node = self.nodes.remove(key)?;
        self.live.retain(|&k| k != key);
        self.routes = None;
        Some(node)
    }

    fn sync(&mut self) -> SyncReport {
        self.buffers.begin_frame();

        let capacity = self.buffers.capacity();
        let mut transforms_written = 0;
        let mut colors_written = 0;

        for slot in 0..self.live.len().min(capacity) {
            let key = self.live[slot];
            let (Some(local), Some(node)) = (self.local_chain(key), self.nodes.get(key)) else {
                continue;
            };
            let world = self.world * local;
            let color = node.color;

            if self.buffers.write_transform(slot, &world) {
                transforms_written += 1;
            }
            if self.buffers.write_color(slot, color) {
                colors_written += 1;
            }
        }

        let overflow = self.live.len().saturating_sub(capacity);
        if overflow > 0 && !self.overflow_logged {
            debug!(
                "{}: {} instances past capacity {} are not synchronized",
                self.label, overflow, capacity
            );
            self.overflow_logged = true;
        }

        let visible = self.visible_target();
        self.occupants.clear();
        self.occupants.extend_from_slice(&self.live[..visible]);

        SyncReport {
            visible,
            transforms_written,
            colors_written,
            overflow,
        }
    }

    fn handled_events(&mut self) -> HandledEvents {
        if let Some(routes) = self.routes {
            return routes;
        }
        let routes = self
            .live
            .iter()
            .filter_map(|&key| self.nodes.get(key))
            .fold(HandledEvents::NONE, |set, node| {
                set.union(node.handlers.handled())
            });
        self.routes = Some(routes);
        routes
    }

    fn hit_slot(&self, ray: &Ray, slot: usize) -> Option<InstanceHit> {
        let world = self.buffers.matrix_at(slot)?;
        let distance = match self.buffers.layout() {
            SlotLayout::Matrix => self.collider.intersect(ray, &world)?,
            SlotLayout::Point => {
                let (t, distance_sq) = ray.closest_approach(world.w_axis.truncate())?;
                if distance_sq > self.point_threshold * self.point_threshold {
                    return None;
                }
                t
            }
        };
        Some(InstanceHit {
            slot,
            distance,
            point: ray.point_at(distance),
        })
    }
}

/// Summary of one [`Instances::sync`] pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Slots drawn and hit-tested until the next sync.
    pub visible: usize,
    /// Slots whose transform changed.
    pub transforms_written: usize,
    /// Slots whose color changed.
    pub colors_written: usize,
    /// Live instances past capacity that were left out.
    pub overflow: usize,
}

impl SyncReport {
    pub fn is_dirty(&self) -> bool {
        self.transforms_written > 0 || self.colors_written > 0
    }
}

/// A batch of instances sharing one pair of GPU buffers and one draw call.
///
/// Cloning gives another reference to the same batch. Instances mount into a
/// batch with [`Instance::mount`](crate::Instance::mount); the host calls
/// [`sync`](Self::sync) once per frame after application code has run, then
/// uploads [`buffers`](Self::buffers) and draws [`visible_count`](Self::visible_count)
/// instances.
///
/// ```
/// use herd::{Instance, InstanceProps, Instances, Vec3};
///
/// let batch = Instances::create(10, None).unwrap();
/// let a = Instance::mount(&batch, InstanceProps::new().position(Vec3::X));
/// let _b = Instance::mount(&batch, InstanceProps::new());
///
/// let report = batch.sync();
/// assert_eq!(report.visible, 2);
/// assert_eq!(a.slot(), Some(0));
/// ```
#[derive(Clone)]
pub struct Instances {
    pub(super) state: Rc<RefCell<BatchState>>,
}

impl Instances {
    pub fn new(config: InstancesConfig) -> Result<Self, InstancingError> {
        if config.capacity == 0 {
            return Err(InstancingError::ZeroCapacity);
        }

        info!(
            "{}: {} slots, {:?} layout",
            config.label, config.capacity, config.layout
        );

        let state = BatchState {
            buffers: InstanceBuffers::new(config.layout, config.capacity),
            label: config.label,
            nodes: SlotMap::with_capacity_and_key(config.capacity),
            live: Vec::with_capacity(config.capacity),
            occupants: Vec::with_capacity(config.capacity),
            range: config.range,
            world: config.world,
            collider: config.collider,
            point_threshold: config.point_threshold,
            point_size: config.point_size,
            routes: None,
            overflow_logged: false,
        };

        Ok(Self {
            state: Rc::new(RefCell::new(state)),
        })
    }

    /// A matrix batch with the given capacity and visible range.
    pub fn create(capacity: usize, range: Option<usize>) -> Result<Self, InstancingError> {
        let mut config = InstancesConfig::new().capacity(capacity);
        config.range = range;
        Self::new(config)
    }

    pub(super) fn from_state(state: Rc<RefCell<BatchState>>) -> Self {
        Self { state }
    }

    pub(super) fn downgrade(&self) -> Weak<RefCell<BatchState>> {
        Rc::downgrade(&self.state)
    }

    /// Register a new live instance at the end of the slot order.
    ///
    /// Most callers want [`Instance::mount`](crate::Instance::mount), which
    /// pairs the subscription with a handle.
    pub fn subscribe(&self, props: InstanceProps) -> Subscription {
        let InstanceProps {
            transform,
            color,
            handlers,
            parent,
        } = props;

        let parent = parent.filter(|p| p.belongs_to(self)).map(|p| p.key());
        let key = self.state.borrow_mut().insert(InstanceNode {
            transform,
            color,
            handlers,
            parent,
        });

        Subscription {
            batch: self.downgrade(),
            key,
            active: true,
        }
    }

    /// Write every live instance's world transform and color into its slot.
    ///
    /// Only values that differ from what the slot already holds are written,
    /// and only those slots end up in the dirty ranges. Afterwards the first
    /// `min(capacity, range, live)` slots are visible to drawing and routing.
    pub fn sync(&self) -> SyncReport {
        self.state.borrow_mut().sync()
    }

    /// Deliver `kind` to the instance that occupied `slot` at the last sync.
    ///
    /// Stale slots, unmounted occupants and missing handlers are silently
    /// dropped. The handler runs with the batch unborrowed, so it may move,
    /// recolor, mount or unmount instances.
    pub fn route_event(&self, slot: usize, kind: EventKind, pointer: &PointerEvent) -> Routed {
        let target = {
            let state = self.state.borrow();
            match state.occupants.get(slot) {
                Some(&key) => key,
                None => return Routed::Dropped,
            }
        };
        self.dispatch(target, slot, kind, pointer)
    }

    /// Deliver `kind` straight to `target`, wherever it currently sits.
    ///
    /// Used for events that follow an instance rather than a hit, such as
    /// the pointer leaving it.
    pub fn route_to(&self, target: &InstanceRef, kind: EventKind, pointer: &PointerEvent) -> Routed {
        if !target.belongs_to(self) {
            return Routed::Dropped;
        }
        let Some(slot) = self.state.borrow().slot_of(target.key()) else {
            return Routed::Dropped;
        };
        self.dispatch(target.key(), slot, kind, pointer)
    }

    fn dispatch(
        &self,
        key: InstanceKey,
        slot: usize,
        kind: EventKind,
        pointer: &PointerEvent,
    ) -> Routed {
        let (handler, event) = {
            let state = self.state.borrow();
            let Some(handler) = state
                .nodes
                .get(key)
                .and_then(|node| node.handlers.get(kind))
                .cloned()
            else {
                return Routed::Dropped;
            };
            let event = InstanceEvent::new(
                kind,
                slot,
                InstanceRef::new(self.downgrade(), key),
                *pointer,
                state.buffers.matrix_at(slot).unwrap_or(Mat4::IDENTITY),
                state.world,
            );
            (handler, event)
        };

        handler(&event);
        Routed::Delivered {
            propagation_stopped: event.propagation_stopped(),
        }
    }

    /// Nearest visible slot struck by `ray`.
    pub fn raycast(&self, ray: &Ray) -> Option<InstanceHit> {
        let state = self.state.borrow();
        (0..state.occupants.len())
            .filter_map(|slot| state.hit_slot(ray, slot))
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
    }

    /// Event kinds with at least one handler among live instances.
    pub fn handled_events(&self) -> HandledEvents {
        self.state.borrow_mut().handled_events()
    }

    /// The live instance occupying `slot` as of the last sync.
    pub fn occupant(&self, slot: usize) -> Option<InstanceRef> {
        let state = self.state.borrow();
        let key = *state.occupants.get(slot)?;
        state
            .nodes
            .contains_key(key)
            .then(|| InstanceRef::new(self.downgrade(), key))
    }

    /// Cap how many live instances are drawn, or `None` for all of them.
    pub fn set_range(&self, range: Option<usize>) {
        let mut state = self.state.borrow_mut();
        if state.range != range {
            debug!("{}: range {:?} -> {:?}", state.label, state.range, range);
            state.range = range;
        }
    }

    pub fn range(&self) -> Option<usize> {
        self.state.borrow().range
    }

    pub fn capacity(&self) -> usize {
        self.state.borrow().buffers.capacity()
    }

    /// Number of live (subscribed) instances, including any past capacity.
    pub fn len(&self) -> usize {
        self.state.borrow().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slots drawn and hit-tested, as of the last sync.
    pub fn visible_count(&self) -> usize {
        self.state.borrow().occupants.len()
    }

    /// Place the whole batch. Applied to every slot at the next sync.
    pub fn set_world(&self, world: Mat4) {
        self.state.borrow_mut().world = world;
    }

    pub fn world(&self) -> Mat4 {
        self.state.borrow().world
    }

    pub fn layout(&self) -> SlotLayout {
        self.state.borrow().buffers.layout()
    }

    pub fn label(&self) -> String {
        self.state.borrow().label.clone()
    }

    /// Rendered size of each point for [`SlotLayout::Point`] batches.
    pub fn point_size(&self) -> f32 {
        self.state.borrow().point_size
    }

    /// World matrix stored in `slot` at the last sync.
    pub fn matrix_at(&self, slot: usize) -> Option<Mat4> {
        self.state.borrow().buffers.matrix_at(slot)
    }

    pub fn color_at(&self, slot: usize) -> Option<Color> {
        self.state.borrow().buffers.color_at(slot)
    }

    /// The shared buffers, for upload.
    ///
    /// The batch stays borrowed while the guard lives; drop it before
    /// touching instances.
    pub fn buffers(&self) -> Ref<'_, InstanceBuffers> {
        Ref::map(self.state.borrow(), |state| &state.buffers)
    }

    pub fn ptr_eq(&self, other: &Instances) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

impl std::fmt::Debug for Instances {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.state.try_borrow() {
            Ok(state) => f
                .debug_struct("Instances")
                .field("label", &state.label)
                .field("capacity", &state.buffers.capacity())
                .field("live", &state.live.len())
                .field("visible", &state.occupants.len())
                .finish(),
            Err(_) => f.write_str("Instances { <borrowed> }"),
        }
    }
}

/// Registration of one instance in a batch.
///
/// [`unsubscribe`](Self::unsubscribe) removes it; so does dropping the
/// subscription.
#[derive(Debug)]
pub struct Subscription {
    batch: Weak<RefCell<BatchState>>,
    key: InstanceKey,
    active: bool,
}

impl Subscription {
    /// A subscription that is already over, for mounts into a dropped batch.
    pub(super) fn detached(batch: Weak<RefCell<BatchState>>) -> Self {
        Self {
            batch,
            key: InstanceKey::default(),
            active: false,
        }
    }

    pub fn key(&self) -> InstanceKey {
        self.key
    }

    pub(super) fn batch(&self) -> Weak<RefCell<BatchState>> {
        self.batch.clone()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Remove the instance from the live list. Calling this again does nothing.
    ///
    /// Instances after it move down one slot at the next sync.
    pub fn unsubscribe(&mut self) {
        if !std::mem::replace(&mut self.active, false) {
            return;
        }
        let Some(state) = self.batch.upgrade() else {
            return;
        };
        // The node's handlers may own other instances; drop it unborrowed.
        let removed = state.borrow_mut().remove(self.key);
        drop(removed);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use glam::Vec3;

    use super::*;
    use crate::instancing::Instance;

    fn ray_down_at(x: f32, y: f32) -> Ray {
        Ray::new(Vec3::new(x, y, 10.0), Vec3::NEG_Z)
    }

    fn counter() -> Rc<Cell<u32>> {
        Rc::new(Cell::new(0))
    }

    fn counting(kind: EventKind, hits: &Rc<Cell<u32>>) -> InstanceProps {
        let hits = Rc::clone(hits);
        InstanceProps::new().on(kind, move |_| hits.set(hits.get() + 1))
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(
            Instances::create(0, None).err(),
            Some(InstancingError::ZeroCapacity)
        );
    }

    #[test]
    fn visible_count_follows_capacity_range_and_live() {
        let batch = Instances::create(5, None).unwrap();
        let mut mounted: Vec<Instance> = Vec::new();

        // Arbitrary mount/unmount sequence, checked against the formula each sync
        let steps: [(usize, Option<usize>); 7] = [
            (3, None),
            (7, None),
            (7, Some(2)),
            (1, Some(2)),
            (0, Some(0)),
            (4, Some(9)),
            (6, None),
        ];
        for (live, range) in steps {
            while mounted.len() < live {
                mounted.push(Instance::mount(&batch, InstanceProps::new()));
            }
            mounted.truncate(live);
            batch.set_range(range);

            let report = batch.sync();
            let expected = 5.min(range.unwrap_or(5)).min(live);
            assert_eq!(report.visible, expected);
            assert_eq!(batch.visible_count(), expected);
            assert_eq!(report.overflow, live.saturating_sub(5));
        }
    }

    #[test]
    fn unsubscribe_twice_is_a_no_op() {
        let batch = Instances::create(4, None).unwrap();
        let mut first = batch.subscribe(InstanceProps::new().position(Vec3::X));
        let _second = batch.subscribe(InstanceProps::new().position(Vec3::Y));
        batch.sync();

        first.unsubscribe();
        assert_eq!(batch.len(), 1);
        batch.sync();
        let transforms = batch.buffers().transforms().to_vec();

        first.unsubscribe();
        assert!(!first.is_active());
        assert_eq!(batch.len(), 1);
        let report = batch.sync();
        assert!(!report.is_dirty());
        assert_eq!(batch.buffers().transforms(), transforms.as_slice());
    }

    #[test]
    fn idle_frames_are_not_dirty() {
        let batch = Instances::create(8, None).unwrap();
        let _handles: Vec<_> = (0..4)
            .map(|i| {
                Instance::mount(
                    &batch,
                    InstanceProps::new()
                        .position(Vec3::new(i as f32, 0.0, 0.0))
                        .color(Color::rgb(0.5, 0.2, 0.1)),
                )
            })
            .collect();

        let first = batch.sync();
        assert_eq!(first.transforms_written, 4);
        assert_eq!(first.colors_written, 4);

        let second = batch.sync();
        assert!(!second.is_dirty());
        assert!(!batch.buffers().transforms_dirty().is_dirty());
        assert!(!batch.buffers().colors_dirty().is_dirty());
    }

    #[test]
    fn written_transform_reaches_the_slot() {
        let batch = Instances::create(3, None).unwrap();
        let _a = Instance::mount(&batch, InstanceProps::new());
        let b = Instance::mount(&batch, InstanceProps::new());
        batch.sync();

        let transform = Transform::new()
            .position(Vec3::new(2.0, 3.0, 0.0))
            .rotation(glam::Quat::from_rotation_z(0.3))
            .uniform_scale(0.8);
        b.set_transform(transform);
        batch.sync();

        let stored = batch.matrix_at(1).unwrap();
        assert!(stored.abs_diff_eq(transform.matrix(), 1e-6));
        assert_eq!(batch.buffers().transforms_dirty().slots(), Some(1..2));
    }

    #[test]
    fn removal_shifts_later_slots_down() {
        let batch = Instances::create(10, None).unwrap();
        let h1 = Instance::mount(&batch, InstanceProps::new().position(Vec3::splat(1.0)));
        let mut h2 = Instance::mount(&batch, InstanceProps::new().position(Vec3::splat(2.0)));
        let h3 = Instance::mount(&batch, InstanceProps::new().position(Vec3::splat(3.0)));
        batch.sync();
        assert_eq!((h1.slot(), h2.slot(), h3.slot()), (Some(0), Some(1), Some(2)));

        let slot0 = batch.buffers().transform_slot(0).unwrap().to_vec();
        h2.unmount();
        let report = batch.sync();

        assert_eq!(report.visible, 2);
        assert_eq!(h3.slot(), Some(1));
        assert_eq!(
            batch.matrix_at(1),
            Some(Mat4::from_translation(Vec3::splat(3.0)))
        );
        assert_eq!(batch.buffers().transform_slot(0).unwrap(), slot0.as_slice());
        assert_eq!(batch.buffers().transforms_dirty().slots(), Some(1..2));
    }

    #[test]
    fn range_limits_drawing_and_hit_testing_to_first_slots() {
        let batch = Instances::create(5, Some(2)).unwrap();
        let hits = counter();
        let _handles: Vec<_> = (0..5)
            .map(|i| {
                Instance::mount(
                    &batch,
                    counting(EventKind::PointerDown, &hits).position(Vec3::new(i as f32 * 2.0, 0.0, 0.0)),
                )
            })
            .collect();

        assert_eq!(batch.sync().visible, 2);

        assert_eq!(batch.raycast(&ray_down_at(0.0, 0.0)).map(|h| h.slot), Some(0));
        assert_eq!(batch.raycast(&ray_down_at(2.0, 0.0)).map(|h| h.slot), Some(1));
        assert!(batch.raycast(&ray_down_at(4.0, 0.0)).is_none());

        let pointer = PointerEvent::from_ray(ray_down_at(4.0, 0.0));
        assert_eq!(
            batch.route_event(2, EventKind::PointerDown, &pointer),
            Routed::Dropped
        );
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn events_reach_only_the_current_occupant() {
        let batch = Instances::create(4, None).unwrap();
        let (first_hits, second_hits, third_hits) = (counter(), counter(), counter());
        let mut first = Instance::mount(&batch, counting(EventKind::PointerDown, &first_hits));
        let _second = Instance::mount(&batch, counting(EventKind::PointerDown, &second_hits));
        let _third = Instance::mount(&batch, counting(EventKind::PointerDown, &third_hits));
        batch.sync();

        let pointer = PointerEvent::from_ray(ray_down_at(0.0, 0.0));
        assert!(batch.route_event(1, EventKind::PointerDown, &pointer).is_delivered());
        assert_eq!(
            (first_hits.get(), second_hits.get(), third_hits.get()),
            (0, 1, 0)
        );

        first.unmount();
        batch.sync();
        batch.route_event(1, EventKind::PointerDown, &pointer);
        assert_eq!(
            (first_hits.get(), second_hits.get(), third_hits.get()),
            (0, 1, 1)
        );
    }

    #[test]
    fn stale_slot_is_dropped_before_next_sync() {
        let batch = Instances::create(4, None).unwrap();
        let hits = counter();
        let _a = Instance::mount(&batch, InstanceProps::new());
        let mut b = Instance::mount(&batch, counting(EventKind::Click, &hits));
        batch.sync();

        b.unmount();
        let pointer = PointerEvent::from_ray(ray_down_at(0.0, 0.0));
        assert_eq!(batch.route_event(1, EventKind::Click, &pointer), Routed::Dropped);
        assert_eq!(batch.route_event(9, EventKind::Click, &pointer), Routed::Dropped);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn missing_handler_is_dropped() {
        let batch = Instances::create(2, None).unwrap();
        let _a = Instance::mount(&batch, InstanceProps::new().on(EventKind::Click, |_| {}));
        batch.sync();
        let pointer = PointerEvent::from_ray(ray_down_at(0.0, 0.0));
        assert_eq!(batch.route_event(0, EventKind::Wheel, &pointer), Routed::Dropped);
        assert!(batch.route_event(0, EventKind::Click, &pointer).is_delivered());
    }

    #[test]
    fn nothing_is_routable_before_first_sync() {
        let batch = Instances::create(2, None).unwrap();
        let _a = Instance::mount(&batch, InstanceProps::new().on(EventKind::Click, |_| {}));
        let pointer = PointerEvent::from_ray(ray_down_at(0.0, 0.0));
        assert_eq!(batch.route_event(0, EventKind::Click, &pointer), Routed::Dropped);
    }

    #[test]
    fn handlers_may_mutate_the_batch() {
        let batch = Instances::create(4, None).unwrap();
        let spawned: Rc<RefCell<Vec<Instance>>> = Rc::default();

        let spawner = {
            let batch = batch.clone();
            let spawned = Rc::clone(&spawned);
            InstanceProps::new().on(EventKind::Click, move |event| {
                event.target.set_position(Vec3::new(5.0, 0.0, 0.0));
                event.stop_propagation();
                spawned
                    .borrow_mut()
                    .push(Instance::mount(&batch, InstanceProps::new()));
            })
        };
        let clicked = Instance::mount(&batch, spawner);
        batch.sync();

        let pointer = PointerEvent::from_ray(ray_down_at(0.0, 0.0));
        let routed = batch.route_event(0, EventKind::Click, &pointer);
        assert!(routed.propagation_stopped());
        assert_eq!(batch.len(), 2);
        // The new instance is not visible until the next sync
        assert_eq!(batch.visible_count(), 1);

        batch.sync();
        assert_eq!(batch.visible_count(), 2);
        assert_eq!(clicked.position(), Some(Vec3::new(5.0, 0.0, 0.0)));
    }

    #[test]
    fn overflow_is_never_synchronized() {
        let batch = Instances::create(2, None).unwrap();
        let handles: Vec<_> = (0..3)
            .map(|i| Instance::mount(&batch, InstanceProps::new().position(Vec3::splat(i as f32 + 1.0))))
            .collect();

        let report = batch.sync();
        assert_eq!(report.visible, 2);
        assert_eq!(report.overflow, 1);
        assert_eq!(batch.buffers().transforms().len(), 32);
        assert_eq!(handles[2].slot(), None);
    }

    #[test]
    fn routing_table_tracks_live_handlers() {
        let batch = Instances::create(4, None).unwrap();
        assert!(batch.handled_events().is_empty());

        let mut clicker = Instance::mount(&batch, InstanceProps::new().on(EventKind::Click, |_| {}));
        let _plain = Instance::mount(&batch, InstanceProps::new());
        assert!(batch.handled_events().contains(EventKind::Click));

        clicker.unmount();
        assert!(batch.handled_events().is_empty());
    }

    #[test]
    fn batch_world_applies_to_every_slot() {
        let batch = Instances::create(2, None).unwrap();
        let _a = Instance::mount(&batch, InstanceProps::new().position(Vec3::X));
        batch.sync();

        batch.set_world(Mat4::from_translation(Vec3::new(0.0, 0.0, 5.0)));
        let report = batch.sync();
        assert_eq!(report.transforms_written, 1);
        assert_eq!(
            batch.matrix_at(0),
            Some(Mat4::from_translation(Vec3::new(1.0, 0.0, 5.0)))
        );
    }

    #[test]
    fn overflow_is_reported_once_per_batch() {
        let batch = Instances::create(1, None).unwrap();
        let _first = Instance::mount(&batch, InstanceProps::new());
        let mut extra = Instance::mount(&batch, InstanceProps::new());
        assert_eq!(batch.sync().overflow, 1);
        assert!(batch.state.borrow().overflow_logged);

        extra.unmount();
        assert_eq!(batch.sync().overflow, 0);
        assert!(batch.state.borrow().overflow_logged);

        let _again = Instance::mount(&batch, InstanceProps::new());
        assert_eq!(batch.sync().overflow, 1);
        assert!(batch.state.borrow().overflow_logged);
    }

    #[test]
    fn tiny_batch_world_stays_hit_testable() {
        let batch = Instances::create(2, None).unwrap();
        let _block = Instance::mount(&batch, InstanceProps::new());
        batch.set_world(Mat4::from_scale(Vec3::splat(0.001)));
        batch.sync();
        assert_eq!(batch.raycast(&ray_down_at(0.0, 0.0)).map(|h| h.slot), Some(0));

        let small = Instances::create(1, None).unwrap();
        let _speck = Instance::mount(&small, InstanceProps::new().uniform_scale(0.004));
        small.sync();
        assert_eq!(small.raycast(&ray_down_at(0.0, 0.0)).map(|h| h.slot), Some(0));
    }

    #[test]
    fn point_batches_hit_within_threshold() {
        let config = InstancesConfig::new()
            .capacity(4)
            .layout(SlotLayout::Point)
            .point_threshold(0.25);
        let batch = Instances::new(config).unwrap();
        let _near = Instance::mount(&batch, InstanceProps::new().position(Vec3::new(0.0, 0.0, 0.0)));
        let _far = Instance::mount(&batch, InstanceProps::new().position(Vec3::new(3.0, 0.0, 0.0)));
        batch.sync();

        assert_eq!(batch.buffers().transforms().len(), 12);
        let hit = batch.raycast(&ray_down_at(0.2, 0.0)).unwrap();
        assert_eq!(hit.slot, 0);
        assert!((hit.distance - 10.0).abs() < 1e-5);
        assert!(batch.raycast(&ray_down_at(0.3, 0.0)).is_none());
    }

    #[test]
    fn dropping_the_batch_leaves_handles_inert() {
        let batch = Instances::create(2, None).unwrap();
        let mut a = Instance::mount(&batch, InstanceProps::new());
        let handle = a.handle();
        drop(batch);

        assert!(!handle.is_live());
        assert!(!handle.set_position(Vec3::ONE));
        a.unmount();
    }
}
