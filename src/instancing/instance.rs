//! Instance handles: the owning [`Instance`] and the weak [`InstanceRef`].

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use glam::{Mat4, Quat, Vec3};

use super::batch::{BatchState, InstanceKey, Instances, Subscription};
use super::events::{EventHandlers, EventKind, InstanceEvent};
use crate::color::Color;
use crate::mesh::Transform;

/// Initial state of an instance.
///
/// ```
/// use herd::{Color, EventKind, InstanceProps, Vec3};
///
/// let props = InstanceProps::new()
///     .position(Vec3::new(1.0, 2.0, 0.0))
///     .uniform_scale(0.8)
///     .color(Color::from_hex("#74b9ff").unwrap())
///     .on(EventKind::Click, |event| println!("clicked slot {}", event.slot));
/// ```
#[derive(Clone, Debug, Default)]
pub struct InstanceProps {
    pub transform: Transform,
    pub color: Color,
    pub handlers: EventHandlers,
    pub(super) parent: Option<InstanceRef>,
}

impl InstanceProps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn position(mut self, position: Vec3) -> Self {
        self.transform.position = position;
        self
    }

    pub fn rotation(mut self, rotation: Quat) -> Self {
        self.transform.rotation = rotation;
        self
    }

    pub fn scale(mut self, scale: Vec3) -> Self {
        self.transform.scale = scale;
        self
    }

    pub fn uniform_scale(mut self, scale: f32) -> Self {
        self.transform.scale = Vec3::splat(scale);
        self
    }

    pub fn color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn on(mut self, kind: EventKind, handler: impl Fn(&InstanceEvent) + 'static) -> Self {
        self.handlers.set(kind, handler);
        self
    }

    pub fn handlers(mut self, handlers: EventHandlers) -> Self {
        self.handlers = handlers;
        self
    }

    /// Make the transform relative to `parent`, which must belong to the same
    /// batch. Otherwise the instance is mounted as a root.
    pub fn child_of(mut self, parent: &InstanceRef) -> Self {
        self.parent = Some(parent.clone());
        self
    }
}

/// A mounted instance. Unmounts when dropped.
///
/// The handle owns the instance's registration; hand out
/// [`InstanceRef`]s (via [`handle`](Self::handle)) to code that needs to
/// read or move the instance without keeping it alive.
pub struct Instance {
    handle: InstanceRef,
    subscription: Subscription,
}

impl Instance {
    /// Mount a new instance at the end of `batch`'s slot order.
    pub fn mount(batch: &Instances, props: InstanceProps) -> Self {
        let subscription = batch.subscribe(props);
        Self {
            handle: InstanceRef::new(subscription.batch(), subscription.key()),
            subscription,
        }
    }

    /// Mount an instance positioned relative to this one.
    ///
    /// If this instance's batch is gone, the child starts out unmounted.
    pub fn mount_child(&self, props: InstanceProps) -> Instance {
        let props = props.child_of(&self.handle);
        match self.handle.batch.upgrade() {
            Some(state) => Instance::mount(&Instances::from_state(state), props),
            None => {
                let subscription = Subscription::detached(self.handle.batch.clone());
                Instance {
                    handle: InstanceRef::new(subscription.batch(), subscription.key()),
                    subscription,
                }
            }
        }
    }

    /// Remove the instance from its batch. Safe to call more than once.
    pub fn unmount(&mut self) {
        self.subscription.unsubscribe();
    }

    pub fn is_mounted(&self) -> bool {
        self.subscription.is_active() && self.handle.is_live()
    }

    /// A weak reference to this instance.
    pub fn handle(&self) -> InstanceRef {
        self.handle.clone()
    }

    pub fn key(&self) -> InstanceKey {
        self.handle.key
    }

    pub fn slot(&self) -> Option<usize> {
        self.handle.slot()
    }

    pub fn transform(&self) -> Option<Transform> {
        self.handle.transform()
    }

    pub fn position(&self) -> Option<Vec3> {
        self.handle.position()
    }

    pub fn set_transform(&self, transform: Transform) -> bool {
        self.handle.set_transform(transform)
    }

    pub fn set_position(&self, position: Vec3) -> bool {
        self.handle.set_position(position)
    }

    pub fn set_matrix(&self, matrix: Mat4) -> bool {
        self.handle.set_matrix(matrix)
    }

    pub fn update_transform(&self, f: impl FnOnce(&mut Transform)) -> bool {
        self.handle.update_transform(f)
    }

    pub fn color(&self) -> Option<Color> {
        self.handle.color()
    }

    pub fn set_color(&self, color: Color) -> bool {
        self.handle.set_color(color)
    }

    pub fn world_matrix(&self) -> Option<Mat4> {
        self.handle.world_matrix()
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("key", &self.handle.key)
            .field("mounted", &self.subscription.is_active())
            .finish()
    }
}

/// A non-owning reference to an instance.
///
/// Every accessor returns `None` (or `false` for setters) once the instance
/// is unmounted or its batch is dropped. Writes are picked up by the batch's
/// next sync.
#[derive(Clone)]
pub struct InstanceRef {
    pub(super) batch: Weak<RefCell<BatchState>>,
    pub(super) key: InstanceKey,
}

impl InstanceRef {
    pub(super) fn new(batch: Weak<RefCell<BatchState>>, key: InstanceKey) -> Self {
        Self { batch, key }
    }

    pub fn key(&self) -> InstanceKey {
        self.key
    }

    pub fn belongs_to(&self, batch: &Instances) -> bool {
        std::ptr::eq(self.batch.as_ptr(), Rc::as_ptr(&batch.state))
    }

    pub fn is_live(&self) -> bool {
        self.read(|_, _| ()).is_some()
    }

    /// The batch this instance belongs to, if it still exists.
    pub fn batch(&self) -> Option<Instances> {
        self.batch.upgrade().map(Instances::from_state)
    }

    fn read<T>(&self, f: impl FnOnce(&BatchState, InstanceKey) -> T) -> Option<T> {
        let state = self.batch.upgrade()?;
        let state = state.borrow();
        state.nodes.contains_key(self.key).then(|| f(&state, self.key))
    }

    fn write(&self, f: impl FnOnce(&mut BatchState, InstanceKey)) -> bool {
        let Some(state) = self.batch.upgrade() else {
            return false;
        };
        let mut state = state.borrow_mut();
        if !state.nodes.contains_key(self.key) {
            return false;
        }
        f(&mut state, self.key);
        true
    }

    /// Current slot in the batch's live order, or `None` past capacity.
    pub fn slot(&self) -> Option<usize> {
        self.read(|state, key| state.slot_of(key)).flatten()
    }

    /// Local transform (relative to the parent instance, if any).
    pub fn transform(&self) -> Option<Transform> {
        self.read(|state, key| state.nodes[key].transform)
    }

    pub fn position(&self) -> Option<Vec3> {
        self.transform().map(|t| t.position)
    }

    pub fn set_transform(&self, transform: Transform) -> bool {
        self.update_transform(|t| *t = transform)
    }

    pub fn set_position(&self, position: Vec3) -> bool {
        self.update_transform(|t| t.position = position)
    }

    /// Set the local transform from a full matrix.
    pub fn set_matrix(&self, matrix: Mat4) -> bool {
        self.set_transform(Transform::from_matrix(matrix))
    }

    pub fn update_transform(&self, f: impl FnOnce(&mut Transform)) -> bool {
        self.write(|state, key| f(&mut state.nodes[key].transform))
    }

    pub fn color(&self) -> Option<Color> {
        self.read(|state, key| state.nodes[key].color)
    }

    pub fn set_color(&self, color: Color) -> bool {
        self.write(|state, key| state.nodes[key].color = color)
    }

    /// World matrix from the current transform, not yet synced.
    pub fn world_matrix(&self) -> Option<Mat4> {
        self.read(|state, key| state.local_chain(key).map(|local| state.world * local))
            .flatten()
    }
}

impl PartialEq for InstanceRef {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && Weak::ptr_eq(&self.batch, &other.batch)
    }
}

impl Eq for InstanceRef {}

impl fmt::Debug for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("InstanceRef").field(&self.key).finish()
    }
}
