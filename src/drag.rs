//! Plane-constrained dragging of a single instance.
//!
//! On press the controller lays a plane through the struck instance, normal
//! to a fixed up axis, and remembers where on that plane the pointer ray
//! landed. Each frame it intersects the current pointer ray with the same
//! plane and moves the instance so that the grab point stays under the
//! cursor.

use glam::{Mat4, Vec3};
use log::debug;

use crate::instancing::{InstanceEvent, InstanceRef};
use crate::picking::{Plane, Ray};

/// Result of one [`DragController::update`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DragUpdate {
    /// No drag in progress.
    Idle,
    /// The target was moved to this local position.
    Moved(Vec3),
    /// The ray missed the drag plane; the target was left where it was.
    Missed,
    /// The target was unmounted, so the drag ended.
    Cancelled,
}

#[derive(Debug)]
struct ActiveDrag {
    target: InstanceRef,
    plane: Plane,
    /// Grab point minus the instance's world position.
    offset: Vec3,
    /// Inverse of the batch's world matrix, mapping world points to local.
    inverse_world: Mat4,
}

/// Drags one instance at a time along a plane.
///
/// ```
/// use herd::{DragController, DragUpdate, Instance, InstanceProps, Instances, Ray, Vec3};
///
/// let batch = Instances::create(4, None).unwrap();
/// let block = Instance::mount(&batch, InstanceProps::new());
/// batch.sync();
///
/// let mut drag = DragController::new();
/// let press = Ray::new(Vec3::new(0.0, 0.0, 10.0), Vec3::NEG_Z);
/// drag.begin_at(block.handle(), Vec3::ZERO, &press, batch.world());
///
/// let moved = Ray::new(Vec3::new(3.0, 1.0, 10.0), Vec3::NEG_Z);
/// assert_eq!(drag.update(&moved), DragUpdate::Moved(Vec3::new(3.0, 1.0, 0.0)));
/// ```
#[derive(Debug)]
pub struct DragController {
    up: Vec3,
    active: Option<ActiveDrag>,
}

impl Default for DragController {
    fn default() -> Self {
        Self::new()
    }
}

impl DragController {
    /// A controller dragging in planes normal to +Z.
    pub fn new() -> Self {
        Self::with_up(Vec3::Z)
    }

    pub fn with_up(up: Vec3) -> Self {
        Self {
            up: up.normalize_or_zero(),
            active: None,
        }
    }

    pub fn up(&self) -> Vec3 {
        self.up
    }

    /// Start dragging the target of a pointer-down event.
    pub fn begin(&mut self, event: &InstanceEvent) {
        self.begin_at(
            event.target.clone(),
            event.slot_position(),
            &event.pointer.ray,
            event.batch_world,
        );
    }

    /// Start dragging `target`, currently at world `position`, grabbed along `ray`.
    ///
    /// Replaces any drag already in progress.
    pub fn begin_at(&mut self, target: InstanceRef, position: Vec3, ray: &Ray, batch_world: Mat4) {
        let plane = Plane::from_normal_and_point(self.up, position);
        let grab = ray.intersect_plane(&plane).unwrap_or(position);

        debug!("drag start on {:?} at {}", target, position);
        self.active = Some(ActiveDrag {
            target,
            plane,
            offset: grab - position,
            inverse_world: batch_world.inverse(),
        });
    }

    /// Move the target to follow `ray`. Call once per frame before sync.
    pub fn update(&mut self, ray: &Ray) -> DragUpdate {
        let Some(drag) = &self.active else {
            return DragUpdate::Idle;
        };

        if !drag.target.is_live() {
            debug!("drag target {:?} unmounted, cancelling", drag.target);
            self.active = None;
            return DragUpdate::Cancelled;
        }

        let Some(hit) = ray.intersect_plane(&drag.plane) else {
            return DragUpdate::Missed;
        };

        let local = drag.inverse_world.transform_point3(hit - drag.offset);
        if drag.target.set_position(local) {
            DragUpdate::Moved(local)
        } else {
            self.active = None;
            DragUpdate::Cancelled
        }
    }

    /// Stop dragging. Returns the instance that was being dragged.
    pub fn end(&mut self) -> Option<InstanceRef> {
        let drag = self.active.take()?;
        debug!("drag end on {:?}", drag.target);
        Some(drag.target)
    }

    pub fn is_dragging(&self) -> bool {
        self.active.is_some()
    }

    pub fn target(&self) -> Option<&InstanceRef> {
        self.active.as_ref().map(|drag| &drag.target)
    }
}
