//! Instanced batching.
//!
//! An [`Instances`] batch owns two fixed-capacity buffers, one transform and
//! one color per slot, which the host uploads and draws with a single
//! instanced draw call. Each [`Instance`] mounted into the batch is an
//! independent object with its own transform, color and event handlers.
//!
//! Synchronization is pull-based. Application code writes transforms and
//! colors through [`Instance`] or [`InstanceRef`] whenever it likes; once per
//! frame the host calls [`Instances::sync`], which copies every live
//! instance's world transform and color into its slot and records only the
//! slots that changed. Slots are positional: the n-th live instance in mount
//! order occupies slot n, so unmounting one shifts the rest down.
//!
//! Hit-testing works on slots ([`Instances::raycast`]), and
//! [`Instances::route_event`] hands the event to whichever instance occupied
//! the struck slot at the last sync.

mod batch;
mod buffers;
mod events;
mod instance;

use glam::Mat4;
use thiserror::Error;

use crate::picking::Collider;

pub use batch::{InstanceKey, Instances, Subscription, SyncReport};
pub use buffers::{DirtyRange, InstanceBuffers, SlotLayout};
pub use events::{
    EventHandlers, EventKind, HandledEvents, Handler, InstanceEvent, PointerEvent, Routed,
};
pub use instance::{Instance, InstanceProps, InstanceRef};

/// Errors from creating a batch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InstancingError {
    #[error("instance batch capacity must be at least 1")]
    ZeroCapacity,
}

/// Configuration for an [`Instances`] batch.
///
/// ```
/// use herd::{Instances, InstancesConfig};
///
/// let batch = Instances::new(InstancesConfig::new().capacity(2500).range(400)).unwrap();
/// assert_eq!(batch.capacity(), 2500);
/// assert_eq!(batch.range(), Some(400));
/// ```
#[derive(Clone, Debug)]
pub struct InstancesConfig {
    /// Name used in logs and GPU labels.
    pub label: String,
    /// Slots allocated up front. Never changes.
    pub capacity: usize,
    /// How many live instances to draw, `None` for all.
    pub range: Option<usize>,
    pub layout: SlotLayout,
    /// Placement of the whole batch.
    pub world: Mat4,
    /// Per-slot hit volume for [`SlotLayout::Matrix`] batches.
    pub collider: Collider,
    /// Ray distance that counts as a hit for [`SlotLayout::Point`] batches.
    pub point_threshold: f32,
    /// Diameter each point is drawn at.
    pub point_size: f32,
}

impl Default for InstancesConfig {
    fn default() -> Self {
        Self {
            label: "instances".to_string(),
            capacity: 1000,
            range: None,
            layout: SlotLayout::Matrix,
            world: Mat4::IDENTITY,
            collider: Collider::default(),
            point_threshold: 0.1,
            point_size: 0.1,
        }
    }
}

impl InstancesConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn range(mut self, range: usize) -> Self {
        self.range = Some(range);
        self
    }

    pub fn layout(mut self, layout: SlotLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn world(mut self, world: Mat4) -> Self {
        self.world = world;
        self
    }

    pub fn collider(mut self, collider: Collider) -> Self {
        self.collider = collider;
        self
    }

    pub fn point_threshold(mut self, threshold: f32) -> Self {
        self.point_threshold = threshold;
        self
    }

    pub fn point_size(mut self, size: f32) -> Self {
        self.point_size = size;
        self
    }
}
