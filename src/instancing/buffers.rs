//! Fixed-capacity shared buffers holding one transform and one color per slot.

use std::ops::Range;

use glam::{Mat4, Vec3};

use crate::color::Color;

/// Largest per-slot transform stride of any [`SlotLayout`].
pub(crate) const MAX_STRIDE: usize = 16;

/// What the transform buffer stores for each slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SlotLayout {
    /// The full 4×4 world matrix, column-major (16 floats).
    #[default]
    Matrix,
    /// Only the world position (3 floats), for point clouds.
    Point,
}

impl SlotLayout {
    /// Floats per slot in the transform buffer.
    pub const fn stride(self) -> usize {
        match self {
            SlotLayout::Matrix => 16,
            SlotLayout::Point => 3,
        }
    }

    /// Encode a world matrix into `out`, which is exactly `stride()` long.
    pub(crate) fn encode(self, world: &Mat4, out: &mut [f32]) {
        match self {
            SlotLayout::Matrix => out.copy_from_slice(&world.to_cols_array()),
            SlotLayout::Point => out.copy_from_slice(&world.w_axis.truncate().to_array()),
        }
    }

    /// Rebuild a world matrix from one slot of the transform buffer.
    pub(crate) fn decode(self, data: &[f32]) -> Mat4 {
        match self {
            SlotLayout::Matrix => Mat4::from_cols_slice(data),
            SlotLayout::Point => Mat4::from_translation(Vec3::from_slice(data)),
        }
    }
}

/// The span of slots written since the start of the current sync.
///
/// Empty when nothing changed. Hosts upload only this span.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DirtyRange {
    start: usize,
    end: usize,
}

impl DirtyRange {
    pub fn is_dirty(&self) -> bool {
        self.start < self.end
    }

    /// Changed slots, or `None` when the buffer needs no upload.
    pub fn slots(&self) -> Option<Range<usize>> {
        self.is_dirty().then_some(self.start..self.end)
    }

    fn mark(&mut self, slot: usize) {
        if self.is_dirty() {
            self.start = self.start.min(slot);
            self.end = self.end.max(slot + 1);
        } else {
            self.start = slot;
            self.end = slot + 1;
        }
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Transform and color data for every slot of a batch.
///
/// Allocated once at `capacity` and never resized. Transforms start zeroed
/// and colors start white, so a slot that was never written is invisible to
/// picking and needs no color upload for white instances.
#[derive(Debug)]
pub struct InstanceBuffers {
    layout: SlotLayout,
    capacity: usize,
    transforms: Vec<f32>,
    colors: Vec<f32>,
    transforms_dirty: DirtyRange,
    colors_dirty: DirtyRange,
}

impl InstanceBuffers {
    pub(crate) fn new(layout: SlotLayout, capacity: usize) -> Self {
        Self {
            layout,
            capacity,
            transforms: vec![0.0; capacity * layout.stride()],
            colors: vec![1.0; capacity * 3],
            transforms_dirty: DirtyRange::default(),
            colors_dirty: DirtyRange::default(),
        }
    }

    pub fn layout(&self) -> SlotLayout {
        self.layout
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The whole transform buffer, `capacity * layout.stride()` floats.
    pub fn transforms(&self) -> &[f32] {
        &self.transforms
    }

    /// The whole color buffer, `capacity * 3` floats.
    pub fn colors(&self) -> &[f32] {
        &self.colors
    }

    pub fn transforms_dirty(&self) -> DirtyRange {
        self.transforms_dirty
    }

    pub fn colors_dirty(&self) -> DirtyRange {
        self.colors_dirty
    }

    pub fn transform_slot(&self, slot: usize) -> Option<&[f32]> {
        let stride = self.layout.stride();
        self.transforms.get(slot * stride..(slot + 1) * stride)
    }

    /// World matrix stored at `slot` (translation only for point layouts).
    pub fn matrix_at(&self, slot: usize) -> Option<Mat4> {
        self.transform_slot(slot).map(|data| self.layout.decode(data))
    }

    pub fn color_at(&self, slot: usize) -> Option<Color> {
        self.colors
            .get(slot * 3..slot * 3 + 3)
            .map(|c| Color::rgb(c[0], c[1], c[2]))
    }

    pub(crate) fn begin_frame(&mut self) {
        self.transforms_dirty.clear();
        self.colors_dirty.clear();
    }

    /// Write `world` into `slot` if it differs from what is stored there.
    ///
    /// Returns whether the slot changed. Slots past capacity are ignored.
    pub(crate) fn write_transform(&mut self, slot: usize, world: &Mat4) -> bool {
        if slot >= self.capacity {
            return false;
        }

        let stride = self.layout.stride();
        let mut scratch = [0.0f32; MAX_STRIDE];
        let encoded = &mut scratch[..stride];
        self.layout.encode(world, encoded);

        let stored = &mut self.transforms[slot * stride..(slot + 1) * stride];
        if stored[..] == encoded[..] {
            return false;
        }
        stored.copy_from_slice(encoded);
        self.transforms_dirty.mark(slot);
        true
    }

    /// Write `color` into `slot` if it differs from what is stored there.
    pub(crate) fn write_color(&mut self, slot: usize, color: Color) -> bool {
        if slot >= self.capacity {
            return false;
        }

        let encoded = color.to_array();
        let stored = &mut self.colors[slot * 3..slot * 3 + 3];
        if stored[..] == encoded[..] {
            return false;
        }
        stored.copy_from_slice(&encoded);
        self.colors_dirty.mark(slot);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_buffers_are_zeroed_and_white() {
        let buffers = InstanceBuffers::new(SlotLayout::Matrix, 4);
        assert_eq!(buffers.transforms().len(), 64);
        assert!(buffers.transforms().iter().all(|&v| v == 0.0));
        assert_eq!(buffers.colors().len(), 12);
        assert!(buffers.colors().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn unchanged_writes_are_not_dirty() {
        let mut buffers = InstanceBuffers::new(SlotLayout::Matrix, 4);
        let m = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));

        assert!(buffers.write_transform(2, &m));
        assert!(!buffers.write_color(2, Color::WHITE));
        assert_eq!(buffers.transforms_dirty().slots(), Some(2..3));
        assert!(!buffers.colors_dirty().is_dirty());

        buffers.begin_frame();
        assert!(!buffers.write_transform(2, &m));
        assert!(!buffers.transforms_dirty().is_dirty());
        assert_eq!(buffers.matrix_at(2), Some(m));
    }

    #[test]
    fn dirty_range_spans_changed_slots() {
        let mut buffers = InstanceBuffers::new(SlotLayout::Point, 10);
        let red = Color::rgb(1.0, 0.0, 0.0);
        buffers.write_color(7, red);
        buffers.write_color(3, red);
        assert_eq!(buffers.colors_dirty().slots(), Some(3..8));
        assert_eq!(buffers.color_at(7), Some(red));
    }

    #[test]
    fn point_layout_stores_translation_only() {
        let mut buffers = InstanceBuffers::new(SlotLayout::Point, 2);
        let m = Mat4::from_scale_rotation_translation(
            Vec3::splat(3.0),
            glam::Quat::from_rotation_z(1.0),
            Vec3::new(4.0, 5.0, 6.0),
        );
        buffers.write_transform(1, &m);
        assert_eq!(buffers.transform_slot(1), Some(&[4.0, 5.0, 6.0][..]));
        assert_eq!(
            buffers.matrix_at(1),
            Some(Mat4::from_translation(Vec3::new(4.0, 5.0, 6.0)))
        );
    }

    #[test]
    fn writes_past_capacity_are_dropped() {
        let mut buffers = InstanceBuffers::new(SlotLayout::Matrix, 1);
        assert!(!buffers.write_transform(1, &Mat4::IDENTITY));
        assert!(!buffers.transforms_dirty().is_dirty());
        assert!(buffers.matrix_at(1).is_none());
    }
}
