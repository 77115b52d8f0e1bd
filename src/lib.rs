//! # Herd
//!
//! **Thousands of independent objects, one draw call.**
//!
//! Herd batches many instances of one mesh into a single instanced draw.
//! Each [`Instance`] keeps its own transform, color, parent and pointer
//! handlers, while the batch ([`Instances`]) owns the GPU-facing slot
//! buffers and copies only what changed into them once per frame.
//!
//! ## Quick Start
//!
//! ```no_run
//! use herd::*;
//!
//! fn main() -> Result<(), AppError> {
//!     run(|ctx| {
//!         let cube = ctx.mesh_cube();
//!         let batch = ctx.instances(InstancesConfig::new().capacity(100), cube)?;
//!
//!         let blocks: Vec<Instance> = (0..100)
//!             .map(|i| {
//!                 let props = InstanceProps::new()
//!                     .position(Vec3::new((i % 10) as f32, (i / 10) as f32, 0.0))
//!                     .uniform_scale(0.8)
//!                     .on(EventKind::Click, |event| {
//!                         event.target.set_color(Color::rgb(1.0, 0.3, 0.3));
//!                     });
//!                 Instance::mount(&batch, props)
//!             })
//!             .collect();
//!
//!         ctx.set_camera(Camera::new().at(Vec3::new(5.0, 5.0, 20.0)).looking_at(Vec3::new(5.0, 5.0, 0.0)));
//!
//!         Ok(move |_frame: &mut Frame| {
//!             let _ = &blocks;
//!         })
//!     })
//! }
//! ```
//!
//! ## Pieces
//!
//! - [`Instances`] and [`Instance`] do the batching and work without a GPU.
//! - [`PointerDispatcher`] turns window input into per-instance events.
//! - [`DragController`] moves an instance along a plane under the cursor.
//! - [`run`] and [`run_with_config`] open a window and drive everything.

mod app;
mod camera;
mod color;
mod drag;
mod gpu;
mod input;
mod instanced_pass;
mod instancing;
mod map_controls;
mod mesh;
mod picking;
mod pointer;

pub use app::{AppConfig, AppError, Frame, SetupContext, run, run_with_config};
pub use camera::Camera;
pub use color::{Color, ColorParseError};
pub use drag::{DragController, DragUpdate};
pub use gpu::{GpuContext, GpuError};
pub use input::Input;
pub use instanced_pass::{DepthTexture, InstancedMeshPass, Lighting, SceneUniforms};
pub use instancing::{
    DirtyRange, EventHandlers, EventKind, HandledEvents, Handler, Instance, InstanceBuffers,
    InstanceEvent, InstanceKey, InstanceProps, InstanceRef, Instances, InstancesConfig,
    InstancingError, PointerEvent, Routed, SlotLayout, Subscription, SyncReport,
};
pub use map_controls::MapControls;
pub use mesh::{Mesh, Transform, Vertex3d};
pub use picking::{Collider, InstanceHit, Plane, Ray};
pub use pointer::{PointerDispatcher, PointerOutcome};

// Re-export common math types
pub use glam::{Mat4, Quat, Vec2, Vec3};

// Re-export input types
pub use winit::event::MouseButton;
pub use winit::keyboard::KeyCode;
