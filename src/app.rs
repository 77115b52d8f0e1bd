use std::sync::Arc;
use std::time::Instant;

use glam::Vec2;
use log::{error, info, warn};
use thiserror::Error;
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{CursorIcon, Window, WindowAttributes, WindowId};

use crate::camera::Camera;
use crate::color::Color;
use crate::gpu::{GpuContext, GpuError};
use crate::input::Input;
use crate::instanced_pass::{DepthTexture, InstancedMeshPass, Lighting};
use crate::instancing::{Instances, InstancesConfig, InstancingError};
use crate::mesh::Mesh;
use crate::picking::Ray;
use crate::pointer::{PointerDispatcher, PointerOutcome};

/// Failures that stop an app from starting or running.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("event loop error: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
    #[error("failed to create window: {0}")]
    Window(#[from] winit::error::OsError),
    #[error(transparent)]
    Gpu(#[from] GpuError),
    #[error(transparent)]
    Instancing(#[from] InstancingError),
    #[error("setup failed: {0}")]
    Setup(String),
}

/// Context provided during app setup.
pub struct SetupContext<'a> {
    pub gpu: &'a GpuContext,
    passes: &'a mut Vec<InstancedMeshPass>,
    camera: &'a mut Camera,
}

impl SetupContext<'_> {
    /// Create a batch drawn with `mesh` every frame.
    ///
    /// The host syncs, uploads and draws the batch after each frame closure.
    pub fn instances(
        &mut self,
        config: InstancesConfig,
        mesh: Mesh,
    ) -> Result<Instances, InstancingError> {
        let batch = Instances::new(config)?;
        self.add_batch(&batch, mesh);
        Ok(batch)
    }

    /// Draw an existing batch with `mesh`.
    ///
    /// A batch may be drawn by several passes; it is still synced once per
    /// frame and every pass uploads from the same buffers.
    pub fn add_batch(&mut self, batch: &Instances, mesh: Mesh) {
        self.passes
            .push(InstancedMeshPass::new(self.gpu, batch, mesh));
    }

    /// Unit cube matching the default collider.
    pub fn mesh_cube(&self) -> Mesh {
        Mesh::cube(self.gpu)
    }

    pub fn mesh_sphere(&self, segments: u32, rings: u32) -> Mesh {
        Mesh::sphere(self.gpu, segments, rings)
    }

    pub fn set_camera(&mut self, camera: Camera) {
        *self.camera = camera;
    }
}

/// Context provided each frame.
///
/// Pointer events for this frame have already been routed when the frame
/// closure runs; batches are synced after it returns.
pub struct Frame<'a> {
    pub gpu: &'a GpuContext,
    /// Camera used to render this frame and build next frame's cursor ray.
    pub camera: &'a mut Camera,
    pub input: &'a Input,
    /// Result of this frame's pointer routing.
    pub pointer: &'a PointerOutcome,
    /// World-space ray through the cursor, if it is inside the window.
    pub ray: Option<Ray>,
    /// Total elapsed time in seconds.
    pub time: f32,
    /// Delta time since last frame in seconds.
    pub dt: f32,
    window: &'a Window,
}

impl Frame<'_> {
    pub fn fps(&self) -> f32 {
        if self.dt > 0.0 { 1.0 / self.dt } else { 0.0 }
    }

    pub fn width(&self) -> u32 {
        self.gpu.width()
    }

    pub fn height(&self) -> u32 {
        self.gpu.height()
    }

    /// Surface size in pixels.
    pub fn viewport(&self) -> Vec2 {
        self.gpu.size()
    }

    pub fn set_title(&self, title: &str) {
        self.window.set_title(title);
    }

    pub fn set_cursor(&self, cursor: CursorIcon) {
        self.window.set_cursor(cursor);
    }
}

/// Configuration for the app window.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub clear_color: Color,
    pub lighting: Lighting,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "herd".to_string(),
            width: 1280,
            height: 720,
            clear_color: Color::rgb(0.02, 0.02, 0.03),
            lighting: Lighting::default(),
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn clear_color(mut self, color: Color) -> Self {
        self.clear_color = color;
        self
    }

    pub fn lighting(mut self, lighting: Lighting) -> Self {
        self.lighting = lighting;
        self
    }
}

/// Run an app with the default configuration.
pub fn run<S, F>(setup: S) -> Result<(), AppError>
where
    S: FnOnce(&mut SetupContext) -> Result<F, AppError> + 'static,
    F: FnMut(&mut Frame) + 'static,
{
    run_with_config(AppConfig::default(), setup)
}

/// Open a window and run `setup` once the GPU is ready, then call the frame
/// closure it returns once per frame.
///
/// Each frame: route pointer events to instances, run the frame closure,
/// sync every batch, upload dirty slots, draw, present.
///
/// # Example
/// ```no_run
/// use herd::{AppConfig, Instance, InstanceProps, InstancesConfig, Vec3};
///
/// herd::run_with_config(AppConfig::new().title("One box"), |ctx| {
///     let cube = ctx.mesh_cube();
///     let batch = ctx.instances(InstancesConfig::new().capacity(1), cube)?;
///     let block = Instance::mount(&batch, InstanceProps::new());
///
///     Ok(move |frame: &mut herd::Frame| {
///         block.set_position(Vec3::new(frame.time.sin(), 0.0, 0.0));
///     })
/// })
/// .unwrap();
/// ```
pub fn run_with_config<S, F>(config: AppConfig, setup: S) -> Result<(), AppError>
where
    S: FnOnce(&mut SetupContext) -> Result<F, AppError> + 'static,
    F: FnMut(&mut Frame) + 'static,
{
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = HerdApp::Pending {
        config,
        setup: Some(Box::new(
            move |gpu: &GpuContext, passes: &mut Vec<InstancedMeshPass>, camera: &mut Camera| {
                let mut ctx = SetupContext {
                    gpu,
                    passes,
                    camera,
                };
                let frame_fn = setup(&mut ctx)?;
                Ok(Box::new(frame_fn) as Box<dyn FnMut(&mut Frame)>)
            },
        )),
    };

    event_loop.run_app(&mut app)?;

    match app {
        HerdApp::Failed(err) => Err(err),
        _ => Ok(()),
    }
}

/// Each batch once, in first-seen order.
fn distinct_batches<'a>(batches: impl IntoIterator<Item = &'a Instances>) -> Vec<Instances> {
    let mut distinct: Vec<Instances> = Vec::new();
    for batch in batches {
        if !distinct.iter().any(|seen| seen.ptr_eq(batch)) {
            distinct.push(batch.clone());
        }
    }
    distinct
}

fn sync_batches(batches: &[Instances]) {
    for batch in batches {
        batch.sync();
    }
}

type SetupFn = Box<
    dyn FnOnce(
        &GpuContext,
        &mut Vec<InstancedMeshPass>,
        &mut Camera,
    ) -> Result<Box<dyn FnMut(&mut Frame)>, AppError>,
>;

struct Running {
    window: Arc<Window>,
    gpu: GpuContext,
    depth: DepthTexture,
    passes: Vec<InstancedMeshPass>,
    batches: Vec<Instances>,
    camera: Camera,
    input: Input,
    pointer: PointerDispatcher,
    frame_fn: Box<dyn FnMut(&mut Frame)>,
    clear_color: Color,
    lighting: Lighting,
    start_time: Instant,
    last_frame: Instant,
}

enum HerdApp {
    Pending {
        config: AppConfig,
        setup: Option<SetupFn>,
    },
    Running(Box<Running>),
    Failed(AppError),
}

impl HerdApp {
    fn start(
        event_loop: &ActiveEventLoop,
        config: &AppConfig,
        setup: SetupFn,
    ) -> Result<Running, AppError> {
        let window_attrs = WindowAttributes::default()
            .with_title(&config.title)
            .with_inner_size(winit::dpi::LogicalSize::new(config.width, config.height));

        let window = Arc::new(event_loop.create_window(window_attrs)?);
        let gpu = GpuContext::new(window.clone())?;

        let mut passes = Vec::new();
        let mut camera = Camera::new();
        let frame_fn = setup(&gpu, &mut passes, &mut camera)?;
        let batches = distinct_batches(passes.iter().map(InstancedMeshPass::batch));
        info!(
            "Setup complete with {} batch(es) in {} pass(es)",
            batches.len(),
            passes.len()
        );

        Ok(Running {
            depth: DepthTexture::new(&gpu),
            window,
            gpu,
            passes,
            batches,
            camera,
            input: Input::new(),
            pointer: PointerDispatcher::new(),
            frame_fn,
            clear_color: config.clear_color,
            lighting: config.lighting,
            start_time: Instant::now(),
            last_frame: Instant::now(),
        })
    }
}

impl ApplicationHandler for HerdApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let HerdApp::Pending { config, setup } = self else {
            return;
        };
        let Some(setup) = setup.take() else {
            return;
        };

        match Self::start(event_loop, config, setup) {
            Ok(running) => {
                running.window.request_redraw();
                *self = HerdApp::Running(Box::new(running));
            }
            Err(err) => {
                error!("Failed to start: {err}");
                *self = HerdApp::Failed(err);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let HerdApp::Running(app) = self else {
            return;
        };

        app.input.handle_event(&event);

        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                app.gpu.resize(size.width, size.height);
            }
            WindowEvent::RedrawRequested => {
                if let Err(err) = app.frame() {
                    error!("Rendering failed: {err}");
                    event_loop.exit();
                    return;
                }
                app.window.request_redraw();
            }
            _ => {}
        }
    }
}

impl Running {
    fn frame(&mut self) -> Result<(), wgpu::SurfaceError> {
        let now = Instant::now();
        let time = self.start_time.elapsed().as_secs_f32();
        let dt = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;

        let viewport = self.gpu.size();
        let ray = self
            .input
            .cursor()
            .map(|cursor| self.camera.screen_ray(cursor, viewport));

        let outcome = self.pointer.dispatch(&self.batches, &self.input, ray, now);

        let mut frame = Frame {
            gpu: &self.gpu,
            camera: &mut self.camera,
            input: &self.input,
            pointer: &outcome,
            ray,
            time,
            dt,
            window: &self.window,
        };
        (self.frame_fn)(&mut frame);

        // A batch drawn by several passes is synced once, then uploaded by each.
        sync_batches(&self.batches);
        for pass in &mut self.passes {
            pass.upload(&self.gpu);
        }

        let result = self.render();
        self.input.begin_frame();
        result
    }

    fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        let output = match self.gpu.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                warn!("Surface lost, reconfiguring");
                self.gpu.reconfigure();
                return Ok(());
            }
            Err(wgpu::SurfaceError::Timeout) => {
                warn!("Surface timed out, skipping frame");
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        self.depth.ensure_size(&self.gpu);
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });

        {
            let clear = self.clear_color;
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Instanced Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: clear.r as f64,
                            g: clear.g as f64,
                            b: clear.b as f64,
                            a: 1.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: self.depth.view(),
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for pass in &self.passes {
                pass.render(&self.gpu, &mut render_pass, &self.camera, &self.lighting);
            }
        }

        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::instancing::{Instance, InstanceProps};

    #[test]
    fn shared_batch_is_listed_once() {
        let a = Instances::create(2, None).unwrap();
        let b = Instances::create(2, None).unwrap();
        let drawn_by = [a.clone(), b.clone(), a.clone()];

        let distinct = distinct_batches(&drawn_by);
        assert_eq!(distinct.len(), 2);
        assert!(distinct[0].ptr_eq(&a));
        assert!(distinct[1].ptr_eq(&b));
    }

    #[test]
    fn shared_batch_keeps_its_dirty_range_for_every_pass() {
        let batch = Instances::create(4, None).unwrap();
        let block = Instance::mount(&batch, InstanceProps::new());
        let drawn_by = [batch.clone(), batch.clone()];
        let batches = distinct_batches(&drawn_by);
        sync_batches(&batches);

        block.set_position(Vec3::new(1.0, 2.0, 0.0));
        sync_batches(&batches);

        // Both passes read the same buffers after the single sync.
        for pass_batch in &drawn_by {
            assert_eq!(pass_batch.buffers().transforms_dirty().slots(), Some(0..1));
        }
    }
}
