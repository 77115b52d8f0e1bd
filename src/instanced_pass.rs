//! Instanced rendering of one [`Instances`] batch.
//!
//! The pass draws a single [`Mesh`] once per visible slot with one draw
//! call. Two per-instance vertex buffers mirror the batch's shared buffers:
//!
//! | Buffer     | Layout                | Shader Locations |
//! |------------|-----------------------|------------------|
//! | transforms | 4× Float32x4 (matrix) | 3, 4, 5, 6       |
//! | transforms | Float32x3 (point)     | 3                |
//! | colors     | Float32x3             | 7                |
//!
//! After [`Instances::sync`], [`InstancedMeshPass::upload`] copies only the
//! dirty slot ranges into those buffers.

use glam::Vec3;
use wgpu::util::DeviceExt;

use crate::camera::Camera;
use crate::gpu::GpuContext;
use crate::instancing::{DirtyRange, Instances, SlotLayout};
use crate::mesh::{Mesh, Vertex3d};

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const FLOAT_SIZE: u64 = std::mem::size_of::<f32>() as u64;

/// Scene-wide uniforms (group 0).
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SceneUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub camera_pos: [f32; 3],
    /// Ambient light intensity.
    pub ambient: f32,
    /// World position of the point light.
    pub light_pos: [f32; 3],
    /// Diameter of each point, for point batches.
    pub point_size: f32,
}

/// Ambient plus a single point light.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Lighting {
    pub ambient: f32,
    pub light_position: Vec3,
}

impl Default for Lighting {
    fn default() -> Self {
        Self {
            ambient: 0.4,
            light_position: Vec3::new(10.0, 10.0, 5.0),
        }
    }
}

const MATRIX_ATTRIBUTES: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
    3 => Float32x4,
    4 => Float32x4,
    5 => Float32x4,
    6 => Float32x4,
];
const POINT_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![3 => Float32x3];
const COLOR_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![7 => Float32x3];

const MATRIX_INSTANCE_LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
    array_stride: 16 * FLOAT_SIZE,
    step_mode: wgpu::VertexStepMode::Instance,
    attributes: &MATRIX_ATTRIBUTES,
};

const POINT_INSTANCE_LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
    array_stride: 3 * FLOAT_SIZE,
    step_mode: wgpu::VertexStepMode::Instance,
    attributes: &POINT_ATTRIBUTES,
};

const COLOR_INSTANCE_LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
    array_stride: 3 * FLOAT_SIZE,
    step_mode: wgpu::VertexStepMode::Instance,
    attributes: &COLOR_ATTRIBUTES,
};

/// Draws every visible instance of a batch with one instanced draw call.
pub struct InstancedMeshPass {
    batch: Instances,
    mesh: Mesh,
    pipeline: wgpu::RenderPipeline,
    scene_buffer: wgpu::Buffer,
    scene_bind_group: wgpu::BindGroup,
    transform_buffer: wgpu::Buffer,
    color_buffer: wgpu::Buffer,
    stride: u64,
    instance_count: u32,
}

impl InstancedMeshPass {
    /// Create the pipeline and per-instance buffers for `batch`.
    ///
    /// The buffers start out with the batch's current contents and are sized
    /// for its full capacity.
    pub fn new(gpu: &GpuContext, batch: &Instances, mesh: Mesh) -> Self {
        let device = &gpu.device;
        let label = batch.label();
        let layout = batch.layout();

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Instanced Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/instanced.wgsl").into()),
        });

        let scene_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Scene Uniforms"),
            size: std::mem::size_of::<SceneUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let scene_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Scene Bind Group Layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });

        let scene_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Scene Bind Group"),
            layout: &scene_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: scene_buffer.as_entire_binding(),
            }],
        });

        let (transform_buffer, color_buffer) = {
            let buffers = batch.buffers();
            let transforms = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{label} transforms")),
                contents: bytemuck::cast_slice(buffers.transforms()),
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            });
            let colors = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{label} colors")),
                contents: bytemuck::cast_slice(buffers.colors()),
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            });
            (transforms, colors)
        };

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Instanced Pipeline Layout"),
            bind_group_layouts: &[&scene_bind_group_layout],
            push_constant_ranges: &[],
        });

        let (entry_point, instance_layout) = match layout {
            SlotLayout::Matrix => ("vs_matrix", MATRIX_INSTANCE_LAYOUT),
            SlotLayout::Point => ("vs_point", POINT_INSTANCE_LAYOUT),
        };

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&format!("{label} pipeline")),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some(entry_point),
                buffers: &[Vertex3d::LAYOUT, instance_layout, COLOR_INSTANCE_LAYOUT],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: gpu.config.format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: Some(wgpu::Face::Back),
                front_face: wgpu::FrontFace::Ccw,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Self {
            batch: batch.clone(),
            mesh,
            pipeline,
            scene_buffer,
            scene_bind_group,
            transform_buffer,
            color_buffer,
            stride: layout.stride() as u64 * FLOAT_SIZE,
            instance_count: 0,
        }
    }

    pub fn batch(&self) -> &Instances {
        &self.batch
    }

    /// Copy the slots changed by the last sync to the GPU and latch the
    /// visible count for drawing.
    pub fn upload(&mut self, gpu: &GpuContext) {
        let buffers = self.batch.buffers();
        let float_stride = buffers.layout().stride();

        write_range(
            gpu,
            &self.transform_buffer,
            buffers.transforms(),
            buffers.transforms_dirty(),
            float_stride,
        );
        write_range(
            gpu,
            &self.color_buffer,
            buffers.colors(),
            buffers.colors_dirty(),
            3,
        );
        drop(buffers);

        self.instance_count = self.batch.visible_count() as u32;
    }

    /// Record the draw into `render_pass`, which must have a depth attachment
    /// in [`DepthTexture`]'s format.
    pub fn render(
        &self,
        gpu: &GpuContext,
        render_pass: &mut wgpu::RenderPass,
        camera: &Camera,
        lighting: &Lighting,
    ) {
        if self.instance_count == 0 {
            return;
        }

        let uniforms = SceneUniforms {
            view_proj: camera.view_projection(gpu.aspect()).to_cols_array_2d(),
            camera_pos: camera.position.to_array(),
            ambient: lighting.ambient,
            light_pos: lighting.light_position.to_array(),
            point_size: self.batch.point_size(),
        };
        gpu.queue
            .write_buffer(&self.scene_buffer, 0, bytemuck::cast_slice(&[uniforms]));

        let visible = self.instance_count as u64;
        render_pass.set_pipeline(&self.pipeline);
        render_pass.set_bind_group(0, &self.scene_bind_group, &[]);
        render_pass.set_vertex_buffer(0, self.mesh.vertex_buffer.slice(..));
        render_pass.set_vertex_buffer(1, self.transform_buffer.slice(..visible * self.stride));
        render_pass.set_vertex_buffer(2, self.color_buffer.slice(..visible * 3 * FLOAT_SIZE));
        render_pass.set_index_buffer(self.mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        render_pass.draw_indexed(0..self.mesh.index_count, 0, 0..self.instance_count);
    }
}

fn write_range(
    gpu: &GpuContext,
    target: &wgpu::Buffer,
    data: &[f32],
    dirty: DirtyRange,
    float_stride: usize,
) {
    if let Some(slots) = dirty.slots() {
        let floats = slots.start * float_stride..slots.end * float_stride;
        let offset = floats.start as u64 * FLOAT_SIZE;
        gpu.queue
            .write_buffer(target, offset, bytemuck::cast_slice(&data[floats]));
    }
}

/// Depth buffer shared by every pass of a frame.
pub struct DepthTexture {
    view: wgpu::TextureView,
    size: (u32, u32),
}

impl DepthTexture {
    pub fn new(gpu: &GpuContext) -> Self {
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Depth Texture"),
            size: wgpu::Extent3d {
                width: gpu.width(),
                height: gpu.height(),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        Self {
            view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
            size: (gpu.width(), gpu.height()),
        }
    }

    /// Recreate the texture if the surface size changed.
    pub fn ensure_size(&mut self, gpu: &GpuContext) {
        if self.size != (gpu.width(), gpu.height()) {
            *self = Self::new(gpu);
        }
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }
}
