// src/gpu/wgpu_backend.rs
//
// `TerrainGpu` on wgpu.
//
// wgpu exposes a single queue, so both logical queues share it. Work recorded
// for each logical queue goes into its own command encoder and is submitted
// when that queue is submitted; submission order on the one device queue then
// gives the cross-queue ordering `queue_wait` asks for, and wgpu's own resource
// tracking inserts the copy -> sampled transition the height barrier stands for.
//
// Fence values map to `SubmissionIndex`es. Completion is reported by
// `on_submitted_work_done` callbacks, which run during `Device::poll`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use wgpu::util::DeviceExt;

use crate::config::NORMAL_WORKGROUP;
use crate::error::GpuError;
use crate::gpu::{
    groups_for, BufferHandle, ClipmapParamsGpu, FenceValue, HeightCopy, LevelResources, NormalDispatch, QueueKind,
    TerrainGpu, TextureHandle,
};

pub const NORMALS_WGSL: &str = include_str!("../../shaders/normals.wgsl");

pub const HEIGHT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;
pub const NORMAL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

pub struct Tex2D {
    pub tex: wgpu::Texture,
    pub view: wgpu::TextureView,
}

fn make_tex2d(
    device: &wgpu::Device,
    label: &str,
    dim: u32,
    format: wgpu::TextureFormat,
    usage: wgpu::TextureUsages,
) -> Tex2D {
    let tex = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: dim,
            height: dim,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage,
        view_formats: &[],
    });

    let view = tex.create_view(&Default::default());
    Tex2D { tex, view }
}

fn normals_bgl(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let vis = wgpu::ShaderStages::COMPUTE;
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("normals_bgl"),
        entries: &[
            // binding(0): NormalParams
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: vis,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            // binding(1): height level (r32f is not filterable)
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: vis,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            // binding(2): normal output (rgba16f)
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: vis,
                ty: wgpu::BindingType::StorageTexture {
                    access: wgpu::StorageTextureAccess::WriteOnly,
                    format: NORMAL_FORMAT,
                    view_dimension: wgpu::TextureViewDimension::D2,
                },
                count: None,
            },
        ],
    })
}

fn make_compute_pipeline(
    device: &wgpu::Device,
    label: &str,
    module: &wgpu::ShaderModule,
    entry: &str,
    bgls: &[&wgpu::BindGroupLayout],
) -> wgpu::ComputePipeline {
    let pl = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(&format!("{label}_pl")),
        bind_group_layouts: bgls,
        push_constant_ranges: &[],
    });

    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pl),
        module,
        entry_point: entry,
        compilation_options: Default::default(),
    })
}

/// Staging rows are copied with `bytes_per_row = dim * 4`, which wgpu requires
/// to be a multiple of `COPY_BYTES_PER_ROW_ALIGNMENT`.
pub fn check_level_dim(dim: u32) -> Result<(), GpuError> {
    if !dim.is_power_of_two() {
        return Err(GpuError::Unsupported(format!("clip level dimension {dim} is not a power of two")));
    }
    if (dim * 4) % wgpu::COPY_BYTES_PER_ROW_ALIGNMENT != 0 {
        return Err(GpuError::Unsupported(format!(
            "clip level dimension {dim}: staging rows of {} bytes are not {}-byte aligned",
            dim * 4,
            wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
        )));
    }
    Ok(())
}

/// Drop in-flight entries whose fence value has completed.
fn retire<T>(in_flight: &mut VecDeque<(FenceValue, T)>, done: FenceValue) {
    while in_flight.front().is_some_and(|(v, _)| *v <= done) {
        in_flight.pop_front();
    }
}

struct LogicalQueue {
    encoder: Option<wgpu::CommandEncoder>,
    submitted: FenceValue,
    done: Arc<AtomicU64>,
    in_flight: VecDeque<(FenceValue, wgpu::SubmissionIndex)>,
}

impl LogicalQueue {
    fn new() -> Self {
        Self {
            encoder: None,
            submitted: 0,
            done: Arc::new(AtomicU64::new(0)),
            in_flight: VecDeque::new(),
        }
    }

    fn encoder(&mut self, device: &wgpu::Device, kind: QueueKind) -> &mut wgpu::CommandEncoder {
        self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(match kind {
                    QueueKind::Upload => "terrain_upload_enc",
                    QueueKind::Compute => "terrain_compute_enc",
                }),
            })
        })
    }
}

pub struct WgpuGpu {
    device: wgpu::Device,
    queue: wgpu::Queue,

    normals_bgl: wgpu::BindGroupLayout,
    normals_pipeline: wgpu::ComputePipeline,
    clipmap_buf: wgpu::Buffer,

    textures: Vec<Tex2D>,
    buffers: Vec<wgpu::Buffer>,
    queues: [LogicalQueue; 2],
    lost: Arc<AtomicBool>,
}

impl WgpuGpu {
    pub async fn new(adapter: &wgpu::Adapter) -> Result<Self, GpuError> {
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("terrain_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| GpuError::Unsupported(format!("request_device: {e}")))?;

        let lost = Arc::new(AtomicBool::new(false));
        {
            let lost = lost.clone();
            device.set_device_lost_callback(move |reason, msg| {
                log::error!("device lost ({reason:?}): {msg}");
                lost.store(true, Ordering::Release);
            });
        }

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("normals_cs"),
            source: wgpu::ShaderSource::Wgsl(NORMALS_WGSL.into()),
        });
        let normals_bgl = normals_bgl(&device);
        let normals_pipeline = make_compute_pipeline(&device, "normals", &module, "main", &[&normals_bgl]);

        let clipmap_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("clipmap_params_buf"),
            size: std::mem::size_of::<ClipmapParamsGpu>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let info = adapter.get_info();
        log::info!("terrain gpu: {} ({:?})", info.name, info.backend);

        Ok(Self {
            device,
            queue,
            normals_bgl,
            normals_pipeline,
            clipmap_buf,
            textures: Vec::new(),
            buffers: Vec::new(),
            queues: [LogicalQueue::new(), LogicalQueue::new()],
            lost,
        })
    }

    #[inline]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    #[inline]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn texture_view(&self, h: TextureHandle) -> &wgpu::TextureView {
        &self.textures[h.0 as usize].view
    }

    /// Uniform buffer holding the last `bind_clipmap` params.
    pub fn clipmap_buffer(&self) -> &wgpu::Buffer {
        &self.clipmap_buf
    }
}

impl TerrainGpu for WgpuGpu {
    fn create_level_resources(&mut self, level: u32, dim: u32) -> Result<LevelResources, GpuError> {
        check_level_dim(dim)?;

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let height = make_tex2d(
            &self.device,
            &format!("clip_height_{level}"),
            dim,
            HEIGHT_FORMAT,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        );
        let normals = make_tex2d(
            &self.device,
            &format!("clip_normals_{level}"),
            dim,
            NORMAL_FORMAT,
            wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING,
        );
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("clip_staging_{level}")),
            size: dim as u64 * dim as u64 * 4,
            usage: wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        if let Some(e) = oom.or(validation) {
            return Err(GpuError::allocation(format!("clip level {level} resources"), e));
        }

        self.textures.push(height);
        let height = TextureHandle(self.textures.len() as u32 - 1);
        self.textures.push(normals);
        let normals = TextureHandle(self.textures.len() as u32 - 1);
        self.buffers.push(staging);
        let staging = BufferHandle(self.buffers.len() as u32 - 1);

        Ok(LevelResources { height, normals, staging })
    }

    fn write_staging(&mut self, staging: BufferHandle, byte_offset: u64, bytes: &[u8]) {
        self.queue.write_buffer(&self.buffers[staging.0 as usize], byte_offset, bytes);
    }

    fn copy_staging_to_height(&mut self, queue: QueueKind, copy: &HeightCopy) {
        let r = copy.rect;
        let enc = self.queues[queue.index()].encoder(&self.device, queue);
        enc.copy_buffer_to_texture(
            wgpu::ImageCopyBuffer {
                buffer: &self.buffers[copy.staging.0 as usize],
                layout: wgpu::ImageDataLayout {
                    offset: copy.staging_offset(),
                    bytes_per_row: Some(copy.bytes_per_row()),
                    rows_per_image: Some(copy.dim),
                },
            },
            wgpu::ImageCopyTexture {
                texture: &self.textures[copy.height.0 as usize].tex,
                mip_level: 0,
                origin: wgpu::Origin3d { x: r.x, y: r.y, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: r.w,
                height: r.h,
                depth_or_array_layers: 1,
            },
        );
    }

    fn height_barrier(&mut self, queue: QueueKind, height: TextureHandle) {
        // wgpu tracks the copy-dst -> sampled transition itself.
        log::trace!("height barrier on {queue:?} for {height:?}");
    }

    fn dispatch_normals(&mut self, d: &NormalDispatch) {
        let params = d.params();
        let ubo = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("normal_params_buf"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bg = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("normals_bg"),
            layout: &self.normals_bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: ubo.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&self.textures[d.height.0 as usize].view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&self.textures[d.normals.0 as usize].view),
                },
            ],
        });

        let gx = groups_for(d.size.x, NORMAL_WORKGROUP);
        let gy = groups_for(d.size.y, NORMAL_WORKGROUP);

        let enc = self.queues[QueueKind::Compute.index()].encoder(&self.device, QueueKind::Compute);
        let mut cpass = enc.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("normals_pass"),
            timestamp_writes: None,
        });
        cpass.set_bind_group(0, &bg, &[]);
        cpass.set_pipeline(&self.normals_pipeline);
        cpass.dispatch_workgroups(gx, gy, 1);
    }

    fn bind_clipmap(&mut self, params: &ClipmapParamsGpu) {
        self.queue.write_buffer(&self.clipmap_buf, 0, bytemuck::bytes_of(params));
    }

    fn submit(&mut self, queue: QueueKind) -> FenceValue {
        let q = &mut self.queues[queue.index()];
        let enc = q
            .encoder
            .take()
            .unwrap_or_else(|| self.device.create_command_encoder(&Default::default()));
        let buf = enc.finish();

        let index = self.queue.submit(Some(buf));
        q.submitted += 1;
        let value = q.submitted;

        let done = q.done.clone();
        self.queue.on_submitted_work_done(move || {
            done.fetch_max(value, Ordering::AcqRel);
        });
        retire(&mut q.in_flight, q.done.load(Ordering::Acquire));
        q.in_flight.push_back((value, index));
        value
    }

    fn queue_wait(&mut self, waiter: QueueKind, signaler: QueueKind, value: FenceValue) {
        // One device queue: submission order already serializes the two.
        debug_assert!(value <= self.queues[signaler.index()].submitted);
        log::trace!("{waiter:?} after {signaler:?} fence {value}");
    }

    fn completed(&self, queue: QueueKind) -> FenceValue {
        self.device.poll(wgpu::Maintain::Poll);
        self.queues[queue.index()].done.load(Ordering::Acquire)
    }

    fn wait(&mut self, queue: QueueKind, value: FenceValue, timeout: Duration) -> Result<(), GpuError> {
        let start = Instant::now();
        let q = &mut self.queues[queue.index()];

        // Drop indices already passed; keep the one for `value`.
        let mut target = None;
        while q.in_flight.front().is_some_and(|(v, _)| *v <= value) {
            if let Some((v, idx)) = q.in_flight.pop_front() {
                if v == value {
                    target = Some(idx);
                    break;
                }
            }
        }

        if let Some(idx) = target {
            self.device.poll(wgpu::Maintain::WaitForSubmissionIndex(idx));
        }

        let q = &mut self.queues[queue.index()];
        let done = q.done.clone();
        loop {
            if self.lost.load(Ordering::Acquire) {
                return Err(GpuError::DeviceLost);
            }
            let reached = done.load(Ordering::Acquire);
            if reached >= value {
                retire(&mut q.in_flight, reached);
                return Ok(());
            }
            let waited = start.elapsed();
            if waited >= timeout {
                return Err(GpuError::FenceTimeout { queue, value, waited });
            }
            self.device.poll(wgpu::Maintain::Poll);
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}
