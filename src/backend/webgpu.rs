//! Compute backend on wgpu
//!
//! Encode kernels run as compute passes writing blocks straight into a
//! storage buffer; levels are then copied into the compressed texture with
//! buffer-to-texture copies, which is why rows are padded to
//! [`BYTES_PER_ROW_ALIGNMENT`]. Command recording has no ambient state, so
//! this backend never snapshots anything.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use futures::FutureExt;
use image::RgbaImage;
use tracing::{debug, info, warn};
use wgpu::util::DeviceExt;
use wgpu::{
    Adapter, Backends, BindGroup, BindGroupDescriptor, BindGroupEntry, BindingResource, Buffer,
    BufferBinding, BufferDescriptor, BufferUsages, CommandEncoder, CommandEncoderDescriptor,
    CompilationMessageType, ComputePassDescriptor, ComputePassTimestampWrites, ComputePipeline,
    ComputePipelineDescriptor, Device, Extent3d, Features, Instance, QuerySet, Queue, Sampler,
    ShaderModule, Texture, TextureDescriptor, TextureDimension, TextureFormat, TextureUsages,
    TextureView, TextureViewDescriptor,
};

use super::{GpuBackend, LevelDispatch};
use crate::capability::{CapabilitySet, CompressionFeature};
use crate::channels::{ChannelCount, ChannelCounters};
use crate::error::{EncodeError, Result};
use crate::format::{FormatDescriptor, FormatId};
use crate::kernels::{KernelSource, UTILS_KERNEL};
use crate::layout::{BLOCK_DIM, BYTES_PER_ROW_ALIGNMENT};
use crate::options::WrapMode;
use crate::program_cache::ProgramCompiler;
use crate::state::StatefulDevice;

const ENCODE_WORKGROUP: u32 = 16;
const UTILITY_WORKGROUP: u32 = 8;

/// Size of the channel counter buffer: three `u32` counters.
const COUNTERS_SIZE: u64 = 12;

/// Two resolved timestamps.
const TIMESTAMPS_SIZE: u64 = 2 * wgpu::QUERY_SIZE as u64;

/// GPU information for display/selection
#[derive(Debug, Clone)]
pub struct GpuInfo {
    pub name: String,
    pub backend: String,
    pub device_type: String,
    pub adapter_index: usize,
}

impl std::fmt::Display for GpuInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.backend, self.device_type)
    }
}

impl GpuInfo {
    fn from_adapter(adapter: &Adapter, adapter_index: usize) -> Self {
        let info = adapter.get_info();
        Self {
            name: info.name.clone(),
            backend: format!("{:?}", info.backend),
            device_type: format!("{:?}", info.device_type),
            adapter_index,
        }
    }
}

fn new_instance() -> Instance {
    Instance::new(&wgpu::InstanceDescriptor {
        backends: Backends::VULKAN | Backends::DX12 | Backends::METAL,
        ..Default::default()
    })
}

/// List available GPUs
pub fn list_gpus() -> Vec<GpuInfo> {
    pollster::block_on(list_gpus_async())
}

pub async fn list_gpus_async() -> Vec<GpuInfo> {
    let adapters = new_instance().enumerate_adapters(Backends::all()).await;

    adapters
        .iter()
        .enumerate()
        .map(|(idx, adapter)| GpuInfo::from_adapter(adapter, idx))
        .collect()
}

/// Device features worth requesting on `adapter`: block compression,
/// `shader-f16` and timestamp queries, where offered.
pub fn required_features(adapter: &Adapter) -> Features {
    let wanted = Features::TEXTURE_COMPRESSION_BC
        | Features::TEXTURE_COMPRESSION_ETC2
        | Features::TEXTURE_COMPRESSION_ASTC
        | Features::SHADER_F16
        | Features::TIMESTAMP_QUERY;
    adapter.features() & wanted
}

/// Formats a device with `features` can produce.
pub fn capabilities_for_features(features: Features) -> CapabilitySet {
    let mapping = [
        (Features::TEXTURE_COMPRESSION_BC, CompressionFeature::Bc),
        (Features::TEXTURE_COMPRESSION_ETC2, CompressionFeature::Etc2),
        (Features::TEXTURE_COMPRESSION_ASTC, CompressionFeature::Astc),
    ];
    CapabilitySet::from_features(
        mapping
            .into_iter()
            .filter(|(feature, _)| features.contains(*feature))
            .map(|(_, compression)| compression),
    )
}

/// Channel count implied by a texture format, for one- and two-channel
/// formats.
pub fn channel_hint_for_format(format: TextureFormat) -> Option<ChannelCount> {
    match format {
        TextureFormat::R8Unorm | TextureFormat::R16Float | TextureFormat::R32Float => {
            Some(ChannelCount::R)
        }
        TextureFormat::Rg8Unorm | TextureFormat::Rg16Float | TextureFormat::Rg32Float => {
            Some(ChannelCount::Rg)
        }
        _ => None,
    }
}

/// Create a shader module and fail with the compiler's error messages.
async fn create_checked_module(
    device: &Device,
    label: &str,
    source: &str,
) -> std::result::Result<ShaderModule, String> {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    let info = module.get_compilation_info().await;
    let errors: Vec<String> = info
        .messages
        .iter()
        .filter(|m| m.message_type == CompilationMessageType::Error)
        .map(|m| match &m.location {
            Some(loc) => format!("{}:{}: {}", loc.line_number, loc.line_position, m.message),
            None => m.message.clone(),
        })
        .collect();

    if errors.is_empty() {
        Ok(module)
    } else {
        Err(errors.join("\n"))
    }
}

fn compute_pipeline(device: &Device, module: &ShaderModule, entry_point: &str) -> ComputePipeline {
    device.create_compute_pipeline(&ComputePipelineDescriptor {
        label: Some(entry_point),
        layout: None,
        module,
        entry_point: Some(entry_point),
        compilation_options: Default::default(),
        cache: None,
    })
}

/// Map `buffer`, wait for the device and copy the contents out.
fn read_mapped(device: &Device, buffer: &Buffer) -> Result<Vec<u8>> {
    let slice = buffer.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });

    device
        .poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        })
        .map_err(|e| EncodeError::Backend(format!("device poll failed: {}", e)))?;

    rx.recv()
        .map_err(|_| EncodeError::DeviceLost("map callback dropped".to_string()))?
        .map_err(|e| EncodeError::Backend(format!("failed to map buffer: {}", e)))?;

    let data = slice.get_mapped_range();
    let bytes = data.to_vec();
    drop(data);
    buffer.unmap();
    Ok(bytes)
}

fn le_u32(bytes: &[u8], index: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[index * 4..index * 4 + 4]);
    u32::from_le_bytes(word)
}

fn le_u64(bytes: &[u8], index: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[index * 8..index * 8 + 8]);
    u64::from_le_bytes(word)
}

/// A texture on the encoder's device.
///
/// Work textures created by the backend are RGBA8 with an sRGB view format,
/// so they can be sampled with hardware linearization. Host textures are
/// wrapped with [`WgpuTexture::from`] and always sampled through their own
/// format.
#[derive(Debug, Clone)]
pub struct WgpuTexture {
    texture: Texture,
    srgb_view: bool,
}

impl WgpuTexture {
    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn into_inner(self) -> Texture {
        self.texture
    }

    /// View of one level, with the texture's own format.
    fn level_view(&self, level: u32) -> TextureView {
        self.texture.create_view(&TextureViewDescriptor {
            base_mip_level: level,
            mip_level_count: Some(1),
            ..Default::default()
        })
    }

    /// View of one level for filtered sampling. The flag is true when samples
    /// come back linearized and must be re-encoded as sRGB on store.
    fn sampled_view(&self, level: u32, srgb: bool) -> (TextureView, bool) {
        if srgb && self.srgb_view {
            let view = self.texture.create_view(&TextureViewDescriptor {
                format: Some(TextureFormat::Rgba8UnormSrgb),
                base_mip_level: level,
                mip_level_count: Some(1),
                ..Default::default()
            });
            (view, true)
        } else {
            (self.level_view(level), self.texture.format().is_srgb())
        }
    }
}

impl From<Texture> for WgpuTexture {
    fn from(texture: Texture) -> Self {
        Self {
            texture,
            srgb_view: false,
        }
    }
}

/// A compiled encode kernel.
#[derive(Debug)]
pub struct WgpuProgram {
    pipeline: ComputePipeline,
}

/// Command encoder for one encode call.
pub struct WgpuRecorder {
    encoder: CommandEncoder,
    /// Both timestamps were written by this encode
    timed: bool,
}

struct UtilityPipelines {
    mipmap: ComputePipeline,
    resize: ComputePipeline,
    flipy: ComputePipeline,
    detect: ComputePipeline,
}

struct Timestamps {
    query_set: QuerySet,
    resolve: Buffer,
    readback: Buffer,
    /// Nanoseconds per tick
    period: f32,
    /// A resolved pair is waiting in `readback`
    pending: AtomicBool,
}

/// Encoder backend over a wgpu device.
pub struct WgpuBackend {
    device: Device,
    queue: Queue,
    gpu_info: GpuInfo,
    capabilities: CapabilitySet,
    shader_f16: bool,
    utils: UtilityPipelines,
    sampler: Sampler,
    /// Utility pass parameters: `[linear, srgb]`
    params: [Buffer; 2],
    timestamps: Option<Timestamps>,
}

impl WgpuBackend {
    /// Initialize with automatic GPU selection
    pub fn new(kernels: &dyn KernelSource) -> Result<Self> {
        Self::with_gpu_index(None, kernels)
    }

    /// Initialize with specific GPU index
    pub fn with_gpu_index(gpu_index: Option<usize>, kernels: &dyn KernelSource) -> Result<Self> {
        pollster::block_on(Self::create(gpu_index, kernels))
    }

    /// Pick an adapter, create a device with every useful feature and build
    /// the backend on it.
    pub async fn create(gpu_index: Option<usize>, kernels: &dyn KernelSource) -> Result<Self> {
        info!("Initializing wgpu encoder...");

        let adapters = new_instance().enumerate_adapters(Backends::all()).await;
        if adapters.is_empty() {
            return Err(EncodeError::Backend("No GPU found on this system".to_string()));
        }

        for (i, adapter) in adapters.iter().enumerate() {
            let info = adapter.get_info();
            info!(
                "GPU {}: {} ({:?}, {:?})",
                i, info.name, info.backend, info.device_type
            );
        }

        let (adapter_index, adapter) = match gpu_index {
            Some(idx) => adapters.get(idx).map(|a| (idx, a)).ok_or_else(|| {
                EncodeError::Backend(format!(
                    "GPU index {} out of range (found {} GPUs)",
                    idx,
                    adapters.len()
                ))
            })?,
            // Auto-select: prefer discrete GPU, then Vulkan backend
            None => adapters
                .iter()
                .enumerate()
                .max_by_key(|(_, a)| {
                    let info = a.get_info();
                    let mut score = 0i32;
                    if info.device_type == wgpu::DeviceType::DiscreteGpu {
                        score += 100;
                    }
                    if info.backend == wgpu::Backend::Vulkan {
                        score += 10;
                    }
                    score
                })
                .ok_or_else(|| EncodeError::Backend("No GPU found on this system".to_string()))?,
        };

        let gpu_info = GpuInfo::from_adapter(adapter, adapter_index);
        info!("Selected GPU: {}", gpu_info);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("blockpress encoder"),
                required_features: required_features(adapter),
                required_limits: wgpu::Limits::default(),
                ..Default::default()
            })
            .await
            .map_err(|e| EncodeError::Backend(format!("Failed to create GPU device: {}", e)))?;

        Self::from_device(device, queue, gpu_info, kernels).await
    }

    /// Build the backend on a device the host already owns.
    pub async fn from_device(
        device: Device,
        queue: Queue,
        gpu_info: GpuInfo,
        kernels: &dyn KernelSource,
    ) -> Result<Self> {
        let features = device.features();
        let capabilities = capabilities_for_features(features);
        let shader_f16 = features.contains(Features::SHADER_F16);
        info!(
            "{} supports {} compressed formats: {} (shader-f16: {})",
            gpu_info,
            capabilities.len(),
            capabilities.names().join(", "),
            shader_f16
        );

        let source = kernels.load(UTILS_KERNEL).await?;
        let module = create_checked_module(&device, UTILS_KERNEL, &source)
            .await
            .map_err(|message| EncodeError::ShaderCompile {
                format: "utils",
                message,
            })?;
        let utils = UtilityPipelines {
            mipmap: compute_pipeline(&device, &module, "mipmap"),
            resize: compute_pipeline(&device, &module, "resize"),
            flipy: compute_pipeline(&device, &module, "flipy"),
            detect: compute_pipeline(&device, &module, "detect_channel_count"),
        };

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("blockpress linear sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let params = [0u32, 1].map(|srgb| {
            let mut contents = [0u8; 16];
            contents[..4].copy_from_slice(&srgb.to_le_bytes());
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("utility params"),
                contents: &contents,
                usage: BufferUsages::UNIFORM,
            })
        });

        let timestamps = if features.contains(Features::TIMESTAMP_QUERY) {
            Some(Timestamps {
                query_set: device.create_query_set(&wgpu::QuerySetDescriptor {
                    label: Some("encode timestamps"),
                    ty: wgpu::QueryType::Timestamp,
                    count: 2,
                }),
                resolve: device.create_buffer(&BufferDescriptor {
                    label: Some("timestamp resolve"),
                    size: TIMESTAMPS_SIZE,
                    usage: BufferUsages::QUERY_RESOLVE | BufferUsages::COPY_SRC,
                    mapped_at_creation: false,
                }),
                readback: device.create_buffer(&BufferDescriptor {
                    label: Some("timestamp readback"),
                    size: TIMESTAMPS_SIZE,
                    usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                }),
                period: queue.get_timestamp_period(),
                pending: AtomicBool::new(false),
            })
        } else {
            debug!("Timestamp queries unavailable, GPU timing disabled");
            None
        };

        Ok(Self {
            device,
            queue,
            gpu_info,
            capabilities,
            shader_f16,
            utils,
            sampler,
            params,
            timestamps,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn info(&self) -> &GpuInfo {
        &self.gpu_info
    }

    fn rgba_texture(&self, label: &str, width: u32, height: u32, mip_count: u32) -> WgpuTexture {
        let texture = self.device.create_texture(&TextureDescriptor {
            label: Some(label),
            size: Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: mip_count,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsages::TEXTURE_BINDING
                | TextureUsages::STORAGE_BINDING
                | TextureUsages::COPY_DST
                | TextureUsages::COPY_SRC,
            view_formats: &[TextureFormat::Rgba8UnormSrgb],
        });
        WgpuTexture {
            texture,
            srgb_view: true,
        }
    }

    /// Resample `src` into `dst` (both single-level views) with one of the
    /// utility pipelines.
    #[allow(clippy::too_many_arguments)]
    fn resample(
        &self,
        recorder: &mut WgpuRecorder,
        pipeline: &ComputePipeline,
        label: &str,
        src: &TextureView,
        dst: &TextureView,
        linearized: bool,
        width: u32,
        height: u32,
    ) {
        let bind_group = self.device.create_bind_group(&BindGroupDescriptor {
            label: Some(label),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(src),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(dst),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::Sampler(&self.sampler),
                },
                BindGroupEntry {
                    binding: 3,
                    resource: self.params[linearized as usize].as_entire_binding(),
                },
            ],
        });
        dispatch(
            &mut recorder.encoder,
            label,
            pipeline,
            &bind_group,
            width.div_ceil(UTILITY_WORKGROUP),
            height.div_ceil(UTILITY_WORKGROUP),
            None,
        );
    }
}

fn dispatch(
    encoder: &mut CommandEncoder,
    label: &str,
    pipeline: &ComputePipeline,
    bind_group: &BindGroup,
    x: u32,
    y: u32,
    timestamp_writes: Option<ComputePassTimestampWrites<'_>>,
) {
    let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
        label: Some(label),
        timestamp_writes,
    });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, bind_group, &[]);
    pass.dispatch_workgroups(x, y, 1);
}

impl StatefulDevice for WgpuBackend {
    type SavedState = ();

    fn snapshot_state(&self) -> Option<()> {
        None
    }

    fn restore_state(&self, _state: ()) {}
}

impl ProgramCompiler for WgpuBackend {
    type Program = WgpuProgram;

    fn kernel_name(&self, format: FormatId) -> Option<&'static str> {
        Some(format.descriptor().wgsl_kernel)
    }

    fn needs_f16_patch(&self) -> bool {
        !self.shader_f16
    }

    fn compile_program(
        &self,
        format: FormatId,
        source: String,
    ) -> BoxFuture<'static, Result<WgpuProgram>> {
        let device = self.device.clone();
        let label = format.name();
        async move {
            let module = create_checked_module(&device, label, &source)
                .await
                .map_err(|message| EncodeError::ShaderCompile {
                    format: label,
                    message,
                })?;
            let pipeline = device.create_compute_pipeline(&ComputePipelineDescriptor {
                label: Some(label),
                layout: None,
                module: &module,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            });
            Ok(WgpuProgram { pipeline })
        }
        .boxed()
    }
}

impl GpuBackend for WgpuBackend {
    type Texture = WgpuTexture;
    type Buffer = Buffer;
    type Recorder = WgpuRecorder;

    fn describe(&self) -> String {
        self.gpu_info.to_string()
    }

    fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    fn row_alignment(&self) -> Option<u32> {
        Some(BYTES_PER_ROW_ALIGNMENT)
    }

    fn texture_size(&self, texture: &WgpuTexture) -> (u32, u32) {
        (texture.texture.width(), texture.texture.height())
    }

    fn texture_channel_hint(&self, texture: &WgpuTexture) -> Option<ChannelCount> {
        channel_hint_for_format(texture.texture.format())
    }

    fn texture_is_srgb(&self, texture: &WgpuTexture) -> bool {
        texture.texture.format().is_srgb()
    }

    fn count_channels<'a>(&'a self, texture: &'a WgpuTexture) -> BoxFuture<'a, Result<ChannelCounters>> {
        let (width, height) = self.texture_size(texture);

        let counters = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("channel counters"),
            contents: &[0u8; COUNTERS_SIZE as usize],
            usage: BufferUsages::STORAGE | BufferUsages::COPY_SRC,
        });
        let readback = self.device.create_buffer(&BufferDescriptor {
            label: Some("channel counters readback"),
            size: COUNTERS_SIZE,
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let view = texture.level_view(0);
        let bind_group = self.device.create_bind_group(&BindGroupDescriptor {
            label: Some("detect_channel_count"),
            layout: &self.utils.detect.get_bind_group_layout(0),
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(&view),
                },
                BindGroupEntry {
                    binding: 4,
                    resource: counters.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self.device.create_command_encoder(&CommandEncoderDescriptor {
            label: Some("channel detection"),
        });
        dispatch(
            &mut encoder,
            "detect_channel_count",
            &self.utils.detect,
            &bind_group,
            width.div_ceil(UTILITY_WORKGROUP),
            height.div_ceil(UTILITY_WORKGROUP),
            None,
        );
        encoder.copy_buffer_to_buffer(&counters, 0, &readback, 0, COUNTERS_SIZE);
        self.queue.submit(std::iter::once(encoder.finish()));

        let result = read_mapped(&self.device, &readback).map(|bytes| ChannelCounters {
            samples: width as u64 * height as u64,
            non_opaque: le_u32(&bytes, 0) as u64,
            non_grayscale: le_u32(&bytes, 1) as u64,
            invalid_normals: le_u32(&bytes, 2) as u64,
        });
        futures::future::ready(result).boxed()
    }

    fn begin_commands(&self) -> Result<WgpuRecorder> {
        let encoder = self.device.create_command_encoder(&CommandEncoderDescriptor {
            label: Some("blockpress encode"),
        });
        Ok(WgpuRecorder {
            encoder,
            timed: false,
        })
    }

    fn upload_pixels(
        &self,
        _recorder: &mut WgpuRecorder,
        image: &RgbaImage,
        mip_count: u32,
        _srgb: bool,
    ) -> Result<WgpuTexture> {
        let (width, height) = image.dimensions();
        let texture = self.rgba_texture("source texture", width, height, mip_count);

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            image.as_raw(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(texture)
    }

    fn create_work_texture(&self, width: u32, height: u32, mip_count: u32, _srgb: bool) -> Result<WgpuTexture> {
        Ok(self.rgba_texture("work texture", width, height, mip_count))
    }

    fn preprocess(
        &self,
        recorder: &mut WgpuRecorder,
        src: &WgpuTexture,
        dst: &WgpuTexture,
        flip_y: bool,
        srgb: bool,
    ) -> Result<()> {
        let (src_view, linearized) = src.sampled_view(0, srgb);
        let dst_view = dst.level_view(0);
        let (pipeline, label) = if flip_y {
            (&self.utils.flipy, "flipy")
        } else {
            (&self.utils.resize, "resize")
        };
        let (width, height) = self.texture_size(dst);
        self.resample(recorder, pipeline, label, &src_view, &dst_view, linearized, width, height);
        Ok(())
    }

    fn generate_mipmaps(
        &self,
        recorder: &mut WgpuRecorder,
        texture: &WgpuTexture,
        mip_count: u32,
        srgb: bool,
    ) -> Result<()> {
        let (width, height) = self.texture_size(texture);
        for level in 1..mip_count {
            let (src_view, linearized) = texture.sampled_view(level - 1, srgb);
            let dst_view = texture.level_view(level);
            self.resample(
                recorder,
                &self.utils.mipmap,
                "mipmap",
                &src_view,
                &dst_view,
                linearized,
                (width >> level).max(1),
                (height >> level).max(1),
            );
        }
        Ok(())
    }

    fn create_output_texture(
        &self,
        format: &FormatDescriptor,
        width: u32,
        height: u32,
        mip_count: u32,
        srgb: bool,
        _wrap: WrapMode,
    ) -> Result<WgpuTexture> {
        let texture = self.device.create_texture(&TextureDescriptor {
            label: Some(format.name),
            size: Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: mip_count,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: format.wgpu_format(srgb),
            usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
            view_formats: &[],
        });
        Ok(texture.into())
    }

    fn create_packed_buffer(&self, size: u64) -> Result<Buffer> {
        Ok(self.device.create_buffer(&BufferDescriptor {
            label: Some("packed blocks"),
            size,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        }))
    }

    fn encode_level(
        &self,
        recorder: &mut WgpuRecorder,
        program: &WgpuProgram,
        input: &WgpuTexture,
        buffer: &Buffer,
        format: &FormatDescriptor,
        dispatch_info: LevelDispatch<'_>,
    ) -> Result<()> {
        let level = dispatch_info.level;
        // Host textures only have the level they were created with
        let source_level = dispatch_info.index.min(input.texture.mip_level_count() - 1);
        let view = input.level_view(source_level);

        let bind_group = self.device.create_bind_group(&BindGroupDescriptor {
            label: Some(format.name),
            layout: &program.pipeline.get_bind_group_layout(0),
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(&view),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::Sampler(&self.sampler),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::Buffer(BufferBinding {
                        buffer,
                        offset: level.offset,
                        size: NonZeroU64::new(level.size()),
                    }),
                },
            ],
        });

        let timestamp_writes = self.timestamps.as_ref().and_then(|ts| {
            let beginning = dispatch_info.is_first().then_some(0);
            let end = dispatch_info.is_last().then_some(1);
            (beginning.is_some() || end.is_some()).then(|| ComputePassTimestampWrites {
                query_set: &ts.query_set,
                beginning_of_pass_write_index: beginning,
                end_of_pass_write_index: end,
            })
        });
        if timestamp_writes.is_some() && dispatch_info.is_last() {
            recorder.timed = true;
        }

        dispatch(
            &mut recorder.encoder,
            format.name,
            &program.pipeline,
            &bind_group,
            level.block_width.div_ceil(ENCODE_WORKGROUP),
            level.block_height.div_ceil(ENCODE_WORKGROUP),
            timestamp_writes,
        );
        Ok(())
    }

    fn copy_level(
        &self,
        recorder: &mut WgpuRecorder,
        buffer: &Buffer,
        output: &WgpuTexture,
        _format: &FormatDescriptor,
        _srgb: bool,
        dispatch_info: LevelDispatch<'_>,
    ) -> Result<()> {
        let level = dispatch_info.level;
        recorder.encoder.copy_buffer_to_texture(
            wgpu::TexelCopyBufferInfo {
                buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: level.offset,
                    bytes_per_row: Some(level.bytes_per_row),
                    rows_per_image: Some(level.block_height),
                },
            },
            wgpu::TexelCopyTextureInfo {
                texture: &output.texture,
                mip_level: dispatch_info.index,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            // Physical size: small mips are padded to whole blocks
            Extent3d {
                width: level.block_width * BLOCK_DIM,
                height: level.block_height * BLOCK_DIM,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn submit(&self, mut recorder: WgpuRecorder) -> Result<()> {
        let timed = match &self.timestamps {
            Some(ts) if recorder.timed => {
                recorder
                    .encoder
                    .resolve_query_set(&ts.query_set, 0..2, &ts.resolve, 0);
                recorder
                    .encoder
                    .copy_buffer_to_buffer(&ts.resolve, 0, &ts.readback, 0, TIMESTAMPS_SIZE);
                true
            }
            _ => false,
        };

        self.queue.submit(std::iter::once(recorder.encoder.finish()));

        if let Some(ts) = &self.timestamps {
            ts.pending.store(timed, Ordering::Release);
        }
        Ok(())
    }

    fn read_elapsed_ms(&self) -> BoxFuture<'_, Result<Option<f64>>> {
        let result = match &self.timestamps {
            Some(ts) if ts.pending.swap(false, Ordering::AcqRel) => {
                read_mapped(&self.device, &ts.readback).map(|bytes| {
                    let ticks = le_u64(&bytes, 1).saturating_sub(le_u64(&bytes, 0));
                    Some(ticks as f64 * ts.period as f64 / 1_000_000.0)
                })
            }
            Some(_) => {
                warn!("No timed encode to read back");
                Ok(None)
            }
            None => Ok(None),
        };
        futures::future::ready(result).boxed()
    }
}
