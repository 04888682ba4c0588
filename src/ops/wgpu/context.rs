use super::{ADD, FC_BACKWARD, FC_FORWARD, MATMUL};
use crate::error::{GpuStage, TensorError, TensorResult};
use std::sync::mpsc;
use wgpu::util::DeviceExt;

/// How a kernel sees one of its buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Binding {
    Uniform,
    Read,
    ReadWrite,
}

impl Binding {
    fn entry(self, binding: u32) -> wgpu::BindGroupLayoutEntry {
        let ty = match self {
            Self::Uniform => wgpu::BufferBindingType::Uniform,
            Self::Read => wgpu::BufferBindingType::Storage { read_only: true },
            Self::ReadWrite => wgpu::BufferBindingType::Storage { read_only: false },
        };
        wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }
    }
}

/// A compiled compute pipeline together with its bind-group layout.
pub(crate) struct Kernel {
    pub(crate) label: &'static str,
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

impl Kernel {
    fn build(
        device: &wgpu::Device,
        label: &'static str,
        source: &str,
        bindings: &[Binding],
    ) -> TensorResult<Self> {
        scoped(device, GpuStage::Build, label, || Ok(Self::create(device, label, source, bindings)))
    }

    fn create(
        device: &wgpu::Device,
        label: &'static str,
        source: &str,
        bindings: &[Binding],
    ) -> Self {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let entries: Vec<_> = bindings
            .iter()
            .zip(0u32..)
            .map(|(b, i)| b.entry(i))
            .collect();
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });
        Self {
            label,
            layout,
            pipeline,
        }
    }
}

/// Runs `body` inside out-of-memory and validation error scopes.
///
/// Device errors raised while `body` allocates, binds or submits come back as
/// [`TensorError::GpuBackend`] tagged with `stage` instead of reaching the
/// device's uncaptured-error handler, which panics. An error returned by
/// `body` itself takes precedence. Both scopes are always popped.
fn scoped<T>(
    device: &wgpu::Device,
    stage: GpuStage,
    label: &str,
    body: impl FnOnce() -> TensorResult<T>,
) -> TensorResult<T> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let result = body();
    let validation = pollster::block_on(device.pop_error_scope());
    let out_of_memory = pollster::block_on(device.pop_error_scope());

    let value = result?;
    match validation.or(out_of_memory) {
        Some(err) => Err(TensorError::gpu(stage, format!("{label}: {err}"))),
        None => Ok(value),
    }
}

/// Every kernel the backend ships, compiled once per context.
pub(crate) struct Kernels {
    pub(crate) add: Kernel,
    pub(crate) matmul: Kernel,
    pub(crate) fc_forward: Kernel,
    pub(crate) fc_backward: Kernel,
}

impl Kernels {
    fn build(device: &wgpu::Device) -> TensorResult<Self> {
        use Binding::{Read, ReadWrite, Uniform};

        Ok(Self {
            add: Kernel::build(device, "add", ADD, &[Uniform, Read, Read, ReadWrite])?,
            matmul: Kernel::build(device, "matmul", MATMUL, &[Uniform, Read, Read, ReadWrite])?,
            fc_forward: Kernel::build(
                device,
                "fc_forward",
                FC_FORWARD,
                &[Uniform, Read, Read, Read, ReadWrite],
            )?,
            fc_backward: Kernel::build(
                device,
                "fc_backward",
                FC_BACKWARD,
                &[Uniform, Read, Read, Read, ReadWrite, ReadWrite, ReadWrite],
            )?,
        })
    }
}

fn is_gpu_class(info: &wgpu::AdapterInfo) -> bool {
    matches!(
        info.device_type,
        wgpu::DeviceType::DiscreteGpu | wgpu::DeviceType::IntegratedGpu | wgpu::DeviceType::VirtualGpu
    )
}

fn preference(info: &wgpu::AdapterInfo) -> u8 {
    match info.device_type {
        wgpu::DeviceType::DiscreteGpu => 0,
        wgpu::DeviceType::IntegratedGpu => 1,
        _ => 2,
    }
}

/// GPU-class adapters on this machine, most capable first.
fn gpu_adapters(instance: &wgpu::Instance) -> Vec<wgpu::Adapter> {
    let mut adapters: Vec<_> = instance
        .enumerate_adapters(wgpu::Backends::all())
        .into_iter()
        .filter(|a| is_gpu_class(&a.get_info()))
        .collect();
    adapters.sort_by_key(|a| preference(&a.get_info()));
    adapters
}

/// Whether at least one GPU-class adapter is discoverable.
///
/// Software rasterizers and CPU adapters do not count.
pub fn gpu_available() -> bool {
    !gpu_adapters(&wgpu::Instance::default()).is_empty()
}

/// Holds the WGPU device, queue and compiled kernels.
///
/// Creating a context is the one-time initialization step; dropping it is the
/// cleanup. The caller owns it and passes it to every GPU op, so there is no
/// hidden global and no way to use it after release.
pub struct GpuContext {
    info: wgpu::AdapterInfo,
    device: wgpu::Device,
    queue: wgpu::Queue,
    pub(crate) kernels: Kernels,
}

impl core::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GpuContext")
            .field("adapter", &self.info.name)
            .field("backend", &self.info.backend)
            .finish_non_exhaustive()
    }
}

impl GpuContext {
    /// Discovers a GPU-class adapter, creates a device and queue, and compiles
    /// every kernel.
    ///
    /// # Errors
    ///
    /// - [`TensorError::GpuUnavailable`] if no GPU-class adapter exists
    /// - [`TensorError::GpuBackend`] if device creation or kernel compilation fails
    ///
    /// # Internals
    ///
    /// - Uses `pollster::block_on` to synchronously wait for async WGPU calls
    /// - Requests the adapter's own limits so large tensors fit in one binding
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use annof::ops::wgpu::GpuContext;
    ///
    /// let ctx = GpuContext::new().unwrap();
    /// println!("running on {}", ctx.adapter_name());
    /// ```
    pub fn new() -> TensorResult<Self> {
        let instance = wgpu::Instance::default();
        let adapter = gpu_adapters(&instance)
            .into_iter()
            .next()
            .ok_or(TensorError::GpuUnavailable)?;
        let info = adapter.get_info();

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("annof"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .map_err(|e| TensorError::gpu(GpuStage::Context, e.to_string()))?;

        let kernels = Kernels::build(&device)?;
        log::debug!(
            "GPU context ready on {} ({:?}, {:?})",
            info.name,
            info.device_type,
            info.backend
        );

        Ok(Self {
            info,
            device,
            queue,
            kernels,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.info.name
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.info
    }

    /// Runs one op's allocations, dispatch and read-back under device error
    /// scopes. Every GPU op goes through here.
    pub(crate) fn scoped<T>(
        &self,
        label: &str,
        body: impl FnOnce() -> TensorResult<T>,
    ) -> TensorResult<T> {
        scoped(&self.device, GpuStage::Enqueue, label, body)
    }

    /// Byte size of a storage buffer of `len` floats, checked against this
    /// device's limits.
    fn storage_size(&self, label: &str, len: usize) -> TensorResult<u64> {
        let limits = self.device.limits();
        storage_size(
            label,
            len,
            limits.max_buffer_size,
            u64::from(limits.max_storage_buffer_binding_size),
        )
    }

    /// Copies `data` into a new read-only storage buffer.
    pub(crate) fn upload(&self, label: &str, data: &[f32]) -> TensorResult<wgpu::Buffer> {
        self.storage_size(label, data.len())?;
        Ok(self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(data),
            usage: wgpu::BufferUsages::STORAGE,
        }))
    }

    pub(crate) fn uniform(&self, label: &str, params: [u32; 4]) -> wgpu::Buffer {
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        })
    }

    /// Uninitialized storage buffer for `len` floats that can be copied out.
    pub(crate) fn output(&self, label: &str, len: usize) -> TensorResult<wgpu::Buffer> {
        let size = self.storage_size(label, len)?;
        Ok(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        }))
    }

    /// Splits a 1-D launch of `items` invocations (at `group` per workgroup)
    /// into an `(x, y, 1)` grid within the per-dimension limit.
    pub(crate) fn grid_1d(&self, items: usize, group: u32) -> TensorResult<(u32, u32, u32)> {
        let max = self.device.limits().max_compute_workgroups_per_dimension;
        grid_1d(items, group, max)
    }

    pub(crate) fn max_workgroups(&self) -> u32 {
        self.device.limits().max_compute_workgroups_per_dimension
    }

    /// Binds `buffers` in order, dispatches `kernel` over `grid`, then copies
    /// every `(buffer, host)` pair in `outputs` back to the host.
    ///
    /// Blocks until the read-back completes. Binding and submission run in
    /// their own error scope, so an invalid input buffer fails here and the
    /// host outputs are never written.
    pub(crate) fn launch(
        &self,
        kernel: &Kernel,
        buffers: &[&wgpu::Buffer],
        grid: (u32, u32, u32),
        outputs: &mut [(&wgpu::Buffer, &mut [f32])],
    ) -> TensorResult<()> {
        let staging =
            self.scoped(kernel.label, || Ok(self.submit(kernel, buffers, grid, &*outputs)))?;
        self.read_back(&staging, outputs)
    }

    fn submit(
        &self,
        kernel: &Kernel,
        buffers: &[&wgpu::Buffer],
        grid: (u32, u32, u32),
        outputs: &[(&wgpu::Buffer, &mut [f32])],
    ) -> Vec<wgpu::Buffer> {
        let entries: Vec<_> = buffers
            .iter()
            .zip(0u32..)
            .map(|(buf, binding)| wgpu::BindGroupEntry {
                binding,
                resource: buf.as_entire_binding(),
            })
            .collect();
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kernel.label),
            layout: &kernel.layout,
            entries: &entries,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(kernel.label),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kernel.label),
                timestamp_writes: None,
            });
            pass.set_pipeline(&kernel.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(grid.0, grid.1, grid.2);
        }

        let staging: Vec<wgpu::Buffer> = outputs
            .iter()
            .map(|(src, host)| {
                let size = byte_len(host.len());
                let dst = self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("staging"),
                    size,
                    usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                encoder.copy_buffer_to_buffer(src, 0, &dst, 0, size);
                dst
            })
            .collect();

        self.queue.submit(Some(encoder.finish()));
        staging
    }

    fn read_back(
        &self,
        staging: &[wgpu::Buffer],
        outputs: &mut [(&wgpu::Buffer, &mut [f32])],
    ) -> TensorResult<()> {
        let (tx, rx) = mpsc::channel();
        for (i, buf) in staging.iter().enumerate() {
            let tx = tx.clone();
            buf.slice(..).map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send((i, result));
            });
        }
        drop(tx);

        self.device
            .poll(wgpu::PollType::Wait)
            .map_err(|e| TensorError::gpu(GpuStage::ReadBack, e.to_string()))?;

        for _ in 0..staging.len() {
            let (_, mapped) = rx
                .recv()
                .map_err(|_| TensorError::gpu(GpuStage::ReadBack, "map callback never fired"))?;
            mapped.map_err(|e| TensorError::gpu(GpuStage::ReadBack, e.to_string()))?;
        }

        for (buf, (_, host)) in staging.iter().zip(outputs.iter_mut()) {
            {
                let view = buf.slice(..).get_mapped_range();
                let floats: &[f32] = bytemuck::try_cast_slice(&view[..])
                    .map_err(|e| TensorError::gpu(GpuStage::ReadBack, e.to_string()))?;
                host.copy_from_slice(floats);
            }
            buf.unmap();
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        log::debug!("releasing GPU context on {}", self.info.name);
        self.device.destroy();
    }
}

fn byte_len(len: usize) -> u64 {
    (len * core::mem::size_of::<f32>()) as u64
}

/// Bytes needed for `len` floats, provided one buffer of that size can be
/// created (`max_buffer`) and bound as storage (`max_binding`).
fn storage_size(label: &str, len: usize, max_buffer: u64, max_binding: u64) -> TensorResult<u64> {
    let bytes = len
        .checked_mul(core::mem::size_of::<f32>())
        .and_then(|b| u64::try_from(b).ok())
        .ok_or_else(|| {
            TensorError::gpu(GpuStage::Enqueue, format!("{label}: {len} floats overflow a buffer size"))
        })?;
    let limit = max_buffer.min(max_binding);
    if bytes > limit {
        return Err(TensorError::gpu(
            GpuStage::Enqueue,
            format!("{label}: {bytes} bytes exceed the {limit}-byte storage buffer limit"),
        ));
    }
    Ok(bytes)
}

pub(crate) fn to_u32(value: usize, what: &str) -> TensorResult<u32> {
    u32::try_from(value).map_err(|_| {
        TensorError::gpu(
            GpuStage::Enqueue,
            format!("{what} = {value} does not fit a 32-bit kernel index"),
        )
    })
}

fn grid_1d(items: usize, group: u32, max: u32) -> TensorResult<(u32, u32, u32)> {
    let groups = to_u32(items.div_ceil(group as usize), "workgroup count")?;
    if groups <= max {
        return Ok((groups.max(1), 1, 1));
    }
    let rows = groups.div_ceil(max);
    if rows > max {
        return Err(TensorError::gpu(
            GpuStage::Enqueue,
            format!("{items} invocations exceed the dispatch grid"),
        ));
    }
    Ok((max, rows, 1))
}
