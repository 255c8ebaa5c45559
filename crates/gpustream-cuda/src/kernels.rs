//! CUDA C source of the benchmark kernels and their launchers.
//!
//! The source is instantiated per element type through `REAL` and compiled
//! with NVRTC when a stream is created.

use std::sync::Arc;

use cudarc::driver::{CudaFunction, CudaStream as StreamHandle, PushKernelArg};
use cudarc::nvrtc::compile_ptx;
use tracing::debug;

use gpustream_core::error::{Result, StreamError};
use gpustream_core::launch::LaunchConfig;
use gpustream_core::scalar::StreamScalar;

use crate::device::CudaDevice;
use crate::CudaScalar;

const KERNEL_BODY: &str = r#"
extern "C" __global__ void init_kernel(REAL *a, REAL *b, REAL *c,
                                       REAL init_a, REAL init_b, REAL init_c,
                                       unsigned long long array_size)
{
    for (unsigned long long i = (unsigned long long)threadIdx.x + (unsigned long long)blockDim.x * blockIdx.x;
         i < array_size; i += (unsigned long long)blockDim.x * gridDim.x) {
        a[i] = init_a;
        b[i] = init_b;
        c[i] = init_c;
    }
}

extern "C" __global__ void copy_kernel(const REAL *a, REAL *c, unsigned long long array_size)
{
    for (unsigned long long i = (unsigned long long)threadIdx.x + (unsigned long long)blockDim.x * blockIdx.x;
         i < array_size; i += (unsigned long long)blockDim.x * gridDim.x) {
        c[i] = a[i];
    }
}

extern "C" __global__ void mul_kernel(REAL *b, const REAL *c, unsigned long long array_size)
{
    const REAL scalar = SCALAR;
    for (unsigned long long i = (unsigned long long)threadIdx.x + (unsigned long long)blockDim.x * blockIdx.x;
         i < array_size; i += (unsigned long long)blockDim.x * gridDim.x) {
        b[i] = scalar * c[i];
    }
}

extern "C" __global__ void add_kernel(const REAL *a, const REAL *b, REAL *c,
                                      unsigned long long array_size)
{
    for (unsigned long long i = (unsigned long long)threadIdx.x + (unsigned long long)blockDim.x * blockIdx.x;
         i < array_size; i += (unsigned long long)blockDim.x * gridDim.x) {
        c[i] = a[i] + b[i];
    }
}

extern "C" __global__ void triad_kernel(REAL *a, const REAL *b, const REAL *c,
                                        unsigned long long array_size)
{
    const REAL scalar = SCALAR;
    for (unsigned long long i = (unsigned long long)threadIdx.x + (unsigned long long)blockDim.x * blockIdx.x;
         i < array_size; i += (unsigned long long)blockDim.x * gridDim.x) {
        a[i] = b[i] + scalar * c[i];
    }
}

extern "C" __global__ void nstream_kernel(REAL *a, const REAL *b, const REAL *c,
                                          unsigned long long array_size)
{
    const REAL scalar = SCALAR;
    for (unsigned long long i = (unsigned long long)threadIdx.x + (unsigned long long)blockDim.x * blockIdx.x;
         i < array_size; i += (unsigned long long)blockDim.x * gridDim.x) {
        a[i] += b[i] + scalar * c[i];
    }
}

extern "C" __global__ void dot_kernel(const REAL *a, const REAL *b, REAL *sums,
                                      unsigned long long array_size)
{
    __shared__ REAL tb_sum[TBSIZE];

    unsigned long long i = (unsigned long long)blockDim.x * blockIdx.x + threadIdx.x;
    const unsigned int local_i = threadIdx.x;

    tb_sum[local_i] = 0;
    for (; i < array_size; i += (unsigned long long)blockDim.x * gridDim.x)
        tb_sum[local_i] += a[i] * b[i];

    for (unsigned int offset = blockDim.x / 2; offset > 0; offset /= 2) {
        __syncthreads();
        if (local_i < offset) {
            tb_sum[local_i] += tb_sum[local_i + offset];
        }
    }

    if (local_i == 0)
        sums[blockIdx.x] = tb_sum[local_i];
}
"#;

/// Full kernel source for element type `T` and `group_size` threads per block.
pub fn kernel_source<T: StreamScalar>(group_size: usize) -> String {
    format!(
        "#define REAL {}\n#define TBSIZE {}\n#define SCALAR (({})({:?}))\n{}",
        T::C_TYPE,
        group_size,
        T::C_TYPE,
        T::SCALAR.to_f64(),
        KERNEL_BODY
    )
}

/// Compiled kernel suite for one element type.
pub struct StreamKernels {
    stream: Arc<StreamHandle>,
    init: CudaFunction,
    copy: CudaFunction,
    mul: CudaFunction,
    add: CudaFunction,
    triad: CudaFunction,
    nstream: CudaFunction,
    dot: CudaFunction,
}

impl StreamKernels {
    /// Compile and load the suite on `device`.
    pub fn load<T: CudaScalar>(device: &CudaDevice, group_size: usize) -> Result<Self> {
        let source = kernel_source::<T>(group_size);
        let ptx = compile_ptx(source)
            .map_err(|e| StreamError::device(format!("NVRTC compilation failed: {}", e)))?;
        let module = device
            .context()
            .load_module(ptx)
            .map_err(|e| StreamError::device(format!("failed to load module: {}", e)))?;

        let load = |name: &str| {
            module
                .load_function(name)
                .map_err(|e| StreamError::device(format!("failed to load {}: {}", name, e)))
        };

        debug!("Loaded CUDA kernel suite for {}", T::PRECISION);

        Ok(Self {
            stream: Arc::clone(device.stream()),
            init: load("init_kernel")?,
            copy: load("copy_kernel")?,
            mul: load("mul_kernel")?,
            add: load("add_kernel")?,
            triad: load("triad_kernel")?,
            nstream: load("nstream_kernel")?,
            dot: load("dot_kernel")?,
        })
    }

    /// `A[i] = a; B[i] = b; C[i] = c`
    pub fn init<T: CudaScalar>(
        &self,
        config: &LaunchConfig,
        ptrs: [u64; 3],
        values: (T, T, T),
        array_size: usize,
    ) -> Result<()> {
        let [a, b, c] = ptrs;
        let (init_a, init_b, init_c) = values;
        let n = array_size as u64;
        let cfg = to_cuda(config)?;
        // SAFETY: arguments match init_kernel; the pointers address live
        // allocations of at least `array_size` elements.
        unsafe {
            self.stream
                .launch_builder(&self.init)
                .arg(&a)
                .arg(&b)
                .arg(&c)
                .arg(&init_a)
                .arg(&init_b)
                .arg(&init_c)
                .arg(&n)
                .launch(cfg)
        }
        .map(|_| ())
        .map_err(|e| StreamError::device(format!("init_kernel launch failed: {}", e)))
    }

    /// `C[i] = A[i]`
    pub fn copy(&self, config: &LaunchConfig, a: u64, c: u64, array_size: usize) -> Result<()> {
        self.launch2(&self.copy, "copy_kernel", config, a, c, array_size)
    }

    /// `B[i] = scalar * C[i]`
    pub fn mul(&self, config: &LaunchConfig, b: u64, c: u64, array_size: usize) -> Result<()> {
        self.launch2(&self.mul, "mul_kernel", config, b, c, array_size)
    }

    /// `C[i] = A[i] + B[i]`
    pub fn add(&self, config: &LaunchConfig, ptrs: [u64; 3], array_size: usize) -> Result<()> {
        self.launch3(&self.add, "add_kernel", config, ptrs, array_size)
    }

    /// `A[i] = B[i] + scalar * C[i]`
    pub fn triad(&self, config: &LaunchConfig, ptrs: [u64; 3], array_size: usize) -> Result<()> {
        self.launch3(&self.triad, "triad_kernel", config, ptrs, array_size)
    }

    /// `A[i] += B[i] + scalar * C[i]`
    pub fn nstream(&self, config: &LaunchConfig, ptrs: [u64; 3], array_size: usize) -> Result<()> {
        self.launch3(&self.nstream, "nstream_kernel", config, ptrs, array_size)
    }

    /// Per-block partial sums of `A[i] * B[i]` into `sums`.
    pub fn dot(
        &self,
        config: &LaunchConfig,
        a: u64,
        b: u64,
        sums: u64,
        array_size: usize,
    ) -> Result<()> {
        config.validate_cooperative()?;
        self.launch3(&self.dot, "dot_kernel", config, [a, b, sums], array_size)
    }

    fn launch2(
        &self,
        func: &CudaFunction,
        name: &str,
        config: &LaunchConfig,
        x: u64,
        y: u64,
        array_size: usize,
    ) -> Result<()> {
        let n = array_size as u64;
        let cfg = to_cuda(config)?;
        // SAFETY: two-pointer kernels take (ptr, ptr, size); the pointers
        // address live allocations of at least `array_size` elements.
        unsafe {
            self.stream
                .launch_builder(func)
                .arg(&x)
                .arg(&y)
                .arg(&n)
                .launch(cfg)
        }
        .map(|_| ())
        .map_err(|e| StreamError::device(format!("{} launch failed: {}", name, e)))
    }

    fn launch3(
        &self,
        func: &CudaFunction,
        name: &str,
        config: &LaunchConfig,
        ptrs: [u64; 3],
        array_size: usize,
    ) -> Result<()> {
        let [x, y, z] = ptrs;
        let n = array_size as u64;
        let cfg = to_cuda(config)?;
        // SAFETY: three-pointer kernels take (ptr, ptr, ptr, size); the
        // pointers address live allocations large enough for the grid.
        unsafe {
            self.stream
                .launch_builder(func)
                .arg(&x)
                .arg(&y)
                .arg(&z)
                .arg(&n)
                .launch(cfg)
        }
        .map(|_| ())
        .map_err(|e| StreamError::device(format!("{} launch failed: {}", name, e)))
    }
}

fn to_cuda(config: &LaunchConfig) -> Result<cudarc::driver::LaunchConfig> {
    config.validate()?;
    let grid = u32::try_from(config.grid_size).map_err(|_| {
        StreamError::InvalidConfig(format!("grid of {} blocks is too large", config.grid_size))
    })?;
    let block = u32::try_from(config.group_size).map_err(|_| {
        StreamError::InvalidConfig(format!("block of {} threads is too large", config.group_size))
    })?;
    Ok(cudarc::driver::LaunchConfig {
        grid_dim: (grid, 1, 1),
        block_dim: (block, 1, 1),
        shared_mem_bytes: 0,
    })
}
