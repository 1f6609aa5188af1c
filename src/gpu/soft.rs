// src/gpu/soft.rs
//
// CPU implementation of `TerrainGpu`.
//
// Work recorded on a queue executes when that queue is submitted, in recording
// order. Staging writes land immediately (like `Queue::write_buffer` before the
// next submit). Fences complete at submit unless completion is held, which lets
// callers observe in-flight states.
//
// Ordering rules a real device would need are checked here: a dispatch may not
// read a height texture that has copies since its last barrier, and a queue may
// not wait on a value its signaler has not submitted.

use std::time::Duration;

use glam::{IVec2, UVec2, Vec3};

use crate::clipmap::normals::{groups, normal_from_neighbours};
use crate::clipmap::region::wrap_coords;
use crate::config::NORMAL_WORKGROUP;
use crate::error::GpuError;
use crate::gpu::{
    BufferHandle, ClipmapParamsGpu, FenceValue, HeightCopy, LevelResources, NormalDispatch, QueueKind, TerrainGpu,
    TextureHandle,
};

/// Everything the core asked for, in call order.
#[derive(Clone, Debug, PartialEq)]
pub enum SoftCommand {
    WriteStaging { staging: BufferHandle, offset: u64, len: usize },
    Copy { queue: QueueKind, copy: HeightCopy },
    Barrier { queue: QueueKind, height: TextureHandle },
    Dispatch(NormalDispatch),
    QueueWait { waiter: QueueKind, signaler: QueueKind, value: FenceValue },
    Submit { queue: QueueKind, value: FenceValue },
    BindClipmap,
}

#[derive(Clone, Copy, Debug)]
enum Recorded {
    Copy(HeightCopy),
    Barrier(TextureHandle),
    Dispatch(NormalDispatch),
}

struct SoftTexture {
    dim: u32,
    texels: Vec<[f32; 4]>,
    /// Written by a copy since the last barrier.
    copy_dst: bool,
}

impl SoftTexture {
    #[inline]
    fn at(&self, t: UVec2) -> [f32; 4] {
        self.texels[(t.y * self.dim + t.x) as usize]
    }
}

#[derive(Default)]
pub struct SoftGpu {
    textures: Vec<SoftTexture>,
    buffers: Vec<Vec<u8>>,
    recorded: [Vec<Recorded>; 2],
    submitted: [FenceValue; 2],
    completed: [FenceValue; 2],

    hold_completion: bool,
    stalled: bool,
    memory_budget: Option<u64>,
    allocated: u64,

    log: Vec<SoftCommand>,
    clipmap: Option<ClipmapParamsGpu>,
}

impl SoftGpu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail allocations once this many bytes are in use.
    pub fn with_memory_budget(bytes: u64) -> Self {
        Self {
            memory_budget: Some(bytes),
            ..Self::default()
        }
    }

    /// While held, submitted work stays in flight until `release` or `wait`.
    pub fn set_hold_completion(&mut self, hold: bool) {
        self.hold_completion = hold;
    }

    /// While stalled, fences never advance and every blocking wait times out.
    pub fn set_stalled(&mut self, stalled: bool) {
        self.stalled = stalled;
    }

    /// Complete everything submitted so far.
    pub fn release(&mut self) {
        if !self.stalled {
            self.completed = self.submitted;
        }
    }

    pub fn submitted(&self, queue: QueueKind) -> FenceValue {
        self.submitted[queue.index()]
    }

    pub fn log(&self) -> &[SoftCommand] {
        &self.log
    }

    pub fn take_log(&mut self) -> Vec<SoftCommand> {
        std::mem::take(&mut self.log)
    }

    pub fn bound_clipmap(&self) -> Option<&ClipmapParamsGpu> {
        self.clipmap.as_ref()
    }

    pub fn height_at(&self, height: TextureHandle, t: UVec2) -> f32 {
        self.texture(height).at(t)[0]
    }

    pub fn normal_at(&self, normals: TextureHandle, t: UVec2) -> Vec3 {
        let [x, y, z, _] = self.texture(normals).at(t);
        Vec3::new(x, y, z)
    }

    pub fn staging_f32(&self, staging: BufferHandle, t: UVec2, dim: u32) -> f32 {
        let at = ((t.y * dim + t.x) * 4) as usize;
        let bytes = &self.buffers[staging.0 as usize][at..at + 4];
        f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    #[inline]
    fn texture(&self, h: TextureHandle) -> &SoftTexture {
        &self.textures[h.0 as usize]
    }

    fn alloc(&mut self, what: &str, bytes: u64) -> Result<(), GpuError> {
        if let Some(budget) = self.memory_budget {
            if self.allocated + bytes > budget {
                return Err(GpuError::allocation(
                    what,
                    format!("{bytes} bytes over budget ({} of {budget} in use)", self.allocated),
                ));
            }
        }
        self.allocated += bytes;
        Ok(())
    }

    fn new_texture(&mut self, dim: u32) -> TextureHandle {
        self.textures.push(SoftTexture {
            dim,
            texels: vec![[0.0; 4]; (dim * dim) as usize],
            copy_dst: false,
        });
        TextureHandle(self.textures.len() as u32 - 1)
    }

    fn execute(&mut self, cmd: Recorded) {
        match cmd {
            Recorded::Copy(c) => self.execute_copy(&c),
            Recorded::Barrier(h) => self.textures[h.0 as usize].copy_dst = false,
            Recorded::Dispatch(d) => self.execute_dispatch(&d),
        }
    }

    fn execute_copy(&mut self, c: &HeightCopy) {
        let r = c.rect;
        assert!(r.x + r.w <= c.dim && r.y + r.h <= c.dim, "copy {r:?} outside a {0}x{0} texture", c.dim);

        let src = &self.buffers[c.staging.0 as usize];
        let dst = &mut self.textures[c.height.0 as usize];
        for y in r.y..r.y + r.h {
            let row = c.staging_offset() as usize + ((y - r.y) * c.bytes_per_row()) as usize;
            for x in 0..r.w {
                let at = row + (x * 4) as usize;
                let h = f32::from_le_bytes([src[at], src[at + 1], src[at + 2], src[at + 3]]);
                dst.texels[(y * dst.dim + r.x + x) as usize][0] = h;
            }
        }
        dst.copy_dst = true;
    }

    fn execute_dispatch(&mut self, d: &NormalDispatch) {
        assert!(
            !self.texture(d.height).copy_dst,
            "normal dispatch reads height texture {:?} without a barrier",
            d.height
        );
        assert!(d.size.x <= d.dim && d.size.y <= d.dim, "dispatch {:?} wider than one wrap", d.size);

        // Whole workgroups, like the shader; invocations past `size` exit.
        let invocations = groups(d.size, NORMAL_WORKGROUP) * NORMAL_WORKGROUP;
        let h = |c: IVec2| self.texture(d.height).at(wrap_coords(c, d.dim))[0];
        let mut out = Vec::with_capacity((d.size.x * d.size.y) as usize);
        for gy in 0..invocations.y {
            for gx in 0..invocations.x {
                if gx >= d.size.x || gy >= d.size.y {
                    continue;
                }
                let c = d.origin + IVec2::new(gx as i32, gy as i32);
                let n = normal_from_neighbours(
                    h(c - IVec2::X),
                    h(c + IVec2::X),
                    h(c - IVec2::Y),
                    h(c + IVec2::Y),
                    d.texel_world,
                );
                out.push((wrap_coords(c, d.dim), n));
            }
        }

        let normals = &mut self.textures[d.normals.0 as usize];
        for (t, n) in out {
            normals.texels[(t.y * normals.dim + t.x) as usize] = [n.x, n.y, n.z, 0.0];
        }
    }
}

impl TerrainGpu for SoftGpu {
    fn create_level_resources(&mut self, level: u32, dim: u32) -> Result<LevelResources, GpuError> {
        if !dim.is_power_of_two() {
            return Err(GpuError::Unsupported(format!("clip level dimension {dim}")));
        }
        let texels = dim as u64 * dim as u64;
        self.alloc(&format!("level {level} height texture"), texels * 4)?;
        self.alloc(&format!("level {level} normal texture"), texels * 8)?;
        self.alloc(&format!("level {level} staging buffer"), texels * 4)?;

        let height = self.new_texture(dim);
        let normals = self.new_texture(dim);
        self.buffers.push(vec![0; (texels * 4) as usize]);
        let staging = BufferHandle(self.buffers.len() as u32 - 1);

        Ok(LevelResources { height, normals, staging })
    }

    fn write_staging(&mut self, staging: BufferHandle, byte_offset: u64, bytes: &[u8]) {
        let buf = &mut self.buffers[staging.0 as usize];
        let at = byte_offset as usize;
        buf[at..at + bytes.len()].copy_from_slice(bytes);
        self.log.push(SoftCommand::WriteStaging {
            staging,
            offset: byte_offset,
            len: bytes.len(),
        });
    }

    fn copy_staging_to_height(&mut self, queue: QueueKind, copy: &HeightCopy) {
        self.recorded[queue.index()].push(Recorded::Copy(*copy));
        self.log.push(SoftCommand::Copy { queue, copy: *copy });
    }

    fn height_barrier(&mut self, queue: QueueKind, height: TextureHandle) {
        self.recorded[queue.index()].push(Recorded::Barrier(height));
        self.log.push(SoftCommand::Barrier { queue, height });
    }

    fn dispatch_normals(&mut self, dispatch: &NormalDispatch) {
        self.recorded[QueueKind::Compute.index()].push(Recorded::Dispatch(*dispatch));
        self.log.push(SoftCommand::Dispatch(*dispatch));
    }

    fn bind_clipmap(&mut self, params: &ClipmapParamsGpu) {
        self.clipmap = Some(*params);
        self.log.push(SoftCommand::BindClipmap);
    }

    fn submit(&mut self, queue: QueueKind) -> FenceValue {
        let q = queue.index();
        for cmd in std::mem::take(&mut self.recorded[q]) {
            self.execute(cmd);
        }
        self.submitted[q] += 1;
        let value = self.submitted[q];
        if !self.hold_completion && !self.stalled {
            self.completed[q] = value;
        }
        self.log.push(SoftCommand::Submit { queue, value });
        value
    }

    fn queue_wait(&mut self, waiter: QueueKind, signaler: QueueKind, value: FenceValue) {
        assert!(
            value <= self.submitted[signaler.index()],
            "{waiter:?} waits on {signaler:?} fence {value} that was never submitted"
        );
        self.log.push(SoftCommand::QueueWait { waiter, signaler, value });
    }

    fn completed(&self, queue: QueueKind) -> FenceValue {
        self.completed[queue.index()]
    }

    fn wait(&mut self, queue: QueueKind, value: FenceValue, timeout: Duration) -> Result<(), GpuError> {
        let q = queue.index();
        if value <= self.completed[q] {
            return Ok(());
        }
        if self.stalled || value > self.submitted[q] {
            return Err(GpuError::FenceTimeout {
                queue,
                value,
                waited: timeout,
            });
        }
        self.completed[q] = value;
        Ok(())
    }
}
