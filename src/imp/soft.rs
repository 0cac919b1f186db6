// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
CPU reference device.

[`SoftGpu`] keeps every texture and buffer in host memory and executes each call immediately,
so a submission is complete as soon as it returns.  It exists so the rest of the crate can be
exercised without a graphics driver, and it exposes a few knobs tests use to steer the
pipeline:

* [`SoftGpu::set_auto_complete`] stops fences from signaling on submit, so completion can be
  driven by hand with [`SoftGpu::signal_fence`] and [`SoftGpu::complete_all`].
  [`SoftGpu::signal_only`] signals a single fence out of order, as drivers with several
  queues may.
* [`SoftGpu::set_fail_allocations`] makes every texture and buffer allocation fail.
* [`SoftGpu::stats`] counts what the device was asked to do.

Textures are stored tightly packed in storage row order, one texel layout per
[`BackendFormat`].  Single channel formats are interpreted through the color type the caller
passes alongside the texture.
*/

use crate::coordinates::{IRect, ISize, Rect};
use crate::effects::{BicubicDirection, FragmentProcessor, PmConversion, SampledTexture};
use crate::gpu::{
    AccessPattern, BufferHandle, BufferType, DrawTarget, Fence, Filter, Gpu, MipLevel, Origin,
    TextureDesc, TextureHandle,
};
use crate::pixel_formats::convert::{Float4, load_pixel, store_pixel};
use crate::pixel_formats::{BackendFormat, ColorType};
use std::collections::{HashMap, HashSet};
use std::fmt::{Debug, Formatter};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Counters of device activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftStats {
    pub textures_created: usize,
    pub textures_deleted: usize,
    pub buffers_created: usize,
    pub buffers_deleted: usize,
    pub buffer_maps: usize,
    pub reads: usize,
    pub writes: usize,
    pub transfers_from: usize,
    pub transfers_to: usize,
    pub copies: usize,
    pub draws: usize,
    pub submits: usize,
}

struct SoftTexture {
    desc: TextureDesc,
    levels: Vec<Vec<u8>>,
}

impl SoftTexture {
    fn bpp(&self) -> usize {
        self.desc.format.bytes_per_texel()
    }

    fn level_width(&self, level: usize) -> i32 {
        (self.desc.dimensions.width >> level).max(1)
    }

    fn texel(&self, x: i32, y: i32) -> &[u8] {
        let bpp = self.bpp();
        let start = (y as usize * self.desc.dimensions.width as usize + x as usize) * bpp;
        &self.levels[0][start..start + bpp]
    }

    fn texel_mut(&mut self, level: usize, x: i32, y: i32) -> &mut [u8] {
        let bpp = self.bpp();
        let width = self.level_width(level) as usize;
        let start = (y as usize * width + x as usize) * bpp;
        &mut self.levels[level][start..start + bpp]
    }
}

struct SoftBuffer {
    data: Vec<u8>,
    mapped: bool,
}

struct State {
    next_handle: u64,
    textures: HashMap<TextureHandle, SoftTexture>,
    buffers: HashMap<BufferHandle, SoftBuffer>,
    last_fence: u64,
    completed_through: u64,
    /// Fences past `completed_through` that signaled on their own.
    signaled_out_of_order: HashSet<u64>,
    auto_complete: bool,
    fail_allocations: bool,
    stats: SoftStats,
}

pub struct SoftGpu {
    state: Mutex<State>,
}

impl Debug for SoftGpu {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("SoftGpu")
            .field("textures", &state.textures.len())
            .field("buffers", &state.buffers.len())
            .field("last_fence", &state.last_fence)
            .field("completed_through", &state.completed_through)
            .finish()
    }
}

impl Default for SoftGpu {
    fn default() -> Self {
        SoftGpu::new()
    }
}

/// How a raw texel of `format` is loaded when the caller has no color type for it.
fn format_color_type(format: BackendFormat) -> ColorType {
    match format {
        // the single channel round trips through alpha untouched
        BackendFormat::R8Unorm => ColorType::Alpha8,
        BackendFormat::Rgba8Unorm => ColorType::Rgba8888,
        BackendFormat::Bgra8Unorm => ColorType::Bgra8888,
        BackendFormat::Rgba16Float => ColorType::RgbaF16,
    }
}

fn lerp(a: Float4, b: Float4, t: f32) -> Float4 {
    a.scale(1.0 - t).add(b.scale(t))
}

/// Catmull-Rom weights for the four taps around `t`.
fn catmull_rom(t: f32) -> [f32; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    [
        0.5 * (-t + 2.0 * t2 - t3),
        0.5 * (2.0 - 5.0 * t2 + 3.0 * t3),
        0.5 * (t + 4.0 * t2 - 3.0 * t3),
        0.5 * (-t2 + t3),
    ]
}

fn quantize(v: f32) -> f32 {
    (v * 255.0 + 0.5).floor() / 255.0
}

impl State {
    fn allocate_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Loads the texel at logical `(x, y)`, clamped to the subset.
    fn fetch(&self, st: &SampledTexture, x: i32, y: i32) -> Float4 {
        let Some(texture) = self.textures.get(&st.texture) else {
            return Float4::default();
        };
        let x = x.clamp(st.subset.left, st.subset.right - 1);
        let y = y.clamp(st.subset.top, st.subset.bottom - 1);
        let y = match st.origin {
            Origin::TopLeft => y,
            Origin::BottomLeft => st.backing.height - 1 - y,
        };
        load_pixel(st.color_type, texture.texel(x, y))
    }

    fn sample(&self, st: &SampledTexture, x: f32, y: f32, filter: Filter) -> Float4 {
        match filter {
            Filter::Nearest => self.fetch(st, x.floor() as i32, y.floor() as i32),
            Filter::Linear => {
                let fx = x - 0.5;
                let fy = y - 0.5;
                let x0 = fx.floor();
                let y0 = fy.floor();
                let (tx, ty) = (fx - x0, fy - y0);
                let (x0, y0) = (x0 as i32, y0 as i32);
                let top = lerp(self.fetch(st, x0, y0), self.fetch(st, x0 + 1, y0), tx);
                let bottom = lerp(
                    self.fetch(st, x0, y0 + 1),
                    self.fetch(st, x0 + 1, y0 + 1),
                    tx,
                );
                lerp(top, bottom, ty)
            }
        }
    }

    fn sample_bicubic(
        &self,
        st: &SampledTexture,
        x: f32,
        y: f32,
        direction: BicubicDirection,
        premul_clamp: bool,
    ) -> Float4 {
        let axis = |v: f32, filtered: bool| -> (i32, [f32; 4]) {
            if filtered {
                let f = v - 0.5;
                let base = f.floor();
                (base as i32 - 1, catmull_rom(f - base))
            } else {
                (v.floor() as i32, [1.0, 0.0, 0.0, 0.0])
            }
        };
        let (x0, wx) = axis(
            x,
            matches!(direction, BicubicDirection::X | BicubicDirection::XY),
        );
        let (y0, wy) = axis(
            y,
            matches!(direction, BicubicDirection::Y | BicubicDirection::XY),
        );
        let mut acc = Float4::default();
        for (j, wyj) in wy.iter().enumerate() {
            if *wyj == 0.0 {
                continue;
            }
            let mut row = Float4::default();
            for (i, wxi) in wx.iter().enumerate() {
                if *wxi == 0.0 {
                    continue;
                }
                row = row.add(self.fetch(st, x0 + i as i32, y0 + j as i32).scale(*wxi));
            }
            acc = acc.add(row.scale(*wyj));
        }
        let a = acc.a.clamp(0.0, 1.0);
        let limit = if premul_clamp { a } else { 1.0 };
        Float4::new(
            acc.r.clamp(0.0, limit),
            acc.g.clamp(0.0, limit),
            acc.b.clamp(0.0, limit),
            a,
        )
    }

    fn evaluate(&self, fp: &FragmentProcessor, x: f32, y: f32) -> Float4 {
        match fp {
            FragmentProcessor::Texture { texture, filter } => self.sample(texture, x, y, *filter),
            FragmentProcessor::Bicubic {
                texture,
                direction,
                premul_clamp,
            } => self.sample_bicubic(texture, x, y, *direction, *premul_clamp),
            FragmentProcessor::ColorMatrix {
                child,
                matrix,
                unpremul_input,
                clamp_output,
                premul_output,
            } => {
                let mut c = self.evaluate(child, x, y);
                if *unpremul_input {
                    let inv = if c.a > 0.0 { 1.0 / c.a } else { 0.0 };
                    c = c.map_rgb(|v| v * inv);
                }
                let input = [c.r, c.g, c.b, c.a, 1.0];
                let row = |i: usize| -> f32 {
                    let mut sum = 0.0;
                    for (j, value) in input.iter().enumerate() {
                        sum += matrix[i * 5 + j] * value;
                    }
                    if *clamp_output { sum.clamp(0.0, 1.0) } else { sum }
                };
                let mut out = Float4::new(row(0), row(1), row(2), row(3));
                if *premul_output {
                    let a = out.a;
                    out = out.map_rgb(|v| v * a);
                }
                out
            }
            FragmentProcessor::ColorSpaceXform { child, steps } => {
                steps.apply(self.evaluate(child, x, y))
            }
            FragmentProcessor::PmConversion { child, conversion } => {
                let c = self.evaluate(child, x, y);
                match conversion {
                    PmConversion::ToUnpremul => {
                        let a = c.a;
                        c.map_rgb(|v| if a <= 0.0 { 0.0 } else { quantize(v / a) })
                    }
                    PmConversion::ToPremul => {
                        let c = Float4::new(quantize(c.r), quantize(c.g), quantize(c.b), quantize(c.a));
                        let a = c.a;
                        c.map_rgb(|v| quantize(v * a))
                    }
                }
            }
        }
    }
}

impl SoftGpu {
    pub fn new() -> Self {
        SoftGpu {
            state: Mutex::new(State {
                next_handle: 0,
                textures: HashMap::new(),
                buffers: HashMap::new(),
                last_fence: 0,
                completed_through: 0,
                signaled_out_of_order: HashSet::new(),
                auto_complete: true,
                fail_allocations: false,
                stats: SoftStats::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// When set (the default), every fence inserted so far signals on submit.
    pub fn set_auto_complete(&self, auto_complete: bool) {
        self.lock().auto_complete = auto_complete;
    }

    /// Signals `fence` and every fence inserted before it.
    pub fn signal_fence(&self, fence: Fence) {
        let mut state = self.lock();
        state.completed_through = state.completed_through.max(fence.raw());
    }

    /// Signals `fence` alone, leaving earlier fences pending.
    pub fn signal_only(&self, fence: Fence) {
        let mut state = self.lock();
        if fence.raw() > state.completed_through {
            state.signaled_out_of_order.insert(fence.raw());
        }
    }

    /// Signals every fence inserted so far.
    pub fn complete_all(&self) {
        let mut state = self.lock();
        state.completed_through = state.last_fence;
    }

    pub fn set_fail_allocations(&self, fail: bool) {
        self.lock().fail_allocations = fail;
    }

    pub fn stats(&self) -> SoftStats {
        self.lock().stats
    }

    pub fn live_texture_count(&self) -> usize {
        self.lock().textures.len()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.lock().buffers.len()
    }
}

impl Gpu for SoftGpu {
    fn create_texture(&self, desc: &TextureDesc) -> Option<TextureHandle> {
        let mut state = self.lock();
        if state.fail_allocations || desc.dimensions.is_empty() {
            return None;
        }
        let bpp = desc.format.bytes_per_texel();
        let level_count = if desc.mipmapped {
            crate::gpu::mip_level_count(desc.dimensions) + 1
        } else {
            1
        };
        let levels = (0..level_count)
            .map(|i| {
                let w = (desc.dimensions.width >> i).max(1) as usize;
                let h = (desc.dimensions.height >> i).max(1) as usize;
                vec![0u8; w * h * bpp]
            })
            .collect();
        let handle = TextureHandle::new(state.allocate_handle());
        state.textures.insert(handle, SoftTexture { desc: *desc, levels });
        state.stats.textures_created += 1;
        logwise::trace_sync!(
            "soft texture {handle} {dimensions}",
            handle = logwise::privacy::LogIt(handle),
            dimensions = logwise::privacy::LogIt(desc.dimensions)
        );
        Some(handle)
    }

    fn delete_texture(&self, texture: TextureHandle) {
        let mut state = self.lock();
        if state.textures.remove(&texture).is_some() {
            state.stats.textures_deleted += 1;
        }
    }

    fn create_buffer(
        &self,
        size: usize,
        _buffer_type: BufferType,
        _access: AccessPattern,
    ) -> Option<BufferHandle> {
        let mut state = self.lock();
        if state.fail_allocations || size == 0 {
            return None;
        }
        let handle = BufferHandle::new(state.allocate_handle());
        state.buffers.insert(
            handle,
            SoftBuffer {
                data: vec![0; size],
                mapped: false,
            },
        );
        state.stats.buffers_created += 1;
        Some(handle)
    }

    fn delete_buffer(&self, buffer: BufferHandle) {
        let mut state = self.lock();
        if state.buffers.remove(&buffer).is_some() {
            state.stats.buffers_deleted += 1;
        }
    }

    fn map_buffer(&self, buffer: BufferHandle) -> Option<Box<[u8]>> {
        let mut state = self.lock();
        let b = state.buffers.get_mut(&buffer)?;
        if b.mapped {
            return None;
        }
        b.mapped = true;
        let view = b.data.clone().into_boxed_slice();
        state.stats.buffer_maps += 1;
        Some(view)
    }

    fn unmap_buffer(&self, buffer: BufferHandle, written: Option<&[u8]>) {
        let mut state = self.lock();
        if let Some(b) = state.buffers.get_mut(&buffer) {
            if let Some(written) = written {
                let n = written.len().min(b.data.len());
                b.data[..n].copy_from_slice(&written[..n]);
            }
            b.mapped = false;
        }
    }

    fn update_buffer(&self, buffer: BufferHandle, offset: usize, data: &[u8]) -> bool {
        let mut state = self.lock();
        let Some(b) = state.buffers.get_mut(&buffer) else {
            return false;
        };
        if b.mapped || offset + data.len() > b.data.len() {
            return false;
        }
        b.data[offset..offset + data.len()].copy_from_slice(data);
        true
    }

    fn read_pixels(
        &self,
        texture: TextureHandle,
        rect: IRect,
        surface_color_type: ColorType,
        dst_color_type: ColorType,
        dst: &mut [u8],
        row_bytes: usize,
    ) -> bool {
        let mut state = self.lock();
        let Some(tex) = state.textures.get(&texture) else {
            return false;
        };
        let bpp = dst_color_type.bytes_per_pixel();
        for (row, y) in (rect.top..rect.bottom).enumerate() {
            for (col, x) in (rect.left..rect.right).enumerate() {
                let c = load_pixel(surface_color_type, tex.texel(x, y));
                let start = row * row_bytes + col * bpp;
                store_pixel(dst_color_type, c, &mut dst[start..start + bpp]);
            }
        }
        state.stats.reads += 1;
        true
    }

    fn write_pixels(
        &self,
        texture: TextureHandle,
        rect: IRect,
        surface_color_type: ColorType,
        src_color_type: ColorType,
        levels: &[MipLevel<'_>],
    ) -> bool {
        let mut state = self.lock();
        let Some(tex) = state.textures.get_mut(&texture) else {
            return false;
        };
        if levels.len() > tex.levels.len() {
            return false;
        }
        let src_bpp = src_color_type.bytes_per_pixel();
        let (mut w, mut h) = (rect.width(), rect.height());
        for (i, level) in levels.iter().enumerate() {
            let (left, top) = if i == 0 { (rect.left, rect.top) } else { (0, 0) };
            for y in 0..h {
                for x in 0..w {
                    let start = y as usize * level.row_bytes + x as usize * src_bpp;
                    let c = load_pixel(src_color_type, &level.pixels[start..start + src_bpp]);
                    store_pixel(surface_color_type, c, tex.texel_mut(i, left + x, top + y));
                }
            }
            w = (w / 2).max(1);
            h = (h / 2).max(1);
        }
        state.stats.writes += 1;
        true
    }

    fn transfer_pixels_to(
        &self,
        texture: TextureHandle,
        rect: IRect,
        texture_color_type: ColorType,
        buffer_color_type: ColorType,
        buffer: BufferHandle,
        offset: usize,
        row_bytes: usize,
    ) -> bool {
        let mut guard = self.lock();
        let state = &mut *guard;
        let (Some(tex), Some(buf)) = (
            state.textures.get_mut(&texture),
            state.buffers.get(&buffer),
        ) else {
            return false;
        };
        let bpp = buffer_color_type.bytes_per_pixel();
        let needed = offset + (rect.height() as usize - 1) * row_bytes + rect.width() as usize * bpp;
        if needed > buf.data.len() {
            return false;
        }
        for y in 0..rect.height() {
            for x in 0..rect.width() {
                let start = offset + y as usize * row_bytes + x as usize * bpp;
                let c = load_pixel(buffer_color_type, &buf.data[start..start + bpp]);
                store_pixel(
                    texture_color_type,
                    c,
                    tex.texel_mut(0, rect.left + x, rect.top + y),
                );
            }
        }
        state.stats.transfers_to += 1;
        true
    }

    fn transfer_pixels_from(
        &self,
        texture: TextureHandle,
        rect: IRect,
        surface_color_type: ColorType,
        buffer_color_type: ColorType,
        buffer: BufferHandle,
        offset: usize,
        row_bytes: usize,
    ) -> bool {
        let mut guard = self.lock();
        let state = &mut *guard;
        let (Some(tex), Some(buf)) = (
            state.textures.get(&texture),
            state.buffers.get_mut(&buffer),
        ) else {
            return false;
        };
        let bpp = buffer_color_type.bytes_per_pixel();
        let needed = (rect.height() as usize - 1) * row_bytes + rect.width() as usize * bpp;
        if offset + needed > buf.data.len() {
            return false;
        }
        for (row, y) in (rect.top..rect.bottom).enumerate() {
            for (col, x) in (rect.left..rect.right).enumerate() {
                let c = load_pixel(surface_color_type, tex.texel(x, y));
                let start = offset + row * row_bytes + col * bpp;
                store_pixel(buffer_color_type, c, &mut buf.data[start..start + bpp]);
            }
        }
        state.stats.transfers_from += 1;
        true
    }

    fn copy_surface(
        &self,
        dst: TextureHandle,
        dst_rect: IRect,
        src: TextureHandle,
        src_rect: IRect,
        filter: Filter,
    ) -> bool {
        let mut state = self.lock();
        let Some(src_tex) = state.textures.get(&src) else {
            return false;
        };
        let ct = format_color_type(src_tex.desc.format);
        let sampled = SampledTexture {
            texture: src,
            color_type: ct,
            origin: Origin::TopLeft,
            backing: src_tex.desc.dimensions,
            subset: src_rect,
        };
        let sx = src_rect.width() as f32 / dst_rect.width() as f32;
        let sy = src_rect.height() as f32 / dst_rect.height() as f32;
        let mut texels = Vec::with_capacity(dst_rect.size().area() as usize);
        for y in 0..dst_rect.height() {
            for x in 0..dst_rect.width() {
                let c = if src_rect.size() == dst_rect.size() {
                    state.fetch(&sampled, src_rect.left + x, src_rect.top + y)
                } else {
                    let lx = src_rect.left as f32 + (x as f32 + 0.5) * sx;
                    let ly = src_rect.top as f32 + (y as f32 + 0.5) * sy;
                    state.sample(&sampled, lx, ly, filter)
                };
                texels.push(c);
            }
        }
        let Some(dst_tex) = state.textures.get_mut(&dst) else {
            return false;
        };
        if format_color_type(dst_tex.desc.format) != ct {
            return false;
        }
        let mut it = texels.into_iter();
        for y in dst_rect.top..dst_rect.bottom {
            for x in dst_rect.left..dst_rect.right {
                if let Some(c) = it.next() {
                    store_pixel(ct, c, dst_tex.texel_mut(0, x, y));
                }
            }
        }
        state.stats.copies += 1;
        true
    }

    fn draw(
        &self,
        target: &DrawTarget,
        dst_rect: IRect,
        local_rect: Rect,
        fp: &FragmentProcessor,
    ) -> bool {
        let mut state = self.lock();
        let sx = local_rect.width() / dst_rect.width() as f32;
        let sy = local_rect.height() / dst_rect.height() as f32;
        // evaluate everything first so a draw may sample its own target
        let mut out = Vec::with_capacity(dst_rect.size().area() as usize);
        for y in 0..dst_rect.height() {
            let ly = local_rect.top + (y as f32 + 0.5) * sy;
            for x in 0..dst_rect.width() {
                let lx = local_rect.left + (x as f32 + 0.5) * sx;
                out.push(state.evaluate(fp, lx, ly));
            }
        }
        let Some(tex) = state.textures.get_mut(&target.texture) else {
            return false;
        };
        let mut it = out.into_iter();
        for y in dst_rect.top..dst_rect.bottom {
            let storage_y = match target.origin {
                Origin::TopLeft => y,
                Origin::BottomLeft => target.backing.height - 1 - y,
            };
            for x in dst_rect.left..dst_rect.right {
                if let Some(c) = it.next() {
                    store_pixel(target.color_type, c, tex.texel_mut(0, x, storage_y));
                }
            }
        }
        state.stats.draws += 1;
        true
    }

    fn resolve_render_target(&self, _texture: TextureHandle) {}

    fn insert_fence(&self) -> Fence {
        let mut state = self.lock();
        state.last_fence += 1;
        Fence::new(state.last_fence)
    }

    fn wait_fence(&self, fence: Fence) -> bool {
        let state = self.lock();
        fence.raw() <= state.completed_through || state.signaled_out_of_order.contains(&fence.raw())
    }

    fn delete_fence(&self, _fence: Fence) {}

    fn submit(&self, sync_cpu: bool) -> bool {
        let mut state = self.lock();
        state.stats.submits += 1;
        if state.auto_complete || sync_cpu {
            state.completed_through = state.last_fence;
        }
        true
    }
}
