//! Offscreen field textures: single framebuffers, ping-pong pairs and the
//! pool that allocates, resizes and releases them.

use glam::Vec2;

use crate::device::{
    DrawTarget, FilterMode, PassParams, RenderDevice, TextureDescriptor, TextureFormat, TextureId,
};
use crate::shaders::{Program, U_TEXTURE};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Framebuffer {
    pub texture: TextureId,
    pub width: u32,
    pub height: u32,
    pub texel_size: Vec2,
    pub format: TextureFormat,
    pub filter: FilterMode,
}

impl Framebuffer {
    pub fn target(&self) -> DrawTarget {
        DrawTarget::Texture(self.texture)
    }
}

/// Two same-sized framebuffers; passes read `read()`, write `write()`, then
/// `swap()`.
#[derive(Clone, Debug, PartialEq)]
pub struct DoubleFramebuffer {
    buffers: [Framebuffer; 2],
    read_index: usize,
}

impl DoubleFramebuffer {
    pub fn new(first: Framebuffer, second: Framebuffer) -> Self {
        Self {
            buffers: [first, second],
            read_index: 0,
        }
    }

    pub fn read(&self) -> &Framebuffer {
        &self.buffers[self.read_index]
    }

    pub fn write(&self) -> &Framebuffer {
        &self.buffers[1 - self.read_index]
    }

    pub fn swap(&mut self) {
        self.read_index = 1 - self.read_index;
    }

    pub fn width(&self) -> u32 {
        self.buffers[0].width
    }

    pub fn height(&self) -> u32 {
        self.buffers[0].height
    }

    pub fn texel_size(&self) -> Vec2 {
        self.buffers[0].texel_size
    }

    pub fn textures(&self) -> [TextureId; 2] {
        [self.buffers[0].texture, self.buffers[1].texture]
    }
}

/// Formats chosen for each field layout after probing the device.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FieldFormats {
    pub rgba: TextureFormat,
    pub rg: TextureFormat,
    pub r: TextureFormat,
}

/// First format in the fallback chain starting at `requested` that the
/// device validates as renderable. `None` when the chain is exhausted.
pub fn supported_format<D: RenderDevice>(
    device: &D,
    requested: TextureFormat,
) -> Option<TextureFormat> {
    let mut candidate = Some(requested);
    while let Some(format) = candidate {
        if device.supports_render_format(format) {
            if format != requested {
                log::warn!("{:?} not renderable, falling back to {:?}", requested, format);
            }
            return Some(format);
        }
        candidate = format.fallback();
    }
    None
}

impl FieldFormats {
    pub fn probe<D: RenderDevice>(device: &D) -> Option<Self> {
        Some(Self {
            rgba: supported_format(device, TextureFormat::Rgba16Float)?,
            rg: supported_format(device, TextureFormat::Rg16Float)?,
            r: supported_format(device, TextureFormat::R16Float)?,
        })
    }
}

/// Allocates and recycles field framebuffers. Does not track which one is
/// bound; callers pass targets explicitly to every draw.
#[derive(Debug, Default)]
pub struct FramebufferPool {
    live: usize,
}

impl FramebufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of textures allocated through the pool and not yet released.
    pub fn live_textures(&self) -> usize {
        self.live
    }

    pub fn create<D: RenderDevice>(
        &mut self,
        device: &mut D,
        width: u32,
        height: u32,
        format: TextureFormat,
        filter: FilterMode,
    ) -> Framebuffer {
        let width = width.max(1);
        let height = height.max(1);
        let texture = device.create_texture(&TextureDescriptor {
            width,
            height,
            format,
            filter,
        });
        self.live += 1;
        Framebuffer {
            texture,
            width,
            height,
            texel_size: Vec2::new(1.0 / width as f32, 1.0 / height as f32),
            format,
            filter,
        }
    }

    pub fn create_double<D: RenderDevice>(
        &mut self,
        device: &mut D,
        width: u32,
        height: u32,
        format: TextureFormat,
        filter: FilterMode,
    ) -> DoubleFramebuffer {
        let first = self.create(device, width, height, format, filter);
        let second = self.create(device, width, height, format, filter);
        DoubleFramebuffer::new(first, second)
    }

    /// Reallocates `source` at a new size, blitting its contents through the
    /// copy program (stretched, not resampled).
    pub fn resize<D: RenderDevice>(
        &mut self,
        device: &mut D,
        copy: &Program,
        source: &Framebuffer,
        width: u32,
        height: u32,
    ) -> Framebuffer {
        let resized = self.create(device, width, height, source.format, source.filter);
        copy.bind(device);
        let params = PassParams::with_texel_size(resized.texel_size);
        if let Some(binding) = copy.texture(U_TEXTURE, source.texture) {
            device.draw(resized.target(), &params, &[binding]);
        }
        resized
    }

    /// Resizes both halves of `target`. Returns false (and touches nothing)
    /// when the size is unchanged.
    pub fn resize_double<D: RenderDevice>(
        &mut self,
        device: &mut D,
        copy: &Program,
        target: &mut DoubleFramebuffer,
        width: u32,
        height: u32,
    ) -> bool {
        let width = width.max(1);
        let height = height.max(1);
        if target.width() == width && target.height() == height {
            return false;
        }
        let old_read = *target.read();
        let old_write = *target.write();
        let read = self.resize(device, copy, &old_read, width, height);
        let write = self.create(device, width, height, old_write.format, old_write.filter);
        self.release(device, &old_read);
        self.release(device, &old_write);
        *target = DoubleFramebuffer::new(read, write);
        true
    }

    pub fn release<D: RenderDevice>(&mut self, device: &mut D, framebuffer: &Framebuffer) {
        device.release_texture(framebuffer.texture);
        self.live = self.live.saturating_sub(1);
    }

    pub fn release_double<D: RenderDevice>(&mut self, device: &mut D, target: &DoubleFramebuffer) {
        for framebuffer in target.buffers.iter() {
            self.release(device, framebuffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fb(id: u32) -> Framebuffer {
        Framebuffer {
            texture: TextureId(id),
            width: 4,
            height: 2,
            texel_size: Vec2::new(0.25, 0.5),
            format: TextureFormat::Rg16Float,
            filter: FilterMode::Linear,
        }
    }

    #[test]
    fn test_swap_twice_restores_assignment() {
        let mut double = DoubleFramebuffer::new(fb(1), fb(2));
        assert_eq!(double.read().texture, TextureId(1));
        assert_eq!(double.write().texture, TextureId(2));

        double.swap();
        assert_eq!(double.read().texture, TextureId(2));
        assert_eq!(double.write().texture, TextureId(1));

        double.swap();
        assert_eq!(double.read().texture, TextureId(1));
        assert_eq!(double.write().texture, TextureId(2));
    }

    #[test]
    fn test_swap_parity() {
        for n in 0..9 {
            let mut double = DoubleFramebuffer::new(fb(1), fb(2));
            for _ in 0..n {
                double.swap();
            }
            let expected = if n % 2 == 0 { TextureId(1) } else { TextureId(2) };
            assert_eq!(double.read().texture, expected, "after {} swaps", n);
            assert_ne!(double.read().texture, double.write().texture);
        }
    }
}
