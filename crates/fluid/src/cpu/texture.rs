use glam::{Vec2, Vec4};

use crate::device::{FilterMode, TextureFormat};

/// Row-major RGBA texels. Row 0 is the bottom of field uv space.
#[derive(Clone, Debug)]
pub struct CpuTexture {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub filter: FilterMode,
    data: Vec<Vec4>,
}

impl CpuTexture {
    pub fn new(width: u32, height: u32, format: TextureFormat, filter: FilterMode) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            width,
            height,
            format,
            filter,
            data: vec![Vec4::ZERO; (width * height) as usize],
        }
    }

    pub fn data(&self) -> &[Vec4] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [Vec4] {
        &mut self.data
    }

    pub fn clear(&mut self) {
        self.data.fill(Vec4::ZERO);
    }

    pub fn texel(&self, x: u32, y: u32) -> Vec4 {
        self.data[(y * self.width + x) as usize]
    }

    /// Clamp-to-edge texel fetch.
    fn fetch(&self, x: i32, y: i32) -> Vec4 {
        let x = x.clamp(0, self.width as i32 - 1) as u32;
        let y = y.clamp(0, self.height as i32 - 1) as u32;
        self.texel(x, y)
    }

    pub fn sample(&self, uv: Vec2) -> Vec4 {
        match self.filter {
            FilterMode::Nearest => self.sample_nearest(uv),
            FilterMode::Linear => self.sample_linear(uv),
        }
    }

    pub fn sample_nearest(&self, uv: Vec2) -> Vec4 {
        let x = (uv.x * self.width as f32).floor() as i32;
        let y = (uv.y * self.height as f32).floor() as i32;
        self.fetch(x, y)
    }

    pub fn sample_linear(&self, uv: Vec2) -> Vec4 {
        let st = uv * Vec2::new(self.width as f32, self.height as f32) - 0.5;
        let base = st.floor();
        let f = st - base;
        let (x, y) = (base.x as i32, base.y as i32);
        let a = self.fetch(x, y);
        let b = self.fetch(x + 1, y);
        let c = self.fetch(x, y + 1);
        let d = self.fetch(x + 1, y + 1);
        a.lerp(b, f.x).lerp(c.lerp(d, f.x), f.y)
    }

    /// Converts a shader output to what this format would store: channels the
    /// format lacks read back as 0 (alpha as 1), 8-bit formats are clamped
    /// and quantized.
    pub fn encode(format: TextureFormat, value: Vec4) -> Vec4 {
        match format {
            TextureFormat::R16Float => Vec4::new(value.x, 0.0, 0.0, 1.0),
            TextureFormat::Rg16Float => Vec4::new(value.x, value.y, 0.0, 1.0),
            TextureFormat::Rgba16Float => value,
            TextureFormat::Rgba8Unorm => {
                (value.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round() / 255.0
            }
        }
    }

    /// Largest `length()` of the first two channels, i.e. peak speed of a
    /// velocity field.
    pub fn max_xy_length(&self) -> f32 {
        self.data
            .iter()
            .map(|v| v.truncate().truncate().length())
            .fold(0.0, f32::max)
    }

    /// Largest absolute value over the first three channels.
    pub fn max_rgb(&self) -> f32 {
        self.data
            .iter()
            .map(|v| v.truncate().abs().max_element())
            .fold(0.0, f32::max)
    }
}
