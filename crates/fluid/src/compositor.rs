//! Final composite of the dye field onto the visible surface.

use glam::{Vec2, Vec3};

use crate::device::{DrawTarget, PassParams, RenderDevice};
use crate::framebuffer::DoubleFramebuffer;
use crate::shaders::{ProgramSet, U_TEXTURE};

#[derive(Clone, Debug, PartialEq)]
pub struct Compositor {
    pub back_color: Vec3,
    /// When false the background color is painted under the dye.
    pub transparent: bool,
}

impl Compositor {
    pub fn new(back_color: [f32; 3], transparent: bool) -> Self {
        Self {
            back_color: Vec3::from_array(back_color),
            transparent,
        }
    }

    /// Blends the dye onto the surface with premultiplied-alpha blending.
    /// Alpha is the brightest channel, so the effect fades out over any page
    /// content without an opaque backing.
    pub fn render<D: RenderDevice>(
        &self,
        device: &mut D,
        programs: &ProgramSet,
        dye: &DoubleFramebuffer,
        canvas: (u32, u32),
    ) {
        let (width, height) = (canvas.0.max(1), canvas.1.max(1));
        let texel_size = Vec2::new(1.0 / width as f32, 1.0 / height as f32);

        device.set_blending(true);

        if !self.transparent {
            let mut params = PassParams::with_texel_size(texel_size);
            params.set_color3(self.back_color);
            programs.color.bind(device);
            device.draw(DrawTarget::Screen, &params, &[]);
        }

        let Some(display) = programs.display.active() else {
            log::warn!("Display material has no active variant");
            return;
        };
        display.bind(device);
        let params = PassParams::with_texel_size(texel_size);
        if let Some(binding) = display.texture(U_TEXTURE, dye.read().texture) {
            device.draw(DrawTarget::Screen, &params, &[binding]);
        }
    }
}
