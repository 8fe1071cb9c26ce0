//! Per-fragment evaluation of every pass, matching the WGSL sources.

use glam::{Vec2, Vec3, Vec4};

use super::texture::CpuTexture;
use crate::device::PassParams;
use crate::shaders::ShaderKind;

/// Keyword switches a fragment shader was compiled with.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Variant {
    pub manual_filtering: bool,
    pub shading: bool,
}

/// Interpolated vertex outputs for one fragment.
#[derive(Copy, Clone, Debug)]
pub struct Fragment {
    pub uv: Vec2,
    pub l: Vec2,
    pub r: Vec2,
    pub t: Vec2,
    pub b: Vec2,
}

impl Fragment {
    /// Fragment at the center of texel (x, y) of a `width` x `height` target.
    pub fn at(x: u32, y: u32, width: u32, height: u32, texel_size: Vec2) -> Self {
        let uv = Vec2::new(
            (x as f32 + 0.5) / width as f32,
            (y as f32 + 0.5) / height as f32,
        );
        Self {
            uv,
            l: uv - Vec2::new(texel_size.x, 0.0),
            r: uv + Vec2::new(texel_size.x, 0.0),
            t: uv + Vec2::new(0.0, texel_size.y),
            b: uv - Vec2::new(0.0, texel_size.y),
        }
    }
}

/// Textures bound for one draw, indexed by binding slot.
pub struct Bound<'a> {
    slots: [Option<&'a CpuTexture>; 4],
}

impl<'a> Bound<'a> {
    pub fn new(slots: [Option<&'a CpuTexture>; 4]) -> Self {
        Self { slots }
    }

    /// Unbound slots sample as zero.
    fn sample(&self, binding: usize, uv: Vec2) -> Vec4 {
        match self.slots.get(binding).copied().flatten() {
            Some(texture) => texture.sample(uv),
            None => Vec4::ZERO,
        }
    }

    /// Bilinear interpolation built from four point samples.
    fn bilerp(&self, binding: usize, uv: Vec2, tsize: Vec2) -> Vec4 {
        let st = uv / tsize - 0.5;
        let iuv = st.floor();
        let fuv = st - iuv;
        let a = self.sample(binding, (iuv + Vec2::new(0.5, 0.5)) * tsize);
        let b = self.sample(binding, (iuv + Vec2::new(1.5, 0.5)) * tsize);
        let c = self.sample(binding, (iuv + Vec2::new(0.5, 1.5)) * tsize);
        let d = self.sample(binding, (iuv + Vec2::new(1.5, 1.5)) * tsize);
        a.lerp(b, fuv.x).lerp(c.lerp(d, fuv.x), fuv.y)
    }
}

const SLOT_A: usize = 2;
const SLOT_B: usize = 3;

pub fn shade(
    kind: ShaderKind,
    variant: Variant,
    params: &PassParams,
    bound: &Bound<'_>,
    frag: &Fragment,
) -> Vec4 {
    match kind {
        ShaderKind::BaseVertex => Vec4::ZERO,
        ShaderKind::Copy => bound.sample(SLOT_A, frag.uv),
        ShaderKind::Clear => params.value * bound.sample(SLOT_A, frag.uv),
        ShaderKind::Color => params.color(),
        ShaderKind::Splat => splat(params, bound, frag),
        ShaderKind::Advection => advection(variant, params, bound, frag),
        ShaderKind::Divergence => divergence(bound, frag),
        ShaderKind::Curl => {
            let l = bound.sample(SLOT_A, frag.l).y;
            let r = bound.sample(SLOT_A, frag.r).y;
            let t = bound.sample(SLOT_A, frag.t).x;
            let b = bound.sample(SLOT_A, frag.b).x;
            Vec4::new(0.5 * (r - l - t + b), 0.0, 0.0, 1.0)
        }
        ShaderKind::Vorticity => vorticity(params, bound, frag),
        ShaderKind::Pressure => {
            let l = bound.sample(SLOT_A, frag.l).x;
            let r = bound.sample(SLOT_A, frag.r).x;
            let t = bound.sample(SLOT_A, frag.t).x;
            let b = bound.sample(SLOT_A, frag.b).x;
            let divergence = bound.sample(SLOT_B, frag.uv).x;
            Vec4::new((l + r + b + t - divergence) * 0.25, 0.0, 0.0, 1.0)
        }
        ShaderKind::GradientSubtract => {
            let l = bound.sample(SLOT_A, frag.l).x;
            let r = bound.sample(SLOT_A, frag.r).x;
            let t = bound.sample(SLOT_A, frag.t).x;
            let b = bound.sample(SLOT_A, frag.b).x;
            let velocity = bound.sample(SLOT_B, frag.uv).truncate().truncate();
            (velocity - 0.5 * Vec2::new(r - l, t - b)).extend(0.0).extend(1.0)
        }
        ShaderKind::Display => display(variant, params, bound, frag),
    }
}

fn splat(params: &PassParams, bound: &Bound<'_>, frag: &Fragment) -> Vec4 {
    let mut p = frag.uv - params.point();
    p.x *= params.aspect_ratio;
    let splat = (-p.dot(p) / params.radius).exp() * params.color().truncate();
    let base = bound.sample(SLOT_A, frag.uv).truncate();
    (base + splat).extend(1.0)
}

fn advection(variant: Variant, params: &PassParams, bound: &Bound<'_>, frag: &Fragment) -> Vec4 {
    let texel = params.texel_size();
    let result = if variant.manual_filtering {
        let velocity = bound.bilerp(SLOT_A, frag.uv, texel).truncate().truncate();
        let coord = frag.uv - params.dt * velocity * texel;
        bound.bilerp(SLOT_B, coord, params.dye_texel_size())
    } else {
        let velocity = bound.sample(SLOT_A, frag.uv).truncate().truncate();
        let coord = frag.uv - params.dt * velocity * texel;
        bound.sample(SLOT_B, coord)
    };
    let decay = 1.0 + params.dissipation * params.dt;
    result / decay
}

fn divergence(bound: &Bound<'_>, frag: &Fragment) -> Vec4 {
    let mut l = bound.sample(SLOT_A, frag.l).x;
    let mut r = bound.sample(SLOT_A, frag.r).x;
    let mut t = bound.sample(SLOT_A, frag.t).y;
    let mut b = bound.sample(SLOT_A, frag.b).y;

    let c = bound.sample(SLOT_A, frag.uv);
    if frag.l.x < 0.0 {
        l = -c.x;
    }
    if frag.r.x > 1.0 {
        r = -c.x;
    }
    if frag.t.y > 1.0 {
        t = -c.y;
    }
    if frag.b.y < 0.0 {
        b = -c.y;
    }

    Vec4::new(0.5 * (r - l + t - b), 0.0, 0.0, 1.0)
}

fn vorticity(params: &PassParams, bound: &Bound<'_>, frag: &Fragment) -> Vec4 {
    let l = bound.sample(SLOT_B, frag.l).x;
    let r = bound.sample(SLOT_B, frag.r).x;
    let t = bound.sample(SLOT_B, frag.t).x;
    let b = bound.sample(SLOT_B, frag.b).x;
    let c = bound.sample(SLOT_B, frag.uv).x;

    let mut force = 0.5 * Vec2::new(t.abs() - b.abs(), r.abs() - l.abs());
    force /= force.length() + 0.0001;
    force *= params.curl * c;
    force.y = -force.y;

    let velocity = bound.sample(SLOT_A, frag.uv).truncate().truncate();
    let velocity = (velocity + force * params.dt).clamp(Vec2::splat(-1000.0), Vec2::splat(1000.0));
    velocity.extend(0.0).extend(1.0)
}

fn display(variant: Variant, params: &PassParams, bound: &Bound<'_>, frag: &Fragment) -> Vec4 {
    let mut c = bound.sample(SLOT_A, frag.uv).truncate();

    if variant.shading {
        let lc = bound.sample(SLOT_A, frag.l).truncate();
        let rc = bound.sample(SLOT_A, frag.r).truncate();
        let tc = bound.sample(SLOT_A, frag.t).truncate();
        let bc = bound.sample(SLOT_A, frag.b).truncate();

        let dx = rc.length() - lc.length();
        let dy = tc.length() - bc.length();
        let n = Vec3::new(dx, dy, params.texel_size().length()).normalize_or_zero();
        let diffuse = (n.dot(Vec3::Z) + 0.7).clamp(0.7, 1.0);
        c *= diffuse;
    }

    c.extend(c.max_element())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{FilterMode, TextureFormat};

    fn filled(value: Vec4) -> CpuTexture {
        let mut tex = CpuTexture::new(4, 4, TextureFormat::Rgba16Float, FilterMode::Nearest);
        tex.data_mut().fill(value);
        tex
    }

    fn center() -> Fragment {
        Fragment::at(1, 1, 4, 4, Vec2::splat(0.25))
    }

    #[test]
    fn test_splat_peaks_at_point() {
        let target = filled(Vec4::ZERO);
        let bound = Bound::new([None, None, Some(&target), None]);
        let mut params = PassParams::with_texel_size(Vec2::splat(0.25));
        params.aspect_ratio = 1.0;
        params.radius = 0.002;
        params.set_color3(Vec3::new(100.0, 0.0, 0.0));

        let frag = center();
        params.point = frag.uv.to_array();
        let out = shade(ShaderKind::Splat, Variant::default(), &params, &bound, &frag);
        assert!((out.x - 100.0).abs() < 1e-3);
        assert_eq!(out.w, 1.0);

        let far = Fragment::at(3, 3, 4, 4, Vec2::splat(0.25));
        let out = shade(ShaderKind::Splat, Variant::default(), &params, &bound, &far);
        assert!(out.x < 1e-3);
    }

    #[test]
    fn test_uniform_velocity_has_no_divergence_inside() {
        let velocity = filled(Vec4::new(3.0, -1.0, 0.0, 1.0));
        let bound = Bound::new([None, None, Some(&velocity), None]);
        let params = PassParams::with_texel_size(Vec2::splat(0.25));
        let frag = center();
        let out = shade(ShaderKind::Divergence, Variant::default(), &params, &bound, &frag);
        assert!(out.x.abs() < 1e-6);
    }

    #[test]
    fn test_divergence_mirrors_at_walls() {
        let velocity = filled(Vec4::new(2.0, 0.0, 0.0, 1.0));
        let bound = Bound::new([None, None, Some(&velocity), None]);
        let params = PassParams::with_texel_size(Vec2::splat(0.25));
        // Left column: l mirrors to -2, r stays 2
        let frag = Fragment::at(0, 1, 4, 4, Vec2::splat(0.25));
        let out = shade(ShaderKind::Divergence, Variant::default(), &params, &bound, &frag);
        assert!((out.x - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_gradient_subtract_uses_central_difference() {
        // p = column index, so dp/dx is 1 per texel
        let mut pressure = filled(Vec4::ZERO);
        for (i, texel) in pressure.data_mut().iter_mut().enumerate() {
            *texel = Vec4::new((i % 4) as f32, 0.0, 0.0, 1.0);
        }
        let velocity = filled(Vec4::new(3.0, 2.0, 0.0, 1.0));
        let bound = Bound::new([None, None, Some(&pressure), Some(&velocity)]);
        let params = PassParams::with_texel_size(Vec2::splat(0.25));
        let frag = center();
        let out = shade(ShaderKind::GradientSubtract, Variant::default(), &params, &bound, &frag);
        assert!((out.x - 2.0).abs() < 1e-6);
        assert!((out.y - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_advection_decays_by_dissipation() {
        let velocity = filled(Vec4::ZERO);
        let source = filled(Vec4::splat(1.0));
        let bound = Bound::new([None, None, Some(&velocity), Some(&source)]);
        let mut params = PassParams::with_texel_size(Vec2::splat(0.25));
        params.dye_texel_size = [0.25, 0.25];
        params.dt = 0.5;
        params.dissipation = 2.0;
        for manual_filtering in [false, true] {
            let variant = Variant {
                manual_filtering,
                shading: false,
            };
            let out = shade(ShaderKind::Advection, variant, &params, &bound, &center());
            assert!((out.x - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_display_alpha_is_brightest_channel() {
        let dye = filled(Vec4::new(0.2, 0.6, 0.1, 1.0));
        let bound = Bound::new([None, None, Some(&dye), None]);
        let params = PassParams::with_texel_size(Vec2::splat(0.25));
        let flat = shade(ShaderKind::Display, Variant::default(), &params, &bound, &center());
        assert!((flat.w - 0.6).abs() < 1e-6);

        // Flat field: normal points at the light, diffuse saturates at 1
        let shaded = Variant {
            manual_filtering: false,
            shading: true,
        };
        let lit = shade(ShaderKind::Display, shaded, &params, &bound, &center());
        assert!((lit - flat).length() < 1e-6);
    }

    #[test]
    fn test_vorticity_clamps_velocity() {
        let velocity = filled(Vec4::new(5000.0, -5000.0, 0.0, 1.0));
        let curl = filled(Vec4::ZERO);
        let bound = Bound::new([None, None, Some(&velocity), Some(&curl)]);
        let params = PassParams::with_texel_size(Vec2::splat(0.25));
        let out = shade(ShaderKind::Vorticity, Variant::default(), &params, &bound, &center());
        assert_eq!(out.truncate().truncate(), Vec2::new(1000.0, -1000.0));
    }
}
