use glam::Vec3;
use rand::Rng;

/// Scale applied to generated pointer colors so splats stay subtle.
pub const POINTER_COLOR_SCALE: f32 = 0.15;

/// HSV (all components in [0, 1]) to RGB.
pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Vec3 {
    let h6 = h.rem_euclid(1.0) * 6.0;
    let i = h6.floor();
    let f = h6 - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - f * s);
    let t = v * (1.0 - (1.0 - f) * s);

    match i as u32 % 6 {
        0 => Vec3::new(v, t, p),
        1 => Vec3::new(q, v, p),
        2 => Vec3::new(p, v, t),
        3 => Vec3::new(p, q, v),
        4 => Vec3::new(t, p, v),
        _ => Vec3::new(v, p, q),
    }
}

/// Random fully saturated hue, dimmed by `POINTER_COLOR_SCALE`.
pub fn generate_color<R: Rng>(rng: &mut R) -> Vec3 {
    hsv_to_rgb(rng.gen::<f32>(), 1.0, 1.0) * POINTER_COLOR_SCALE
}

/// Wraps `value` into `[min, max)`.
pub fn wrap(value: f32, min: f32, max: f32) -> f32 {
    let range = max - min;
    if range == 0.0 {
        return min;
    }
    (value - min).rem_euclid(range) + min
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_hsv_primaries() {
        assert!((hsv_to_rgb(0.0, 1.0, 1.0) - Vec3::new(1.0, 0.0, 0.0)).length() < 1e-6);
        assert!((hsv_to_rgb(1.0 / 3.0, 1.0, 1.0) - Vec3::new(0.0, 1.0, 0.0)).length() < 1e-5);
        assert!((hsv_to_rgb(2.0 / 3.0, 1.0, 1.0) - Vec3::new(0.0, 0.0, 1.0)).length() < 1e-5);
        assert!((hsv_to_rgb(0.5, 0.0, 0.4) - Vec3::splat(0.4)).length() < 1e-6);
    }

    #[test]
    fn test_generated_colors_are_dimmed() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let c = generate_color(&mut rng);
            assert!(c.max_element() <= POINTER_COLOR_SCALE + 1e-6);
            assert!(c.min_element() >= 0.0);
            // Full saturation: one channel at max, one at zero
            assert!((c.max_element() - POINTER_COLOR_SCALE).abs() < 1e-5);
        }
    }

    #[test]
    fn test_wrap() {
        assert!((wrap(1.25, 0.0, 1.0) - 0.25).abs() < 1e-6);
        assert!((wrap(3.0, 0.0, 1.0)).abs() < 1e-6);
        assert_eq!(wrap(5.0, 2.0, 2.0), 2.0);
    }
}
