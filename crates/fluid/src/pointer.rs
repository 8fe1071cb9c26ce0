//! Pointer/touch tracking.
//!
//! Input handlers only mutate pointer state and queue splats here; the
//! simulation drains both once per frame, so input rate never drives GPU
//! work directly.

use glam::{Vec2, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::color::generate_color;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PointerId {
    Mouse,
    Touch(u64),
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Pointer {
    pub id: PointerId,
    /// Normalized position, origin bottom-left
    pub texcoord: Vec2,
    pub prev_texcoord: Vec2,
    /// Aspect-corrected `texcoord - prev_texcoord` of the last move
    pub delta: Vec2,
    pub down: bool,
    /// Set by a non-zero move while down, cleared when the frame consumes it
    pub moved: bool,
    pub color: Vec3,
}

impl Pointer {
    fn new(id: PointerId) -> Self {
        Self {
            id,
            texcoord: Vec2::ZERO,
            prev_texcoord: Vec2::ZERO,
            delta: Vec2::ZERO,
            down: false,
            moved: false,
            color: Vec3::new(30.0, 0.0, 300.0),
        }
    }
}

/// A queued force/color injection at a normalized position.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Splat {
    pub point: Vec2,
    /// Velocity added at the center, in field units
    pub force: Vec2,
    pub color: Vec3,
}

pub struct PointerTracker {
    pointers: Vec<Pointer>,
    width: u32,
    height: u32,
    rng: StdRng,
    /// False until the first pointer event arrives
    primed: bool,
    pending: Vec<Splat>,
}

impl PointerTracker {
    pub fn new(width: u32, height: u32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            pointers: vec![Pointer::new(PointerId::Mouse)],
            width: width.max(1),
            height: height.max(1),
            rng,
            primed: false,
            pending: Vec::new(),
        }
    }

    pub fn set_canvas_size(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
    }

    pub fn canvas_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    pub fn pointers(&self) -> &[Pointer] {
        &self.pointers
    }

    pub fn pointer(&self, id: PointerId) -> Option<&Pointer> {
        self.pointers.iter().find(|p| p.id == id)
    }

    /// Canvas pixel position to normalized texture space (Y flipped).
    pub fn to_texcoord(&self, x: f32, y: f32) -> Vec2 {
        Vec2::new(x / self.width as f32, 1.0 - y / self.height as f32)
    }

    /// Scales a texcoord delta so forcing is isotropic on non-square canvases.
    pub fn correct_delta(&self, mut delta: Vec2) -> Vec2 {
        let aspect = self.aspect_ratio();
        if aspect < 1.0 {
            delta.x *= aspect;
        }
        if aspect > 1.0 {
            delta.y /= aspect;
        }
        delta
    }

    pub fn pointer_down(&mut self, id: PointerId, x: f32, y: f32) {
        self.primed = true;
        let texcoord = self.to_texcoord(x, y);
        let color = generate_color(&mut self.rng);
        let index = self.slot_for(id);
        let pointer = &mut self.pointers[index];
        pointer.id = id;
        pointer.down = true;
        pointer.moved = false;
        pointer.texcoord = texcoord;
        pointer.prev_texcoord = texcoord;
        pointer.delta = Vec2::ZERO;
        pointer.color = color;
        self.queue_click_splat(texcoord);
    }

    pub fn pointer_move(&mut self, id: PointerId, x: f32, y: f32) {
        if !self.primed {
            // First movement after startup acts as a press so the effect
            // responds without waiting for a drag.
            self.pointer_down(id, x, y);
            return;
        }
        let texcoord = self.to_texcoord(x, y);
        let Some(index) = self.pointers.iter().position(|p| p.id == id) else {
            return;
        };
        let prev = self.pointers[index].texcoord;
        let delta = self.correct_delta(texcoord - prev);

        let pointer = &mut self.pointers[index];
        pointer.prev_texcoord = prev;
        pointer.texcoord = texcoord;
        pointer.delta = delta;
        if pointer.down && (delta.x.abs() > 0.0 || delta.y.abs() > 0.0) {
            pointer.moved = true;
        }
    }

    pub fn pointer_up(&mut self, id: PointerId) {
        if let Some(pointer) = self.pointers.iter_mut().find(|p| p.id == id) {
            pointer.down = false;
        }
    }

    /// Returns every pointer with a pending move and clears the flag.
    pub fn drain_moved(&mut self) -> Vec<Pointer> {
        let mut moved = Vec::new();
        for pointer in &mut self.pointers {
            if pointer.moved {
                pointer.moved = false;
                moved.push(*pointer);
            }
        }
        moved
    }

    /// Queued click and random splats, oldest first.
    pub fn take_pending_splats(&mut self) -> Vec<Splat> {
        std::mem::take(&mut self.pending)
    }

    pub fn has_pending_input(&self) -> bool {
        !self.pending.is_empty() || self.pointers.iter().any(|p| p.moved)
    }

    /// Assigns every pointer a fresh random color.
    pub fn recolor(&mut self) {
        for pointer in &mut self.pointers {
            pointer.color = generate_color(&mut self.rng);
        }
    }

    /// Queues `amount` splats at random positions with random directions.
    pub fn queue_random_splats(&mut self, amount: usize) {
        for _ in 0..amount {
            let color = generate_color(&mut self.rng) * 10.0;
            let point = Vec2::new(self.rng.gen::<f32>(), self.rng.gen::<f32>());
            let force = Vec2::new(
                1000.0 * (self.rng.gen::<f32>() - 0.5),
                1000.0 * (self.rng.gen::<f32>() - 0.5),
            );
            self.pending.push(Splat { point, force, color });
        }
    }

    pub fn random_splat_count(&mut self) -> usize {
        self.rng.gen_range(5..25)
    }

    fn queue_click_splat(&mut self, point: Vec2) {
        let color = generate_color(&mut self.rng) * 10.0;
        let force = Vec2::new(
            10.0 * (self.rng.gen::<f32>() - 0.5),
            30.0 * (self.rng.gen::<f32>() - 0.5),
        );
        self.pending.push(Splat { point, force, color });
    }

    /// Index of the pointer tracking `id`; reuses a released touch slot
    /// before growing the list. Slots are never removed and the mouse slot
    /// is never handed to a touch.
    fn slot_for(&mut self, id: PointerId) -> usize {
        if let Some(index) = self.pointers.iter().position(|p| p.id == id) {
            return index;
        }
        if let Some(index) = self
            .pointers
            .iter()
            .position(|p| !p.down && matches!(p.id, PointerId::Touch(_)))
        {
            return index;
        }
        self.pointers.push(Pointer::new(id));
        self.pointers.len() - 1
    }
}
