use crate::surface::Viewport;
use cgmath::Vector3;
use std::f32::consts::PI;
use std::time::Duration;
use web_time::Instant;

/// Latest pointer position in normalized device coordinates, `[-1, 1]` on both axes.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PointerVector {
    pub x: f32,
    pub y: f32,
}

impl PointerVector {
    pub const CENTER: PointerVector = PointerVector { x: 0.0, y: 0.0 };

    /// Maps client coordinates (origin top-left, y down) to NDC (origin center, y up).
    pub fn from_client(client_x: f64, client_y: f64, viewport: Viewport) -> Option<Self> {
        if viewport.width <= 0.0 || viewport.height <= 0.0 {
            return None;
        }
        let x = (client_x / viewport.width) * 2.0 - 1.0;
        let y = -(client_y / viewport.height) * 2.0 + 1.0;
        Some(Self {
            x: (x as f32).clamp(-1.0, 1.0),
            y: (y as f32).clamp(-1.0, 1.0),
        })
    }
}

/// Per-axis lerp factors applied each processed frame while the head chases the pointer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Interpolation {
    pub pitch: f32,
    pub yaw: f32,
}

impl Interpolation {
    pub const DEFAULT: Interpolation = Interpolation {
        pitch: 0.1,
        yaw: 0.2,
    };
    pub const SETTLE: Interpolation = Interpolation {
        pitch: 0.03,
        yaw: 0.03,
    };
}

impl Default for Interpolation {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GazeLimits {
    pub max_yaw: f32,
    pub min_pitch_input: f32,
    pub max_pitch_input: f32,
}

impl Default for GazeLimits {
    fn default() -> Self {
        Self {
            max_yaw: PI / 6.0,
            min_pitch_input: -0.3,
            max_pitch_input: 0.4,
        }
    }
}

impl GazeLimits {
    pub fn yaw_target(&self, pointer: PointerVector) -> f32 {
        pointer.x * self.max_yaw
    }

    pub fn pitch_target(&self, pointer: PointerVector) -> f32 {
        let y = pointer.y.clamp(self.min_pitch_input, self.max_pitch_input);
        -y - 0.5 * self.max_yaw
    }
}

fn lerp(from: f32, to: f32, t: f32) -> f32 {
    from + (to - from) * t
}

/// Moves a head rotation (euler radians) a fraction of the way toward the pointer.
pub fn aim_head(
    rotation: &mut Vector3<f32>,
    pointer: PointerVector,
    interpolation: Interpolation,
    limits: &GazeLimits,
) {
    rotation.y = lerp(rotation.y, limits.yaw_target(pointer), interpolation.yaw);
    rotation.x = lerp(rotation.x, limits.pitch_target(pointer), interpolation.pitch);
}

/// Pointer target shared by the input handlers and the frame step.
#[derive(Debug)]
pub struct PointerState {
    pub vector: PointerVector,
    pub interpolation: Interpolation,
    min_interval: Duration,
    last_sample: Option<Instant>,
    applied: u64,
}

impl PointerState {
    pub fn new(interpolation: Interpolation, min_interval: Duration) -> Self {
        Self {
            vector: PointerVector::CENTER,
            interpolation,
            min_interval,
            last_sample: None,
            applied: 0,
        }
    }

    /// Writes `vector` unless another sample landed within the last frame budget.
    /// Mouse and touch share the budget.
    pub fn sample(&mut self, now: Instant, vector: PointerVector) -> bool {
        if let Some(last) = self.last_sample {
            if now.saturating_duration_since(last) <= self.min_interval {
                return false;
            }
        }
        self.vector = vector;
        self.last_sample = Some(now);
        self.applied += 1;
        true
    }

    pub fn recenter(&mut self, settle: Interpolation) {
        self.vector = PointerVector::CENTER;
        self.interpolation = settle;
    }

    pub fn applied_updates(&self) -> u64 {
        self.applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewport() -> Viewport {
        Viewport {
            width: 800.0,
            height: 600.0,
            device_pixel_ratio: 1.0,
        }
    }

    #[test]
    fn client_coordinates_map_to_ndc() {
        let center = PointerVector::from_client(400.0, 300.0, viewport()).expect("valid viewport");
        assert_eq!(center, PointerVector::CENTER);

        let top_left = PointerVector::from_client(0.0, 0.0, viewport()).expect("valid viewport");
        assert_eq!(top_left, PointerVector { x: -1.0, y: 1.0 });

        let outside = PointerVector::from_client(1600.0, 1200.0, viewport()).expect("valid viewport");
        assert_eq!(outside, PointerVector { x: 1.0, y: -1.0 });
    }

    #[test]
    fn empty_viewport_yields_no_pointer() {
        let empty = Viewport {
            width: 0.0,
            height: 600.0,
            device_pixel_ratio: 1.0,
        };
        assert!(PointerVector::from_client(10.0, 10.0, empty).is_none());
    }

    #[test]
    fn samples_spaced_one_millisecond_apart_are_rate_limited() {
        let mut state = PointerState::new(Interpolation::DEFAULT, Duration::from_millis(16));
        let t0 = Instant::now();
        for ms in 0..100u64 {
            state.sample(t0 + Duration::from_millis(ms), PointerVector { x: 0.5, y: 0.5 });
        }
        let ceiling = (100.0f64 / 16.0).ceil() as u64;
        assert!(state.applied_updates() <= ceiling);
        assert!(state.applied_updates() >= 1);
    }

    #[test]
    fn head_rotation_is_damped_not_snapped() {
        let limits = GazeLimits::default();
        let mut rotation = Vector3::new(0.0, 0.0, 0.0);
        let pointer = PointerVector { x: 1.0, y: 0.0 };
        aim_head(&mut rotation, pointer, Interpolation::DEFAULT, &limits);
        let target = limits.yaw_target(pointer);
        assert!((rotation.y - target * 0.2).abs() < 1e-6);

        for _ in 0..200 {
            aim_head(&mut rotation, pointer, Interpolation::DEFAULT, &limits);
        }
        assert!((rotation.y - target).abs() < 1e-3);
        assert!((rotation.x - limits.pitch_target(pointer)).abs() < 1e-3);
    }

    #[test]
    fn pitch_target_is_clamped_to_band() {
        let limits = GazeLimits::default();
        let high = limits.pitch_target(PointerVector { x: 0.0, y: 1.0 });
        let band_top = limits.pitch_target(PointerVector { x: 0.0, y: 0.4 });
        assert_eq!(high, band_top);
        let low = limits.pitch_target(PointerVector { x: 0.0, y: -1.0 });
        let band_bottom = limits.pitch_target(PointerVector { x: 0.0, y: -0.3 });
        assert_eq!(low, band_bottom);
    }

    #[test]
    fn recenter_switches_to_settle_speed() {
        let mut state = PointerState::new(Interpolation::DEFAULT, Duration::from_millis(16));
        state.sample(Instant::now(), PointerVector { x: 0.8, y: -0.2 });
        state.recenter(Interpolation::SETTLE);
        assert_eq!(state.vector, PointerVector::CENTER);
        assert_eq!(state.interpolation, Interpolation::SETTLE);
    }
}
