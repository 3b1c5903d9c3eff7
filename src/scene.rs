use crate::asset::{rgba_len, Allocation, Disposable, GpuContext, GpuError, Node, Texture};
use cgmath::{Deg, Matrix4, Point3, Rad, Vector3};

const SCREEN_LIGHT_OPACITY_THRESHOLD: f32 = 0.9;
const SCREEN_LIGHT_GAIN: f32 = 20.0;
const LIT_DIRECTIONAL_INTENSITY: f32 = 1.0;
const LIT_ENVIRONMENT_INTENSITY: f32 = 0.64;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointLight {
    pub intensity: f32,
    pub position: Vector3<f32>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Lighting {
    pub directional_intensity: f32,
    pub environment_intensity: f32,
    pub point: PointLight,
    pub lights_on: bool,
}

impl Default for Lighting {
    fn default() -> Self {
        Self {
            directional_intensity: 0.0,
            environment_intensity: 0.0,
            point: PointLight {
                intensity: 0.0,
                position: Vector3::new(3.0, 12.0, 4.0),
            },
            lights_on: false,
        }
    }
}

impl Lighting {
    pub fn turn_on(&mut self) {
        self.directional_intensity = LIT_DIRECTIONAL_INTENSITY;
        self.environment_intensity = LIT_ENVIRONMENT_INTENSITY;
        self.lights_on = true;
    }

    /// Drives the point light from the emissive screen mesh: bright only while
    /// the screen is (nearly) opaque, and positioned on the screen.
    pub fn couple_screen_light(&mut self, screen: &Node) {
        let Some(mesh) = screen.as_mesh() else {
            return;
        };
        let Some(material) = mesh.materials.first() else {
            return;
        };
        self.point.intensity = if material.opacity > SCREEN_LIGHT_OPACITY_THRESHOLD {
            material.emissive_intensity * SCREEN_LIGHT_GAIN
        } else {
            0.0
        };
        self.point.position = screen.transform.translation;
    }
}

/// Retained lighting texture; released separately from the character.
#[derive(Debug)]
pub struct EnvironmentMap {
    pub texture: Texture,
}

impl EnvironmentMap {
    /// Small vertical gradient standing in for an HDR probe.
    pub fn studio() -> Self {
        let (width, height) = (4u32, 2u32);
        let mut rgba = Vec::with_capacity(rgba_len(width, height) as usize);
        for row in 0..height {
            let shade: u8 = if row == 0 { 200 } else { 60 };
            for _ in 0..width {
                rgba.extend_from_slice(&[shade, shade, shade.saturating_add(20), 255]);
            }
        }
        Self {
            texture: Texture {
                width,
                height,
                rgba,
                gpu: Default::default(),
            },
        }
    }

    pub fn upload(&mut self, gpu: &mut dyn GpuContext) -> Result<(), GpuError> {
        if self.texture.gpu.is_allocated() {
            return Ok(());
        }
        let id = gpu.allocate(Allocation::Texture {
            label: "environment",
            width: self.texture.width,
            height: self.texture.height,
            rgba: &self.texture.rgba,
        })?;
        self.texture.gpu.fill(id);
        Ok(())
    }

    pub fn is_allocated(&self) -> bool {
        self.texture.gpu.is_allocated()
    }
}

impl Disposable for EnvironmentMap {
    fn dispose(&mut self, gpu: &mut dyn GpuContext) {
        self.texture.dispose(gpu);
    }
}

/// Container for everything drawn. Cleared, never rebuilt, across retries.
#[derive(Debug, Default)]
pub struct Scene {
    pub children: Vec<Node>,
    pub lighting: Lighting,
    pub environment: Option<EnvironmentMap>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: Node) -> usize {
        self.children.push(node);
        self.children.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && self.environment.is_none()
    }

    pub fn clear(&mut self) {
        self.children.clear();
        self.environment = None;
        self.lighting = Lighting::default();
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub fov_y: Deg<f32>,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    pub zoom: f32,
    pub position: Point3<f32>,
}

impl Camera {
    pub fn portrait(aspect: f32) -> Self {
        Self {
            fov_y: Deg(14.5),
            aspect,
            near: 0.1,
            far: 1000.0,
            zoom: 1.1,
            position: Point3::new(0.0, 13.1, 24.7),
        }
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        if aspect.is_finite() && aspect > 0.0 {
            self.aspect = aspect;
        }
    }

    /// Zoom narrows the field of view rather than moving the camera.
    pub fn effective_fov(&self) -> Rad<f32> {
        let half = Rad::from(self.fov_y).0 * 0.5;
        Rad(2.0 * (half.tan() / self.zoom.max(f32::EPSILON)).atan())
    }

    pub fn view_projection(&self) -> Matrix4<f32> {
        let projection = cgmath::perspective(self.effective_fov(), self.aspect, self.near, self.far);
        let forward = self.position + Vector3::new(0.0, 0.0, -1.0);
        let view = Matrix4::look_at_rh(self.position, forward, Vector3::unit_y());
        projection * view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_character, FakeGpu};

    #[test]
    fn screen_light_follows_opacity_and_emission() {
        let asset = sample_character();
        let path = asset.root.find_path("screenlight").expect("screen light present");
        let screen = asset.root.at_path(&path).expect("path resolves");

        let mut lighting = Lighting::default();
        lighting.couple_screen_light(screen);
        let emissive = screen.as_mesh().expect("mesh").materials[0].emissive_intensity;
        assert!((lighting.point.intensity - emissive * 20.0).abs() < 1e-6);
        assert_eq!(lighting.point.position, screen.transform.translation);
    }

    #[test]
    fn dim_screen_turns_point_light_off() {
        let mut asset = sample_character();
        let screen = asset.root.find_mut("screenlight").expect("screen light present");
        screen.as_mesh_mut().expect("mesh").materials[0].opacity = 0.5;
        let mut lighting = Lighting::default();
        lighting.point.intensity = 3.0;
        lighting.couple_screen_light(screen);
        assert_eq!(lighting.point.intensity, 0.0);
    }

    #[test]
    fn environment_map_releases_once() {
        let mut gpu = FakeGpu::default();
        let mut env = EnvironmentMap::studio();
        env.upload(&mut gpu).expect("upload");
        env.upload(&mut gpu).expect("second upload is a no-op");
        assert_eq!(gpu.live(), 1);
        env.dispose(&mut gpu);
        env.dispose(&mut gpu);
        assert_eq!(gpu.live(), 0);
        assert_eq!(gpu.released(), 1);
    }

    #[test]
    fn clear_keeps_container_reusable() {
        let mut scene = Scene::new();
        scene.lighting.turn_on();
        scene.environment = Some(EnvironmentMap::studio());
        scene.add(sample_character().root);
        scene.clear();
        assert!(scene.is_empty());
        assert!(!scene.lighting.lights_on);
        assert_eq!(scene.add(sample_character().root), 0);
    }

    #[test]
    fn zoom_narrows_field_of_view() {
        let camera = Camera::portrait(1.5);
        assert!(camera.effective_fov().0 < Rad::from(camera.fov_y).0);
        let mut camera = camera;
        camera.set_aspect(f32::NAN);
        assert_eq!(camera.aspect, 1.5);
    }
}
