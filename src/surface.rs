use crate::asset::GpuContext;
use crate::capability::CapabilityTier;
use crate::config::DeviceClass;
use crate::scene::{Camera, Scene};
use std::fmt;

/// Screen region the surface is bound to, in CSS/logical pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    pub device_pixel_ratio: f64,
}

impl Viewport {
    pub fn aspect(&self) -> f32 {
        if self.height <= 0.0 {
            1.0
        } else {
            (self.width / self.height) as f32
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SurfaceRequest {
    pub width: u32,
    pub height: u32,
    pub pixel_ratio: f64,
    /// Mobile keeps a ratio of 1 whatever the display reports.
    pub pixel_ratio_pinned: bool,
    pub antialias: bool,
    pub alpha: bool,
    pub high_performance: bool,
    pub tier: CapabilityTier,
}

impl SurfaceRequest {
    pub fn new(viewport: Viewport, device: DeviceClass, tier: CapabilityTier) -> Self {
        let mobile = device.is_mobile();
        Self {
            width: viewport.width.max(1.0).round() as u32,
            height: viewport.height.max(1.0).round() as u32,
            pixel_ratio: if mobile { 1.0 } else { viewport.device_pixel_ratio.max(1.0) },
            pixel_ratio_pinned: mobile,
            antialias: !mobile,
            alpha: true,
            high_performance: true,
            tier,
        }
    }

    pub fn physical_size(&self) -> (u32, u32) {
        (
            ((self.width as f64) * self.pixel_ratio).round().max(1.0) as u32,
            ((self.height as f64) * self.pixel_ratio).round().max(1.0) as u32,
        )
    }
}

#[derive(Debug)]
pub enum SurfaceError {
    NoAdapter,
    NoDevice(String),
    Configure(String),
}

impl fmt::Display for SurfaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoAdapter => write!(f, "no compatible graphics adapter"),
            Self::NoDevice(error) => write!(f, "failed to create graphics device: {error}"),
            Self::Configure(error) => write!(f, "failed to configure surface: {error}"),
        }
    }
}

impl std::error::Error for SurfaceError {}

/// The drawing context behind a [`RenderSurface`].
pub trait RenderBackend: GpuContext {
    fn resize(&mut self, width: u32, height: u32);
    fn render(&mut self, scene: &Scene, camera: &Camera);
    /// Whether the output is still bound to its host region.
    fn output_attached(&self) -> bool;
    fn detach_output(&mut self);
    /// Releases backend-owned GPU state. Must tolerate repeated calls.
    fn dispose(&mut self);
    /// Drops the underlying context outright. Returns false where unsupported.
    fn force_context_loss(&mut self) -> bool;
}

pub trait SurfaceProvider<B: RenderBackend> {
    fn create(&mut self, request: &SurfaceRequest) -> Result<B, SurfaceError>;
}

impl<B, F> SurfaceProvider<B> for F
where
    B: RenderBackend,
    F: FnMut(&SurfaceRequest) -> Result<B, SurfaceError>,
{
    fn create(&mut self, request: &SurfaceRequest) -> Result<B, SurfaceError> {
        self(request)
    }
}

pub struct RenderSurface<B: RenderBackend> {
    pub backend: B,
    pub request: SurfaceRequest,
}

impl<B: RenderBackend> RenderSurface<B> {
    pub fn new(backend: B, request: SurfaceRequest) -> Self {
        Self { backend, request }
    }

    pub fn resize(&mut self, viewport: Viewport) {
        self.request.width = viewport.width.max(1.0).round() as u32;
        self.request.height = viewport.height.max(1.0).round() as u32;
        if !self.request.pixel_ratio_pinned {
            self.request.pixel_ratio = viewport.device_pixel_ratio.max(1.0);
        }
        let (width, height) = self.request.physical_size();
        self.backend.resize(width, height);
    }
}
