/// How much 3D rendering the host environment can do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CapabilityTier {
    /// No usable 3D context at all.
    None,
    /// Legacy context only (WebGL 1 / downlevel adapters).
    Basic,
    /// Modern context (WebGL 2 / WebGPU-compliant adapters).
    Full,
}

impl CapabilityTier {
    pub fn can_render(self) -> bool {
        !matches!(self, CapabilityTier::None)
    }

    pub fn label(self) -> &'static str {
        match self {
            CapabilityTier::None => "none",
            CapabilityTier::Basic => "basic",
            CapabilityTier::Full => "full",
        }
    }
}

/// Probes run synchronously, before any real surface is allocated, and may
/// only create throwaway contexts.
pub trait CapabilityProbe {
    fn probe(&self) -> CapabilityTier;
}

/// A fixed tier, for hosts that already know the answer.
impl CapabilityProbe for CapabilityTier {
    fn probe(&self) -> CapabilityTier {
        *self
    }
}

/// Asks wgpu for any adapter and grades it by its downlevel capabilities.
#[cfg(not(target_arch = "wasm32"))]
pub struct AdapterProbe {
    pub backends: wgpu::Backends,
}

#[cfg(not(target_arch = "wasm32"))]
impl Default for AdapterProbe {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::all(),
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl CapabilityProbe for AdapterProbe {
    fn probe(&self) -> CapabilityTier {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: self.backends,
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: None,
        }));
        let Some(adapter) = adapter else {
            log::warn!("no graphics adapter found, 3D content disabled");
            return CapabilityTier::None;
        };
        let info = adapter.get_info();
        let tier = if adapter.get_downlevel_capabilities().is_webgpu_compliant() {
            CapabilityTier::Full
        } else {
            CapabilityTier::Basic
        };
        log::info!(
            "adapter {} ({:?}) graded as {}",
            info.name,
            info.backend,
            tier.label()
        );
        tier
    }
}

/// Creates a detached canvas and asks it for WebGL 2, then WebGL 1.
#[cfg(target_arch = "wasm32")]
pub struct WebGlProbe;

#[cfg(target_arch = "wasm32")]
impl WebGlProbe {
    fn context_available(canvas: &web_sys::HtmlCanvasElement, kind: &str) -> bool {
        match canvas.get_context(kind) {
            Ok(context) => context.is_some(),
            Err(error) => {
                log::warn!("{kind} context check failed: {error:?}");
                false
            }
        }
    }
}

#[cfg(target_arch = "wasm32")]
impl CapabilityProbe for WebGlProbe {
    fn probe(&self) -> CapabilityTier {
        use wasm_bindgen::JsCast;

        let canvas = web_sys::window()
            .and_then(|window| window.document())
            .and_then(|document| document.create_element("canvas").ok())
            .and_then(|element| element.dyn_into::<web_sys::HtmlCanvasElement>().ok());
        let Some(canvas) = canvas else {
            log::warn!("could not create a probe canvas, falling back to static content");
            return CapabilityTier::None;
        };
        if Self::context_available(&canvas, "webgl2") {
            CapabilityTier::Full
        } else if Self::context_available(&canvas, "webgl")
            || Self::context_available(&canvas, "experimental-webgl")
        {
            CapabilityTier::Basic
        } else {
            log::warn!("WebGL not supported, falling back to static content");
            CapabilityTier::None
        }
    }
}
