//! Browser host: DOM listeners, a canvas per render surface and a
//! `requestAnimationFrame` loop around one [`SceneController`].

use crate::capability::{CapabilityProbe, CapabilityTier, WebGlProbe};
use crate::config::{DeviceClass, SceneConfig};
use crate::controller::{SceneController, SceneHost};
use crate::demo::ProceduralCharacterLoader;
use crate::gpu::WgpuBackend;
use crate::input::{InputHost, InputKind, Listener, ListenerTarget};
use crate::state::{DisplayState, LoadState};
use crate::surface::{SurfaceError, SurfaceProvider, SurfaceRequest, Viewport};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Element, EventTarget, HtmlCanvasElement, MouseEvent, TouchEvent};
use web_time::Instant;

/// Element the canvas is appended to.
const CONTAINER_SELECTOR: &str = ".character-model";
const LANDING_ID: &str = "landingDiv";
const HOVER_SELECTOR: &str = ".character-hover";
const CHUNK_DELAY: Duration = Duration::from_millis(150);

type SharedScene = Rc<RefCell<Option<SceneController<WgpuBackend>>>>;
/// The backend the next surface request hands out, created ahead of time
/// because browsers only give out devices asynchronously.
type PreparedBackend = Rc<RefCell<Option<Result<WgpuBackend, SurfaceError>>>>;

#[wasm_bindgen(start)]
pub fn start() {
    crate::init_logging();
    log::info!("character-scene {} loaded", env!("CARGO_PKG_VERSION"));
}

/// Viewport width and user agent of the current page.
pub fn detect_device() -> DeviceClass {
    let Some(window) = web_sys::window() else {
        return DeviceClass::Desktop;
    };
    let width = window
        .inner_width()
        .ok()
        .and_then(|width| width.as_f64())
        .unwrap_or(f64::MAX);
    let agent = window.navigator().user_agent().ok();
    DeviceClass::detect(width, agent.as_deref())
}

/// What the page needs to choose between the 3D scene and its fallback.
#[wasm_bindgen]
pub struct CapabilityReport {
    tier: CapabilityTier,
    device: DeviceClass,
}

#[wasm_bindgen]
impl CapabilityReport {
    #[wasm_bindgen(getter)]
    pub fn tier(&self) -> String {
        self.tier.label().to_string()
    }

    #[wasm_bindgen(getter)]
    pub fn device(&self) -> String {
        self.device.label().to_string()
    }

    #[wasm_bindgen(getter, js_name = canRender)]
    pub fn can_render(&self) -> bool {
        self.tier.can_render()
    }
}

#[wasm_bindgen(js_name = capabilityReport)]
pub fn capability_report() -> CapabilityReport {
    let report = CapabilityReport {
        tier: WebGlProbe.probe(),
        device: detect_device(),
    };
    log::info!(
        "capability report: tier {}, {} device",
        report.tier.label(),
        report.device.label()
    );
    report
}

fn js_error(message: &str) -> JsValue {
    JsValue::from_str(message)
}

fn document() -> Result<web_sys::Document, JsValue> {
    web_sys::window()
        .and_then(|window| window.document())
        .ok_or_else(|| js_error("no document"))
}

fn container_viewport(container: &Element) -> Viewport {
    let device_pixel_ratio = web_sys::window().map_or(1.0, |window| window.device_pixel_ratio());
    Viewport {
        width: f64::from(container.client_width().max(1)),
        height: f64::from(container.client_height().max(1)),
        device_pixel_ratio,
    }
}

/// Creates a backend on a fresh canvas and parks it for the next surface
/// request.
async fn prepare_backend(slot: PreparedBackend, request: SurfaceRequest) {
    let canvas = document()
        .and_then(|document| document.create_element("canvas"))
        .and_then(|element| element.dyn_into::<HtmlCanvasElement>().map_err(JsValue::from));
    let backend = match canvas {
        Ok(canvas) => WgpuBackend::for_canvas(canvas, request).await,
        Err(error) => Err(SurfaceError::Configure(format!("{error:?}"))),
    };
    if let Err(error) = &backend {
        log::warn!("could not prepare render surface: {error}");
    }
    *slot.borrow_mut() = Some(backend);
}

/// Hands out the prepared backend and puts its canvas on the page.
struct CanvasSurfaces {
    prepared: PreparedBackend,
    container: Element,
}

impl SurfaceProvider<WgpuBackend> for CanvasSurfaces {
    fn create(&mut self, _request: &SurfaceRequest) -> Result<WgpuBackend, SurfaceError> {
        let backend = self
            .prepared
            .borrow_mut()
            .take()
            .unwrap_or(Err(SurfaceError::NoAdapter))?;
        if let Some(canvas) = backend.canvas() {
            self.container
                .append_child(canvas)
                .map_err(|error| SurfaceError::Configure(format!("{error:?}")))?;
        }
        Ok(backend)
    }
}

struct Attached {
    listener: Listener,
    target: EventTarget,
    callback: Closure<dyn FnMut(web_sys::Event)>,
}

/// Real DOM listeners. Callbacks reach the controller through a weak handle
/// and skip events that arrive while it is busy.
struct DomInput {
    scene: Weak<RefCell<Option<SceneController<WgpuBackend>>>>,
    container: Element,
    attached: Vec<Attached>,
}

fn event_name(kind: InputKind) -> &'static str {
    match kind {
        InputKind::PointerMove => "mousemove",
        InputKind::TouchStart => "touchstart",
        InputKind::TouchMove => "touchmove",
        InputKind::TouchEnd => "touchend",
        InputKind::HoverEnter => "mouseenter",
        InputKind::HoverLeave => "mouseleave",
        InputKind::Resize => "resize",
    }
}

fn event_target(target: ListenerTarget) -> Option<EventTarget> {
    let window = web_sys::window()?;
    match target {
        ListenerTarget::Window => Some(window.into()),
        ListenerTarget::Document => window.document().map(Into::into),
        ListenerTarget::Landing => window
            .document()?
            .get_element_by_id(LANDING_ID)
            .map(Into::into),
        ListenerTarget::HoverRegion => window
            .document()?
            .query_selector(HOVER_SELECTOR)
            .ok()
            .flatten()
            .map(Into::into),
    }
}

fn dispatch(
    controller: &mut SceneController<WgpuBackend>,
    kind: InputKind,
    event: &web_sys::Event,
    container: &Element,
) {
    let now = Instant::now();
    match kind {
        InputKind::PointerMove => {
            if let Some(mouse) = event.dyn_ref::<MouseEvent>() {
                controller.on_pointer_move(now, f64::from(mouse.client_x()), f64::from(mouse.client_y()));
            }
        }
        InputKind::TouchStart => controller.on_touch_start(now),
        InputKind::TouchMove => {
            let touch = event
                .dyn_ref::<TouchEvent>()
                .and_then(|touch| touch.touches().get(0));
            if let Some(touch) = touch {
                controller.on_touch_move(now, f64::from(touch.client_x()), f64::from(touch.client_y()));
            }
        }
        InputKind::TouchEnd => controller.on_touch_end(now),
        InputKind::HoverEnter => controller.on_hover(true),
        InputKind::HoverLeave => controller.on_hover(false),
        InputKind::Resize => controller.on_resize(container_viewport(container)),
    }
}

impl InputHost for DomInput {
    fn attach(&mut self, listener: Listener) {
        let Some(target) = event_target(listener.target) else {
            log::debug!("no element for {:?}, not listening for {:?}", listener.target, listener.kind);
            return;
        };
        let scene = self.scene.clone();
        let container = self.container.clone();
        let callback = Closure::<dyn FnMut(web_sys::Event)>::new(move |event: web_sys::Event| {
            let Some(scene) = scene.upgrade() else {
                return;
            };
            let Ok(mut slot) = scene.try_borrow_mut() else {
                return;
            };
            if let Some(controller) = slot.as_mut() {
                dispatch(controller, listener.kind, &event, &container);
            }
        });
        let name = event_name(listener.kind);
        if let Err(error) = target.add_event_listener_with_callback(name, callback.as_ref().unchecked_ref()) {
            log::warn!("could not listen for {name}: {error:?}");
            return;
        }
        self.attached.push(Attached {
            listener,
            target,
            callback,
        });
    }

    fn detach(&mut self, listener: Listener) {
        let Some(index) = self.attached.iter().position(|a| a.listener == listener) else {
            return;
        };
        let attached = self.attached.swap_remove(index);
        let name = event_name(listener.kind);
        if let Err(error) = attached
            .target
            .remove_event_listener_with_callback(name, attached.callback.as_ref().unchecked_ref())
        {
            log::warn!("could not stop listening for {name}: {error:?}");
        }
    }
}

fn request_animation_frame(callback: &Closure<dyn FnMut(f64)>) {
    let requested = web_sys::window()
        .map(|window| window.request_animation_frame(callback.as_ref().unchecked_ref()));
    if !matches!(requested, Some(Ok(_))) {
        log::error!("requestAnimationFrame unavailable, scene will not animate");
    }
}

/// Ticks the controller every animation frame and draws when it asks to,
/// until it is unmounted.
fn start_frames(scene: SharedScene) {
    let next: Rc<RefCell<Option<Closure<dyn FnMut(f64)>>>> = Rc::new(RefCell::new(None));
    let first = next.clone();
    *first.borrow_mut() = Some(Closure::new(move |_timestamp: f64| {
        if let Ok(mut slot) = scene.try_borrow_mut() {
            let Some(controller) = slot.as_mut() else {
                return;
            };
            if !controller.is_mounted() {
                return;
            }
            let now = Instant::now();
            controller.tick(now);
            if controller.wants_frame() {
                controller.frame(now);
            }
        }
        if let Some(callback) = next.borrow().as_ref() {
            request_animation_frame(callback);
        }
    }));
    if let Some(callback) = first.borrow().as_ref() {
        request_animation_frame(callback);
    }
}

/// The page's handle on a mounted scene.
#[wasm_bindgen]
pub struct SceneHandle {
    scene: SharedScene,
    prepared: PreparedBackend,
    loading: Rc<Cell<u8>>,
    retrying: Rc<Cell<bool>>,
}

impl SceneHandle {
    fn display(&self) -> Option<DisplayState> {
        let slot = self.scene.try_borrow().ok()?;
        slot.as_ref().map(SceneController::display_state)
    }
}

#[wasm_bindgen]
impl SceneHandle {
    /// One of `fallback`, `error`, `loading` or `ready`.
    #[wasm_bindgen(getter, js_name = displayState)]
    pub fn display_state(&self) -> String {
        let state = match self.display() {
            Some(DisplayState::ProbingFallback) | None => "fallback",
            Some(DisplayState::ErrorWithRetry { .. }) => "error",
            Some(DisplayState::LoadingWithPercent { .. }) => "loading",
            Some(DisplayState::Ready) => "ready",
        };
        state.to_string()
    }

    /// Error text to show next to the retry button, if any.
    #[wasm_bindgen(getter)]
    pub fn message(&self) -> Option<String> {
        match self.display()? {
            DisplayState::ErrorWithRetry { message } => Some(message.to_string()),
            _ => None,
        }
    }

    #[wasm_bindgen(getter)]
    pub fn loading(&self) -> u8 {
        self.loading.get()
    }

    #[wasm_bindgen(getter)]
    pub fn slow(&self) -> bool {
        matches!(self.display(), Some(DisplayState::LoadingWithPercent { slow: true, .. }))
    }

    #[wasm_bindgen(getter, js_name = canRetry)]
    pub fn can_retry(&self) -> bool {
        if self.retrying.get() {
            return false;
        }
        let Ok(slot) = self.scene.try_borrow() else {
            return false;
        };
        slot.as_ref().is_some_and(|controller| {
            controller.is_mounted() && matches!(controller.state(), LoadState::Failed(_))
        })
    }

    /// Prepares a fresh canvas and device, then restarts the failed load.
    pub fn retry(&self) {
        if !self.can_retry() {
            log::debug!("retry ignored in state {}", self.display_state());
            return;
        }
        let request = match self.scene.borrow().as_ref() {
            Some(controller) => {
                SurfaceRequest::new(controller.viewport, controller.device, controller.tier)
            }
            None => return,
        };
        self.retrying.set(true);
        let scene = self.scene.clone();
        let prepared = self.prepared.clone();
        let retrying = self.retrying.clone();
        wasm_bindgen_futures::spawn_local(async move {
            prepare_backend(prepared.clone(), request).await;
            if let Some(controller) = scene.borrow_mut().as_mut() {
                if let Err(error) = controller.retry(Instant::now()) {
                    log::debug!("{error}");
                    prepared.borrow_mut().take();
                }
            }
            retrying.set(false);
        });
    }

    /// Releases everything. Later calls do nothing.
    pub fn unmount(&self) {
        match self.scene.try_borrow_mut() {
            Ok(mut slot) => {
                if let Some(controller) = slot.as_mut() {
                    controller.unmount();
                }
            }
            Err(_) => log::error!("unmount called from inside a scene callback"),
        }
    }
}

/// Probes the page, creates the first surface and starts loading the
/// character into `.character-model`.
#[wasm_bindgen(js_name = mountScene)]
pub async fn mount_scene() -> Result<SceneHandle, JsValue> {
    let container = document()?
        .query_selector(CONTAINER_SELECTOR)?
        .ok_or_else(|| js_error("no .character-model element on the page"))?;
    let config = SceneConfig::with_defaults();
    let detected = detect_device();
    let viewport = container_viewport(&container);
    let tier = WebGlProbe.probe();

    let prepared: PreparedBackend = Rc::new(RefCell::new(None));
    if tier.can_render() {
        let request = SurfaceRequest::new(viewport, config.device_class(detected), tier);
        prepare_backend(prepared.clone(), request).await;
    }

    let scene: SharedScene = Rc::new(RefCell::new(None));
    let loading = Rc::new(Cell::new(0u8));
    let host = SceneHost {
        surfaces: Box::new(CanvasSurfaces {
            prepared: prepared.clone(),
            container: container.clone(),
        }),
        loader: Box::new(ProceduralCharacterLoader::new(CHUNK_DELAY)),
        input: Box::new(DomInput {
            scene: Rc::downgrade(&scene),
            container,
            attached: Vec::new(),
        }),
        loading: Box::new(loading.clone()),
    };
    let controller = SceneController::mount(config, detected, viewport, &tier, host, Instant::now());
    *scene.borrow_mut() = Some(controller);
    start_frames(scene.clone());

    Ok(SceneHandle {
        scene,
        prepared,
        loading,
        retrying: Rc::new(Cell::new(false)),
    })
}
