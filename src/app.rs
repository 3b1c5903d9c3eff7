//! Desktop host: a winit window standing in for the page.

use crate::capability::AdapterProbe;
use crate::config::{DeviceClass, SceneConfig};
use crate::controller::{SceneController, SceneHost};
use crate::demo::ProceduralCharacterLoader;
use crate::gpu::WgpuBackend;
use crate::input::{InputHost, Listener};
use crate::surface::{SurfaceRequest, Viewport};
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use web_time::Instant;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, TouchPhase, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::Key;
use winit::window::{Window, WindowBuilder};

const TITLE: &str = "Character Scene";
/// How often to look for loader messages while nothing else is scheduled.
const IDLE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub enum AppError {
    EventLoop(winit::error::EventLoopError),
    Window(winit::error::OsError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EventLoop(error) => write!(f, "event loop error: {error}"),
            Self::Window(error) => write!(f, "could not open window: {error}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<winit::error::EventLoopError> for AppError {
    fn from(value: winit::error::EventLoopError) -> Self {
        Self::EventLoop(value)
    }
}

impl From<winit::error::OsError> for AppError {
    fn from(value: winit::error::OsError) -> Self {
        Self::Window(value)
    }
}

/// Window events are always delivered; this only records what the scene
/// asked to hear about.
struct WindowInput;

impl InputHost for WindowInput {
    fn attach(&mut self, listener: Listener) {
        log::trace!("listening for {:?} on {:?}", listener.kind, listener.target);
    }

    fn detach(&mut self, listener: Listener) {
        log::trace!("stopped listening for {:?} on {:?}", listener.kind, listener.target);
    }
}

fn logical_viewport(window: &Window) -> Viewport {
    let scale = window.scale_factor();
    let size = window.inner_size().to_logical::<f64>(scale);
    Viewport {
        width: size.width,
        height: size.height,
        device_pixel_ratio: scale,
    }
}

pub fn run() -> Result<(), AppError> {
    let event_loop = EventLoop::new()?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title(TITLE)
            .with_inner_size(PhysicalSize::new(1280, 800))
            .build(&event_loop)?,
    );

    let config = SceneConfig::with_defaults().apply_env_overrides();
    let viewport = logical_viewport(&window);
    let loading = Rc::new(Cell::new(0u8));
    let surface_window = window.clone();
    let host = SceneHost {
        surfaces: Box::new(move |request: &SurfaceRequest| {
            pollster::block_on(WgpuBackend::for_window(surface_window.clone(), request.clone()))
        }),
        loader: Box::new(ProceduralCharacterLoader::from_env()),
        input: Box::new(WindowInput),
        loading: Box::new(loading.clone()),
    };
    let mut controller = SceneController::mount(
        config,
        DeviceClass::detect(viewport.width, None),
        viewport,
        &AdapterProbe::default(),
        host,
        Instant::now(),
    );

    let mut title = String::new();
    let mut cursor_inside = false;
    event_loop.run(move |event, target| match event {
        Event::AboutToWait => {
            let now = Instant::now();
            controller.tick(now);

            let caption = controller.display_state().caption();
            let next_title = match loading.get() {
                100 => format!("{TITLE} | {caption}"),
                page => format!("{TITLE} | page {page}% | {caption}"),
            };
            if next_title != title {
                window.set_title(&next_title);
                title = next_title;
            }

            if controller.wants_frame() {
                window.request_redraw();
                target.set_control_flow(ControlFlow::Poll);
            } else {
                let wake = controller
                    .next_deadline()
                    .map_or(now + IDLE_POLL, |deadline| deadline.min(now + IDLE_POLL));
                target.set_control_flow(ControlFlow::WaitUntil(wake));
            }
        }
        Event::WindowEvent { event, .. } => match event {
            WindowEvent::RedrawRequested => {
                controller.frame(Instant::now());
            }
            WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => {
                controller.on_resize(logical_viewport(&window));
                window.request_redraw();
            }
            WindowEvent::CursorMoved { position, .. } => {
                let logical = position.to_logical::<f64>(window.scale_factor());
                controller.on_pointer_move(Instant::now(), logical.x, logical.y);
            }
            WindowEvent::CursorEntered { .. } if !cursor_inside => {
                cursor_inside = true;
                controller.on_hover(true);
            }
            WindowEvent::CursorLeft { .. } if cursor_inside => {
                cursor_inside = false;
                controller.on_hover(false);
            }
            WindowEvent::Touch(touch) => {
                let now = Instant::now();
                let logical = touch.location.to_logical::<f64>(window.scale_factor());
                match touch.phase {
                    TouchPhase::Started => controller.on_touch_start(now),
                    TouchPhase::Moved => controller.on_touch_move(now, logical.x, logical.y),
                    TouchPhase::Ended | TouchPhase::Cancelled => controller.on_touch_end(now),
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                let retry_key = matches!(
                    &event.logical_key,
                    Key::Character(text) if text.eq_ignore_ascii_case("r")
                );
                if retry_key && event.state == ElementState::Pressed && !event.repeat {
                    if let Err(error) = controller.retry(Instant::now()) {
                        log::debug!("{error}");
                    }
                }
            }
            WindowEvent::CloseRequested => {
                controller.unmount();
                target.exit();
            }
            _ => {}
        },
        _ => {}
    })?;
    Ok(())
}
