//! The one object that owns a mounted character scene.
//!
//! Everything runs on the host's event loop. The host calls [`SceneController::tick`]
//! whenever it wakes (and at least by [`SceneController::next_deadline`]),
//! [`SceneController::frame`] on every display refresh, and forwards raw input to
//! the `on_*` entry points. Input for listeners the controller has not installed
//! is ignored.

use crate::animation::{AnimationMixer, LoopMode};
use crate::asset::{CharacterAsset, Disposable, NodePath};
use crate::capability::{CapabilityProbe, CapabilityTier};
use crate::config::{DeviceClass, SceneConfig};
use crate::frame::{FrameLoop, FrameOutcome};
use crate::input::{
    InputHost, Listener, ListenerRegistry, HOVER_ENTER, HOVER_LEAVE, POINTER_MOVE, RESIZE,
    TOUCH_END, TOUCH_MOVE, TOUCH_START,
};
use crate::loader::{AttemptId, CharacterLoader, LoadError, LoadOrchestrator, LoadOutcome};
use crate::pointer::{aim_head, PointerState, PointerVector};
use crate::progress::LoadingSink;
use crate::scene::{Camera, EnvironmentMap, Scene};
use crate::state::{DisplayState, FailureReason, LoadState, Transition};
use crate::surface::{RenderBackend, RenderSurface, SurfaceProvider, SurfaceRequest, Viewport};
use crate::timers::{TimerId, TimerKind, TimerQueue};
use std::fmt;
use web_time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    RetryUnavailable { state: &'static str },
    Unmounted,
}

impl fmt::Display for SceneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetryUnavailable { state } => {
                write!(f, "retry is only offered after a failure (currently {state})")
            }
            Self::Unmounted => write!(f, "the scene has been unmounted"),
        }
    }
}

impl std::error::Error for SceneError {}

/// The collaborators a controller is mounted into.
pub struct SceneHost<B: RenderBackend> {
    pub surfaces: Box<dyn SurfaceProvider<B>>,
    pub loader: Box<dyn CharacterLoader>,
    pub input: Box<dyn InputHost>,
    pub loading: Box<dyn LoadingSink>,
}

/// Where the loaded character sits in the scene and which of its named parts
/// were found. Missing parts just switch the matching feature off.
#[derive(Debug)]
pub(crate) struct CharacterBinding {
    pub(crate) index: usize,
    pub(crate) head: Option<NodePath>,
    pub(crate) screen: Option<NodePath>,
}

/// Undoes the hover wiring made when the character became ready.
#[derive(Debug)]
pub(crate) struct HoverCleanup {
    listeners: [Listener; 2],
}

impl HoverCleanup {
    pub(crate) fn run(self, registry: &mut ListenerRegistry, host: &mut dyn InputHost) -> usize {
        self.listeners
            .into_iter()
            .filter(|listener| registry.remove(host, *listener))
            .count()
    }
}

pub struct SceneController<B: RenderBackend> {
    pub(crate) config: SceneConfig,
    pub(crate) device: DeviceClass,
    pub(crate) tier: CapabilityTier,
    pub(crate) viewport: Viewport,
    pub(crate) state: LoadState,
    pub(crate) host: SceneHost<B>,
    pub(crate) surface: Option<RenderSurface<B>>,
    pub(crate) scene: Scene,
    pub(crate) camera: Camera,
    pub(crate) character: Option<CharacterBinding>,
    pub(crate) mixer: Option<AnimationMixer>,
    pub(crate) hover: Option<HoverCleanup>,
    pub(crate) pointer: PointerState,
    pub(crate) listeners: ListenerRegistry,
    pub(crate) timers: TimerQueue,
    pub(crate) orchestrator: LoadOrchestrator,
    pub(crate) frames: FrameLoop,
    pub(crate) touch_debounce: Option<TimerId>,
    pub(crate) touch_settle: Option<TimerId>,
    intro_played: Option<AttemptId>,
    intros: u32,
    unmounted: bool,
}

impl<B: RenderBackend> SceneController<B> {
    /// Probes, then either settles on `Unsupported` or creates the surface and
    /// starts the first load attempt.
    pub fn mount(
        config: SceneConfig,
        detected: DeviceClass,
        viewport: Viewport,
        probe: &dyn CapabilityProbe,
        host: SceneHost<B>,
        now: Instant,
    ) -> Self {
        let device = config.device_class(detected);
        let tier = probe.probe();
        log::info!(
            "mounting character scene: {} device, capability {}",
            device.label(),
            tier.label()
        );
        let pointer = PointerState::new(config.interpolation, config.pointer_sample_interval);
        let mut controller = Self {
            config,
            device,
            tier,
            viewport,
            state: LoadState::Probing,
            host,
            surface: None,
            scene: Scene::new(),
            camera: Camera::portrait(viewport.aspect()),
            character: None,
            mixer: None,
            hover: None,
            pointer,
            listeners: ListenerRegistry::default(),
            timers: TimerQueue::new(),
            orchestrator: LoadOrchestrator::new(),
            frames: FrameLoop::default(),
            touch_debounce: None,
            touch_settle: None,
            intro_played: None,
            intros: 0,
            unmounted: false,
        };

        if !tier.can_render() {
            controller.settle_unsupported();
            return controller;
        }
        let request = SurfaceRequest::new(viewport, device, tier);
        match controller.host.surfaces.create(&request) {
            Ok(backend) => controller.surface = Some(RenderSurface::new(backend, request)),
            Err(error) => {
                log::warn!("could not create render surface: {error}");
                controller.settle_unsupported();
                return controller;
            }
        }
        if controller.apply(Transition::Supported) {
            controller.host.loading.set_loading(0);
            controller.start_attempt(now);
        }
        controller
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    pub fn display_state(&self) -> DisplayState {
        self.state.display(self.orchestrator.is_slow())
    }

    pub fn device(&self) -> DeviceClass {
        self.device
    }

    pub fn tier(&self) -> CapabilityTier {
        self.tier
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn pointer(&self) -> &PointerState {
        &self.pointer
    }

    pub fn current_attempt(&self) -> Option<AttemptId> {
        self.orchestrator.current_attempt()
    }

    pub fn last_attempt(&self) -> Option<AttemptId> {
        self.orchestrator.last_attempt()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn intros_played(&self) -> u32 {
        self.intros
    }

    pub fn is_mounted(&self) -> bool {
        !self.unmounted
    }

    pub fn is_listening(&self, listener: Listener) -> bool {
        self.listeners.is_installed(listener)
    }

    /// True while the render loop wants display refreshes.
    pub fn wants_frame(&self) -> bool {
        self.frames.is_running()
    }

    /// When `tick` next has something to do, if anything is scheduled.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Applies everything loaders reported and every timer that is due, in
    /// the order they happened. A deadline that passed before a loader spoke
    /// wins over that loader's message, however late the host ticks.
    pub fn tick(&mut self, now: Instant) {
        if self.unmounted {
            return;
        }
        for event in self.orchestrator.drain() {
            self.fire_due(event.sent_at.min(now), now);
            if let Some(outcome) = self.orchestrator.accept(event, &mut self.timers) {
                self.handle_outcome(outcome, now);
            }
        }
        self.fire_due(now, now);
    }

    /// One display refresh: gaze, screen light, animation, draw.
    pub fn frame(&mut self, now: Instant) -> FrameOutcome {
        if self.unmounted {
            return FrameOutcome::Stopped;
        }
        let outcome = self.frames.admit(now);
        if outcome != FrameOutcome::Rendered {
            return outcome;
        }
        let delta = self.frames.clock.delta(now).as_secs_f32();
        if let Some(binding) = &self.character {
            if let Some(root) = self.scene.children.get_mut(binding.index) {
                if let Some(head) = binding.head.as_ref().and_then(|path| root.at_path_mut(path)) {
                    aim_head(
                        &mut head.transform.rotation,
                        self.pointer.vector,
                        self.pointer.interpolation,
                        &self.config.gaze,
                    );
                }
                if let Some(screen) = binding.screen.as_ref().and_then(|path| root.at_path(path)) {
                    self.scene.lighting.couple_screen_light(screen);
                }
                if let Some(mixer) = &mut self.mixer {
                    mixer.update(delta, root);
                }
            }
        }
        if let Some(surface) = &mut self.surface {
            surface.backend.render(&self.scene, &self.camera);
        }
        outcome
    }

    pub fn on_pointer_move(&mut self, now: Instant, client_x: f64, client_y: f64) {
        if !self.listeners.is_installed(POINTER_MOVE) {
            return;
        }
        self.sample_pointer(now, client_x, client_y);
    }

    pub fn on_touch_start(&mut self, now: Instant) {
        if !self.listeners.is_installed(TOUCH_START) {
            return;
        }
        if let Some(pending) = self.touch_debounce.take() {
            self.timers.cancel(pending);
        }
        self.touch_debounce = Some(self.timers.schedule(
            now,
            self.config.touch_move_debounce,
            TimerKind::TouchMoveDebounce,
        ));
    }

    pub fn on_touch_move(&mut self, now: Instant, client_x: f64, client_y: f64) {
        if !self.listeners.is_installed(TOUCH_MOVE) {
            return;
        }
        self.sample_pointer(now, client_x, client_y);
    }

    /// Lets go of the head: back to center, slowly, then normal speed again.
    pub fn on_touch_end(&mut self, now: Instant) {
        if !self.listeners.is_installed(TOUCH_END) {
            return;
        }
        self.pointer.recenter(self.config.touch_settle);
        if let Some(pending) = self.touch_settle.take() {
            self.timers.cancel(pending);
        }
        self.touch_settle = Some(self.timers.schedule(
            now,
            self.config.touch_settle_duration,
            TimerKind::TouchSettle,
        ));
    }

    pub fn on_hover(&mut self, entered: bool) {
        let listener = if entered { HOVER_ENTER } else { HOVER_LEAVE };
        if !self.listeners.is_installed(listener) {
            return;
        }
        let (Some(mixer), Some(clip)) = (&mut self.mixer, &self.config.hover_clip) else {
            return;
        };
        if entered {
            mixer.play(clip, LoopMode::Once);
        } else {
            mixer.stop(clip);
        }
    }

    pub fn on_resize(&mut self, viewport: Viewport) {
        if self.unmounted {
            return;
        }
        self.viewport = viewport;
        if !self.listeners.is_installed(RESIZE) {
            return;
        }
        self.camera.set_aspect(viewport.aspect());
        if let Some(surface) = &mut self.surface {
            surface.resize(viewport);
        }
    }

    /// Tears the failed attempt down completely and starts a fresh one.
    pub fn retry(&mut self, now: Instant) -> Result<(), SceneError> {
        if self.unmounted {
            return Err(SceneError::Unmounted);
        }
        if !matches!(self.state, LoadState::Failed(_)) {
            return Err(SceneError::RetryUnavailable {
                state: self.state.label(),
            });
        }
        log::info!("retrying character load");
        self.teardown();
        if !self.apply(Transition::Retry) {
            return Err(SceneError::RetryUnavailable {
                state: self.state.label(),
            });
        }
        self.host.loading.set_loading(0);

        let request = SurfaceRequest::new(self.viewport, self.device, self.tier);
        match self.host.surfaces.create(&request) {
            Ok(backend) => self.surface = Some(RenderSurface::new(backend, request)),
            Err(error) => {
                log::error!("could not recreate render surface: {error}");
                self.fail(FailureReason::Load(LoadError::Surface(error.to_string())));
                return Ok(());
            }
        }
        self.start_attempt(now);
        Ok(())
    }

    /// Releases everything and stops accepting work. Safe to call any number
    /// of times.
    pub fn unmount(&mut self) {
        if !self.unmounted {
            log::debug!("unmounting character scene");
            self.unmounted = true;
        }
        self.teardown();
    }

    fn start_attempt(&mut self, now: Instant) {
        self.camera = Camera::portrait(self.viewport.aspect());
        if let Some(surface) = &mut self.surface {
            let mut environment = EnvironmentMap::studio();
            match environment.upload(&mut surface.backend) {
                Ok(()) => self.scene.environment = Some(environment),
                Err(error) => log::warn!("environment lighting unavailable: {error}"),
            }
        }
        let input = &mut *self.host.input;
        for listener in [POINTER_MOVE, TOUCH_START, TOUCH_END] {
            self.listeners.install(input, listener);
        }
        self.intro_played = None;
        self.orchestrator.begin(
            &mut *self.host.loader,
            &mut self.timers,
            &self.config,
            now,
        );
    }

    fn handle_outcome(&mut self, outcome: LoadOutcome, now: Instant) {
        match outcome {
            LoadOutcome::Progress(percent) => {
                if self.apply(Transition::Progress(percent)) {
                    self.host.loading.set_loading(percent);
                }
            }
            LoadOutcome::SlowWarning => {}
            LoadOutcome::Loaded(asset) => self.on_loaded(asset, now),
            LoadOutcome::Failed(reason) => self.fail(reason),
        }
    }

    fn on_loaded(&mut self, mut asset: CharacterAsset, now: Instant) {
        let Some(surface) = &mut self.surface else {
            return;
        };
        if let Err(error) = asset.root.upload(&mut surface.backend) {
            log::warn!("GPU upload of character failed: {error}");
            asset.root.dispose(&mut surface.backend);
            self.fail(FailureReason::Load(LoadError::Upload(error)));
            return;
        }
        self.complete_loading();
        if !self.apply(Transition::Resolved) {
            if let Some(surface) = &mut self.surface {
                asset.root.dispose(&mut surface.backend);
            }
            return;
        }

        let head = asset.root.find_path(&self.config.head_bone);
        if head.is_none() {
            log::debug!("no '{}' bone, gaze follow disabled", self.config.head_bone);
        }
        let screen = asset.root.find_path(&self.config.screen_light);
        if screen.is_none() {
            log::debug!("no '{}' object, screen light disabled", self.config.screen_light);
        }

        let mut mixer = AnimationMixer::new(asset.clips, &asset.root.name);
        for clip in &self.config.idle_clips {
            if !mixer.play(clip, LoopMode::Repeat) {
                log::debug!("idle clip '{clip}' not found");
            }
        }
        let input = &mut *self.host.input;
        if let Some(clip) = &self.config.hover_clip {
            if mixer.has_clip(clip) {
                for listener in [HOVER_ENTER, HOVER_LEAVE] {
                    self.listeners.install(input, listener);
                }
                self.hover = Some(HoverCleanup {
                    listeners: [HOVER_ENTER, HOVER_LEAVE],
                });
            }
        }
        self.mixer = Some(mixer);

        let index = self.scene.add(asset.root);
        self.character = Some(CharacterBinding {
            index,
            head,
            screen,
        });
        self.listeners.install(input, RESIZE);

        if let Some(attempt) = self.orchestrator.last_attempt() {
            self.timers
                .schedule(now, self.config.intro_delay, TimerKind::Intro(attempt));
        }
        self.frames.start(self.config.frame_interval(self.device));
        log::info!("character ready");
    }

    fn fire_due(&mut self, until: Instant, now: Instant) {
        for (_, kind) in self.timers.take_due(until) {
            self.fire(kind, now);
        }
    }

    fn fire(&mut self, kind: TimerKind, now: Instant) {
        match kind {
            TimerKind::SlowLoading(_) | TimerKind::LoadTimeout(_) => {
                if let Some(outcome) = self.orchestrator.on_timer(kind, &mut self.timers) {
                    self.handle_outcome(outcome, now);
                }
            }
            TimerKind::Intro(attempt) => self.play_intro(attempt),
            TimerKind::TouchMoveDebounce => {
                self.touch_debounce = None;
                if self.listeners.is_installed(TOUCH_START) {
                    self.listeners.install(&mut *self.host.input, TOUCH_MOVE);
                }
            }
            TimerKind::TouchSettle => {
                self.touch_settle = None;
                self.pointer.interpolation = self.config.interpolation;
            }
        }
    }

    fn play_intro(&mut self, attempt: AttemptId) {
        let current = self.orchestrator.last_attempt() == Some(attempt);
        if !current || self.state != LoadState::Ready || self.intro_played == Some(attempt) {
            return;
        }
        self.intro_played = Some(attempt);
        self.intros += 1;
        self.scene.lighting.turn_on();
        if let Some(mixer) = &mut self.mixer {
            if !mixer.play(&self.config.intro_clip, LoopMode::Once) {
                log::debug!("intro clip '{}' not found", self.config.intro_clip);
            }
        }
        log::debug!("intro sequence started for attempt {attempt}");
    }

    fn fail(&mut self, reason: FailureReason) {
        self.complete_loading();
        self.apply(Transition::Rejected(reason));
    }

    fn settle_unsupported(&mut self) {
        self.apply(Transition::Unsupported);
        self.host.loading.set_loading(100);
    }

    fn complete_loading(&mut self) {
        if let Some(percent) = self.orchestrator.complete_progress() {
            self.host.loading.set_loading(percent);
        }
    }

    fn apply(&mut self, transition: Transition) -> bool {
        match self.state.apply(transition) {
            Ok(next) => {
                log::debug!("load state {} -> {}", self.state.label(), next.label());
                self.state = next;
                true
            }
            Err(error) => {
                log::debug!("ignored transition: {error}");
                false
            }
        }
    }

    fn sample_pointer(&mut self, now: Instant, client_x: f64, client_y: f64) {
        if let Some(vector) = PointerVector::from_client(client_x, client_y, self.viewport) {
            self.pointer.sample(now, vector);
        }
    }
}

impl<B: RenderBackend> Drop for SceneController<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        sample_character, FakeBackend, FakeSurfaces, ManualLoader, RecordingInput, RecordingSink,
    };
    use std::time::Duration;

    struct Rig {
        surfaces: FakeSurfaces,
        loader: ManualLoader,
        input: RecordingInput,
        sink: RecordingSink,
        t0: Instant,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                surfaces: FakeSurfaces::default(),
                loader: ManualLoader::default(),
                input: RecordingInput::default(),
                sink: RecordingSink::default(),
                t0: Instant::now(),
            }
        }

        fn at(&self, ms: u64) -> Instant {
            self.t0 + Duration::from_millis(ms)
        }

        fn mount_with(&self, tier: CapabilityTier, device: DeviceClass) -> SceneController<FakeBackend> {
            let host = SceneHost {
                surfaces: Box::new(self.surfaces.clone()),
                loader: Box::new(self.loader.clone()),
                input: Box::new(self.input.clone()),
                loading: Box::new(self.sink.clone()),
            };
            let viewport = Viewport {
                width: 1280.0,
                height: 800.0,
                device_pixel_ratio: 2.0,
            };
            SceneController::mount(SceneConfig::with_defaults(), device, viewport, &tier, host, self.t0)
        }

        fn mount(&self) -> SceneController<FakeBackend> {
            self.mount_with(CapabilityTier::Full, DeviceClass::Desktop)
        }

        fn live_resources(&self) -> usize {
            self.surfaces.log.borrow().gpu.live()
        }

        /// Mounts and resolves the first attempt at `ms`.
        fn ready_at(&self, ms: u64) -> SceneController<FakeBackend> {
            let mut controller = self.mount();
            self.loader.reporter(0).finish(Ok(sample_character()));
            controller.tick(self.at(ms));
            assert_eq!(controller.state(), &LoadState::Ready);
            controller
        }
    }

    #[test]
    fn unsupported_environment_never_starts_a_load() {
        let rig = Rig::new();
        let controller = rig.mount_with(CapabilityTier::None, DeviceClass::Desktop);
        assert_eq!(controller.state(), &LoadState::Unsupported);
        assert_eq!(rig.sink.last(), Some(100));
        assert_eq!(rig.loader.started(), 0);
        assert_eq!(*rig.surfaces.created.borrow(), 0);
        assert_eq!(controller.display_state(), DisplayState::ProbingFallback);
    }

    #[test]
    fn surface_creation_failure_degrades_to_unsupported() {
        let rig = Rig::new();
        *rig.surfaces.fail.borrow_mut() = true;
        let controller = rig.mount();
        assert_eq!(controller.state(), &LoadState::Unsupported);
        assert_eq!(rig.sink.last(), Some(100));
        assert_eq!(rig.loader.started(), 0);
    }

    #[test]
    fn observed_progress_is_non_decreasing_within_an_attempt() {
        let rig = Rig::new();
        let mut controller = rig.mount();
        let reporter = rig.loader.reporter(0);
        for loaded in [5, 30, 20, 30, 60, 100] {
            reporter.progress(loaded, 100);
        }
        controller.tick(rig.at(50));
        assert_eq!(rig.sink.history(), vec![0, 5, 30, 60, 99]);
        assert_eq!(controller.state(), &LoadState::Loading { percent: 99 });
    }

    #[test]
    fn hard_timeout_fails_and_completes_progress() {
        let rig = Rig::new();
        let mut controller = rig.mount();
        rig.loader.reporter(0).progress(40, 100);
        controller.tick(rig.at(10_000));
        assert!(controller.orchestrator.is_slow());
        assert!(matches!(
            controller.display_state(),
            DisplayState::LoadingWithPercent { percent: 40, slow: true }
        ));

        controller.tick(rig.at(19_999));
        assert!(matches!(controller.state(), LoadState::Loading { .. }));
        controller.tick(rig.at(20_000));
        assert_eq!(controller.state(), &LoadState::Failed(FailureReason::Timeout));
        assert_eq!(rig.sink.last(), Some(100));
        assert_eq!(controller.pending_timers(), 0);
    }

    #[test]
    fn ready_happens_once_and_intro_waits_for_its_delay() {
        let rig = Rig::new();
        let mut controller = rig.ready_at(1_000);
        assert_eq!(rig.sink.last(), Some(100));
        assert!(controller.wants_frame());
        assert_eq!(controller.pending_timers(), 1);

        rig.loader.reporter(0).finish(Ok(sample_character()));
        controller.tick(rig.at(1_100));
        assert_eq!(controller.scene().children.len(), 1);

        controller.tick(rig.at(3_499));
        assert_eq!(controller.intros_played(), 0);
        assert!(!controller.scene().lighting.lights_on);

        controller.tick(rig.at(3_500));
        assert_eq!(controller.intros_played(), 1);
        assert!(controller.scene().lighting.lights_on);
        assert!(controller
            .mixer
            .as_ref()
            .is_some_and(|mixer| mixer.is_playing("introAnimation")));

        controller.tick(rig.at(60_000));
        assert_eq!(controller.intros_played(), 1);
        // The hard-timeout for the resolved attempt never fires.
        assert_eq!(controller.state(), &LoadState::Ready);
    }

    #[test]
    fn retry_starts_fresh_attempt_and_ignores_the_old_one() {
        let rig = Rig::new();
        let mut controller = rig.mount();
        rig.loader.reporter(0).progress(70, 100);
        controller.tick(rig.at(100));
        controller.tick(rig.at(20_000));
        assert!(matches!(controller.state(), LoadState::Failed(_)));
        let first = controller.last_attempt();

        controller.retry(rig.at(21_000)).expect("retry after failure");
        assert_eq!(controller.state(), &LoadState::Loading { percent: 0 });
        assert_eq!(rig.sink.last(), Some(0));
        assert_ne!(controller.last_attempt(), first);
        assert_eq!(rig.loader.started(), 2);
        assert_eq!(*rig.surfaces.created.borrow(), 2);

        let stale = rig.loader.reporter(0);
        stale.progress(90, 100);
        stale.finish(Ok(sample_character()));
        controller.tick(rig.at(21_500));
        assert_eq!(controller.state(), &LoadState::Loading { percent: 0 });
        assert!(controller.scene().children.is_empty());

        rig.loader.reporter(1).progress(10, 100);
        controller.tick(rig.at(21_600));
        assert_eq!(controller.state(), &LoadState::Loading { percent: 10 });
    }

    #[test]
    fn retry_is_refused_outside_failure() {
        let rig = Rig::new();
        let mut controller = rig.mount();
        assert_eq!(
            controller.retry(rig.at(5)),
            Err(SceneError::RetryUnavailable { state: "loading" })
        );
        let mut unsupported = rig.mount_with(CapabilityTier::None, DeviceClass::Desktop);
        assert!(unsupported.retry(rig.at(5)).is_err());
    }

    #[test]
    fn unmount_while_loading_silences_the_attempt() {
        let rig = Rig::new();
        let mut controller = rig.mount();
        rig.loader.reporter(0).progress(20, 100);
        controller.tick(rig.at(10));
        let history = rig.sink.history();

        controller.unmount();
        assert_eq!(controller.pending_timers(), 0);
        assert_eq!(controller.current_attempt(), None);
        assert!(rig.input.attached().is_empty());

        rig.loader.reporter(0).progress(80, 100);
        rig.loader.reporter(0).finish(Ok(sample_character()));
        controller.tick(rig.at(30_000));
        assert_eq!(rig.sink.history(), history);
        assert_eq!(controller.state(), &LoadState::Loading { percent: 20 });
        assert_eq!(rig.live_resources(), 0);
        assert!(controller.scene().is_empty());
    }

    #[test]
    fn unmounted_controller_cannot_be_restarted() {
        let rig = Rig::new();
        let mut controller = rig.mount();
        rig.loader
            .reporter(0)
            .finish(Err(LoadError::Fetch("offline".to_string())));
        controller.tick(rig.at(100));
        assert!(matches!(controller.state(), LoadState::Failed(_)));

        controller.unmount();
        assert!(!controller.is_mounted());
        assert_eq!(controller.retry(rig.at(200)), Err(SceneError::Unmounted));
        controller.tick(rig.at(30_000));
        assert_eq!(controller.frame(rig.at(30_016)), FrameOutcome::Stopped);

        assert_eq!(*rig.surfaces.created.borrow(), 1);
        assert_eq!(rig.loader.started(), 1);
        assert_eq!(rig.live_resources(), 0);
        assert_eq!(controller.pending_timers(), 0);
        assert!(matches!(controller.state(), LoadState::Failed(_)));
    }

    #[test]
    fn late_tick_still_times_out_a_resolution_that_came_after_the_deadline() {
        let rig = Rig::new();
        let mut controller = rig.mount();
        rig.loader
            .reporter(0)
            .finish_at(rig.at(21_000), Ok(sample_character()));
        controller.tick(rig.at(25_000));
        assert_eq!(controller.state(), &LoadState::Failed(FailureReason::Timeout));
        assert!(controller.scene().children.is_empty());
        assert!(!controller.wants_frame());
    }

    #[test]
    fn late_tick_keeps_a_resolution_that_came_in_time() {
        let rig = Rig::new();
        let mut controller = rig.mount();
        rig.loader
            .reporter(0)
            .finish_at(rig.at(19_000), Ok(sample_character()));
        controller.tick(rig.at(25_000));
        assert_eq!(controller.state(), &LoadState::Ready);
        assert_eq!(rig.sink.history(), vec![0, 100]);
    }

    #[test]
    fn load_failure_shows_generic_retry_prompt() {
        let rig = Rig::new();
        let mut controller = rig.mount();
        rig.loader
            .reporter(0)
            .finish(Err(LoadError::Fetch("connection reset by 10.0.0.7".to_string())));
        controller.tick(rig.at(500));
        assert_eq!(rig.sink.last(), Some(100));
        let caption = controller.display_state().caption();
        assert!(caption.contains("retry"));
        assert!(!caption.contains("10.0.0.7"));
    }

    #[test]
    fn upload_failure_releases_partial_allocations() {
        let rig = Rig::new();
        let mut controller = rig.mount();
        let environment = rig.live_resources();
        rig.surfaces.log.borrow_mut().gpu.fail_after(environment + 2);
        rig.loader.reporter(0).finish(Ok(sample_character()));
        controller.tick(rig.at(100));
        assert!(matches!(
            controller.state(),
            LoadState::Failed(FailureReason::Load(LoadError::Upload(_)))
        ));
        assert_eq!(rig.live_resources(), environment);
        assert!(controller.scene().children.is_empty());
    }

    #[test]
    fn pointer_updates_are_rate_limited() {
        let rig = Rig::new();
        let mut controller = rig.ready_at(0);
        for ms in 0..100u64 {
            controller.on_pointer_move(rig.at(ms), 900.0, 200.0);
        }
        assert!(controller.pointer().applied_updates() <= 7);
    }

    #[test]
    fn touch_move_is_attached_only_after_debounce() {
        let rig = Rig::new();
        let mut controller = rig.ready_at(0);
        controller.on_touch_start(rig.at(1_000));
        controller.on_touch_move(rig.at(1_050), 100.0, 100.0);
        assert_eq!(controller.pointer().applied_updates(), 0);
        assert!(!controller.is_listening(TOUCH_MOVE));

        controller.tick(rig.at(1_200));
        assert!(controller.is_listening(TOUCH_MOVE));
        controller.on_touch_move(rig.at(1_250), 100.0, 100.0);
        assert_eq!(controller.pointer().applied_updates(), 1);
    }

    #[test]
    fn touch_move_updates_are_rate_limited() {
        let rig = Rig::new();
        let mut controller = rig.ready_at(0);
        controller.on_touch_start(rig.at(0));
        controller.tick(rig.at(200));
        assert!(controller.is_listening(TOUCH_MOVE));
        for ms in 0..100u64 {
            controller.on_touch_move(rig.at(300 + ms), 200.0, 300.0);
        }
        let applied = controller.pointer().applied_updates();
        assert!(applied >= 1);
        assert!(applied <= 7);
    }

    #[test]
    fn mouse_and_touch_share_one_update_budget() {
        let rig = Rig::new();
        let mut controller = rig.ready_at(0);
        controller.on_touch_start(rig.at(0));
        controller.tick(rig.at(200));
        for ms in 0..100u64 {
            if ms % 2 == 0 {
                controller.on_pointer_move(rig.at(300 + ms), 900.0, 200.0);
            } else {
                controller.on_touch_move(rig.at(300 + ms), 200.0, 300.0);
            }
        }
        assert!(controller.pointer().applied_updates() <= 7);
    }

    #[test]
    fn touch_end_settles_slowly_then_restores_speed() {
        let rig = Rig::new();
        let mut controller = rig.ready_at(0);
        controller.on_pointer_move(rig.at(10), 0.0, 0.0);
        controller.on_touch_end(rig.at(100));
        assert_eq!(controller.pointer().vector, PointerVector::CENTER);
        assert_eq!(controller.pointer().interpolation, controller.config.touch_settle);
        controller.tick(rig.at(1_100));
        assert_eq!(controller.pointer().interpolation, controller.config.interpolation);
    }

    #[test]
    fn frames_turn_head_and_couple_screen_light() {
        let rig = Rig::new();
        let mut controller = rig.ready_at(0);
        controller.on_pointer_move(rig.at(10), 1280.0, 400.0);
        assert_eq!(controller.frame(rig.at(16)), FrameOutcome::Rendered);
        assert_eq!(controller.frame(rig.at(32)), FrameOutcome::Rendered);

        let binding = controller.character.as_ref().expect("character bound");
        let root = &controller.scene.children[binding.index];
        let head_path = binding.head.as_ref().expect("head bone found");
        let head = root.at_path(head_path).expect("head resolves");
        assert!(head.transform.rotation.y > 0.0);
        assert!(controller.scene.lighting.point.intensity > 0.0);
        assert_eq!(rig.surfaces.log.borrow().renders, 2);
    }

    #[test]
    fn mobile_frames_are_throttled_desktop_frames_are_not() {
        let rig = Rig::new();
        let mut mobile = rig.mount_with(CapabilityTier::Basic, DeviceClass::Mobile);
        rig.loader.reporter(0).finish(Ok(sample_character()));
        mobile.tick(rig.at(0));
        let outcomes: Vec<FrameOutcome> = [0u64, 16, 34]
            .into_iter()
            .map(|ms| mobile.frame(rig.at(ms)))
            .collect();
        assert_eq!(
            outcomes,
            vec![FrameOutcome::Rendered, FrameOutcome::Throttled, FrameOutcome::Rendered]
        );

        let rig = Rig::new();
        let mut desktop = rig.ready_at(0);
        for ms in 0..5u64 {
            assert_eq!(desktop.frame(rig.at(ms)), FrameOutcome::Rendered);
        }
    }

    #[test]
    fn hover_plays_and_stops_hover_clip() {
        let rig = Rig::new();
        let mut controller = rig.ready_at(0);
        assert!(controller.is_listening(HOVER_ENTER));
        controller.on_hover(true);
        assert!(controller
            .mixer
            .as_ref()
            .is_some_and(|mixer| mixer.is_playing("browup")));
        controller.on_hover(false);
        assert!(!controller
            .mixer
            .as_ref()
            .is_some_and(|mixer| mixer.is_playing("browup")));
    }

    #[test]
    fn resize_tracks_viewport_once_ready() {
        let rig = Rig::new();
        let mut controller = rig.ready_at(0);
        controller.on_resize(Viewport {
            width: 1000.0,
            height: 500.0,
            device_pixel_ratio: 1.0,
        });
        assert_eq!(controller.camera().aspect, 2.0);
        assert_eq!(rig.surfaces.log.borrow().size, (1000, 500));
    }

    #[test]
    fn dropping_the_controller_releases_everything() {
        let rig = Rig::new();
        let controller = rig.ready_at(0);
        assert!(rig.live_resources() > 0);
        drop(controller);
        assert_eq!(rig.live_resources(), 0);
        assert!(rig.input.attached().is_empty());
        assert_eq!(rig.surfaces.log.borrow().disposals, 1);
    }
}
