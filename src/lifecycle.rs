//! Releasing everything a mount or attempt acquired.
//!
//! The order matters: nothing may be scheduled or listening while resources
//! go away, the character is disposed while the context that owns its
//! buffers is still alive, and the scene is cleared last so a retry can
//! repopulate it. Every step checks that its resource was acquired, so the
//! sequence can run after a partial load, after a failure, or twice.

use crate::asset::Disposable;
use crate::controller::SceneController;
use crate::surface::RenderBackend;

/// What a single teardown pass actually released.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub timers_cancelled: usize,
    pub frame_loop_stopped: bool,
    pub hover_listeners_removed: usize,
    pub listeners_removed: usize,
    pub output_detached: bool,
    pub character_disposed: bool,
    pub mixer_uncached: bool,
    pub environment_released: bool,
    pub context_released: bool,
    pub context_lost: bool,
}

impl TeardownReport {
    /// True when the pass found nothing left to release.
    pub fn is_noop(&self) -> bool {
        *self == TeardownReport::default()
    }
}

impl<B: RenderBackend> SceneController<B> {
    pub(crate) fn teardown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();

        // 1. timers and the frame loop
        report.timers_cancelled = self.timers.cancel_all();
        self.touch_debounce = None;
        self.touch_settle = None;
        self.orchestrator.abandon(&mut self.timers);
        if self.frames.is_running() {
            self.frames.stop();
            report.frame_loop_stopped = true;
        }
        log::debug!("teardown: cancelled {} timers", report.timers_cancelled);

        // 2. hover animation cleanup
        if let Some(hover) = self.hover.take() {
            report.hover_listeners_removed = hover.run(&mut self.listeners, &mut *self.host.input);
            log::debug!("teardown: hover cleanup ran");
        }

        // 3. input listeners
        report.listeners_removed = self.listeners.remove_all(&mut *self.host.input);
        if report.listeners_removed > 0 {
            log::debug!("teardown: removed {} listeners", report.listeners_removed);
        }

        // 4. output node
        if let Some(surface) = &mut self.surface {
            if surface.backend.output_attached() {
                surface.backend.detach_output();
                report.output_detached = true;
                log::debug!("teardown: detached render output");
            }
        }

        // 5. character graph
        if let Some(binding) = self.character.take() {
            if let (Some(root), Some(surface)) = (
                self.scene.children.get_mut(binding.index),
                self.surface.as_mut(),
            ) {
                let before = root.allocated_resources();
                root.dispose(&mut surface.backend);
                report.character_disposed = true;
                log::debug!("teardown: released {before} character resources");
            }
        }

        // 6. mixer binding
        if let Some(mut mixer) = self.mixer.take() {
            mixer.uncache_root();
            report.mixer_uncached = true;
            log::debug!("teardown: mixer uncached");
        }

        // 7. environment lighting
        if let Some(mut environment) = self.scene.environment.take() {
            if let Some(surface) = &mut self.surface {
                environment.dispose(&mut surface.backend);
                report.environment_released = true;
                log::debug!("teardown: environment map released");
            }
        }

        // 8. rendering context
        if let Some(mut surface) = self.surface.take() {
            surface.backend.dispose();
            report.context_released = true;
            if self.config.force_context_loss {
                report.context_lost = surface.backend.force_context_loss();
            }
            log::debug!(
                "teardown: rendering context released (forced loss: {})",
                report.context_lost
            );
        }

        // 9. scene container
        self.scene.clear();

        if report.is_noop() {
            log::trace!("teardown: nothing to release");
        }
        report
    }
}
