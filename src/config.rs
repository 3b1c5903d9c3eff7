use crate::pointer::{GazeLimits, Interpolation};
use std::time::Duration;

pub const SLOW_LOADING_AFTER: Duration = Duration::from_secs(10);
pub const LOAD_TIMEOUT: Duration = Duration::from_secs(20);
pub const INTRO_DELAY: Duration = Duration::from_millis(2500);
pub const POINTER_SAMPLE_INTERVAL: Duration = Duration::from_millis(16);
pub const TOUCH_MOVE_DEBOUNCE: Duration = Duration::from_millis(200);
pub const TOUCH_SETTLE_DURATION: Duration = Duration::from_millis(1000);
pub const DESKTOP_TARGET_FPS: u32 = 60;
pub const MOBILE_TARGET_FPS: u32 = 30;
pub const MOBILE_BREAKPOINT_PX: f64 = 768.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Desktop,
    Mobile,
}

impl DeviceClass {
    /// Narrow viewports and mobile user agents (`/Mobi|Android/i`) count as mobile.
    pub fn detect(viewport_width: f64, user_agent: Option<&str>) -> Self {
        let mobile_agent = user_agent
            .map(|agent| {
                let agent = agent.to_ascii_lowercase();
                agent.contains("mobi") || agent.contains("android")
            })
            .unwrap_or(false);
        if viewport_width < MOBILE_BREAKPOINT_PX || mobile_agent {
            DeviceClass::Mobile
        } else {
            DeviceClass::Desktop
        }
    }

    pub fn is_mobile(self) -> bool {
        matches!(self, DeviceClass::Mobile)
    }

    pub fn label(self) -> &'static str {
        match self {
            DeviceClass::Desktop => "desktop",
            DeviceClass::Mobile => "mobile",
        }
    }
}

#[derive(Clone, Debug)]
pub struct SceneConfig {
    pub slow_loading_after: Duration,
    pub load_timeout: Duration,
    pub intro_delay: Duration,
    pub pointer_sample_interval: Duration,
    pub touch_move_debounce: Duration,
    pub touch_settle_duration: Duration,
    pub desktop_target_fps: u32,
    pub mobile_target_fps: u32,
    pub head_bone: String,
    pub screen_light: String,
    pub intro_clip: String,
    pub idle_clips: Vec<String>,
    pub hover_clip: Option<String>,
    pub interpolation: Interpolation,
    pub touch_settle: Interpolation,
    pub gaze: GazeLimits,
    /// Ask the backend to drop its device after disposal. Some mobile GPUs
    /// hold on to context memory otherwise.
    pub force_context_loss: bool,
    pub force_mobile: bool,
}

impl SceneConfig {
    pub fn with_defaults() -> Self {
        Self {
            slow_loading_after: SLOW_LOADING_AFTER,
            load_timeout: LOAD_TIMEOUT,
            intro_delay: INTRO_DELAY,
            pointer_sample_interval: POINTER_SAMPLE_INTERVAL,
            touch_move_debounce: TOUCH_MOVE_DEBOUNCE,
            touch_settle_duration: TOUCH_SETTLE_DURATION,
            desktop_target_fps: DESKTOP_TARGET_FPS,
            mobile_target_fps: MOBILE_TARGET_FPS,
            head_bone: "spine006".to_string(),
            screen_light: "screenlight".to_string(),
            intro_clip: "introAnimation".to_string(),
            idle_clips: vec!["typing".to_string(), "blink".to_string()],
            hover_clip: Some("browup".to_string()),
            interpolation: Interpolation::DEFAULT,
            touch_settle: Interpolation::SETTLE,
            gaze: GazeLimits::default(),
            force_context_loss: true,
            force_mobile: false,
        }
    }

    /// Overrides selected knobs from `CHARACTER_SCENE_*` environment variables.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Some(timeout) = env_millis("CHARACTER_SCENE_LOAD_TIMEOUT_MS") {
            self.load_timeout = timeout;
        }
        if let Some(slow) = env_millis("CHARACTER_SCENE_SLOW_LOADING_MS") {
            self.slow_loading_after = slow;
        }
        if let Some(delay) = env_millis("CHARACTER_SCENE_INTRO_DELAY_MS") {
            self.intro_delay = delay;
        }
        if env_flag_enabled("CHARACTER_SCENE_FORCE_MOBILE") {
            self.force_mobile = true;
        }
        if env_flag_enabled("CHARACTER_SCENE_NO_CONTEXT_LOSS") {
            self.force_context_loss = false;
        }
        self
    }

    pub fn device_class(&self, detected: DeviceClass) -> DeviceClass {
        if self.force_mobile {
            DeviceClass::Mobile
        } else {
            detected
        }
    }

    pub fn target_fps(&self, device: DeviceClass) -> u32 {
        match device {
            DeviceClass::Desktop => self.desktop_target_fps,
            DeviceClass::Mobile => self.mobile_target_fps,
        }
    }

    /// Minimum spacing between processed frames. Only constrained devices
    /// are throttled; desktop renders every frame it is offered.
    pub fn frame_interval(&self, device: DeviceClass) -> Option<Duration> {
        if !device.is_mobile() {
            return None;
        }
        let fps = self.target_fps(device).max(1);
        Some(Duration::from_secs_f64(1.0 / fps as f64))
    }
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self::with_defaults()
    }
}

pub(crate) fn env_flag_enabled(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
        })
        .unwrap_or(false)
}

pub(crate) fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}
