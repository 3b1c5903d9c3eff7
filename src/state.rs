//! The load state machine. `LoadState::apply` is the only way a state
//! changes; the controller asks for transitions and never assigns directly.
//!
//! ```text
//! Probing ──unsupported──▶ Unsupported
//!    │
//!    └─supported──▶ Loading(0) ──progress(p' > p)──▶ Loading(p')
//!                      │   ├──resolved──▶ Ready
//!                      │   └──rejected──▶ Failed(reason) ──retry──▶ Loading(0)
//! ```

use crate::loader::LoadError;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureReason {
    Timeout,
    Load(LoadError),
}

impl FailureReason {
    /// What the page may show. Raw loader errors never reach the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            FailureReason::Timeout => "The 3D character is taking too long to load.",
            FailureReason::Load(_) => "The 3D character could not be loaded.",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Load(error) => write!(f, "{error}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadState {
    Probing,
    Loading { percent: u8 },
    Ready,
    Failed(FailureReason),
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    Supported,
    Unsupported,
    Progress(u8),
    Resolved,
    Rejected(FailureReason),
    Retry,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: &'static str,
    pub transition: Transition,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot apply {:?} while {}", self.transition, self.from)
    }
}

impl std::error::Error for InvalidTransition {}

impl LoadState {
    pub fn label(&self) -> &'static str {
        match self {
            LoadState::Probing => "probing",
            LoadState::Loading { .. } => "loading",
            LoadState::Ready => "ready",
            LoadState::Failed(_) => "failed",
            LoadState::Unsupported => "unsupported",
        }
    }

    pub fn apply(&self, transition: Transition) -> Result<LoadState, InvalidTransition> {
        let next = match (self, &transition) {
            (LoadState::Probing, Transition::Unsupported) => LoadState::Unsupported,
            (LoadState::Probing, Transition::Supported) => LoadState::Loading { percent: 0 },
            (LoadState::Loading { percent }, Transition::Progress(next)) if next > percent => {
                LoadState::Loading { percent: *next }
            }
            (LoadState::Loading { .. }, Transition::Resolved) => LoadState::Ready,
            (LoadState::Loading { .. }, Transition::Rejected(reason)) => {
                LoadState::Failed(reason.clone())
            }
            (LoadState::Failed(_), Transition::Retry) => LoadState::Loading { percent: 0 },
            _ => {
                return Err(InvalidTransition {
                    from: self.label(),
                    transition: transition.clone(),
                })
            }
        };
        Ok(next)
    }

    pub fn display(&self, slow: bool) -> DisplayState {
        match self {
            LoadState::Probing => DisplayState::LoadingWithPercent { percent: 0, slow },
            LoadState::Loading { percent } => DisplayState::LoadingWithPercent {
                percent: *percent,
                slow,
            },
            LoadState::Ready => DisplayState::Ready,
            LoadState::Failed(reason) => DisplayState::ErrorWithRetry {
                message: reason.user_message(),
            },
            LoadState::Unsupported => DisplayState::ProbingFallback,
        }
    }
}

/// What the surrounding page renders.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayState {
    /// Static fallback; 3D is not available on this device.
    ProbingFallback,
    ErrorWithRetry { message: &'static str },
    LoadingWithPercent { percent: u8, slow: bool },
    Ready,
}

impl DisplayState {
    pub fn caption(&self) -> String {
        match self {
            DisplayState::ProbingFallback => "3D character unavailable on this device".to_string(),
            DisplayState::ErrorWithRetry { message } => format!("{message} Press R to retry."),
            DisplayState::LoadingWithPercent { percent, slow: false } => {
                format!("Loading {percent}%")
            }
            DisplayState::LoadingWithPercent { percent, slow: true } => {
                format!("Loading {percent}% (still working...)")
            }
            DisplayState::Ready => "Ready".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_walks_probing_loading_ready() {
        let state = LoadState::Probing;
        let state = state.apply(Transition::Supported).expect("supported");
        let state = state.apply(Transition::Progress(40)).expect("progress");
        assert_eq!(state, LoadState::Loading { percent: 40 });
        let state = state.apply(Transition::Resolved).expect("resolved");
        assert_eq!(state, LoadState::Ready);
        assert!(state.apply(Transition::Resolved).is_err());
    }

    #[test]
    fn progress_must_strictly_increase() {
        let state = LoadState::Loading { percent: 40 };
        assert!(state.apply(Transition::Progress(40)).is_err());
        assert!(state.apply(Transition::Progress(10)).is_err());
    }

    #[test]
    fn only_failures_are_retryable() {
        let failed = LoadState::Failed(FailureReason::Timeout);
        assert_eq!(
            failed.apply(Transition::Retry),
            Ok(LoadState::Loading { percent: 0 })
        );
        assert!(LoadState::Unsupported.apply(Transition::Retry).is_err());
        assert!(LoadState::Ready.apply(Transition::Retry).is_err());
    }

    #[test]
    fn terminal_states_ignore_progress() {
        assert!(LoadState::Ready.apply(Transition::Progress(99)).is_err());
        assert!(LoadState::Failed(FailureReason::Timeout)
            .apply(Transition::Progress(99))
            .is_err());
    }

    #[test]
    fn failure_display_hides_raw_error_text() {
        let reason = FailureReason::Load(LoadError::Fetch("503 from cdn.example".to_string()));
        let display = LoadState::Failed(reason).display(false);
        let DisplayState::ErrorWithRetry { message } = display else {
            panic!("expected retry prompt, got {display:?}");
        };
        assert!(!message.contains("503"));
    }

    #[test]
    fn unsupported_maps_to_static_fallback() {
        assert_eq!(
            LoadState::Unsupported.display(false),
            DisplayState::ProbingFallback
        );
    }
}
