//! Draw policy as a pure function of the engine state

use super::state::EngineState;
use chrono::{DateTime, Local, Timelike};
use std::fmt;
use std::time::Duration;

/// Floor for every throttled cadence
pub const MIN_THROTTLED_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentSource {
    /// Video once ready, the lock-screen static bitmap until then
    Video,
    /// Media art, wallpaper or gradient
    Static,
    /// Wallpaper with the subject layer
    Home,
    /// Black
    Blank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayMode {
    Hidden,
    Full,
    /// Ambient: dim, no media block, burn-in offset
    Dimmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// No timer, no draws
    Stopped,
    /// Draw only on state changes
    OnDemand,
    Every(Duration),
    /// Top of the next wall-clock minute
    NextMinute,
}

impl Cadence {
    /// Delay until the next scheduled draw
    pub fn delay(&self, now: &DateTime<Local>) -> Option<Duration> {
        match self {
            Cadence::Stopped | Cadence::OnDemand => None,
            Cadence::Every(interval) => Some(*interval),
            Cadence::NextMinute => {
                let elapsed = now.second() as u64 * 1000 + (now.nanosecond() / 1_000_000) as u64;
                let remaining = Duration::from_millis(60_000u64.saturating_sub(elapsed));
                Some(remaining.max(MIN_THROTTLED_INTERVAL))
            }
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::Stopped => write!(f, "stopped"),
            Cadence::OnDemand => write!(f, "on-demand"),
            Cadence::Every(interval) => write!(f, "every {}ms", interval.as_millis()),
            Cadence::NextMinute => write!(f, "next minute"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawPolicy {
    pub content: ContentSource,
    pub overlay: OverlayMode,
    pub cadence: Cadence,
    /// The decoder may run
    pub play_video: bool,
}

/// Redraw intervals from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub frame_interval: Duration,
    pub power_save_interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(33),
            power_save_interval: MIN_THROTTLED_INTERVAL,
        }
    }
}

/// Ambient takes priority over lock state; power save throttles the lock
/// screen and never lets the video run.
pub fn derive_policy(state: &EngineState, timing: &Timing) -> DrawPolicy {
    let mut policy = if state.ambient {
        DrawPolicy {
            content: ContentSource::Blank,
            overlay: OverlayMode::Dimmed,
            cadence: Cadence::NextMinute,
            play_video: false,
        }
    } else if state.locked && state.power_save {
        DrawPolicy {
            content: ContentSource::Static,
            overlay: OverlayMode::Full,
            cadence: Cadence::Every(timing.power_save_interval.max(MIN_THROTTLED_INTERVAL)),
            play_video: false,
        }
    } else if state.locked {
        let has_video = state.desired_video().is_some();
        DrawPolicy {
            content: if has_video {
                ContentSource::Video
            } else {
                ContentSource::Static
            },
            overlay: OverlayMode::Full,
            cadence: Cadence::Every(timing.frame_interval),
            play_video: has_video,
        }
    } else {
        DrawPolicy {
            content: ContentSource::Home,
            overlay: OverlayMode::Hidden,
            cadence: Cadence::OnDemand,
            play_video: false,
        }
    };

    if !state.visible {
        policy.cadence = Cadence::Stopped;
        policy.play_video = false;
    }
    policy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn state(visible: bool, locked: bool, ambient: bool, power_save: bool) -> EngineState {
        let mut state = EngineState::new(Settings {
            enable_video_art: true,
            show_debug_overlay: false,
        });
        state.visible = visible;
        state.locked = locked;
        state.ambient = ambient;
        state.power_save = power_save;
        state
    }

    fn all_states() -> impl Iterator<Item = EngineState> {
        (0..16u8).map(|bits| {
            state(
                bits & 1 != 0,
                bits & 2 != 0,
                bits & 4 != 0,
                bits & 8 != 0,
            )
        })
    }

    #[test]
    fn test_all_combinations() {
        let timing = Timing::default();
        let minute_start = Local.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();

        for mut state in all_states() {
            state.video_file = Some(PathBuf::from("/clip.mp4"));
            let policy = derive_policy(&state, &timing);
            let label = format!(
                "visible={} locked={} ambient={} power_save={}",
                state.visible, state.locked, state.ambient, state.power_save
            );

            if !state.visible {
                assert_eq!(policy.cadence, Cadence::Stopped, "{}", label);
                assert!(!policy.play_video, "{}", label);
                continue;
            }

            let expected = match (state.locked, state.ambient, state.power_save) {
                (_, true, _) => (
                    ContentSource::Blank,
                    OverlayMode::Dimmed,
                    Cadence::NextMinute,
                    false,
                ),
                (true, false, true) => (
                    ContentSource::Static,
                    OverlayMode::Full,
                    Cadence::Every(Duration::from_millis(1000)),
                    false,
                ),
                (true, false, false) => (
                    ContentSource::Video,
                    OverlayMode::Full,
                    Cadence::Every(Duration::from_millis(33)),
                    true,
                ),
                (false, false, _) => (
                    ContentSource::Home,
                    OverlayMode::Hidden,
                    Cadence::OnDemand,
                    false,
                ),
            };
            assert_eq!(
                (policy.content, policy.overlay, policy.cadence, policy.play_video),
                expected,
                "{}",
                label
            );

            if state.power_save
                && let Some(delay) = policy.cadence.delay(&minute_start)
            {
                assert!(delay >= Duration::from_millis(1000), "{}", label);
            }
        }
    }

    #[test]
    fn test_locked_without_video_is_static() {
        let state = state(true, true, false, false);
        let policy = derive_policy(&state, &Timing::default());
        assert_eq!(policy.content, ContentSource::Static);
        assert!(!policy.play_video);
    }

    #[test]
    fn test_video_art_setting_disables_video() {
        let mut state = state(true, true, false, false);
        state.video_file = Some(PathBuf::from("/clip.mp4"));
        state.settings.enable_video_art = false;
        assert_eq!(
            derive_policy(&state, &Timing::default()).content,
            ContentSource::Static
        );
    }

    #[test]
    fn test_power_save_interval_floor() {
        let state = state(true, true, false, true);
        let timing = Timing {
            frame_interval: Duration::from_millis(16),
            power_save_interval: Duration::from_millis(200),
        };
        assert_eq!(
            derive_policy(&state, &timing).cadence,
            Cadence::Every(Duration::from_millis(1000))
        );
    }

    #[test]
    fn test_next_minute_delay() {
        let at = |s, ms: u32| {
            Local
                .with_ymd_and_hms(2024, 5, 1, 10, 0, s)
                .unwrap()
                .with_nanosecond(ms * 1_000_000)
                .unwrap()
        };
        assert_eq!(
            Cadence::NextMinute.delay(&at(0, 0)),
            Some(Duration::from_secs(60))
        );
        assert_eq!(
            Cadence::NextMinute.delay(&at(45, 500)),
            Some(Duration::from_millis(14_500))
        );
        // Never shorter than a second right before the boundary
        assert_eq!(
            Cadence::NextMinute.delay(&at(59, 900)),
            Some(Duration::from_millis(1000))
        );
        assert_eq!(Cadence::OnDemand.delay(&at(1, 0)), None);
    }
}
