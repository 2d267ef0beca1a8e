//! Ad overlay state: what the host's UI layer should render during a break.
//!
//! Pure time arithmetic. The sequencer recomputes this on every ad time
//! update and publishes it as `PluginEvent::OverlayShow`.

/// Skip control rendering state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipButton {
    /// No skip control (skipping disabled by configuration)
    Hidden,
    /// Disabled, counting down the given number of whole seconds
    Countdown(u32),
    /// Enabled and clickable
    Ready,
}

/// Snapshot of the ad overlay for one point in playback
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayState {
    /// Seconds of ad playback left, zero when unknown
    pub remaining_time: f64,
    pub skip: SkipButton,
}

/// Compute the overlay for the current playhead.
///
/// `skip_after` is the configured number of seconds before the skip control
/// unlocks; a negative value disables skipping for the whole ad.
pub fn overlay_state(skip_after: i32, current_time: f64, duration: f64) -> OverlayState {
    let remaining_time = if duration.is_finite() && duration > current_time {
        duration - current_time
    } else {
        0.0
    };

    let skip = if skip_after < 0 {
        SkipButton::Hidden
    } else {
        let countdown = f64::from(skip_after) - current_time;
        if countdown > 0.0 {
            SkipButton::Countdown(countdown.ceil() as u32)
        } else {
            SkipButton::Ready
        }
    };

    OverlayState {
        remaining_time,
        skip,
    }
}
