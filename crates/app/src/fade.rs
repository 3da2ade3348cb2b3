//! The fade executor — scheduler-driven, abortable brightness ramps.
//!
//! A `Fade{target, period_s}` rule ramps a dimmable device from its
//! in-flight level to `target`, one brightness unit per step, with the
//! per-step delay derived from the period. Each step is a timer callback
//! that advances the level, re-sends the device if it is on, and
//! reschedules itself — the scheduler is never blocked.
//!
//! A fade aborts (the rule collapses to the plain numeric in-flight
//! level) when a later rule moves the level *against* the fade's
//! remaining travel, or is not numeric at all; a later rule in the same
//! direction leaves the fade running toward its original target.

use std::sync::Arc;

use tracing::debug;

use homenode_domain::rule::Rule;

use crate::device::Device;
use crate::timer::SoftwareTimer;

/// Progress of an active fade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeState {
    pub target: f64,
    /// The in-flight brightness level.
    pub current: f64,
    pub step_ms: u64,
}

/// Timer owner for a device's fade steps.
#[must_use]
pub fn owner(device: &Device) -> String {
    format!("{}_fade", device.core().name())
}

/// What an incoming rule means for an active fade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Gate {
    /// No fade is running.
    Idle,
    /// Same direction as the remaining travel: the fade keeps running
    /// toward its original target and the incoming rule is dropped.
    Continue,
    /// Opposite direction or non-numeric: stop and collapse the rule to
    /// the in-flight level before applying the incoming rule.
    Abort { level: f64 },
}

pub(crate) fn gate(active: Option<FadeState>, incoming: &Rule) -> Gate {
    let Some(fade) = active else {
        return Gate::Idle;
    };
    match incoming.as_numeric() {
        Some(value) => {
            let remaining = fade.target - fade.current;
            let direction = value - fade.current;
            if direction == 0.0 || remaining * direction > 0.0 {
                Gate::Continue
            } else {
                Gate::Abort { level: fade.current }
            }
        }
        None => Gate::Abort { level: fade.current },
    }
}

/// Begin a fade from `from` toward `target` over `period_s` seconds.
///
/// Degenerate spans (less than one brightness unit) settle immediately
/// on the target.
pub fn start(
    device: &Arc<Device>,
    timer: &Arc<SoftwareTimer>,
    target: f64,
    period_s: u32,
    from: f64,
) {
    let span = (target - from).abs();
    if span < 1.0 {
        device.settle_fade(target);
        return;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let steps = span.round() as u64;
    let step_ms = (u64::from(period_s).saturating_mul(1000) / steps).max(1);
    debug!(
        name = %device.core().name(),
        from, target, step_ms, "fade started"
    );
    device.begin_fade(FadeState {
        target,
        current: from,
        step_ms,
    });
    schedule_step(device, timer);
}

fn schedule_step(device: &Arc<Device>, timer: &Arc<SoftwareTimer>) {
    let Some(fade) = device.fade_state() else {
        return;
    };
    let step_device = Arc::clone(device);
    let step_timer = Arc::clone(timer);
    timer.schedule(fade.step_ms, &owner(device), move || {
        let device = Arc::clone(&step_device);
        let timer = Arc::clone(&step_timer);
        async move {
            step(&device, &timer).await;
        }
    });
}

async fn step(device: &Arc<Device>, timer: &Arc<SoftwareTimer>) {
    // The fade may have been aborted between firing and execution.
    let Some(done) = device.advance_fade() else {
        return;
    };
    if device.is_on() {
        // A failed send is retried implicitly by the next step.
        device.send(true).await;
    }
    if !done {
        schedule_step(device, timer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fading_down() -> Option<FadeState> {
        // Mid-flight: started at 50, heading to 30, currently at 45.
        Some(FadeState {
            target: 30.0,
            current: 45.0,
            step_ms: 1000,
        })
    }

    #[test]
    fn should_pass_rules_through_when_no_fade_is_active() {
        assert_eq!(gate(None, &Rule::Numeric(10.0)), Gate::Idle);
    }

    #[test]
    fn should_continue_on_same_direction_rule() {
        assert_eq!(gate(fading_down(), &Rule::Numeric(40.0)), Gate::Continue);
        // Past the original target but still downward.
        assert_eq!(gate(fading_down(), &Rule::Numeric(10.0)), Gate::Continue);
        // Exactly the in-flight level moves nothing.
        assert_eq!(gate(fading_down(), &Rule::Numeric(45.0)), Gate::Continue);
    }

    #[test]
    fn should_abort_on_opposing_rule() {
        assert_eq!(
            gate(fading_down(), &Rule::Numeric(46.0)),
            Gate::Abort { level: 45.0 }
        );
        // Between start and target, but upward relative to in-flight.
        assert_eq!(
            gate(fading_down(), &Rule::Numeric(48.0)),
            Gate::Abort { level: 45.0 }
        );
    }

    #[test]
    fn should_abort_on_non_numeric_rule() {
        assert_eq!(
            gate(fading_down(), &Rule::Disabled),
            Gate::Abort { level: 45.0 }
        );
        assert_eq!(
            gate(
                fading_down(),
                &Rule::Fade {
                    target: 100.0,
                    period_s: 10
                }
            ),
            Gate::Abort { level: 45.0 }
        );
    }
}
