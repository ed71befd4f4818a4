//! Single-slot toast state machine.
//!
//! ```text
//!            new latest unread                 deadline / dismiss()
//!   Hidden ─────────────────────► Showing ───────────────────────► Dismissing
//!     ▲                           │    ▲ new arrival:                   │
//!     │                           └────┘ replace, restart countdown     │
//!     └──────────────── exit done: mark displayed item read ◄───────────┘
//!                       (an arrival held during the exit is shown next)
//! ```
//!
//! The controller is pure: every method takes the current time and timers
//! are plain deadlines stored in the state, so replacing the state cancels
//! them. [`super::ToastDriver`] feeds it real time.

use std::time::Duration;

use tokio::time::Instant;

use crate::constants::{
    TOAST_DISPLAY_DURATION, TOAST_ENTER_DURATION, TOAST_EXIT_DURATION, TOAST_SLIDE_OFFSET,
};
use crate::notifications::Notification;

use super::style::ToastStyle;

/// Controller state. Deadlines live inside the variant that owns them.
#[derive(Debug, Clone, PartialEq)]
pub enum ToastState {
    /// Nothing on screen.
    Hidden,
    /// A toast is up and counting down.
    Showing {
        /// Displayed item.
        notification: Notification,
        /// Start of the slide-in.
        shown_at: Instant,
        /// Countdown expiry.
        deadline: Instant,
    },
    /// Exit animation running.
    Dismissing {
        /// Item being dismissed.
        notification: Notification,
        /// Start of the exit animation.
        started_at: Instant,
        /// Progress bar value frozen at the moment dismissal began.
        progress: f32,
        /// Exit animation end.
        done_at: Instant,
    },
}

/// Side effects the owner of the controller must carry out or may report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToastEffect {
    /// A notification entered the slot.
    Shown(String),
    /// A newer notification took over the slot; the previous stays unread.
    Replaced {
        /// Id that left the slot.
        previous: String,
        /// Id now shown.
        current: String,
    },
    /// A notification arrived during the exit animation and waits.
    Held(String),
    /// The exit animation started.
    Dismissing(String),
    /// The exit animation finished; mark this notification read.
    MarkRead(String),
}

/// Everything a view needs to draw the current frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ToastFrame {
    /// Notification id.
    pub id: String,
    /// Bold first line.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Tone and icon.
    pub style: ToastStyle,
    /// Vertical slide offset; 0 is the resting position.
    pub offset_y: f32,
    /// 0 (invisible) to 1.
    pub opacity: f32,
    /// Remaining display time as a fraction, 1 to 0.
    pub progress: f32,
    /// Exit animation in progress.
    pub dismissing: bool,
}

/// Timings for one controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToastTimings {
    /// Time a toast stays up before dismissing itself.
    pub display: Duration,
    /// Slide-in duration.
    pub enter: Duration,
    /// Fade-out duration.
    pub exit: Duration,
}

impl Default for ToastTimings {
    fn default() -> Self {
        Self {
            display: TOAST_DISPLAY_DURATION,
            enter: TOAST_ENTER_DURATION,
            exit: TOAST_EXIT_DURATION,
        }
    }
}

/// Single-slot toast state machine. Pure: every call takes the current
/// instant, and the caller schedules wakeups from [`Self::next_deadline`].
#[derive(Debug)]
pub struct ToastController {
    state: ToastState,
    timings: ToastTimings,
    /// Id of the last latest-unread item observed.
    last_seen: Option<String>,
    /// Arrival waiting for the exit animation to finish.
    held: Option<Notification>,
}

impl Default for ToastController {
    fn default() -> Self {
        Self::new(ToastTimings::default())
    }
}

impl ToastController {
    /// Hidden controller with the given timings.
    pub fn new(timings: ToastTimings) -> Self {
        Self {
            state: ToastState::Hidden,
            timings,
            last_seen: None,
            held: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> &ToastState {
        &self.state
    }

    /// `false` only while hidden.
    pub fn is_visible(&self) -> bool {
        !matches!(self.state, ToastState::Hidden)
    }

    /// Id of the notification in the slot.
    pub fn displayed_id(&self) -> Option<&str> {
        match &self.state {
            ToastState::Hidden => None,
            ToastState::Showing { notification, .. }
            | ToastState::Dismissing { notification, .. } => Some(&notification.id),
        }
    }

    /// Feed the store's latest unread notification.
    ///
    /// Only a change of identity triggers anything; mutations of an item
    /// already seen, or the item becoming read, are ignored.
    pub fn observe_latest(
        &mut self,
        latest: Option<&Notification>,
        now: Instant,
    ) -> Option<ToastEffect> {
        let latest = latest.filter(|n| !n.read)?;
        if self.last_seen.as_deref() == Some(latest.id.as_str()) {
            return None;
        }
        self.last_seen = Some(latest.id.clone());

        match &self.state {
            ToastState::Hidden => {
                self.show(latest.clone(), now);
                Some(ToastEffect::Shown(latest.id.clone()))
            }
            ToastState::Showing { notification, .. } => {
                let previous = notification.id.clone();
                self.show(latest.clone(), now);
                Some(ToastEffect::Replaced {
                    previous,
                    current: latest.id.clone(),
                })
            }
            ToastState::Dismissing { .. } => {
                self.held = Some(latest.clone());
                Some(ToastEffect::Held(latest.id.clone()))
            }
        }
    }

    /// Manual dismissal. Only meaningful while showing.
    pub fn dismiss(&mut self, now: Instant) -> Option<ToastEffect> {
        self.begin_exit(now)
    }

    /// Advance timers to `now`, returning every effect that fired in order.
    pub fn tick(&mut self, now: Instant) -> Vec<ToastEffect> {
        let mut effects = Vec::new();
        loop {
            match &self.state {
                ToastState::Showing { deadline, .. } if now >= *deadline => {
                    let expired_at = *deadline;
                    effects.extend(self.begin_exit(expired_at));
                }
                ToastState::Dismissing {
                    notification,
                    done_at,
                    ..
                } if now >= *done_at => {
                    effects.push(ToastEffect::MarkRead(notification.id.clone()));
                    self.state = ToastState::Hidden;
                    if let Some(next) = self.held.take() {
                        effects.push(ToastEffect::Shown(next.id.clone()));
                        self.show(next, now);
                    }
                }
                _ => return effects,
            }
        }
    }

    /// Earliest instant at which [`Self::tick`] has something to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match &self.state {
            ToastState::Hidden => None,
            ToastState::Showing { deadline, .. } => Some(*deadline),
            ToastState::Dismissing { done_at, .. } => Some(*done_at),
        }
    }

    /// Animation frame at `now`, or `None` when hidden.
    pub fn frame(&self, now: Instant) -> Option<ToastFrame> {
        let (notification, offset_y, opacity, progress, dismissing) = match &self.state {
            ToastState::Hidden => return None,
            ToastState::Showing {
                notification,
                shown_at,
                ..
            } => {
                let elapsed = now.saturating_duration_since(*shown_at);
                let entered = ease_out(fraction(elapsed, self.timings.enter));
                (
                    notification,
                    TOAST_SLIDE_OFFSET * (1.0 - entered),
                    entered,
                    1.0 - fraction(elapsed, self.timings.display),
                    false,
                )
            }
            ToastState::Dismissing {
                notification,
                started_at,
                progress,
                ..
            } => {
                let exited = fraction(
                    now.saturating_duration_since(*started_at),
                    self.timings.exit,
                );
                (
                    notification,
                    TOAST_SLIDE_OFFSET * exited,
                    1.0 - exited,
                    *progress,
                    true,
                )
            }
        };

        Some(ToastFrame {
            id: notification.id.clone(),
            title: notification.title.clone(),
            message: notification.message.clone(),
            style: ToastStyle::for_notification(notification),
            offset_y,
            opacity,
            progress,
            dismissing,
        })
    }

    /// Drop everything without marking anything read.
    pub fn unmount(&mut self) {
        self.state = ToastState::Hidden;
        self.held = None;
    }

    fn show(&mut self, notification: Notification, now: Instant) {
        self.state = ToastState::Showing {
            notification,
            shown_at: now,
            deadline: now + self.timings.display,
        };
    }

    /// `Showing -> Dismissing`. `None` in any other state.
    fn begin_exit(&mut self, now: Instant) -> Option<ToastEffect> {
        match std::mem::replace(&mut self.state, ToastState::Hidden) {
            ToastState::Showing {
                notification,
                shown_at,
                ..
            } => {
                let progress =
                    1.0 - fraction(now.saturating_duration_since(shown_at), self.timings.display);
                let id = notification.id.clone();
                self.state = ToastState::Dismissing {
                    notification,
                    started_at: now,
                    progress,
                    done_at: now + self.timings.exit,
                };
                Some(ToastEffect::Dismissing(id))
            }
            other => {
                self.state = other;
                None
            }
        }
    }
}

/// `elapsed / total`, clamped to `0..=1`.
fn fraction(elapsed: Duration, total: Duration) -> f32 {
    if total.is_zero() {
        return 1.0;
    }
    (elapsed.as_secs_f32() / total.as_secs_f32()).clamp(0.0, 1.0)
}

fn ease_out(t: f32) -> f32 {
    1.0 - (1.0 - t).powi(3)
}
