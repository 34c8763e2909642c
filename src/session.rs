//! Idle and absolute session expiry, with cross-tab consistency.
//!
//! Two layers. [`SessionTracker`] is the synchronous state machine: it
//! owns the idle/absolute clocks, the persistence throttle, and the
//! one-shot logout guard, and is driven entirely by explicit calls, so
//! tests run it under a manual clock. [`SessionMonitor`] is the async
//! driver a console window mounts while authenticated: it arms the
//! periodic check, subscribes to store changes, and forwards UI signals
//! into the tracker. Dropping the monitor detaches everything without
//! clearing persisted tracking state; that cleanup belongs to the actual
//! logout operation.

use crate::clock::{Clock, SystemClock};
use crate::storage::{
    parse_timestamp, SharedStore, StoreChange, AUTH_TOKEN_KEY, LAST_ACTIVITY_KEY, LOGOUT_EVENT_KEY,
    SESSION_START_KEY,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Logout after this long without user activity.
pub const IDLE_TIMEOUT_MS: i64 = 5 * 60 * 1000;
/// Logout this long after login, regardless of activity.
pub const ABSOLUTE_SESSION_TIMEOUT_MS: i64 = 8 * 60 * 60 * 1000;
/// Periodic expiry re-check cadence.
pub const CHECK_INTERVAL: Duration = Duration::from_secs(5);
/// Activity timestamps are persisted at most this often, bounding store
/// write volume under continuous pointer movement.
pub const ACTIVITY_WRITE_THROTTLE_MS: i64 = 15 * 1000;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogoutReason {
    Idle,
    Absolute,
    CrossTab,
}

/// Record written to [`LOGOUT_EVENT_KEY`] as the cross-tab broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutEvent {
    pub at: i64,
    pub reason: LogoutReason,
}

/// The external logout operation. The monitor only requests logout;
/// token revocation and navigation belong to the implementor. Must not
/// block; failures are the implementor's to handle.
pub trait LogoutHandler: Send + Sync {
    fn request_logout(&self, reason: LogoutReason);
}

/// Remove the session-tracking keys. For the external logout operation to
/// call once the session actually ends; never touches the auth token.
pub fn clear_session_tracking(store: &dyn SharedStore) {
    store.remove(LAST_ACTIVITY_KEY);
    store.remove(SESSION_START_KEY);
    store.remove(LOGOUT_EVENT_KEY);
}

/// Synchronous expiry state machine for one mounted window.
pub struct SessionTracker {
    store: Arc<dyn SharedStore>,
    clock: Arc<dyn Clock>,
    logout: Arc<dyn LogoutHandler>,
    last_activity: i64,
    session_start: i64,
    last_persisted_activity: i64,
    logging_out: bool,
}

impl SessionTracker {
    /// Mount for an authenticated window. Returns `None` when no auth
    /// token is present (unauthenticated views are not tracked).
    ///
    /// Timestamps are adopted from the store when valid, so a reload
    /// mid-session keeps the absolute clock running; otherwise both are
    /// seeded to now and persisted (fresh login). One expiry check runs
    /// immediately, before any listener could be armed, so a window that
    /// was backgrounded past its deadline expires right here.
    pub fn mount(
        store: Arc<dyn SharedStore>,
        clock: Arc<dyn Clock>,
        logout: Arc<dyn LogoutHandler>,
    ) -> Option<Self> {
        if store.get(AUTH_TOKEN_KEY).is_none() {
            debug!("no auth token, session tracking stays off");
            return None;
        }

        let now = clock.now_ms();
        let persisted_activity = parse_timestamp(store.get(LAST_ACTIVITY_KEY).as_deref());
        let persisted_start = parse_timestamp(store.get(SESSION_START_KEY).as_deref());

        let (last_activity, last_persisted_activity) = match persisted_activity {
            Some(at) => (at, at),
            None => {
                store.set(LAST_ACTIVITY_KEY, &now.to_string());
                (now, now)
            }
        };
        let session_start = match persisted_start {
            Some(at) => at,
            None => {
                store.set(SESSION_START_KEY, &now.to_string());
                now
            }
        };

        let mut tracker = Self {
            store,
            clock,
            logout,
            last_activity,
            session_start,
            last_persisted_activity,
            logging_out: false,
        };
        tracker.check_session();
        Some(tracker)
    }

    /// A user-interaction signal (pointer, key, scroll, touch). Updates
    /// the in-memory clock immediately; persists at most once per
    /// [`ACTIVITY_WRITE_THROTTLE_MS`] so other windows stay roughly in
    /// sync without storage churn.
    pub fn mark_activity(&mut self) {
        if self.logging_out {
            return;
        }
        let now = self.clock.now_ms();
        self.last_activity = now;
        if now - self.last_persisted_activity >= ACTIVITY_WRITE_THROTTLE_MS {
            self.last_persisted_activity = now;
            self.store.set(LAST_ACTIVITY_KEY, &now.to_string());
        }
    }

    /// Expire the session if a limit has been crossed. Absolute takes
    /// precedence when both fire at once.
    pub fn check_session(&mut self) {
        let now = self.clock.now_ms();
        if now - self.session_start >= ABSOLUTE_SESSION_TIMEOUT_MS {
            self.trigger_logout(LogoutReason::Absolute);
            return;
        }
        if now - self.last_activity >= IDLE_TIMEOUT_MS {
            self.trigger_logout(LogoutReason::Idle);
        }
    }

    /// React to a store change made by any window, this one included.
    /// Activity only moves forward; a foreign session start is adopted as
    /// written; any logout-event value ends this session too.
    pub fn on_store_change(&mut self, change: &StoreChange) {
        match change.key.as_str() {
            LAST_ACTIVITY_KEY => {
                if let Some(at) = parse_timestamp(change.value.as_deref()) {
                    self.last_activity = self.last_activity.max(at);
                    self.last_persisted_activity = at;
                }
            }
            SESSION_START_KEY => {
                if let Some(at) = parse_timestamp(change.value.as_deref()) {
                    self.session_start = at;
                }
            }
            LOGOUT_EVENT_KEY => {
                if change.value.is_some() {
                    self.trigger_logout(LogoutReason::CrossTab);
                }
            }
            _ => {}
        }
    }

    /// Becoming visible both re-checks expiry and counts as activity;
    /// going hidden only re-checks (a backgrounded window must not keep
    /// itself alive).
    pub fn visibility_changed(&mut self, visible: bool) {
        self.check_session();
        if visible && !self.logging_out {
            self.mark_activity();
        }
    }

    pub fn focus_gained(&mut self) {
        self.visibility_changed(true);
    }

    pub fn focus_lost(&mut self) {
        self.check_session();
    }

    pub fn is_logging_out(&self) -> bool {
        self.logging_out
    }

    /// One-shot per mount: write the logout-event broadcast, then request
    /// the external logout. Re-entry (including our own broadcast echoing
    /// back) is a no-op.
    fn trigger_logout(&mut self, reason: LogoutReason) {
        if self.logging_out {
            return;
        }
        self.logging_out = true;
        info!(?reason, "session expired, requesting logout");
        let event = LogoutEvent {
            at: self.clock.now_ms(),
            reason,
        };
        if let Ok(json) = serde_json::to_string(&event) {
            self.store.set(LOGOUT_EVENT_KEY, &json);
        }
        self.logout.request_logout(reason);
    }
}

/// UI signals a console window forwards into its monitor.
#[derive(Debug, Clone, Copy)]
pub enum UiSignal {
    /// Pointer movement, pointer press, key press, scroll, touch start.
    Activity,
    FocusGained,
    FocusLost,
    VisibilityChanged(bool),
}

/// Async driver: periodic checks, store-change subscription, UI signals.
/// Dropping it removes every listener and stops the timer.
pub struct SessionMonitor {
    signals: mpsc::UnboundedSender<UiSignal>,
    task: Option<JoinHandle<()>>,
}

impl SessionMonitor {
    /// Mount with the real wall clock.
    pub fn mount(store: Arc<dyn SharedStore>, logout: Arc<dyn LogoutHandler>) -> Option<Self> {
        Self::mount_with_clock(store, Arc::new(SystemClock), logout)
    }

    /// Mount with an explicit clock. Returns `None` without an auth
    /// token. If the session is already expired at mount, the immediate
    /// check has logged out and nothing is armed.
    pub fn mount_with_clock(
        store: Arc<dyn SharedStore>,
        clock: Arc<dyn Clock>,
        logout: Arc<dyn LogoutHandler>,
    ) -> Option<Self> {
        // Subscribe before mounting so no change can slip between the
        // tracker's initial read and the task picking up the receiver.
        let mut changes = store.subscribe();
        let mut tracker = SessionTracker::mount(store, clock, logout)?;
        let (signals, mut rx) = mpsc::unbounded_channel();

        if tracker.is_logging_out() {
            return Some(Self {
                signals,
                task: None,
            });
        }

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CHECK_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // Consume the interval's immediate first tick; the mount-time
            // check already ran.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => tracker.check_session(),
                    change = changes.recv() => match change {
                        Ok(change) => tracker.on_store_change(&change),
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    signal = rx.recv() => match signal {
                        Some(UiSignal::Activity) => tracker.mark_activity(),
                        Some(UiSignal::FocusGained) => tracker.focus_gained(),
                        Some(UiSignal::FocusLost) => tracker.focus_lost(),
                        Some(UiSignal::VisibilityChanged(visible)) => {
                            tracker.visibility_changed(visible);
                        }
                        None => break,
                    },
                }
            }
        });

        Some(Self {
            signals,
            task: Some(task),
        })
    }

    /// Forward a UI signal. Cheap enough to call from raw input events.
    pub fn signal(&self, signal: UiSignal) {
        let _ = self.signals.send(signal);
    }

    pub fn activity(&self) {
        self.signal(UiSignal::Activity);
    }
}

impl Drop for SessionMonitor {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logout_reason_wire_format() {
        // The reason strings are the cross-tab wire format; other consoles
        // parse them.
        assert_eq!(
            serde_json::to_string(&LogoutReason::CrossTab).unwrap(),
            "\"cross-tab\""
        );
        assert_eq!(
            serde_json::to_string(&LogoutReason::Idle).unwrap(),
            "\"idle\""
        );
        assert_eq!(
            serde_json::to_string(&LogoutReason::Absolute).unwrap(),
            "\"absolute\""
        );
    }

    #[test]
    fn test_logout_event_roundtrip() {
        let event: LogoutEvent =
            serde_json::from_str("{\"at\":1700000000000,\"reason\":\"cross-tab\"}").unwrap();
        assert_eq!(event.at, 1_700_000_000_000);
        assert_eq!(event.reason, LogoutReason::CrossTab);
    }
}
