//! Per-user daily generation limit.
//!
//! A window opens with a user's first generation and lasts 24 hours; up to
//! `limit` stories may be generated inside it. State is in-process.
//!
//! A generation holds a [`Reservation`] while it runs, so concurrent
//! requests from one user cannot overshoot the limit. Dropping the
//! reservation without committing it gives the slot back.

use crate::store::UserId;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Length of one quota window.
pub const WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: DateTime<Utc>,
    /// Committed plus in-flight generations.
    used: u32,
}

/// The user has used up the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaExhausted {
    pub used: u32,
    pub next_reset: DateTime<Utc>,
}

/// Tracks generations per user.
#[derive(Debug)]
pub struct GenerationQuota {
    limit: u32,
    windows: Mutex<HashMap<UserId, Window>>,
}

impl GenerationQuota {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    fn windows(&self) -> MutexGuard<'_, HashMap<UserId, Window>> {
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Slots left in the user's window, without taking one.
    pub fn check(&self, user: UserId, now: DateTime<Utc>) -> Result<u32, QuotaExhausted> {
        let windows = self.windows();
        match windows.get(&user).filter(|w| !expired(w, now)) {
            Some(window) if window.used >= self.limit => Err(QuotaExhausted {
                used: window.used,
                next_reset: window.started + Duration::hours(WINDOW_HOURS),
            }),
            Some(window) => Ok(self.limit - window.used),
            None => Ok(self.limit),
        }
    }

    /// Take a slot for one generation.
    ///
    /// The slot counts against the limit immediately. Call
    /// [`Reservation::commit`] once the story is stored; otherwise the slot
    /// is returned when the reservation is dropped.
    pub fn reserve(
        &self,
        user: UserId,
        now: DateTime<Utc>,
    ) -> Result<Reservation<'_>, QuotaExhausted> {
        let mut windows = self.windows();
        let window = windows.entry(user).or_insert(Window {
            started: now,
            used: 0,
        });
        if expired(window, now) {
            *window = Window {
                started: now,
                used: 0,
            };
        }
        if window.used >= self.limit {
            return Err(QuotaExhausted {
                used: window.used,
                next_reset: window.started + Duration::hours(WINDOW_HOURS),
            });
        }
        window.used += 1;

        Ok(Reservation {
            quota: self,
            user,
            window_started: window.started,
            remaining: self.limit - window.used,
            committed: false,
        })
    }

    fn release(&self, user: UserId, window_started: DateTime<Utc>) {
        let mut windows = self.windows();
        // A window that has since rolled over no longer holds the slot.
        if let Some(window) = windows
            .get_mut(&user)
            .filter(|w| w.started == window_started)
        {
            window.used = window.used.saturating_sub(1);
        }
    }
}

/// A quota slot held by an in-flight generation.
#[derive(Debug)]
#[must_use = "dropping a reservation releases the slot"]
pub struct Reservation<'a> {
    quota: &'a GenerationQuota,
    user: UserId,
    window_started: DateTime<Utc>,
    remaining: u32,
    committed: bool,
}

impl Reservation<'_> {
    /// Keep the slot. Returns how many remain in the window.
    pub fn commit(mut self) -> u32 {
        self.committed = true;
        self.remaining
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.quota.release(self.user, self.window_started);
        }
    }
}

fn expired(window: &Window, now: DateTime<Utc>) -> bool {
    now >= window.started + Duration::hours(WINDOW_HOURS)
}
