use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use tracing::debug;

use crate::{domain::ScopeKey, errors::Error, Result};

// ============== Cooldown Windows ==============

#[derive(Clone, Copy, Debug)]
struct RateWindow {
    last_allowed: Instant,
    cooldown: Duration,
}

/// Request-admission gate keyed by user or by (group, user).
///
/// A request is allowed iff `now - last_allowed >= cooldown`; an allowed
/// request resets the window immediately. State is in-memory only.
#[derive(Clone, Debug, Default)]
pub struct RateLimiter {
    windows: HashMap<ScopeKey, RateWindow>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `(allowed, remaining_secs)`; `remaining_secs` is 0 when allowed.
    pub fn check(&mut self, key: &ScopeKey, cooldown: Duration) -> (bool, f64) {
        self.check_at(key, cooldown, Instant::now())
    }

    pub fn check_at(&mut self, key: &ScopeKey, cooldown: Duration, now: Instant) -> (bool, f64) {
        if let Some(w) = self.windows.get_mut(key) {
            let elapsed = now.saturating_duration_since(w.last_allowed);
            if elapsed < cooldown {
                let remaining = (cooldown - elapsed).as_secs_f64();
                return (false, remaining);
            }
            w.last_allowed = now;
            w.cooldown = cooldown;
            return (true, 0.0);
        }

        self.windows.insert(
            key.clone(),
            RateWindow {
                last_allowed: now,
                cooldown,
            },
        );
        (true, 0.0)
    }

    /// Like [`check`](Self::check) but as a `Result` for `?` chains.
    pub fn admit(&mut self, key: &ScopeKey, cooldown: Duration) -> Result<()> {
        self.admit_at(key, cooldown, Instant::now())
    }

    pub fn admit_at(&mut self, key: &ScopeKey, cooldown: Duration, now: Instant) -> Result<()> {
        match self.check_at(key, cooldown, now) {
            (true, _) => Ok(()),
            (false, remaining_secs) => Err(Error::RateLimited { remaining_secs }),
        }
    }

    /// Drop windows idle for longer than `retention` (or their own cooldown,
    /// whichever is larger). Returns the number removed.
    pub fn purge_stale(&mut self, retention: Duration) -> usize {
        self.purge_stale_at(retention, Instant::now())
    }

    pub fn purge_stale_at(&mut self, retention: Duration, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, w| {
            now.saturating_duration_since(w.last_allowed) < retention.max(w.cooldown)
        });
        let removed = before - self.windows.len();
        if removed > 0 {
            debug!(removed, remaining = self.windows.len(), "purged idle rate windows");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Caller, UserKey};

    fn user(id: &str) -> ScopeKey {
        ScopeKey::User(UserKey::new("qq", id))
    }

    #[test]
    fn second_immediate_check_is_denied_with_full_cooldown() {
        let start = Instant::now();
        let mut rl = RateLimiter::new();
        let cd = Duration::from_secs(3);

        assert_eq!(rl.check_at(&user("1"), cd, start), (true, 0.0));
        let (ok, remaining) = rl.check_at(&user("1"), cd, start);
        assert!(!ok);
        assert!((remaining - 3.0).abs() < 1e-9);
    }

    #[test]
    fn allows_exactly_at_cooldown_and_resets_window() {
        let start = Instant::now();
        let mut rl = RateLimiter::new();
        let cd = Duration::from_secs(3);
        let k = user("1");

        assert!(rl.check_at(&k, cd, start).0);
        let (ok, remaining) = rl.check_at(&k, cd, start + Duration::from_secs(2));
        assert!(!ok);
        assert!((remaining - 1.0).abs() < 1e-9);

        // Denied checks do not move the window.
        assert!(rl.check_at(&k, cd, start + Duration::from_secs(3)).0);
        assert!(!rl.check_at(&k, cd, start + Duration::from_secs(5)).0);
        assert!(rl.check_at(&k, cd, start + Duration::from_secs(6)).0);
    }

    #[test]
    fn private_and_group_scopes_are_independent() {
        let start = Instant::now();
        let mut rl = RateLimiter::new();
        let cd = Duration::from_secs(10);
        let private = Caller::private("qq", "1").scope();
        let group = Caller::in_group("qq", "g", "1").scope();
        let other_group = Caller::in_group("qq", "h", "1").scope();

        assert!(rl.check_at(&private, cd, start).0);
        assert!(rl.check_at(&group, cd, start).0);
        assert!(rl.check_at(&other_group, cd, start).0);
        assert!(!rl.check_at(&group, cd, start).0);
        assert_eq!(rl.len(), 3);
    }

    #[test]
    fn admit_reports_remaining_seconds() {
        let start = Instant::now();
        let mut rl = RateLimiter::new();
        let cd = Duration::from_millis(2500);
        rl.admit_at(&user("9"), cd, start).unwrap();
        let err = rl
            .admit_at(&user("9"), cd, start + Duration::from_millis(500))
            .unwrap_err();
        assert!(matches!(err, Error::RateLimited { remaining_secs } if (remaining_secs - 2.0).abs() < 1e-9));
    }

    #[test]
    fn purge_drops_only_idle_windows() {
        let start = Instant::now();
        let mut rl = RateLimiter::new();
        let cd = Duration::from_secs(3);
        rl.check_at(&user("old"), cd, start);
        rl.check_at(&user("new"), cd, start + Duration::from_secs(200));
        // A cooldown longer than retention keeps its window alive.
        rl.check_at(&user("slow"), Duration::from_secs(600), start);

        let removed = rl.purge_stale_at(Duration::from_secs(250), start + Duration::from_secs(260));
        assert_eq!(removed, 1);
        assert_eq!(rl.len(), 2);
        assert!(!rl.check_at(&user("slow"), Duration::from_secs(600), start + Duration::from_secs(261)).0);
        assert!(rl.check_at(&user("old"), cd, start + Duration::from_secs(261)).0);
    }
}
