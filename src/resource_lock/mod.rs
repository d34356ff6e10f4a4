//! ResourceLock - per-camera exclusive access
//!
//! ## Purpose
//!
//! - One lock per physical camera kind (`rgb` 2D camera, `rs` depth camera)
//! - Non-blocking, reentrant acquisition by the owning worker
//! - Grace delay after the final release so the driver can let go of the device
//!
//! The "free" signal for a camera is only observable by successfully opening
//! it again, so waiting is a coarse poll (`poll_free`) rather than wait/notify.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::worker::WorkerId;

/// Default grace after the final release (driver teardown latency)
pub const DEFAULT_RELEASE_GRACE_MS: u64 = 200;

/// Physical camera resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// 2D RGB camera (V4L2)
    Rgb,
    /// 3D depth camera (RealSense)
    Rs,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 2] = [ResourceKind::Rgb, ResourceKind::Rs];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rgb => "rgb",
            Self::Rs => "rs",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rgb" => Ok(Self::Rgb),
            "rs" => Ok(Self::Rs),
            other => Err(format!("unknown resource kind '{}'", other)),
        }
    }
}

#[derive(Debug, Default)]
struct LockState {
    holder: Option<WorkerId>,
    depth: u32,
    /// Set on the final release; the lock reads as busy until this instant
    settle_until: Option<Instant>,
}

impl LockState {
    fn is_free(&self, now: Instant) -> bool {
        self.holder.is_none() && self.settle_until.map_or(true, |t| now >= t)
    }
}

/// Lock state view for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct LockSnapshot {
    pub kind: ResourceKind,
    pub free: bool,
    pub holder: Option<WorkerId>,
    pub depth: u32,
}

/// ResourceLock - exclusive access to one camera kind
#[derive(Debug)]
pub struct ResourceLock {
    kind: ResourceKind,
    grace: Duration,
    state: Mutex<LockState>,
}

impl ResourceLock {
    /// Create with the default release grace
    pub fn new(kind: ResourceKind) -> Self {
        Self::with_grace(kind, Duration::from_millis(DEFAULT_RELEASE_GRACE_MS))
    }

    /// Create with an explicit release grace
    pub fn with_grace(kind: ResourceKind, grace: Duration) -> Self {
        Self {
            kind,
            grace,
            state: Mutex::new(LockState::default()),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Try to take the lock for `owner` (no waiting)
    ///
    /// - Unheld and settled: `owner` becomes the holder
    /// - Already held by `owner`: reentrant, depth increments
    /// - Otherwise (other holder, or still inside the release grace): fails
    pub fn try_acquire(&self, owner: WorkerId) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();

        match state.holder {
            Some(holder) if holder == owner => {
                state.depth += 1;
                tracing::trace!(kind = %self.kind, owner = %owner, depth = state.depth, "Camera lock re-entered");
                true
            }
            Some(holder) => {
                tracing::debug!(kind = %self.kind, owner = %owner, holder = %holder, "Camera lock busy");
                false
            }
            None if !state.is_free(now) => {
                tracing::debug!(kind = %self.kind, owner = %owner, "Camera lock still settling");
                false
            }
            None => {
                state.holder = Some(owner);
                state.depth = 1;
                state.settle_until = None;
                tracing::debug!(kind = %self.kind, owner = %owner, "Camera lock acquired");
                true
            }
        }
    }

    /// Release one level held by `owner`
    ///
    /// On the final release the caller is suspended for the grace period, and
    /// the lock keeps reading as busy until the grace has elapsed. Releasing a
    /// lock not held by `owner` is a no-op. Returns true on the final release.
    pub async fn release(&self, owner: WorkerId) -> bool {
        let fully_released = {
            let mut state = self.state.lock();
            match state.holder {
                Some(holder) if holder == owner => {
                    state.depth = state.depth.saturating_sub(1);
                    if state.depth == 0 {
                        state.holder = None;
                        state.settle_until = Some(Instant::now() + self.grace);
                        true
                    } else {
                        false
                    }
                }
                other => {
                    tracing::debug!(
                        kind = %self.kind,
                        owner = %owner,
                        holder = ?other,
                        "Release ignored: lock not held by caller"
                    );
                    return false;
                }
            }
        };

        if fully_released {
            tracing::debug!(kind = %self.kind, owner = %owner, grace_ms = self.grace.as_millis() as u64, "Camera lock released");
            tokio::time::sleep(self.grace).await;
        }
        fully_released
    }

    /// Probe without taking ownership
    pub fn is_free(&self) -> bool {
        self.state.lock().is_free(Instant::now())
    }

    /// Current holder, if any
    pub fn holder(&self) -> Option<WorkerId> {
        self.state.lock().holder
    }

    /// Whether `owner` currently holds the lock
    pub fn is_held_by(&self, owner: WorkerId) -> bool {
        self.state.lock().holder == Some(owner)
    }

    /// Poll every `step` until the lock reads free or `timeout` elapses
    pub async fn poll_free(&self, timeout: Duration, step: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_free() {
                return true;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return self.is_free();
            }
            tokio::time::sleep(step.min(deadline - now)).await;
        }
    }

    pub fn snapshot(&self) -> LockSnapshot {
        let state = self.state.lock();
        LockSnapshot {
            kind: self.kind,
            free: state.is_free(Instant::now()),
            holder: state.holder,
            depth: state.depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn lock(grace_ms: u64) -> ResourceLock {
        ResourceLock::with_grace(ResourceKind::Rgb, Duration::from_millis(grace_ms))
    }

    #[tokio::test]
    async fn test_acquire_release() {
        let lock = lock(10);

        assert!(lock.try_acquire(WorkerId::Counter));
        assert_eq!(lock.holder(), Some(WorkerId::Counter));
        assert!(!lock.is_free());

        assert!(lock.release(WorkerId::Counter).await);
        assert!(lock.is_free());
        assert!(lock.try_acquire(WorkerId::ControlUnphysics));
    }

    #[tokio::test]
    async fn test_other_owner_rejected() {
        let lock = lock(10);

        assert!(lock.try_acquire(WorkerId::Counter));
        assert!(!lock.try_acquire(WorkerId::TagData));
        assert_eq!(lock.holder(), Some(WorkerId::Counter));
    }

    #[tokio::test]
    async fn test_reentrant_same_owner() {
        let lock = lock(10);

        assert!(lock.try_acquire(WorkerId::Counter));
        assert!(lock.try_acquire(WorkerId::Counter));
        assert_eq!(lock.snapshot().depth, 2);

        // first release only drops one level
        assert!(!lock.release(WorkerId::Counter).await);
        assert!(lock.is_held_by(WorkerId::Counter));

        assert!(lock.release(WorkerId::Counter).await);
        assert!(lock.is_free());
    }

    #[tokio::test]
    async fn test_release_by_non_holder_is_noop() {
        let lock = lock(10);

        assert!(!lock.release(WorkerId::Counter).await);

        assert!(lock.try_acquire(WorkerId::Counter));
        assert!(!lock.release(WorkerId::FollowMe).await);
        assert!(lock.is_held_by(WorkerId::Counter));
    }

    #[tokio::test]
    async fn test_release_waits_for_grace() {
        let lock = lock(60);
        assert!(lock.try_acquire(WorkerId::Counter));

        let started = Instant::now();
        lock.release(WorkerId::Counter).await;
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_poll_free_not_before_grace() {
        let lock = Arc::new(lock(150));
        assert!(lock.try_acquire(WorkerId::Counter));

        let releasing = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.release(WorkerId::Counter).await })
        };

        // the holder is gone almost immediately, but the grace keeps it busy
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(lock.holder().is_none());
        assert!(!lock.is_free());
        assert!(!lock.try_acquire(WorkerId::TagData));

        let polled_at = Instant::now();
        assert!(lock.poll_free(Duration::from_secs(2), Duration::from_millis(5)).await);
        assert!(polled_at.elapsed() >= Duration::from_millis(100));

        assert!(releasing.await.unwrap());
    }

    #[tokio::test]
    async fn test_poll_free_timeout() {
        let lock = lock(10);
        assert!(lock.try_acquire(WorkerId::FollowMe));

        let free = lock
            .poll_free(Duration::from_millis(50), Duration::from_millis(10))
            .await;
        assert!(!free);
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("RGB".parse::<ResourceKind>().unwrap(), ResourceKind::Rgb);
        assert_eq!(" rs ".parse::<ResourceKind>().unwrap(), ResourceKind::Rs);
        assert!("ir".parse::<ResourceKind>().is_err());
        assert_eq!(serde_json::to_string(&ResourceKind::Rs).unwrap(), "\"rs\"");
    }
}
