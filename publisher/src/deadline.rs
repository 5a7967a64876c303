use std::{thread, time};

/// Upper bound on a single publish run.
pub const RUN_TIMEOUT: time::Duration = time::Duration::from_secs(60 * 60);

/// Time granted to cleanup that runs after the run deadline may have passed.
pub const CLEANUP_TIMEOUT: time::Duration = time::Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct Deadline(time::Instant);

impl Deadline {
    /// Create a new deadline that times out after the provided duration.
    pub fn after(timeout: time::Duration) -> Self {
        Self(time::Instant::now() + timeout)
    }

    pub fn is_expired(&self) -> bool {
        time::Instant::now() >= self.0
    }

    /// If there is enough time to sleep before the deadline, sleeps and returns
    /// Ok. Otherwise, returns Err.
    pub fn sleep(&self, duration: time::Duration) -> Result<(), ()> {
        if time::Instant::now() + duration < self.0 {
            thread::sleep(duration);
            Ok(())
        } else {
            Err(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_deadline_is_expired() {
        let deadline = Deadline::after(time::Duration::ZERO);
        assert!(deadline.is_expired());
        assert!(deadline.sleep(time::Duration::from_millis(1)).is_err());
    }

    #[test]
    fn far_deadline_allows_sleeping() {
        let deadline = Deadline::after(time::Duration::from_secs(60));
        assert!(!deadline.is_expired());
        assert!(deadline.sleep(time::Duration::from_millis(1)).is_ok());
    }
}
