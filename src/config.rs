use std::time::Duration;

/// Scheduler and store settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// Delay before a newly added phrase is first due.
    pub first_study_time: Duration,
    /// Base review interval; shifted left by the phrase score.
    pub base_study_time: Duration,
    /// Exclusive upper bound of the random jitter added to review times.
    /// Jitter is drawn in whole minutes.
    pub study_time_diffusion: Duration,
    /// Zero-score phrases a chat may receive per day before new
    /// phrases slip by whole days.
    pub new_per_day: usize,
    /// Due studies needed before a chat is worth notifying.
    pub due_min_count: usize,
    /// Time a user must be inactive before being notified.
    pub due_min_inactive: Duration,
    /// How long to wait on a locked database before failing.
    pub busy_timeout: Duration,
    /// Global notification switch.
    pub notify: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            first_study_time: Duration::from_secs(2 * 3600),
            base_study_time: Duration::from_secs(6 * 3600),
            study_time_diffusion: Duration::from_secs(30 * 60),
            new_per_day: 30,
            due_min_count: 9,
            due_min_inactive: Duration::from_secs(10 * 60),
            busy_timeout: Duration::from_secs(1),
            notify: true,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_per_day(mut self, n: usize) -> Self {
        self.new_per_day = n.max(1);
        self
    }

    pub fn due_min_count(mut self, n: usize) -> Self {
        self.due_min_count = n.max(1);
        self
    }

    pub fn due_min_inactive(mut self, d: Duration) -> Self {
        self.due_min_inactive = d;
        self
    }

    /// Inactivity floor in whole minutes, saturating on overflow.
    pub fn due_min_inactive_minutes(self, minutes: u64) -> Self {
        self.due_min_inactive(Duration::from_secs(minutes.saturating_mul(60)))
    }

    pub fn notify(mut self, enabled: bool) -> Self {
        self.notify = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inactive_minutes() {
        let cfg = Config::new().due_min_inactive_minutes(15);
        assert_eq!(cfg.due_min_inactive, Duration::from_secs(900));

        let cfg = Config::new().due_min_inactive_minutes(u64::MAX);
        assert_eq!(cfg.due_min_inactive, Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_counts_never_zero() {
        let cfg = Config::new().new_per_day(0).due_min_count(0);
        assert_eq!(cfg.new_per_day, 1);
        assert_eq!(cfg.due_min_count, 1);
    }
}
