//! Due-time arithmetic.
//!
//! All times are Unix seconds. Nothing here touches the store.

use std::collections::BinaryHeap;
use std::time::Duration;

use rand::Rng;

use crate::config::Config;

const DAY: i64 = 24 * 3600;

fn secs(d: Duration) -> i64 {
    i64::try_from(d.as_secs()).unwrap_or(i64::MAX)
}

/// First due-time of a phrase added at `now` to a chat that already holds
/// `new_phrases` zero-score phrases.
///
/// Every `new_per_day` fresh phrases push the first review back one day.
pub fn initial_due(cfg: &Config, now: i64, new_phrases: usize) -> i64 {
    let days = (new_phrases / cfg.new_per_day.max(1)) as i64;
    now.saturating_add(secs(cfg.first_study_time))
        .saturating_add(days.saturating_mul(DAY))
}

/// Review interval for a score: `base_study_time << score`, saturating.
pub fn backoff(cfg: &Config, score: i64) -> i64 {
    let base = secs(cfg.base_study_time);
    let shift = score.clamp(0, 62) as u32;
    base.saturating_mul(1i64 << shift)
}

/// Random jitter in whole minutes, in `[0, study_time_diffusion)`.
pub fn diffusion<R: Rng + ?Sized>(cfg: &Config, rng: &mut R) -> i64 {
    let minutes = secs(cfg.study_time_diffusion) / 60;
    if minutes <= 0 {
        return 0;
    }
    rng.gen_range(0..minutes) * 60
}

/// Next due-time after a study scored at `now` left the phrase at `score`.
pub fn next_due<R: Rng + ?Sized>(cfg: &Config, now: i64, score: i64, rng: &mut R) -> i64 {
    now.saturating_add(backoff(cfg, score))
        .saturating_add(diffusion(cfg, rng))
}

/// The `k` smallest due-times seen so far.
///
/// Backed by a max-heap capped at `k`: a new candidate only enters by
/// evicting the current maximum.
#[derive(Debug)]
pub struct DueSet {
    cap: usize,
    heap: BinaryHeap<i64>,
}

impl DueSet {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            heap: BinaryHeap::with_capacity(cap),
        }
    }

    pub fn push(&mut self, t: i64) {
        if self.heap.len() < self.cap {
            self.heap.push(t);
            return;
        }
        if let Some(mut top) = self.heap.peek_mut() {
            if t < *top {
                *top = t;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Largest of the kept due-times, i.e. the k-th smallest overall.
    pub fn kth(&self) -> Option<i64> {
        self.heap.peek().copied()
    }
}

/// Time until a chat is worth notifying and the number of studies then due.
///
/// If at least `min(due_min_count, seen)` studies fall due within the
/// inactivity floor, the answer is the floor itself. Otherwise it is the
/// wait until the k-th earliest due-time, with `k = min(due_min_count, seen)`.
/// A chat without phrases yields a count of zero.
pub fn notify_time<I>(cfg: &Config, now: i64, due_times: I) -> (Duration, usize)
where
    I: IntoIterator<Item = i64>,
{
    let min_time = now.saturating_add(secs(cfg.due_min_inactive));
    let mut due = 0;
    let mut next = DueSet::new(cfg.due_min_count);

    for t in due_times {
        if t < min_time {
            due += 1;
        }
        next.push(t);
    }

    if due >= next.len() {
        return (cfg.due_min_inactive, due);
    }

    let wait = next.kth().map_or(0, |t| t.saturating_sub(now)).max(0);
    (Duration::from_secs(wait as u64), next.len())
}
