//! Study selection and scoring.

use std::time::Duration;

use crate::db::{self, Store};
use crate::error::{Result, StoreError};
use crate::keys::{self, PHRASES, STUDYTIMES};
use crate::schedule;
use crate::types::{ChatId, Phrase, Study};

impl Store {
    /// The study the chat should answer next.
    pub fn get_study(&self, chat_id: ChatId) -> Result<Study> {
        let now = self.now();
        let conn = self.lock();

        let mut earliest: Option<(i64, Vec<u8>)> = None;
        let mut total = 0;
        for (k, v) in db::scan_prefix(&conn, STUDYTIMES, &keys::chat_key(chat_id))? {
            let t = keys::decode_i64(STUDYTIMES, &v)?;
            if earliest.as_ref().map_or(true, |(et, _)| t < *et) {
                earliest = Some((t, k));
            }
            if t <= now {
                total += 1;
            }
        }

        let Some((key_time, key)) = earliest else {
            return Ok(Study::Empty);
        };
        if total == 0 {
            let next = Duration::from_secs(key_time.saturating_sub(now).max(0) as u64);
            return Ok(Study::Waiting { next });
        }

        let raw = db::get(&conn, PHRASES, &key)?.ok_or(StoreError::Missing(PHRASES))?;
        let p: Phrase = serde_json::from_slice(&raw)?;
        Ok(Study::Due {
            phrase: p.phrase,
            explanation: p.explanation,
            total,
        })
    }

    /// Score the current study and schedule its next review.
    ///
    /// `delta` is added to the phrase score, which never drops below zero.
    /// The next due-time is `base_study_time << score` plus random diffusion.
    /// Returns the new score.
    pub fn score_study(&self, chat_id: ChatId, delta: i64) -> Result<i64> {
        let now = self.now();
        self.write(|conn| {
            let key = db::due_key(conn, chat_id, now)?.ok_or(StoreError::NoStudyDue)?;

            let raw = db::get(conn, PHRASES, &key)?.ok_or(StoreError::Missing(PHRASES))?;
            let mut p: Phrase = serde_json::from_slice(&raw)?;
            p.score = p.score.saturating_add(delta).max(0);
            db::put(conn, PHRASES, &key, &serde_json::to_vec(&p)?)?;

            let next = schedule::next_due(self.config(), now, p.score, &mut rand::thread_rng());
            db::put(conn, STUDYTIMES, &key, &keys::encode_i64(next))?;

            tracing::debug!(chat_id, score = p.score, next, "Scored study");
            Ok(p.score)
        })
    }

    /// Time until the chat is worth notifying, and how many studies are due then.
    ///
    /// A count of zero means the chat has no phrases.
    pub fn get_notify_time(&self, chat_id: ChatId) -> Result<(Duration, usize)> {
        let now = self.now();
        let times = self.due_times(chat_id)?;
        Ok(schedule::notify_time(self.config(), now, times))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::Config;

    const T: i64 = 1_700_000_000;
    const HOUR: i64 = 3600;
    const DIFFUSION: i64 = 30 * 60;

    fn store() -> (Store, ManualClock) {
        let clock = ManualClock::new(T);
        let store = Store::open_memory(Config::default())
            .unwrap()
            .with_clock(clock.clone());
        (store, clock)
    }

    fn hours(h: i64) -> Duration {
        Duration::from_secs((h * HOUR) as u64)
    }

    #[test]
    fn test_get_study_empty_and_waiting() {
        let (store, clock) = store();
        assert_eq!(store.get_study(1).unwrap(), Study::Empty);

        store.add_phrase(1, "Hola", "Hello").unwrap();
        assert_eq!(store.get_study(1).unwrap(), Study::Waiting { next: hours(2) });

        clock.advance(hours(1));
        assert_eq!(store.get_study(1).unwrap(), Study::Waiting { next: hours(1) });
    }

    #[test]
    fn test_get_study_counts_due() {
        let (store, clock) = store();
        store.add_phrase(1, "uno", "one").unwrap();
        store.add_phrase(1, "dos", "two").unwrap();
        store.add_phrase(2, "tres", "three").unwrap();
        clock.advance(hours(2));

        let study = store.get_study(1).unwrap();
        assert_eq!(
            study,
            Study::Due {
                phrase: "uno".into(),
                explanation: "one".into(),
                total: 2,
            }
        );
        assert_eq!(study.total(), 2);
    }

    #[test]
    fn test_score_study_none_due() {
        let (store, _) = store();
        assert!(store.score_study(1, 1).unwrap_err().is_not_found());
        store.add_phrase(1, "a", "b").unwrap();
        assert!(matches!(store.score_study(1, 1), Err(StoreError::NoStudyDue)));
    }

    #[test]
    fn test_end_to_end_hola() {
        let (store, clock) = store();
        store.add_phrase(1, "Hola", "Hello").unwrap();
        assert_eq!(store.due_times(1).unwrap(), vec![T + 2 * HOUR]);
        assert_eq!(store.phrases(1).unwrap()[0].score, 0);

        clock.advance(hours(3));
        assert_eq!(store.score_study(1, 1).unwrap(), 1);
        let next = store.due_times(1).unwrap()[0];
        let scored_at = T + 3 * HOUR;
        assert!(next >= scored_at + 12 * HOUR && next < scored_at + 12 * HOUR + DIFFUSION);
        assert_eq!(store.phrases(1).unwrap()[0].score, 1);

        // Not due again until the new time
        assert!(store.score_study(1, -1).unwrap_err().is_not_found());

        clock.set(next);
        assert_eq!(store.score_study(1, -1).unwrap(), 0);
        let again = store.due_times(1).unwrap()[0];
        assert!(again >= next + 6 * HOUR && again < next + 6 * HOUR + DIFFUSION);
    }

    #[test]
    fn test_score_never_negative() {
        let (store, clock) = store();
        store.add_phrase(1, "a", "b").unwrap();
        for _ in 0..5 {
            clock.set(store.due_times(1).unwrap()[0]);
            assert_eq!(store.score_study(1, -1).unwrap(), 0);
        }
        assert_eq!(store.phrases(1).unwrap()[0].score, 0);

        // Recovery starts from zero, not from a hidden negative balance
        clock.set(store.due_times(1).unwrap()[0]);
        assert_eq!(store.score_study(1, 1).unwrap(), 1);
    }

    #[test]
    fn test_backoff_doubles_with_score() {
        let (store, clock) = store();
        store.add_phrase(1, "a", "b").unwrap();
        let mut prev_interval = None;
        for score in 1..=5 {
            let now = store.due_times(1).unwrap()[0];
            clock.set(now);
            assert_eq!(store.score_study(1, 1).unwrap(), score);
            let interval = store.due_times(1).unwrap()[0] - now;
            if let Some(prev) = prev_interval {
                let base = 6 * HOUR << (score - 1);
                assert!(prev >= base && prev < base + DIFFUSION);
                assert!(interval >= 2 * base && interval < 2 * base + DIFFUSION);
            }
            prev_interval = Some(interval);
        }
    }

    #[test]
    fn test_get_notify_time_small_chat() {
        let (store, clock) = store();
        assert_eq!(store.get_notify_time(1).unwrap().1, 0);

        store.add_phrase(1, "a", "b").unwrap();
        let (d, n) = store.get_notify_time(1).unwrap();
        assert_eq!((d, n), (hours(2), 1));

        clock.advance(hours(2));
        let (d, n) = store.get_notify_time(1).unwrap();
        assert_eq!((d, n), (store.config().due_min_inactive, 1));
    }

    #[test]
    fn test_get_notify_time_waits_for_batch() {
        let (store, clock) = store();
        for i in 0..12 {
            store.add_phrase(1, &format!("p{i}"), "e").unwrap();
        }
        clock.advance(hours(2));
        // Score a few so they move out by six hours
        for _ in 0..4 {
            store.score_study(1, 0).unwrap();
        }
        // 8 due, 4 pending: the 9th earliest decides
        let (d, n) = store.get_notify_time(1).unwrap();
        assert_eq!(n, 9);
        assert!(d >= hours(6) && d < hours(6) + Duration::from_secs(DIFFUSION as u64));

        store.study_now().unwrap();
        let (d, n) = store.get_notify_time(1).unwrap();
        assert_eq!((d, n), (store.config().due_min_inactive, 12));
    }

    #[test]
    fn test_corrupt_due_time_is_typed_error() {
        let (store, clock) = store();
        store.add_phrase(1, "a", "b").unwrap();
        clock.advance(hours(2));
        {
            let conn = store.lock();
            db::put(&conn, STUDYTIMES, &keys::phrase_key(1, 1), b"xx").unwrap();
        }

        for err in [
            store.get_study(1).unwrap_err(),
            store.score_study(1, 1).unwrap_err(),
            store.get_notify_time(1).unwrap_err(),
        ] {
            assert!(matches!(
                err,
                StoreError::CorruptValue {
                    bucket: STUDYTIMES,
                    len: 2
                }
            ));
            assert!(!err.is_not_found());
        }
        // Failed score left the phrase untouched
        assert_eq!(store.phrases(1).unwrap()[0].score, 0);
    }
}
