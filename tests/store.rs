//! On-disk behaviour of the store.
//!
//! Run with: cargo test --test store

use std::sync::Arc;
use std::thread;

use studylite::{Config, ManualClock, Mode, Store, Study};

const T: i64 = 1_700_000_000;

fn open(path: &std::path::Path) -> Store {
    Store::open(path, Config::default())
        .unwrap()
        .with_clock(ManualClock::new(T))
}

#[test]
fn test_reopen_keeps_records_and_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("study.db");

    {
        let store = open(&path);
        store.add_phrase(1, "Hola", "Hello").unwrap();
        store.add_phrase(1, "Adios", "Bye").unwrap();
        store.set_mode(1, Mode::Add).unwrap();
        store.subscribe(1).unwrap();
        store.study_now().unwrap();
        store.delete_study_phrase(1).unwrap();
    }

    let store = open(&path);
    assert_eq!(store.get_mode(1).unwrap(), Mode::Add);
    assert!(store.is_subscribed(1).unwrap());
    assert_eq!(store.phrases(1).unwrap().len(), 1);

    store.add_phrase(1, "Gracias", "Thanks").unwrap();
    let export = store.export_phrases(1).unwrap();
    let lines: Vec<&str> = export.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[1].contains("Gracias"));
    assert_eq!(store.phrases(1).unwrap().len(), store.due_times(1).unwrap().len());
}

#[test]
fn test_backup_opens_as_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir.path().join("live.db"));
    store.add_phrase(7, "Hola", "Hello").unwrap();

    let copy = dir.path().join("copy.db");
    store.backup_into(&copy).unwrap();
    let restored = open(&copy);
    assert_eq!(restored.phrases(7).unwrap(), store.phrases(7).unwrap());
    assert_eq!(restored.due_times(7).unwrap(), vec![T + 2 * 3600]);

    let mut bytes = Vec::new();
    let n = store.backup_to(&mut bytes).unwrap();
    assert_eq!(n as usize, bytes.len());
    assert!(bytes.starts_with(b"SQLite format 3\0"));
}

#[test]
fn test_concurrent_writers_keep_pairs() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(open(&dir.path().join("busy.db")));

    let handles: Vec<_> = (0..4)
        .map(|w| {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    store.add_phrase(w % 2, &format!("w{w}-{i}"), "e").unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    for chat in 0..2 {
        let phrases = store.phrases(chat).unwrap();
        let times = store.due_times(chat).unwrap();
        assert_eq!(phrases.len(), 50);
        assert_eq!(times.len(), 50);
        // Exactly 30 per day for the default throttle
        let day0 = times.iter().filter(|&&t| t == T + 2 * 3600).count();
        assert_eq!(day0, 30);
    }

    store.study_now().unwrap();
    let mut studied = 0;
    while let Study::Due { .. } = store.get_study(0).unwrap() {
        store.score_study(0, 1).unwrap();
        studied += 1;
    }
    assert_eq!(studied, 50);
    assert!(store.phrases(0).unwrap().iter().all(|p| p.score == 1));
}
