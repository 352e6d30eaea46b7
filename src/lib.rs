//! Studylite - SQLite-backed spaced-repetition scheduler
//!
//! Phrases are stored per chat, each with a due-time that backs off
//! exponentially with its recall score. A [`Notifier`] keeps one timer per
//! subscribed chat and reports when a batch of studies is waiting.
//!
//! # Example
//!
//! ```
//! use studylite::{Config, Store, Study};
//!
//! let store = Store::open_memory(Config::default()).unwrap();
//!
//! store.add_phrase(1, "Hola", "Hello").unwrap();
//! // New phrases are not due straight away
//! assert!(matches!(store.get_study(1).unwrap(), Study::Waiting { .. }));
//! ```

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod keys;
pub mod notify;
pub mod schedule;
mod study;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use db::Store;
pub use error::{Result, StoreError};
pub use notify::{Deliver, LogDeliver, Notifier};
pub use types::{ChatId, Mode, Phrase, PhraseFilter, Study};
