//! Drives the watcher from a signal feed.

pub mod watch_loop;

pub use watch_loop::{RunStats, WatchLoop};
