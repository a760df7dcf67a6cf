//! Trend detection over sliding windows.

pub mod trend_watcher;
pub mod window;

pub use trend_watcher::{TrendWatcher, WatcherSettings};
pub use window::TrendWindow;
