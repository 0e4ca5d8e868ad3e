/// PCSC UID Launcher - opens a browser on a URL built from a card's UID
///
/// This library watches PCSC contactless readers, reads the UID of every
/// card presented and hands the resulting URL to a browser opener.
pub mod cli;
pub mod core;

// Re-export commonly used types
pub use crate::core::{
    driver::{CardDriver, PcscDriver, Protocol},
    error::{DispatchError, DriverError},
    events::ReaderEvent,
    handler::{HandlerConfig, ReaderEventHandler, Scan, StatusOutcome},
    monitor::ReaderMonitor,
    opener::{BrowserOpener, LogOpener, UrlOpener},
    reader::{ReaderInfo, ReaderStatus},
    uid::Uid,
};

// Common error type
pub type Result<T> = anyhow::Result<T>;
