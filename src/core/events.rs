use crate::core::error::DriverError;
use crate::core::reader::ReaderStatus;

/// Notifications produced by the reader monitor
#[derive(Debug)]
pub enum ReaderEvent {
    /// A reader showed up in the PCSC reader list
    Attached { reader: String },
    /// A watched reader's state changed
    StatusChanged { reader: String, status: ReaderStatus },
    /// A watched reader disappeared
    Removed { reader: String },
    /// Waiting on a watched reader failed
    Error { reader: String, error: DriverError },
}
