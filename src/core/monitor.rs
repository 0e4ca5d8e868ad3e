use pcsc::{Context, ReaderState, State, PNP_NOTIFICATION};
use std::collections::BTreeSet;
use std::ffi::CString;
use std::thread;
use std::time::Duration;

use crate::core::driver::CardDriver;
use crate::core::error::DriverError;
use crate::core::events::ReaderEvent;
use crate::core::handler::ReaderEventHandler;
use crate::core::opener::UrlOpener;
use crate::core::reader::ReaderStatus;

/// Turns PCSC reader list and status changes into [`ReaderEvent`]s.
///
/// Only readers passed to [`ReaderTracker::watch`] get status, error and
/// removal events; every reader gets an `Attached` event once.
pub struct ReaderMonitor {
    context: Context,
    tracker: ReaderTracker,
}

impl ReaderMonitor {
    pub fn new(context: Context) -> Self {
        Self {
            context,
            tracker: ReaderTracker::new(),
        }
    }

    /// Feed events to `handler` until the PCSC service itself fails
    pub fn run<D: CardDriver, O: UrlOpener>(
        &mut self,
        handler: &mut ReaderEventHandler<D, O>,
        poll_interval: Duration,
    ) -> Result<(), DriverError> {
        log::info!("Waiting for readers...");
        loop {
            self.poll(handler, poll_interval)?;
        }
    }

    /// One monitor round: reader list changes first, then one status wait
    pub fn poll<D: CardDriver, O: UrlOpener>(
        &mut self,
        handler: &mut ReaderEventHandler<D, O>,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        let listed: Vec<String> = match self.context.list_readers_owned() {
            Ok(names) => names
                .into_iter()
                .map(|name| name.to_string_lossy().into_owned())
                .collect(),
            Err(pcsc::Error::NoReadersAvailable) => Vec::new(),
            Err(e) => return Err(DriverError::Monitor(e)),
        };

        let events = self.tracker.apply_reader_list(&listed);
        self.tracker.deliver_list_events(handler, events)?;

        for event in self.wait(timeout)? {
            handler.handle(event);
        }
        Ok(())
    }

    /// Block until a watched reader changes state or `timeout` elapses
    fn wait(&mut self, timeout: Duration) -> Result<Vec<ReaderEvent>, DriverError> {
        // An empty reader set may not block at all
        if self.tracker.is_idle() {
            thread::sleep(timeout);
            return Ok(Vec::new());
        }

        for rs in &mut self.tracker.states {
            rs.sync_current_state();
        }

        match self
            .context
            .get_status_change(timeout, &mut self.tracker.states)
        {
            Ok(()) => {}
            // Reader list changes are picked up by the next refresh
            Err(pcsc::Error::Timeout) | Err(pcsc::Error::UnknownReader) => return Ok(Vec::new()),
            Err(e @ (pcsc::Error::ServiceStopped
            | pcsc::Error::NoService
            | pcsc::Error::InvalidHandle)) => return Err(DriverError::Monitor(e)),
            Err(e) => {
                let events = self.tracker.error_events(e);
                // A persistent error would otherwise be reported in a tight loop
                thread::sleep(timeout);
                return Ok(events);
            }
        }

        let snapshots: Vec<StateSnapshot> = self
            .tracker
            .states
            .iter()
            .map(|rs| StateSnapshot {
                name: rs.name().to_string_lossy().into_owned(),
                event_state: rs.event_state(),
                atr: rs.atr().to_vec(),
            })
            .collect();

        let (events, gone) = translate(&snapshots);
        self.tracker.forget(gone);
        Ok(events)
    }
}

/// Reader state as reported by one status wait
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub name: String,
    pub event_state: State,
    pub atr: Vec<u8>,
}

/// Watched entries that should no longer be waited on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gone {
    Reader(String),
    PnpUnsupported,
}

fn is_pnp(name: &str) -> bool {
    PNP_NOTIFICATION().to_string_lossy() == name
}

/// Events for the states that changed, plus the entries to stop watching
pub fn translate(snapshots: &[StateSnapshot]) -> (Vec<ReaderEvent>, Vec<Gone>) {
    let mut events = Vec::new();
    let mut gone = Vec::new();

    for snapshot in snapshots {
        if is_pnp(&snapshot.name) {
            if snapshot.event_state.contains(State::UNKNOWN) {
                log::debug!("Reader hotplug notification unsupported, polling instead");
                gone.push(Gone::PnpUnsupported);
            }
            continue;
        }
        if !snapshot.event_state.contains(State::CHANGED) {
            continue;
        }

        let reader = snapshot.name.clone();
        let status = ReaderStatus::new(snapshot.event_state, snapshot.atr.clone());
        if status.is_gone() {
            gone.push(Gone::Reader(reader.clone()));
            events.push(ReaderEvent::Removed { reader });
        } else {
            events.push(ReaderEvent::StatusChanged { reader, status });
        }
    }

    (events, gone)
}

/// Reader names seen in the PCSC list and the states being waited on
pub struct ReaderTracker {
    known: BTreeSet<String>,
    states: Vec<ReaderState>,
}

impl ReaderTracker {
    pub fn new() -> Self {
        Self {
            known: BTreeSet::new(),
            states: vec![ReaderState::new(PNP_NOTIFICATION(), State::UNAWARE)],
        }
    }

    /// Nothing to wait on: no watched reader and no hotplug notification
    pub fn is_idle(&self) -> bool {
        self.states.is_empty()
    }

    pub fn is_known(&self, reader: &str) -> bool {
        self.known.contains(reader)
    }

    pub fn is_watched(&self, reader: &str) -> bool {
        self.states
            .iter()
            .any(|rs| rs.name().to_string_lossy() == reader)
    }

    /// Start delivering status changes for `reader`
    pub fn watch(&mut self, reader: &str) -> Result<(), DriverError> {
        if self.is_watched(reader) {
            return Ok(());
        }
        let name =
            CString::new(reader).map_err(|_| DriverError::InvalidReaderName(reader.to_string()))?;
        self.states.push(ReaderState::new(name, State::UNAWARE));
        Ok(())
    }

    fn unwatch(&mut self, reader: &str) -> bool {
        let before = self.states.len();
        self.states
            .retain(|rs| rs.name().to_string_lossy() != reader);
        self.states.len() != before
    }

    /// Compare `listed` with the last reader list seen
    pub fn apply_reader_list(&mut self, listed: &[String]) -> Vec<ReaderEvent> {
        let (added, removed) = diff_readers(&self.known, listed);
        let mut events = Vec::with_capacity(added.len() + removed.len());

        for reader in removed {
            self.known.remove(&reader);
            if self.unwatch(&reader) {
                events.push(ReaderEvent::Removed { reader });
            } else {
                log::debug!("Unwatched reader went away: {reader}");
            }
        }
        for reader in added {
            self.known.insert(reader.clone());
            events.push(ReaderEvent::Attached { reader });
        }

        events
    }

    /// Hand reader list events to `handler`, watching the readers it subscribes to
    pub fn deliver_list_events<D: CardDriver, O: UrlOpener>(
        &mut self,
        handler: &mut ReaderEventHandler<D, O>,
        events: Vec<ReaderEvent>,
    ) -> Result<(), DriverError> {
        for event in events {
            let attached = match &event {
                ReaderEvent::Attached { reader } => Some(reader.clone()),
                _ => None,
            };
            handler.handle(event);
            if let Some(reader) = attached {
                if handler.is_subscribed(&reader) {
                    self.watch(&reader)?;
                }
            }
        }
        Ok(())
    }

    /// Stop waiting on gone entries. Readers stay known until they leave
    /// the reader list, so an unavailable reader is not attached again.
    pub fn forget(&mut self, gone: Vec<Gone>) {
        for entry in gone {
            match entry {
                Gone::Reader(reader) => {
                    self.unwatch(&reader);
                }
                Gone::PnpUnsupported => {
                    self.states.retain(|rs| rs.name() != PNP_NOTIFICATION());
                }
            }
        }
    }

    /// One error event per watched reader
    pub fn error_events(&self, error: pcsc::Error) -> Vec<ReaderEvent> {
        self.states
            .iter()
            .filter(|rs| rs.name() != PNP_NOTIFICATION())
            .map(|rs| ReaderEvent::Error {
                reader: rs.name().to_string_lossy().into_owned(),
                error: DriverError::Monitor(error),
            })
            .collect()
    }
}

impl Default for ReaderTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Readers newly listed and readers no longer listed, in name order
pub fn diff_readers(known: &BTreeSet<String>, listed: &[String]) -> (Vec<String>, Vec<String>) {
    let listed: BTreeSet<&String> = listed.iter().collect();
    let added = listed
        .iter()
        .filter(|name| !known.contains(name.as_str()))
        .map(|name| (*name).clone())
        .collect();
    let removed = known
        .iter()
        .filter(|name| !listed.contains(name))
        .cloned()
        .collect();
    (added, removed)
}
