use anyhow::{Context as AnyhowContext, Result};
use pcsc::{Context, ReaderState, State};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Readers whose name contains this marker are the contactless (PICC) interface
pub const READER_CLASS_MARKER: &str = "PICC";

/// Information about a PCSC reader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderInfo {
    pub name: String,
    pub card_present: bool,
    pub atr: Option<Vec<u8>>,
}

impl ReaderInfo {
    /// Whether this reader would be watched with the given name filter
    pub fn matches(&self, filter: &str) -> bool {
        matches_filter(&self.name, filter)
    }
}

/// Reader name filter: plain substring match
pub fn matches_filter(reader_name: &str, filter: &str) -> bool {
    reader_name.contains(filter)
}

/// Snapshot of a reader state delivered with a status change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderStatus {
    pub state: State,
    pub atr: Vec<u8>,
}

impl ReaderStatus {
    pub fn new(state: State, atr: impl Into<Vec<u8>>) -> Self {
        Self {
            state,
            atr: atr.into(),
        }
    }

    pub fn is_present(&self) -> bool {
        self.state.contains(State::PRESENT)
    }

    pub fn is_empty(&self) -> bool {
        self.state.contains(State::EMPTY)
    }

    /// Reader was unplugged or is no longer usable
    pub fn is_gone(&self) -> bool {
        self.state
            .intersects(State::UNKNOWN | State::UNAVAILABLE | State::IGNORE)
    }
}

/// List all readers with their current card presence and ATR
pub fn list_readers(context: &Context) -> Result<Vec<ReaderInfo>> {
    let names = match context.list_readers_owned() {
        Ok(names) => names,
        Err(pcsc::Error::NoReadersAvailable) => return Ok(Vec::new()),
        Err(e) => return Err(e).context("Failed to list readers"),
    };

    let mut states: Vec<ReaderState> = names
        .into_iter()
        .map(|name| ReaderState::new(name, State::UNAWARE))
        .collect();

    if states.is_empty() {
        return Ok(Vec::new());
    }

    context
        .get_status_change(Duration::from_secs(0), &mut states)
        .context("Failed to query reader status")?;

    Ok(states
        .iter()
        .map(|rs| {
            let status = ReaderStatus::new(rs.event_state(), rs.atr());
            let card_present = status.is_present();
            ReaderInfo {
                name: rs.name().to_string_lossy().to_string(),
                card_present,
                atr: if card_present && !status.atr.is_empty() {
                    Some(status.atr)
                } else {
                    None
                },
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_filter() {
        assert!(matches_filter("ACS ACR122U PICC Interface 00 00", "PICC"));
        assert!(!matches_filter("ACS ACR1252 1S CL Reader SAM 00 01", "PICC"));
        assert!(!matches_filter("acs picc interface", "PICC"));
    }

    #[test]
    fn test_reader_info_matches() {
        let info = ReaderInfo {
            name: "OMNIKEY 5022 PICC 00 00".to_string(),
            card_present: false,
            atr: None,
        };
        assert!(info.matches("PICC"));
        assert!(!info.matches("SAM"));
    }

    #[test]
    fn test_reader_status_flags() {
        let present = ReaderStatus::new(State::CHANGED | State::PRESENT, vec![0x3B, 0x8F]);
        assert!(present.is_present());
        assert!(!present.is_empty());
        assert!(!present.is_gone());

        let empty = ReaderStatus::new(State::CHANGED | State::EMPTY, Vec::new());
        assert!(empty.is_empty());
        assert!(!empty.is_present());

        let gone = ReaderStatus::new(State::CHANGED | State::UNAVAILABLE, Vec::new());
        assert!(gone.is_gone());
        let unknown = ReaderStatus::new(State::UNKNOWN, Vec::new());
        assert!(unknown.is_gone());
    }

    #[test]
    fn test_reader_info_serialization() {
        let info = ReaderInfo {
            name: "Mock PICC 0".to_string(),
            card_present: true,
            atr: Some(vec![0x3B, 0x8F, 0x80, 0x01]),
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"card_present\":true"));
        let back: ReaderInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, info.name);
        assert_eq!(back.atr, info.atr);
    }
}
