use pcsc::{Card, Context, Disposition, Protocols, ShareMode};
use std::collections::HashMap;
use std::ffi::CString;

use crate::core::error::DriverError;
use crate::core::utils::format_hex;

/// Transport protocol negotiated for a card connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    T0,
    T1,
    Raw,
    Undetermined,
}

impl From<Option<pcsc::Protocol>> for Protocol {
    fn from(protocol: Option<pcsc::Protocol>) -> Self {
        match protocol {
            Some(pcsc::Protocol::T0) => Protocol::T0,
            Some(pcsc::Protocol::T1) => Protocol::T1,
            Some(pcsc::Protocol::RAW) => Protocol::Raw,
            _ => Protocol::Undetermined,
        }
    }
}

/// Card operations the reader event handler needs from the hardware layer.
///
/// Each call completes exactly once with a value or an error.
#[cfg_attr(test, mockall::automock)]
pub trait CardDriver {
    /// Release the connection held on `reader`, if any
    fn disconnect(&mut self, reader: &str, disposition: Disposition) -> Result<(), DriverError>;

    /// Open a connection to the card currently in `reader`
    fn connect(&mut self, reader: &str, share_mode: ShareMode) -> Result<Protocol, DriverError>;

    /// Exchange one APDU on the open connection
    fn transmit(
        &mut self,
        reader: &str,
        protocol: Protocol,
        command: &[u8],
        max_response_len: usize,
    ) -> Result<Vec<u8>, DriverError>;
}

/// Card connection that can be closed with a disposition.
///
/// A failed close hands the handle back so the caller keeps ownership.
pub trait CardHandle: Sized {
    fn release(self, disposition: Disposition) -> Result<(), (Self, pcsc::Error)>;
}

impl CardHandle for Card {
    fn release(self, disposition: Disposition) -> Result<(), (Self, pcsc::Error)> {
        self.disconnect(disposition)
    }
}

/// Open card connections, at most one per reader
pub struct Connections<C> {
    cards: HashMap<String, C>,
}

impl<C: CardHandle> Connections<C> {
    pub fn new() -> Self {
        Self {
            cards: HashMap::new(),
        }
    }

    pub fn get(&self, reader: &str) -> Option<&C> {
        self.cards.get(reader)
    }

    pub fn is_open(&self, reader: &str) -> bool {
        self.cards.contains_key(reader)
    }

    /// Close the connection on `reader`. The handle stays held when closing
    /// fails, since dropping a `pcsc::Card` resets the card.
    pub fn release(&mut self, reader: &str, disposition: Disposition) -> Result<(), DriverError> {
        let Some(card) = self.cards.remove(reader) else {
            log::debug!("No open connection on {reader}, nothing to disconnect");
            return Ok(());
        };

        match card.release(disposition) {
            Ok(()) => {
                log::debug!("Disconnected from card on {reader}");
                Ok(())
            }
            Err((card, e)) => {
                self.cards.insert(reader.to_string(), card);
                Err(DriverError::Disconnect(e))
            }
        }
    }

    /// Store a new connection. A handle still held for `reader` gets one more
    /// leave-card attempt before it is replaced.
    pub fn insert(&mut self, reader: &str, card: C) {
        if let Err(e) = self.release(reader, Disposition::LeaveCard) {
            log::warn!("Replacing stale connection on {reader}: {e}");
        }
        self.cards.insert(reader.to_string(), card);
    }
}

impl<C: CardHandle> Default for Connections<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// PCSC driver keeping at most one card connection per reader
pub struct PcscDriver {
    context: Context,
    connections: Connections<Card>,
}

impl PcscDriver {
    pub fn new(context: Context) -> Self {
        Self {
            context,
            connections: Connections::new(),
        }
    }
}

impl CardDriver for PcscDriver {
    fn disconnect(&mut self, reader: &str, disposition: Disposition) -> Result<(), DriverError> {
        self.connections.release(reader, disposition)
    }

    fn connect(&mut self, reader: &str, share_mode: ShareMode) -> Result<Protocol, DriverError> {
        let reader_cstr =
            CString::new(reader).map_err(|_| DriverError::InvalidReaderName(reader.to_string()))?;

        let card = self
            .context
            .connect(&reader_cstr, share_mode, Protocols::ANY)
            .map_err(DriverError::Connect)?;

        let protocol = match card.status2_owned() {
            Ok(status) => Protocol::from(status.protocol2()),
            Err(e) => {
                log::debug!("Could not read card status on {reader}: {e}");
                Protocol::Undetermined
            }
        };

        log::debug!("Connected to card on {reader} using {protocol:?}");
        self.connections.insert(reader, card);
        Ok(protocol)
    }

    fn transmit(
        &mut self,
        reader: &str,
        protocol: Protocol,
        command: &[u8],
        max_response_len: usize,
    ) -> Result<Vec<u8>, DriverError> {
        let card = self
            .connections
            .get(reader)
            .ok_or_else(|| DriverError::NotConnected(reader.to_string()))?;

        log::debug!("Transmitting APDU on {reader} ({protocol:?}): {}", format_hex(command));

        let mut response_buf = vec![0; max_response_len];
        let response = card
            .transmit(command, &mut response_buf)
            .map_err(DriverError::Transmit)?;

        log::debug!("Received response: {}", format_hex(response));
        Ok(response.to_vec())
    }
}
