use chrono::{DateTime, Utc};
use pcsc::{Disposition, ShareMode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::core::driver::CardDriver;
use crate::core::error::DriverError;
use crate::core::events::ReaderEvent;
use crate::core::opener::UrlOpener;
use crate::core::reader::{matches_filter, ReaderStatus, READER_CLASS_MARKER};
use crate::core::uid::{build_url, Uid, GET_UID_COMMAND, MAX_RESPONSE_LEN};
use crate::core::utils::format_hex;

/// Base address the card UID is appended to
pub const DEFAULT_BASE_URL: &str = "http://maomao.com/";

/// Settings for the reader event handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerConfig {
    /// Substring a reader name must contain to be watched
    pub reader_filter: String,
    /// Prefix of the URL opened for each card
    pub base_url: String,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            reader_filter: READER_CLASS_MARKER.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

/// Result of one completed scan sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    pub reader: String,
    pub uid: String,
    pub url: String,
    /// False when the URL opener failed
    pub opened: bool,
    pub scanned_at: DateTime<Utc>,
}

/// What a status change led to
#[derive(Debug)]
pub enum StatusOutcome {
    Scanned(Scan),
    Failed(DriverError),
    CardAbsent,
    Ignored,
}

/// Turns reader notifications into UID scans and URL dispatches.
///
/// Events are handled through `&mut self`, one at a time, so a reader can
/// never have two scan sequences in flight.
pub struct ReaderEventHandler<D, O> {
    driver: D,
    opener: O,
    config: HandlerConfig,
    subscribed: HashSet<String>,
}

impl<D: CardDriver, O: UrlOpener> ReaderEventHandler<D, O> {
    pub fn new(driver: D, opener: O, config: HandlerConfig) -> Self {
        Self {
            driver,
            opener,
            config,
            subscribed: HashSet::new(),
        }
    }

    /// Whether status, error and removal notifications are wanted for `reader`
    pub fn is_subscribed(&self, reader: &str) -> bool {
        self.subscribed.contains(reader)
    }

    /// Route one monitor event to its handler
    pub fn handle(&mut self, event: ReaderEvent) -> Option<StatusOutcome> {
        match event {
            ReaderEvent::Attached { reader } => {
                self.on_reader_attached(&reader);
                None
            }
            ReaderEvent::StatusChanged { reader, status } => {
                Some(self.on_status_changed(&reader, &status))
            }
            ReaderEvent::Removed { reader } => {
                self.on_reader_removed(&reader);
                None
            }
            ReaderEvent::Error { reader, error } => {
                self.on_reader_error(&reader, &error);
                None
            }
        }
    }

    /// Subscribe to `reader` when its name matches the configured filter.
    /// Returns whether the reader is now subscribed.
    pub fn on_reader_attached(&mut self, reader: &str) -> bool {
        log::info!("Reader detected: {reader}");

        if !matches_filter(reader, &self.config.reader_filter) {
            log::info!(
                "Ignoring reader without '{}' in its name: {reader}",
                self.config.reader_filter
            );
            return false;
        }

        self.subscribed.insert(reader.to_string());
        true
    }

    pub fn on_status_changed(&mut self, reader: &str, status: &ReaderStatus) -> StatusOutcome {
        if !self.is_subscribed(reader) {
            log::debug!("Status change on unwatched reader {reader} ignored");
            return StatusOutcome::Ignored;
        }

        log::info!(
            "Reader status changed, current state: {:#x}",
            status.state.bits()
        );

        if status.is_present() {
            log::info!("Card detected with ATR: {}", format_hex(&status.atr));
            match self.scan(reader) {
                Ok(scan) => StatusOutcome::Scanned(scan),
                Err(e) => {
                    log::error!("An error occurred while scanning on {reader}: {e}");
                    StatusOutcome::Failed(e)
                }
            }
        } else if status.is_empty() {
            log::info!("No card present.");
            StatusOutcome::CardAbsent
        } else {
            StatusOutcome::Ignored
        }
    }

    pub fn on_reader_removed(&mut self, reader: &str) {
        log::info!("Reader removed: {reader}");
        self.subscribed.remove(reader);
    }

    pub fn on_reader_error(&mut self, reader: &str, error: &DriverError) {
        log::error!("Reader error on {reader}: {error}");
    }

    /// Run disconnect, connect, GET UID and dispatch against the card in `reader`.
    ///
    /// A failed disconnect is only logged. Connect and transmit failures
    /// abort the sequence; a dispatch failure is reported in `Scan::opened`.
    pub fn scan(&mut self, reader: &str) -> Result<Scan, DriverError> {
        if let Err(e) = self.driver.disconnect(reader, Disposition::LeaveCard) {
            log::warn!("{e}");
        }

        let protocol = self.driver.connect(reader, ShareMode::Shared)?;
        let response =
            self.driver
                .transmit(reader, protocol, &GET_UID_COMMAND, MAX_RESPONSE_LEN)?;
        let uid = Uid::from_response(&response)?;
        log::info!("Card UID on {reader}: {uid}");

        let url = build_url(&self.config.base_url, &uid);
        let opened = self.dispatch(&url);

        Ok(Scan {
            reader: reader.to_string(),
            uid: uid.to_hex(),
            url,
            opened,
            scanned_at: Utc::now(),
        })
    }

    fn dispatch(&self, url: &str) -> bool {
        match self.opener.open(url) {
            Ok(()) => true,
            Err(e) => {
                log::error!("{e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::driver::{MockCardDriver, Protocol};
    use crate::core::error::DispatchError;
    use crate::core::opener::MockUrlOpener;
    use mockall::Sequence;
    use pcsc::State;

    const PICC: &str = "ACS ACR122U PICC Interface 00 00";

    fn present() -> ReaderStatus {
        ReaderStatus::new(State::CHANGED | State::PRESENT, vec![0x3B, 0x8F, 0x80, 0x01])
    }

    fn handler(
        driver: MockCardDriver,
        opener: MockUrlOpener,
    ) -> ReaderEventHandler<MockCardDriver, MockUrlOpener> {
        let mut handler = ReaderEventHandler::new(driver, opener, HandlerConfig::default());
        assert!(handler.on_reader_attached(PICC));
        handler
    }

    #[test]
    fn test_scan_sequence_order_and_url() {
        let mut driver = MockCardDriver::new();
        let mut opener = MockUrlOpener::new();
        let mut seq = Sequence::new();

        driver
            .expect_disconnect()
            .withf(|reader, disposition| {
                reader == PICC && matches!(disposition, Disposition::LeaveCard)
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        driver
            .expect_connect()
            .withf(|reader, mode| reader == PICC && matches!(mode, ShareMode::Shared))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Protocol::T1));
        driver
            .expect_transmit()
            .withf(|reader, protocol, command, max_len| {
                reader == PICC
                    && *protocol == Protocol::T1
                    && command == [0xFF, 0xCA, 0x00, 0x00, 0x00]
                    && *max_len == 255
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(vec![0xAA, 0xBB, 0xCC, 0xDD, 0x90, 0x00]));
        opener
            .expect_open()
            .withf(|url| url == "http://maomao.com/AABBCCDD")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let mut handler = handler(driver, opener);
        match handler.on_status_changed(PICC, &present()) {
            StatusOutcome::Scanned(scan) => {
                assert_eq!(scan.uid, "AABBCCDD");
                assert_eq!(scan.url, "http://maomao.com/AABBCCDD");
                assert_eq!(scan.reader, PICC);
                assert!(scan.opened);
            }
            other => panic!("expected a scan, got {other:?}"),
        }
    }

    #[test]
    fn test_disconnect_failure_still_connects() {
        let mut driver = MockCardDriver::new();
        let mut opener = MockUrlOpener::new();
        let mut seq = Sequence::new();

        driver
            .expect_disconnect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(DriverError::Disconnect(pcsc::Error::InvalidHandle)));
        driver
            .expect_connect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Protocol::T0));
        driver
            .expect_transmit()
            .times(1)
            .returning(|_, _, _, _| Ok(vec![0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x90, 0x00]));
        opener.expect_open().times(1).returning(|_| Ok(()));

        let mut handler = handler(driver, opener);
        let scan = handler.scan(PICC).unwrap();
        assert_eq!(scan.uid, "04112233445566");
    }

    #[test]
    fn test_connect_failure_skips_transmit_and_dispatch() {
        let mut driver = MockCardDriver::new();
        let mut opener = MockUrlOpener::new();

        driver.expect_disconnect().returning(|_, _| Ok(()));
        driver
            .expect_connect()
            .times(1)
            .returning(|_, _| Err(DriverError::Connect(pcsc::Error::NoSmartcard)));
        driver.expect_transmit().never();
        opener.expect_open().never();

        let mut handler = handler(driver, opener);
        let outcome = handler.on_status_changed(PICC, &present());
        assert!(matches!(
            outcome,
            StatusOutcome::Failed(DriverError::Connect(_))
        ));
        // Still subscribed, waiting for the next event
        assert!(handler.is_subscribed(PICC));
    }

    #[test]
    fn test_transmit_failure_skips_dispatch() {
        let mut driver = MockCardDriver::new();
        let mut opener = MockUrlOpener::new();

        driver.expect_disconnect().returning(|_, _| Ok(()));
        driver.expect_connect().returning(|_, _| Ok(Protocol::T1));
        driver
            .expect_transmit()
            .times(1)
            .returning(|_, _, _, _| Err(DriverError::Transmit(pcsc::Error::RemovedCard)));
        opener.expect_open().never();

        let mut handler = handler(driver, opener);
        let outcome = handler.on_status_changed(PICC, &present());
        assert!(matches!(
            outcome,
            StatusOutcome::Failed(DriverError::Transmit(_))
        ));
    }

    #[test]
    fn test_short_response_skips_dispatch() {
        let mut driver = MockCardDriver::new();
        let mut opener = MockUrlOpener::new();

        driver.expect_disconnect().returning(|_, _| Ok(()));
        driver.expect_connect().returning(|_, _| Ok(Protocol::T1));
        driver
            .expect_transmit()
            .returning(|_, _, _, _| Ok(vec![0x90]));
        opener.expect_open().never();

        let mut handler = handler(driver, opener);
        assert!(matches!(
            handler.scan(PICC),
            Err(DriverError::ShortResponse(1))
        ));
    }

    #[test]
    fn test_dispatch_failure_is_not_a_scan_failure() {
        let mut driver = MockCardDriver::new();
        let mut opener = MockUrlOpener::new();

        driver.expect_disconnect().returning(|_, _| Ok(()));
        driver.expect_connect().returning(|_, _| Ok(Protocol::T1));
        driver
            .expect_transmit()
            .returning(|_, _, _, _| Ok(vec![0x01, 0x02, 0x03, 0x04, 0x90, 0x00]));
        opener.expect_open().times(1).returning(|_| {
            Err(DispatchError::Launch(std::io::Error::new(
                std::io::ErrorKind::Other,
                "no display",
            )))
        });

        let mut handler = handler(driver, opener);
        let scan = handler.scan(PICC).unwrap();
        assert!(!scan.opened);
        assert_eq!(scan.url, "http://maomao.com/01020304");
    }

    #[test]
    fn test_empty_status_does_nothing() {
        let mut driver = MockCardDriver::new();
        let mut opener = MockUrlOpener::new();
        driver.expect_disconnect().never();
        driver.expect_connect().never();
        driver.expect_transmit().never();
        opener.expect_open().never();

        let mut handler = handler(driver, opener);
        let status = ReaderStatus::new(State::CHANGED | State::EMPTY, Vec::new());
        assert!(matches!(
            handler.on_status_changed(PICC, &status),
            StatusOutcome::CardAbsent
        ));
    }

    #[test]
    fn test_other_states_are_ignored() {
        let mut driver = MockCardDriver::new();
        driver.expect_connect().never();

        let mut handler = handler(driver, MockUrlOpener::new());
        let status = ReaderStatus::new(State::CHANGED | State::MUTE, Vec::new());
        assert!(matches!(
            handler.on_status_changed(PICC, &status),
            StatusOutcome::Ignored
        ));
    }

    #[test]
    fn test_non_matching_reader_is_not_subscribed() {
        let mut driver = MockCardDriver::new();
        driver.expect_disconnect().never();
        driver.expect_connect().never();

        let mut handler =
            ReaderEventHandler::new(driver, MockUrlOpener::new(), HandlerConfig::default());
        let sam = "ACS ACR122U SAM Interface 00 01";
        assert!(!handler.on_reader_attached(sam));
        assert!(!handler.is_subscribed(sam));
        assert!(matches!(
            handler.on_status_changed(sam, &present()),
            StatusOutcome::Ignored
        ));
    }

    #[test]
    fn test_custom_filter_and_base_url() {
        let mut driver = MockCardDriver::new();
        let mut opener = MockUrlOpener::new();
        driver.expect_disconnect().returning(|_, _| Ok(()));
        driver.expect_connect().returning(|_, _| Ok(Protocol::T1));
        driver
            .expect_transmit()
            .returning(|_, _, _, _| Ok(vec![0xDE, 0xAD, 0xBE, 0xEF, 0x90, 0x00]));
        opener
            .expect_open()
            .withf(|url| url == "https://example.test/card/DEADBEEF")
            .times(1)
            .returning(|_| Ok(()));

        let config = HandlerConfig {
            reader_filter: "Contactless".to_string(),
            base_url: "https://example.test/card/".to_string(),
        };
        let mut handler = ReaderEventHandler::new(driver, opener, config);
        assert!(!handler.on_reader_attached(PICC));
        assert!(handler.on_reader_attached("Identiv uTrust 3700 F Contactless 0"));
        assert!(matches!(
            handler.on_status_changed("Identiv uTrust 3700 F Contactless 0", &present()),
            StatusOutcome::Scanned(_)
        ));
    }

    #[test]
    fn test_removed_reader_drops_subscription() {
        let mut handler = handler(MockCardDriver::new(), MockUrlOpener::new());
        assert!(handler.is_subscribed(PICC));

        assert!(handler
            .handle(ReaderEvent::Error {
                reader: PICC.to_string(),
                error: DriverError::Monitor(pcsc::Error::ReaderUnavailable),
            })
            .is_none());
        assert!(handler.is_subscribed(PICC));

        handler.handle(ReaderEvent::Removed {
            reader: PICC.to_string(),
        });
        assert!(!handler.is_subscribed(PICC));
    }
}
