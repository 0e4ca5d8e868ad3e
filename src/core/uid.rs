use std::fmt;

use crate::core::error::DriverError;
use crate::core::utils::{describe_status_word, format_hex};

/// GET DATA pseudo-APDU asking the reader for the card UID
pub const GET_UID_COMMAND: [u8; 5] = [0xFF, 0xCA, 0x00, 0x00, 0x00];

/// Receive buffer size for the GET UID exchange
pub const MAX_RESPONSE_LEN: usize = 255;

/// Card unique identifier as returned by the reader, without the status word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uid(Vec<u8>);

impl Uid {
    /// Split a GET UID response into the UID and its trailing SW1/SW2.
    ///
    /// The status word is not checked; a non-success code is only logged.
    pub fn from_response(response: &[u8]) -> Result<Self, DriverError> {
        if response.len() < 2 {
            return Err(DriverError::ShortResponse(response.len()));
        }

        let (uid, sw) = response.split_at(response.len() - 2);
        let (sw1, sw2) = (sw[0], sw[1]);
        if (sw1, sw2) != (0x90, 0x00) {
            log::warn!(
                "GET UID returned {:02X} {:02X} ({})",
                sw1,
                sw2,
                describe_status_word(sw1, sw2)
            );
        }

        Ok(Self(uid.to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Uppercase hex form used in URLs and logs
    pub fn to_hex(&self) -> String {
        format_hex(&self.0)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Target URL for a scanned card
pub fn build_url(base_url: &str, uid: &Uid) -> String {
    format!("{base_url}{uid}")
}
