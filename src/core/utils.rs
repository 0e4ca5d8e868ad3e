/// Format bytes as an uppercase hex string
pub fn format_hex(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Format bytes as an uppercase hex string with spaces
pub fn format_hex_spaced(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Human-readable meaning of the SW1/SW2 a reader returns for GET DATA (UID).
///
/// The codes follow the PC/SC part 3 pseudo-APDU conventions that most
/// contactless readers implement, with the generic ISO 7816-4 codes as fallback.
pub fn describe_status_word(sw1: u8, sw2: u8) -> String {
    match (sw1, sw2) {
        (0x90, 0x00) => "Success".to_string(),
        (0x62, 0x82) => "Warning: End of data reached before Le bytes".to_string(),
        (0x63, 0x00) => "Error: Operation failed".to_string(),
        (0x67, 0x00) => "Error: Wrong length".to_string(),
        (0x68, 0x00) => "Error: Class byte not supported".to_string(),
        (0x6A, 0x81) => "Error: Function not supported by the card".to_string(),
        (0x6B, 0x00) => "Error: Wrong parameter(s) P1-P2".to_string(),
        (0x6C, n) => format!("Error: Wrong Le field, exact length: {n}"),
        (0x6D, 0x00) => "Error: Instruction code not supported or invalid".to_string(),
        (0x6E, 0x00) => "Error: Class not supported".to_string(),
        _ => format!("Unknown status: {sw1:02X} {sw2:02X}"),
    }
}
