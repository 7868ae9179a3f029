//! Formatting helpers for logs and CLI output.

/// Format a byte slice as colon-separated lowercase hex.
///
/// This is the format used in gateway trace logs.
///
/// # Example
///
/// ```
/// use ampio_core::format_bytes;
///
/// assert_eq!(format_bytes(&[0x2d, 0xd4, 0x05]), "2d:d4:05");
/// assert_eq!(format_bytes(&[]), "");
/// ```
pub fn format_bytes(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Format a device MAC the way Ampio tools print it.
///
/// At least four hex digits, more if the MAC needs them.
///
/// # Example
///
/// ```
/// use ampio_core::format_mac;
///
/// assert_eq!(format_mac(0x1305), "1305");
/// assert_eq!(format_mac(0x1), "0001");
/// assert_eq!(format_mac(0x0f000000), "f000000");
/// ```
pub fn format_mac(mac: u32) -> String {
    format!("{mac:04x}")
}

/// Parse a MAC given as hex, with or without a `0x` prefix.
///
/// # Example
///
/// ```
/// use ampio_core::parse_mac;
///
/// assert_eq!(parse_mac("0x111f"), Some(0x111f));
/// assert_eq!(parse_mac("1305"), Some(0x1305));
/// assert_eq!(parse_mac("zz"), None);
/// ```
pub fn parse_mac(s: &str) -> Option<u32> {
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(s, 16).ok()
}
