/// Wildcard bind address; clients cannot dial it.
pub(crate) const WILDCARD_ADDR: &str = "0.0.0.0";
pub(crate) const LOOPBACK_ADDR: &str = "127.0.0.1";

/// accept `host:port` where host is an ip, a bracketed ipv6 or a host name
/// like `node1`, and port is a decimal number within the 16-bit range
pub fn is_endpoint(addr: &str) -> bool {
    let Some((host, port)) = addr.rsplit_once(':') else {
        return false;
    };

    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() || host.contains(char::is_whitespace) {
        return false;
    }

    !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) && port.parse::<u16>().is_ok()
}

/// Address a local client should dial for a listener bound to `addr`.
pub(crate) fn dialable_address(addr: &str) -> &str {
    if addr == WILDCARD_ADDR || addr.is_empty() {
        LOOPBACK_ADDR
    } else {
        addr
    }
}

/// `host:port` of the local client API
pub(crate) fn client_endpoint(
    client_addr: &str,
    port: u16,
) -> String {
    format!("{}:{}", dialable_address(client_addr), port)
}
