//! WebSocket opening handshake (RFC 6455 section 4.2).

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha1::{Digest, Sha1};

use crate::net::sniff::UpgradeRequest;

/// Magic GUID appended to the client key.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Compute the `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Return the client key when the request is a WebSocket upgrade.
pub fn websocket_key(request: &UpgradeRequest) -> Option<&str> {
    let upgrade = request.header("upgrade")?;
    if !upgrade.trim().eq_ignore_ascii_case("websocket") {
        return None;
    }
    request
        .header("sec-websocket-key")
        .map(str::trim)
        .filter(|key| !key.is_empty())
}

/// The `101 Switching Protocols` response for a given client key.
pub fn switching_protocols(client_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_key(client_key)
    )
}
