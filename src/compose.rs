//! Reply composition
//!
//! Builds the transport-encoded reply for the provider's send endpoint.
//! Pure functions: no provider calls, deterministic for a given input.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Compose the auto-reply envelope for a candidate message
///
/// The envelope sets `Subject: Re: <subject>` and a `message/rfc822` content
/// type, then the blank line and the fixed body text. Both `To` and `From`
/// carry the original sender's address. Output is the URL-safe base64
/// encoding (no padding) of the raw message bytes, as `messages.send`
/// requires.
pub fn compose_reply(subject: &str, from: &str, body: &str) -> String {
    let reply_to = sender_address(from);
    let message = format!(
        "From: <{reply_to}>\nTo: <{reply_to}>\nSubject: Re: {subject}\n\
         Content-Type: message/rfc822\n\n{body}"
    );
    URL_SAFE_NO_PAD.encode(message.as_bytes())
}

/// Extract the bare address from a `From` header value
///
/// Handles the `Display Name <addr@host>` form; a bare address passes
/// through unchanged. No full RFC 5322 parsing is attempted.
pub fn sender_address(from: &str) -> &str {
    match (from.rfind('<'), from.rfind('>')) {
        (Some(open), Some(close)) if open < close => from[open + 1..close].trim(),
        _ => from.trim(),
    }
}
