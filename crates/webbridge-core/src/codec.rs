//! Message codec.
//!
//! Two text forms:
//!
//! - plain JSON, for channels that accept arbitrary strings (postMessage);
//! - base64 of the UTF-8 JSON bytes, for embedding inside a script literal.
//!   The base64 alphabet never needs escaping inside `'...'`, so any Unicode
//!   payload survives the script-evaluation channel.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::CodecError;
use crate::messages::BridgeMessage;

/// Start of the literal holding the encoded payload inside an injection script.
const PAYLOAD_MARKER: &str = "var encoded = '";

const SCRIPT_PREFIX: &str = "(function() {\n  try {\n    ";

const SCRIPT_SUFFIX: &str = r#"';
    var bytes = Uint8Array.from(atob(encoded), function(c) { return c.charCodeAt(0); });
    var data = new TextDecoder('utf-8').decode(bytes);
    window.dispatchEvent(new MessageEvent('message', {
      data: data,
      origin: window.location.origin
    }));
  } catch (err) {
    console.error('[webbridge] injection failed:', err && err.message);
  }
})();
true;
"#;

/// Encode a message as JSON text.
pub fn encode<M: BridgeMessage>(message: &M) -> Result<String, CodecError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode JSON text into a message, rejecting unknown kinds.
pub fn decode<M: BridgeMessage>(text: &str) -> Result<M, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Encode a message as base64 of its UTF-8 JSON text.
pub fn encode_base64<M: BridgeMessage>(message: &M) -> Result<String, CodecError> {
    let json = encode(message)?;
    Ok(STANDARD.encode(json.as_bytes()))
}

pub fn decode_base64<M: BridgeMessage>(text: &str) -> Result<M, CodecError> {
    let json = base64_to_json(text)?;
    decode(&json)
}

fn base64_to_json(text: &str) -> Result<String, CodecError> {
    let bytes = STANDARD.decode(text.trim())?;
    Ok(String::from_utf8(bytes)?)
}

/// Build the self-contained script that delivers `message` into the surface.
///
/// The script decodes the payload and fires a synthetic `message` event on the
/// surface's window, so it lands on the same path as any other inbound
/// message. Errors inside the surface are caught there and never reach the
/// host.
pub fn injection_script<M: BridgeMessage>(message: &M) -> Result<String, CodecError> {
    let encoded = encode_base64(message)?;
    let capacity =
        SCRIPT_PREFIX.len() + PAYLOAD_MARKER.len() + encoded.len() + SCRIPT_SUFFIX.len();
    let mut script = String::with_capacity(capacity);
    script.push_str(SCRIPT_PREFIX);
    script.push_str(PAYLOAD_MARKER);
    script.push_str(&encoded);
    script.push_str(SCRIPT_SUFFIX);
    Ok(script)
}

/// Recover the JSON text carried by a script built with [`injection_script`].
///
/// Loopback surfaces use this in place of a script engine.
pub fn extract_injected_payload(script: &str) -> Result<String, CodecError> {
    let start = script
        .find(PAYLOAD_MARKER)
        .map(|idx| idx + PAYLOAD_MARKER.len())
        .ok_or(CodecError::MissingPayload)?;
    let len = script[start..].find('\'').ok_or(CodecError::MissingPayload)?;
    base64_to_json(&script[start..start + len])
}
