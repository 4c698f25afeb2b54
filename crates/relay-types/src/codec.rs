//! JSON codec for envelopes.
//!
//! A body is an envelope when it is a JSON object with a top-level `data`
//! field. Anything else (a bare object, number, string, ...) is taken as the
//! payload of a fresh envelope, so plain JSON published by external producers
//! is accepted as-is.
//!
//! Scope chains nest one JSON object per level, so long request chains go
//! well past serde_json's default recursion limit. Bodies nested deeper than
//! [`SHALLOW_NESTING`] are decoded with the limit lifted on a dedicated stack
//! grown by `stacker`; anything beyond [`MAX_NESTING`] is rejected up front.

use serde::Deserialize;
use serde_json::Value;

use crate::envelope::Envelope;
use crate::errors::CodecError;
use crate::scope::ScopeChain;

/// Nesting handled directly on the caller's stack.
pub const SHALLOW_NESTING: usize = 96;

/// Deepest nesting accepted in either direction.
pub const MAX_NESTING: usize = 4096;

/// Stack for encoding or decoding anything deeper than [`SHALLOW_NESTING`].
const DEEP_STACK_SIZE: usize = 32 * 1024 * 1024;

pub fn decode(body: &[u8]) -> Result<Envelope, CodecError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(CodecError::Empty);
    }
    let depth = nesting_depth(body);
    if depth > MAX_NESTING {
        return Err(CodecError::TooDeep {
            depth,
            max: MAX_NESTING,
        });
    }
    if depth <= SHALLOW_NESTING {
        let value: Value = serde_json::from_slice(body)?;
        return decode_value(value);
    }
    stacker::grow(DEEP_STACK_SIZE, || {
        let mut deserializer = serde_json::Deserializer::from_slice(body);
        deserializer.disable_recursion_limit();
        let value = Value::deserialize(&mut deserializer)?;
        deserializer.end()?;
        decode_value(value)
    })
}

pub fn decode_value(value: Value) -> Result<Envelope, CodecError> {
    match value {
        Value::Object(map) if map.contains_key("data") => {
            Ok(serde_json::from_value(Value::Object(map))?)
        }
        Value::Object(map) if map.is_empty() => Ok(Envelope::new(Value::Null)),
        other => Ok(Envelope::new(other)),
    }
}

pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    let depth = envelope.scope.as_ref().map_or(0, ScopeChain::depth);
    if depth >= MAX_NESTING {
        return Err(CodecError::TooDeep {
            depth,
            max: MAX_NESTING,
        });
    }
    if depth <= SHALLOW_NESTING {
        return Ok(serde_json::to_vec(envelope)?);
    }
    stacker::grow(DEEP_STACK_SIZE, || {
        serde_json::to_vec(envelope).map_err(CodecError::from)
    })
}

/// Deepest object/array nesting in `body`, ignoring brackets inside strings.
///
/// Malformed input yields some count; the parser reports the real error.
fn nesting_depth(body: &[u8]) -> usize {
    let mut depth = 0usize;
    let mut deepest = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for &byte in body {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' | b'[' => {
                depth += 1;
                deepest = deepest.max(depth);
            }
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    deepest
}
