//! UTF-8 boundary sanitizer for PTY output.
//!
//! PTY reads are chunked at arbitrary byte offsets, so a multi-byte character
//! can straddle two reads. [`Utf8Sanitizer`] holds back a possibly truncated
//! trailing sequence until the next chunk completes it, so every string it
//! returns consists of whole characters.

/// Longest UTF-8 encoding of a single character.
const UTF8_MAX_ENCODING_LENGTH: usize = 4;

/// Stateful bytes-to-text filter, one per session.
///
/// A sequence still pending when the stream ends is never flushed.
#[derive(Debug, Default)]
pub struct Utf8Sanitizer {
    remainder: Vec<u8>,
}

impl Utf8Sanitizer {
    /// Creates a sanitizer with no pending bytes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes held back from previous calls.
    pub fn pending(&self) -> usize {
        self.remainder.len()
    }

    /// Converts the next chunk of the stream to text.
    ///
    /// Malformed bytes that cannot be the start of a truncated character are
    /// passed through one at a time as U+FFFD.
    pub fn sanitize(&mut self, new_input: &[u8]) -> String {
        let input = if self.remainder.is_empty() {
            new_input.to_vec()
        } else {
            let mut joined = std::mem::take(&mut self.remainder);
            joined.extend_from_slice(new_input);
            joined
        };

        let mut output = String::with_capacity(input.len());
        let mut position = 0;

        while position < input.len() {
            match std::str::from_utf8(&input[position..]) {
                Ok(text) => {
                    output.push_str(text);
                    break;
                }
                Err(err) => {
                    let valid_end = position + err.valid_up_to();
                    // valid_up_to guarantees this slice decodes
                    if let Ok(text) = std::str::from_utf8(&input[position..valid_end]) {
                        output.push_str(text);
                    }

                    if input.len() - valid_end < UTF8_MAX_ENCODING_LENGTH {
                        self.remainder = input[valid_end..].to_vec();
                        return output;
                    }

                    output.push(char::REPLACEMENT_CHARACTER);
                    position = valid_end + 1;
                }
            }
        }

        output
    }
}
