/// Text decoded from one chunk, plus how many malformed sequences were replaced.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Decoded {
    pub text: String,
    pub replaced: usize,
}

/// Streaming UTF-8 decoder.
///
/// A code point split across two chunks is held back until the rest of it
/// arrives. Byte sequences that can never become valid are replaced with
/// U+FFFD rather than failing the stream.
#[derive(Debug, Default)]
pub struct Utf8Buffer {
    carry: Vec<u8>,
}

impl Utf8Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> Decoded {
        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(chunk);

        let mut decoded = Decoded {
            text: String::with_capacity(bytes.len()),
            replaced: 0,
        };
        let mut rest = bytes.as_slice();

        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    decoded.text.push_str(text);
                    break;
                }
                Err(err) => {
                    let (valid, tail) = rest.split_at(err.valid_up_to());
                    decoded.text.push_str(std::str::from_utf8(valid).unwrap_or_default());

                    match err.error_len() {
                        Some(len) => {
                            decoded.text.push(char::REPLACEMENT_CHARACTER);
                            decoded.replaced += 1;
                            rest = &tail[len..];
                        }
                        None => {
                            // Incomplete code point at the end of the input.
                            self.carry = tail.to_vec();
                            break;
                        }
                    }
                }
            }
        }

        decoded
    }

    /// Ends the stream. Any held-back partial code point becomes U+FFFD.
    pub fn flush(&mut self) -> Decoded {
        if self.carry.is_empty() {
            return Decoded::default();
        }

        self.carry.clear();
        Decoded {
            text: char::REPLACEMENT_CHARACTER.to_string(),
            replaced: 1,
        }
    }

    pub fn has_carry(&self) -> bool {
        !self.carry.is_empty()
    }
}
