// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants::LINE_SEPARATOR;

/// Splits a producer payload into log lines.
///
/// The payload is trimmed and then split on CRLF. A payload that is only whitespace
/// yields no lines at all.
#[must_use]
pub fn parse_lines(payload: &str) -> Vec<String> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Vec::new();
    }
    payload.split(LINE_SEPARATOR).map(str::to_owned).collect()
}

/// Decodes a self-contained payload, replacing invalid UTF-8 sequences.
#[must_use]
pub fn decode_payload(buf: &[u8]) -> String {
    String::from_utf8_lossy(buf).into_owned()
}

/// Incremental UTF-8 decoder for a stream read in fixed-size chunks.
///
/// A character cut in half by a read boundary is held back until the rest of it
/// arrives. Only bytes that can never form a valid character are replaced with
/// U+FFFD.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    pending: Vec<u8>,
}

impl StreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes `chunk` together with any bytes held back from the previous call.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut decoded = String::with_capacity(self.pending.len());
        let mut rest = self.pending.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    decoded.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // Everything up to `valid_up_to` is checked UTF-8.
                    decoded.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(invalid) => {
                            decoded.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[invalid..];
                        }
                        // Truncated character at the end of the chunk.
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let held = rest.len();
        let consumed = self.pending.len() - held;
        self.pending.drain(..consumed);
        decoded
    }

    /// Flushes held-back bytes once the stream has ended.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_crlf_lines() {
        assert_eq!(parse_lines("line1\r\nline2\r\n"), vec!["line1", "line2"]);
    }

    #[test]
    fn test_parse_single_line_without_terminator() {
        assert_eq!(parse_lines("just one"), vec!["just one"]);
    }

    #[test]
    fn test_parse_trims_payload_edges_only() {
        assert_eq!(
            parse_lines("  first \r\n\r\n  second  \r\n"),
            vec!["first ", "", "  second"]
        );
    }

    #[test]
    fn test_bare_newlines_are_not_separators() {
        assert_eq!(parse_lines("a\nb\r\nc"), vec!["a\nb", "c"]);
    }

    #[test]
    fn test_whitespace_payload_yields_nothing() {
        assert!(parse_lines(" \r\n\t ").is_empty());
        assert!(parse_lines("").is_empty());
    }

    #[test]
    fn test_decode_payload_is_lossy() {
        assert_eq!(decode_payload(b"ok\xffok"), "ok\u{fffd}ok");
    }

    #[test]
    fn test_stream_decoder_joins_split_character() {
        let mut decoder = StreamDecoder::new();
        let bytes = "caf\u{e9} \u{1f980}".as_bytes();

        // "é" is split after its first byte and the crab emoji after its second.
        assert_eq!(decoder.decode(&bytes[..4]), "caf");
        assert!(decoder.has_pending());
        assert_eq!(decoder.decode(&bytes[4..8]), "\u{e9} ");
        assert_eq!(decoder.decode(&bytes[8..]), "\u{1f980}");
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_stream_decoder_replaces_invalid_bytes_only() {
        let mut decoder = StreamDecoder::new();
        assert_eq!(decoder.decode(b"a\xffb\xc3"), "a\u{fffd}b");
        assert!(decoder.has_pending());
        assert_eq!(decoder.decode(b"\xa9!"), "\u{e9}!");
    }

    #[test]
    fn test_stream_decoder_flushes_truncated_tail() {
        let mut decoder = StreamDecoder::new();
        assert_eq!(decoder.decode(b"ok\xe2\x82"), "ok");
        assert_eq!(decoder.finish(), "\u{fffd}");
        assert!(!decoder.has_pending());
        assert_eq!(decoder.finish(), "");
    }
}
