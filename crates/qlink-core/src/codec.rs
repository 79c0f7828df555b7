//! QLink line codec
//!
//! The controller speaks plain 7-bit ASCII lines. Outbound commands are the
//! command text followed by the configured terminator; inbound bytes are
//! accumulated and split at the terminator, keeping any trailing partial
//! line buffered for the next read.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{CoreError, Result};

/// Line terminator used on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Terminator {
    /// Bare carriage return (`\r`)
    #[default]
    #[serde(rename = "CR")]
    Cr,
    /// Carriage return + line feed (`\r\n`)
    #[serde(rename = "CRLF")]
    Crlf,
}

impl Terminator {
    /// Wire bytes for this terminator
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Terminator::Cr => b"\r",
            Terminator::Crlf => b"\r\n",
        }
    }

    /// Configuration name (`CR` / `CRLF`)
    pub fn name(&self) -> &'static str {
        match self {
            Terminator::Cr => "CR",
            Terminator::Crlf => "CRLF",
        }
    }
}

impl FromStr for Terminator {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CR" => Ok(Terminator::Cr),
            "CRLF" => Ok(Terminator::Crlf),
            _ => Err(CoreError::UnknownTerminator(s.to_string())),
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Encode a command line for the wire.
///
/// Non-ASCII characters are dropped rather than rejected.
pub fn encode_command(command: &str, terminator: Terminator) -> Bytes {
    let mut buf = BytesMut::with_capacity(command.len() + 2);
    for b in command.bytes().filter(u8::is_ascii) {
        buf.put_u8(b);
    }
    buf.extend_from_slice(terminator.as_bytes());
    buf.freeze()
}

/// Decode raw bytes to text, ignoring anything outside 7-bit ASCII
pub fn ascii_lossy(data: &[u8]) -> String {
    data.iter()
        .filter(|b| b.is_ascii())
        .map(|&b| b as char)
        .collect()
}

/// Incremental line splitter for controller output
#[derive(Debug)]
pub struct LineDecoder {
    buf: BytesMut,
    terminator: Terminator,
    /// A bare-CR line just ended; a single LF at the head of the buffer is noise.
    skip_lf: bool,
}

impl LineDecoder {
    pub fn new(terminator: Terminator) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            terminator,
            skip_lf: false,
        }
    }

    pub fn terminator(&self) -> Terminator {
        self.terminator
    }

    /// Append freshly read bytes
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet returned as a line
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete, non-empty line, or `None` until more bytes arrive
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            if self.skip_lf && !self.buf.is_empty() {
                if self.buf[0] == b'\n' {
                    self.buf.advance(1);
                }
                self.skip_lf = false;
            }

            let term = self.terminator.as_bytes();
            let pos = find_subslice(&self.buf, term)?;
            let line = self.buf.split_to(pos);
            self.buf.advance(term.len());
            self.skip_lf = self.terminator == Terminator::Cr;

            let text = ascii_lossy(&line);
            let text = text.trim();
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
    }

    /// Drain every complete line currently buffered
    pub fn drain_lines(&mut self) -> Vec<String> {
        std::iter::from_fn(|| self.next_line()).collect()
    }

    /// Take whatever partial line is left (used when the peer closes)
    pub fn take_remainder(&mut self) -> Option<String> {
        let rest = self.buf.split();
        self.skip_lf = false;
        let text = ascii_lossy(&rest);
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_appends_terminator() {
        assert_eq!(&encode_command("VGL@ 251", Terminator::Cr)[..], b"VGL@ 251\r");
        assert_eq!(
            &encode_command("VGL@ 251", Terminator::Crlf)[..],
            b"VGL@ 251\r\n"
        );
    }

    #[test]
    fn test_encode_drops_non_ascii() {
        assert_eq!(&encode_command("VLO@ 1 5\u{e9}0", Terminator::Cr)[..], b"VLO@ 1 50\r");
    }

    #[test]
    fn test_terminator_parse() {
        assert_eq!("cr".parse::<Terminator>().unwrap(), Terminator::Cr);
        assert_eq!(" CRLF ".parse::<Terminator>().unwrap(), Terminator::Crlf);
        assert!("LF".parse::<Terminator>().is_err());
    }

    #[test]
    fn test_partial_line_is_buffered() {
        let mut dec = LineDecoder::new(Terminator::Cr);
        dec.feed(b"SW 1 23 5 1\rLS 1 2");
        assert_eq!(dec.next_line().as_deref(), Some("SW 1 23 5 1"));
        assert_eq!(dec.next_line(), None);

        dec.feed(b"3 2 100\r");
        assert_eq!(dec.next_line().as_deref(), Some("LS 1 23 2 100"));
    }

    #[test]
    fn test_stray_lf_after_cr_is_dropped() {
        let mut dec = LineDecoder::new(Terminator::Cr);
        dec.feed(b"ROS\r");
        assert_eq!(dec.next_line().as_deref(), Some("ROS"));

        // LF arrives in the next read
        dec.feed(b"\nLV 1 12 90\r\n");
        assert_eq!(dec.next_line().as_deref(), Some("LV 1 12 90"));
        assert_eq!(dec.next_line(), None);
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn test_empty_lines_skipped() {
        let mut dec = LineDecoder::new(Terminator::Crlf);
        dec.feed(b"\r\n  \r\nOK\r\n");
        assert_eq!(dec.drain_lines(), vec!["OK".to_string()]);
    }

    #[test]
    fn test_take_remainder() {
        let mut dec = LineDecoder::new(Terminator::Cr);
        dec.feed(b"4C 20");
        assert_eq!(dec.next_line(), None);
        assert_eq!(dec.take_remainder().as_deref(), Some("4C 20"));
        assert_eq!(dec.take_remainder(), None);
    }
}
