// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Streaming repair of the scanner's JPEG output.
//
// When scanning through the feeder the device starts streaming the JPEG
// before it knows how many lines the page will have, so it writes the 16-bit
// Number of Lines field of the SOF0 segment as the `FF FF` sentinel and
// expects the host to patch in the real count. The fix only ever touches the
// first 256 bytes; everything after the header window is copied through
// untouched.

use scanwerk_core::error::{Result, ScanwerkError};
use tracing::{debug, warn};

/// Size of the header window the SOF0 segment must fall inside.
const HEADER_LEN: usize = 256;

const OP: &str = "jpeg.fix";

/// Incremental SOF0 line-count fixer.
///
/// Feed the downloaded stream chunk by chunk; output is withheld until the
/// 256-byte header window is complete and (possibly) patched, then becomes a
/// plain pass-through. Call [`finish`](Self::finish) at end of stream.
pub struct SofLineFixer {
    actual_lines: u16,
    header: [u8; HEADER_LEN],
    filled: usize,
    emitted: bool,
}

impl SofLineFixer {
    /// `actual_lines` is the page height the device reported in
    /// `BufferInfo/ImageHeight`.
    pub fn new(actual_lines: u16) -> Self {
        Self {
            actual_lines,
            header: [0; HEADER_LEN],
            filled: 0,
            emitted: false,
        }
    }

    /// Feed the next chunk of the input stream, appending output bytes to
    /// `out`. Nothing is appended until the header window is complete.
    pub fn feed(&mut self, chunk: &[u8], out: &mut Vec<u8>) -> Result<()> {
        if self.emitted {
            out.extend_from_slice(chunk);
            return Ok(());
        }

        let take = chunk.len().min(HEADER_LEN - self.filled);
        self.header[self.filled..self.filled + take].copy_from_slice(&chunk[..take]);
        self.filled += take;

        if self.filled == HEADER_LEN {
            self.patch_header()?;
            self.emitted = true;
            out.extend_from_slice(&self.header);
            out.extend_from_slice(&chunk[take..]);
        }
        Ok(())
    }

    /// Validate that the stream at least covered the header window.
    pub fn finish(&self) -> Result<()> {
        if self.emitted {
            Ok(())
        } else {
            Err(ScanwerkError::protocol(
                OP,
                format!("not a JPEG stream (ended after {} bytes)", self.filled),
            ))
        }
    }

    /// Locate SOF0 in the buffered header and overwrite the line-count
    /// sentinel. Every advance is bounds-checked against the window.
    fn patch_header(&mut self) -> Result<()> {
        let buf = &mut self.header;
        if buf[0] != 0xFF || buf[1] != 0xD8 {
            return Err(ScanwerkError::protocol(OP, "not a JPEG stream"));
        }

        let mut i = 2usize;
        let sof = loop {
            if i + 1 >= HEADER_LEN || buf[i] != 0xFF {
                return Err(ScanwerkError::protocol(
                    OP,
                    "SOF marker not found in the header",
                ));
            }
            if buf[i + 1] == 0xC0 {
                break i;
            }
            if i + 3 >= HEADER_LEN {
                return Err(ScanwerkError::protocol(
                    OP,
                    "SOF marker not found in the header",
                ));
            }
            // Segment length includes its own two bytes but not the marker.
            let len = ((buf[i + 2] as usize) << 8) | buf[i + 3] as usize;
            if len < 2 {
                return Err(ScanwerkError::protocol(
                    OP,
                    format!("invalid segment length {len} at offset {i}"),
                ));
            }
            i += 2 + len;
        };

        // marker (2) + segment length (2) + sample precision (1)
        let lines = sof + 5;
        if lines + 2 > HEADER_LEN {
            warn!(
                sof_offset = sof,
                "SOF0 line field lies beyond the header window; stream left unpatched"
            );
            return Ok(());
        }

        if buf[lines] == 0xFF && buf[lines + 1] == 0xFF {
            buf[lines] = (self.actual_lines >> 8) as u8;
            buf[lines + 1] = (self.actual_lines & 0xFF) as u8;
            debug!(lines = self.actual_lines, "patched SOF0 line count");
        }
        Ok(())
    }
}
