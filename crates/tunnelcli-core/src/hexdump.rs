//! Mixed text/hex rendering of raw stream bytes.
//!
//! Printable ASCII runs are shown quoted, everything else as `0xNN`:
//!
//! ```text
//! 'Building...' 0x0a
//! 0x00 0x00 0x00 0x05 0x07 'hello'
//! ```
//!
//! A newline byte also breaks the output line so multi-line traffic stays
//! readable in logs.

use std::fmt::Write;

const HEX: &[u8; 16] = b"0123456789abcdef";

/// Renders `bytes` as a text/hex dump.
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    let mut in_text = false;

    for (i, &b) in bytes.iter().enumerate() {
        if (0x20..=0x7e).contains(&b) {
            if !in_text {
                in_text = true;
                out.push('\'');
            }
            out.push(b as char);
        } else {
            if in_text {
                out.push_str("' ");
                in_text = false;
            }
            out.push_str("0x");
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0f) as usize] as char);
            if i < bytes.len() - 1 {
                out.push(if b == b'\n' { '\n' } else { ' ' });
            }
        }
    }

    if in_text {
        out.push('\'');
    }
    out
}

/// Renders `bytes` as a classic offset / hex / ASCII table, 16 bytes per row.
pub fn to_table(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in bytes.chunks(16).enumerate() {
        let _ = write!(out, "{:08x} ", row * 16);
        for i in 0..16 {
            match chunk.get(i) {
                Some(b) => {
                    let _ = write!(out, " {b:02x}");
                }
                None => out.push_str("   "),
            }
        }
        out.push_str("  |");
        for &b in chunk {
            out.push(if (0x20..=0x7e).contains(&b) { b as char } else { '.' });
        }
        out.push_str("|\n");
    }
    out
}
