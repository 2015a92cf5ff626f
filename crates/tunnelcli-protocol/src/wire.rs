//! Primitive payload encodings shared by frames and the handshake.

use std::io::{self, Read, Write};

/// Largest blob accepted by [`read_blob`].
pub const MAX_BLOB_LEN: u32 = 64 * 1024;

/// Writes `text` as a `u16` big-endian byte length followed by UTF-8 bytes.
pub fn write_utf<W: Write + ?Sized>(w: &mut W, text: &str) -> io::Result<()> {
    let len = u16::try_from(text.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("string of {} bytes does not fit a u16 length", text.len()),
        )
    })?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(text.as_bytes())
}

/// Reads a string written by [`write_utf`].
pub fn read_utf<R: Read + ?Sized>(r: &mut R) -> io::Result<String> {
    let mut len = [0u8; 2];
    r.read_exact(&mut len)?;
    let mut bytes = vec![0u8; usize::from(u16::from_be_bytes(len))];
    r.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Encodes a string payload into a fresh buffer.
pub fn utf_payload(text: &str) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(text.len() + 2);
    write_utf(&mut buf, text)?;
    Ok(buf)
}

/// Reads a big-endian `i32`.
pub fn read_i32<R: Read + ?Sized>(r: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

/// Writes `bytes` prefixed by a `u32` big-endian length.
pub fn write_blob<W: Write + ?Sized>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    let len = u32::try_from(bytes.len())
        .ok()
        .filter(|len| *len <= MAX_BLOB_LEN)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "blob too large"))?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(bytes)
}

/// Reads a blob written by [`write_blob`].
pub fn read_blob<R: Read + ?Sized>(r: &mut R) -> io::Result<Vec<u8>> {
    let mut len = [0u8; 4];
    r.read_exact(&mut len)?;
    let len = u32::from_be_bytes(len);
    if len > MAX_BLOB_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("blob of {len} bytes exceeds {MAX_BLOB_LEN}"),
        ));
    }
    let mut bytes = vec![0u8; len as usize];
    r.read_exact(&mut bytes)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn utf_layout() {
        let buf = utf_payload("en_US").unwrap();
        assert_eq!(buf, b"\x00\x05en_US");
        assert_eq!(read_utf(&mut Cursor::new(buf)).unwrap(), "en_US");
    }

    #[test]
    fn utf_handles_multibyte_and_empty() {
        for text in ["", "héllo wörld", "日本語"] {
            let buf = utf_payload(text).unwrap();
            assert_eq!(buf.len(), text.len() + 2);
            assert_eq!(read_utf(&mut Cursor::new(buf)).unwrap(), text);
        }
    }

    #[test]
    fn utf_rejects_oversized_string() {
        let text = "x".repeat(70_000);
        let err = utf_payload(&text).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn utf_rejects_invalid_bytes() {
        let err = read_utf(&mut Cursor::new(vec![0, 2, 0xff, 0xfe])).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_utf_is_eof() {
        let err = read_utf(&mut Cursor::new(vec![0, 9, b'a'])).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn blob_limits() {
        let mut buf = Vec::new();
        write_blob(&mut buf, &[1, 2, 3]).unwrap();
        assert_eq!(buf, vec![0, 0, 0, 3, 1, 2, 3]);

        let mut huge = Cursor::new((MAX_BLOB_LEN + 1).to_be_bytes().to_vec());
        assert_eq!(
            read_blob(&mut huge).unwrap_err().kind(),
            io::ErrorKind::InvalidData
        );
    }
}
