//! Length-prefixed token framing shared by archives and the derivation
//! wire codec.
//!
//! Every object is a little-endian u64 length followed by the payload,
//! zero-padded to a multiple of eight bytes. Lists are a u64 count
//! followed by that many objects.

use std::io::Read;
use std::io::Write;

use crate::MAX_OBJECT_SIZE;
use crate::NarError;

pub fn write_u64<W: Write>(w: &mut W, n: u64) -> std::io::Result<()> {
    w.write_all(&n.to_le_bytes())
}

pub fn read_u64<R: Read>(r: &mut R) -> Result<u64, NarError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)
        .map_err(|_| NarError::corrupt("truncated length field"))?;
    Ok(u64::from_le_bytes(buf))
}

/// Write a framed byte string: length, payload, zero padding.
pub fn write_bytes<W: Write>(w: &mut W, data: &[u8]) -> std::io::Result<()> {
    write_u64(w, data.len() as u64)?;
    w.write_all(data)?;
    let pad = data.len().wrapping_neg() % 8;
    w.write_all(&[0u8; 8][..pad])
}

/// Write a framed UTF-8 string.
pub fn write_str<W: Write>(w: &mut W, s: &str) -> std::io::Result<()> {
    write_bytes(w, s.as_bytes())
}

/// Read a framed byte string, enforcing [`MAX_OBJECT_SIZE`] and zeroed
/// padding.
pub fn read_bytes<R: Read>(r: &mut R) -> Result<Vec<u8>, NarError> {
    let len = read_u64(r)?;
    if len > MAX_OBJECT_SIZE {
        return Err(NarError::corrupt(format!("object of {} bytes exceeds limit", len)));
    }

    let mut data = vec![0u8; len as usize];
    r.read_exact(&mut data)
        .map_err(|_| NarError::corrupt("truncated object"))?;

    let pad = (len as usize).wrapping_neg() % 8;
    if pad > 0 {
        let mut padding = [0u8; 8];
        r.read_exact(&mut padding[..pad])
            .map_err(|_| NarError::corrupt("truncated padding"))?;
        if padding[..pad].iter().any(|&b| b != 0) {
            return Err(NarError::corrupt("non-zero padding"));
        }
    }

    Ok(data)
}

/// Read a framed string that must be valid UTF-8.
pub fn read_string<R: Read>(r: &mut R) -> Result<String, NarError> {
    String::from_utf8(read_bytes(r)?).map_err(|_| NarError::corrupt("non-UTF-8 string"))
}

/// Read a framed string and require it to equal `expected`.
pub fn expect_str<R: Read>(r: &mut R, expected: &str) -> Result<(), NarError> {
    let actual = read_bytes(r)?;
    if actual != expected.as_bytes() {
        return Err(NarError::corrupt(format!(
            "expected token '{}', got '{}'",
            expected,
            String::from_utf8_lossy(&actual)
        )));
    }
    Ok(())
}

/// Write a framed list of strings: count then each string.
pub fn write_string_list<W: Write>(w: &mut W, items: &[String]) -> std::io::Result<()> {
    write_u64(w, items.len() as u64)?;
    for item in items {
        write_str(w, item)?;
    }
    Ok(())
}

/// Read a framed list of strings.
pub fn read_string_list<R: Read>(r: &mut R) -> Result<Vec<String>, NarError> {
    let count = read_u64(r)?;
    if count > MAX_OBJECT_SIZE / 8 {
        return Err(NarError::corrupt(format!("list of {} entries exceeds limit", count)));
    }
    let mut items = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        items.push(read_string(r)?);
    }
    Ok(items)
}
