//! Little-endian building blocks for the binary persistence format. All
//! persisted objects are length-prefixed records; the helpers here read and
//! write the primitive fields inside a record payload.

use crate::error::{Result, SimulationError};

pub fn write_u8(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}

pub fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn write_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn write_f64(out: &mut Vec<u8>, v: f64) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn write_f64_slice(out: &mut Vec<u8>, data: &[f64]) {
    write_u64(out, data.len() as u64);
    out.extend_from_slice(bytemuck::cast_slice(data));
}

pub fn write_str(out: &mut Vec<u8>, s: &str) {
    write_u64(out, s.len() as u64);
    out.extend_from_slice(s.as_bytes());
}

/// Wraps a payload into a length-prefixed record.
pub fn write_record(out: &mut Vec<u8>, payload: &[u8]) {
    write_u64(out, payload.len() as u64);
    out.extend_from_slice(payload);
}

fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if input.len() < n {
        return Err(SimulationError::Serialization(format!(
            "unexpected end of buffer, needed {} bytes, have {}",
            n,
            input.len()
        )));
    }
    let (head, tail) = input.split_at(n);
    *input = tail;
    Ok(head)
}

pub fn read_u8(input: &mut &[u8]) -> Result<u8> {
    Ok(take(input, 1)?[0])
}

pub fn read_u32(input: &mut &[u8]) -> Result<u32> {
    let bytes = take(input, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub fn read_u64(input: &mut &[u8]) -> Result<u64> {
    let bytes = take(input, 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(buf))
}

pub fn read_f64(input: &mut &[u8]) -> Result<f64> {
    Ok(f64::from_bits(read_u64(input)?))
}

pub fn read_f64_vec(input: &mut &[u8]) -> Result<Vec<f64>> {
    let len = read_u64(input)? as usize;
    let bytes = take(input, len * 8)?;
    let mut data = vec![0.0; len];
    // not necessarily aligned for a cast_slice, go through chunks
    for (dst, chunk) in data.iter_mut().zip(bytes.chunks_exact(8)) {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(chunk);
        *dst = f64::from_le_bytes(buf);
    }
    Ok(data)
}

pub fn read_str(input: &mut &[u8]) -> Result<String> {
    let len = read_u64(input)? as usize;
    let bytes = take(input, len)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|e| SimulationError::Serialization(format!("invalid utf-8 in name field: {}", e)))
}

pub fn read_record<'a>(input: &mut &'a [u8]) -> Result<&'a [u8]> {
    let len = read_u64(input)? as usize;
    take(input, len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_round_trip() {
        let mut buf = Vec::new();
        write_u8(&mut buf, 3);
        write_u32(&mut buf, 1234);
        write_f64(&mut buf, -0.25);
        write_f64_slice(&mut buf, &[1.0, 2.0, 3.0]);
        write_str(&mut buf, "hash_grid");

        let mut cursor = buf.as_slice();
        assert_eq!(read_u8(&mut cursor).unwrap(), 3);
        assert_eq!(read_u32(&mut cursor).unwrap(), 1234);
        assert_eq!(read_f64(&mut cursor).unwrap(), -0.25);
        assert_eq!(read_f64_vec(&mut cursor).unwrap(), vec![1.0, 2.0, 3.0]);
        assert_eq!(read_str(&mut cursor).unwrap(), "hash_grid");
        assert!(cursor.is_empty());
    }

    #[test]
    fn truncated_buffer_is_an_error() {
        let mut buf = Vec::new();
        write_f64_slice(&mut buf, &[1.0, 2.0]);
        buf.truncate(buf.len() - 1);
        let mut cursor = buf.as_slice();
        assert!(read_f64_vec(&mut cursor).is_err());
    }
}
