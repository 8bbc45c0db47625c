//! Binary layout of the `.vec` half of a persisted index.
//!
//! ```text
//! magic "DXVI" | version u32 | dim u32 | count u64 | count*dim f32   (all little-endian)
//! ```

use crate::error::{Result, VectorStoreError};
use ndarray::Array2;

const MAGIC: &[u8; 4] = b"DXVI";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

pub fn encode(vectors: &Array2<f32>) -> Vec<u8> {
    let (count, dim) = vectors.dim();
    let mut out = Vec::with_capacity(HEADER_LEN + count * dim * 4);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&(dim as u32).to_le_bytes());
    out.extend_from_slice(&(count as u64).to_le_bytes());
    for value in vectors {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn decode(bytes: &[u8]) -> Result<Array2<f32>> {
    if bytes.len() < HEADER_LEN {
        return Err(VectorStoreError::InvalidFormat(format!(
            "file too short ({} bytes)",
            bytes.len()
        )));
    }
    if &bytes[0..4] != MAGIC {
        return Err(VectorStoreError::InvalidFormat("bad magic".to_string()));
    }

    let version = read_u32(&bytes[4..8]);
    if version != VERSION {
        return Err(VectorStoreError::InvalidFormat(format!(
            "unsupported version {version}"
        )));
    }

    let dim = read_u32(&bytes[8..12]) as usize;
    let count = usize::try_from(read_u64(&bytes[12..20]))
        .map_err(|_| VectorStoreError::InvalidFormat("vector count overflow".to_string()))?;

    let payload = &bytes[HEADER_LEN..];
    let expected = count
        .checked_mul(dim)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| VectorStoreError::InvalidFormat("vector payload overflow".to_string()))?;
    if payload.len() != expected {
        return Err(VectorStoreError::InvalidFormat(format!(
            "expected {expected} payload bytes for {count}x{dim}, found {}",
            payload.len()
        )));
    }

    let values: Vec<f32> = payload
        .chunks_exact(4)
        .map(|raw| f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
        .collect();
    Ok(Array2::from_shape_vec((count, dim), values)?)
}

fn read_u32(raw: &[u8]) -> u32 {
    u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])
}

fn read_u64(raw: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&raw[..8]);
    u64::from_le_bytes(buf)
}
