//! Fixed, little-endian wire types shared by every protocol.
//!
//! Payloads are flat `f64` arrays; counts travel as [`WireCount`]. Exchange
//! records are `[dest, len, payload...]` where `len` counts itself plus the
//! payload and `payload[0..3]` is the atom position.

use bytemuck::{Pod, Zeroable};

use crate::comm_error::CommError;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Copy a received byte message into an aligned `f64` destination.
pub fn copy_into_f64(dst: &mut [f64], src: &[u8], peer: usize) -> Result<(), CommError> {
    let bytes = cast_slice_mut(dst);
    if bytes.len() != src.len() {
        return Err(CommError::MessageSize {
            neighbor: peer,
            expected: bytes.len(),
            got: src.len(),
        });
    }
    bytes.copy_from_slice(src);
    Ok(())
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable, PartialEq, Eq)]
pub struct WireCount {
    pub n_le: u32,
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u32).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

pub const COUNT_BYTES: usize = std::mem::size_of::<WireCount>();

/// Decode a count message.
pub fn decode_count(data: &[u8], peer: usize) -> Result<usize, CommError> {
    if data.len() != COUNT_BYTES {
        return Err(CommError::MessageSize {
            neighbor: peer,
            expected: COUNT_BYTES,
            got: data.len(),
        });
    }
    let mut cnt = WireCount::default();
    cast_slice_mut(std::slice::from_mut(&mut cnt)).copy_from_slice(data);
    Ok(cnt.get())
}

/// Offset of the destination rank inside an exchange record.
pub const EXCHANGE_DEST: usize = 0;
/// Offset of the record length inside an exchange record.
pub const EXCHANGE_LEN: usize = 1;
/// Offset of the first payload value (position x) inside an exchange record.
pub const EXCHANGE_PAYLOAD: usize = 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_decodes_and_rejects_short_messages() {
        let c = [WireCount::new(1234)];
        assert_eq!(decode_count(cast_slice(&c), 3).unwrap(), 1234);
        assert!(matches!(
            decode_count(&[1, 2], 3),
            Err(CommError::MessageSize { neighbor: 3, .. })
        ));
    }

    #[test]
    fn f64_copy_checks_length() {
        let src = [1.5f64, -2.0];
        let mut dst = [0.0; 2];
        copy_into_f64(&mut dst, cast_slice(&src), 0).unwrap();
        assert_eq!(dst, src);
        let mut short = [0.0; 1];
        assert!(copy_into_f64(&mut short, cast_slice(&src), 0).is_err());
    }
}
