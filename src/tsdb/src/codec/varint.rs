//! Variable-length integers use LEB128: each byte carries 7 bits of the value, least
//! significant group first, and the high bit 0x80 is set when more bytes follow.
//! Signed integers are zig zag encoded first so that small negative numbers stay short.

use crate::codec::zigzag::{zig_zag_decode, zig_zag_encode};

/// MAX_VARINT_LEN64 is the maximum length of a varint-encoded 64-bit integer.
pub const MAX_VARINT_LEN64: usize = 10;

const CONTINUATION_BIT: u8 = 0x80;
const DATA_BITS_MASK: u8 = 0x7F;

pub trait VarInt: Sized + Copy {
    /// required_space returns the number of bytes the encoded value occupies.
    fn required_space(self) -> usize;

    /// decode_var decodes a value from the front of `src`, returning it with the number of
    /// bytes consumed. None is returned for a truncated or overflowing varint.
    fn decode_var(src: &[u8]) -> Option<(Self, usize)>;

    /// encode_var writes the value into `dst`, which must hold `required_space` bytes.
    fn encode_var(self, dst: &mut [u8]) -> usize;

    fn encode_var_vec(self, dst: &mut Vec<u8>) -> usize {
        let mut b = [0; MAX_VARINT_LEN64];
        let n = self.encode_var(&mut b);
        dst.extend_from_slice(&b[..n]);
        n
    }
}

impl VarInt for u64 {
    fn required_space(self) -> usize {
        let bits = 64 - (self | 1).leading_zeros() as usize;
        (bits + 6) / 7
    }

    fn decode_var(src: &[u8]) -> Option<(Self, usize)> {
        let mut result = 0_u64;
        let mut shift = 0;

        for (i, b) in src.iter().enumerate() {
            if i == MAX_VARINT_LEN64 {
                return None;
            }

            let low = (b & DATA_BITS_MASK) as u64;
            // the 10th byte may only hold the single remaining bit
            if shift == 63 && low > 1 {
                return None;
            }
            result |= low << shift;

            if b & CONTINUATION_BIT == 0 {
                return Some((result, i + 1));
            }
            shift += 7;
        }

        None
    }

    fn encode_var(self, dst: &mut [u8]) -> usize {
        let mut v = self;
        let mut i = 0;
        while v >= CONTINUATION_BIT as u64 {
            dst[i] = (v as u8) | CONTINUATION_BIT;
            v >>= 7;
            i += 1;
        }
        dst[i] = v as u8;
        i + 1
    }
}

impl VarInt for i64 {
    fn required_space(self) -> usize {
        zig_zag_encode(self).required_space()
    }

    fn decode_var(src: &[u8]) -> Option<(Self, usize)> {
        u64::decode_var(src).map(|(v, n)| (zig_zag_decode(v), n))
    }

    fn encode_var(self, dst: &mut [u8]) -> usize {
        zig_zag_encode(self).encode_var(dst)
    }
}

impl VarInt for usize {
    fn required_space(self) -> usize {
        (self as u64).required_space()
    }

    fn decode_var(src: &[u8]) -> Option<(Self, usize)> {
        let (v, n) = u64::decode_var(src)?;
        usize::try_from(v).ok().map(|v| (v, n))
    }

    fn encode_var(self, dst: &mut [u8]) -> usize {
        (self as u64).encode_var(dst)
    }
}
