/// zig_zag_encode converts a int64 to a uint64 by zig zagging negative and positive values
/// across even and odd numbers.  Eg. [0,-1,1,-2] becomes [0, 1, 2, 3].
#[inline]
pub fn zig_zag_encode(x: i64) -> u64 {
    (x << 1) as u64 ^ (x >> 63) as u64
}

/// zig_zag_decode converts a previously zigzag encoded uint64 back to a int64.
#[inline]
pub fn zig_zag_decode(v: u64) -> i64 {
    ((v >> 1) ^ ((((v & 1) as i64) << 63) >> 63) as u64) as i64
}

#[cfg(test)]
mod tests {
    use crate::codec::zigzag::{zig_zag_decode, zig_zag_encode};

    #[test]
    fn test_zig_zag() {
        let values = [0_i64, -1, 1, -2, 2, i64::MAX, i64::MIN];
        let exp = [0_u64, 1, 2, 3, 4, u64::MAX - 1, u64::MAX];
        for (v, e) in values.iter().zip(exp.iter()) {
            assert_eq!(zig_zag_encode(*v), *e, "encode {}", v);
            assert_eq!(zig_zag_decode(*e), *v, "decode {}", e);
        }
    }
}
