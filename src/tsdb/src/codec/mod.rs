pub mod raw;
pub mod varint;
pub mod zigzag;

use bytes::BufMut;

use crate::codec::varint::{VarInt, MAX_VARINT_LEN64};

/// MAX_BYTES_FOR_8 is the largest number of bytes an 8 byte value takes once varint encoded.
pub const MAX_BYTES_FOR_8: usize = MAX_VARINT_LEN64;

/// CodecWriter appends encoded values to a buffer.
pub struct CodecWriter<'a> {
    buf: &'a mut Vec<u8>,
    start: usize,
}

impl<'a> CodecWriter<'a> {
    pub fn new(buf: &'a mut Vec<u8>) -> Self {
        let start = buf.len();
        Self { buf, start }
    }

    /// written returns the number of bytes written through this writer.
    pub fn written(&self) -> usize {
        self.buf.len() - self.start
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    pub fn write_var_u64(&mut self, v: u64) {
        v.encode_var_vec(self.buf);
    }

    pub fn write_var_i64(&mut self, v: i64) {
        v.encode_var_vec(self.buf);
    }

    pub fn write_str(&mut self, s: &str) {
        s.len().encode_var_vec(self.buf);
        self.buf.extend_from_slice(s.as_bytes());
    }
}

/// CodecReader consumes encoded values from a byte slice.
pub struct CodecReader<'a> {
    b: &'a [u8],
    i: usize,
}

impl<'a> CodecReader<'a> {
    pub fn new(b: &'a [u8]) -> Self {
        Self { b, i: 0 }
    }

    pub fn position(&self) -> usize {
        self.i
    }

    pub fn remaining(&self) -> usize {
        self.b.len() - self.i
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_u8(&mut self) -> anyhow::Result<u8> {
        let b = self.read_bytes(1)?;
        Ok(b[0])
    }

    pub fn read_bytes(&mut self, n: usize) -> anyhow::Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(anyhow!(
                "not enough data: need {} bytes, {} left",
                n,
                self.remaining()
            ));
        }

        let b = &self.b[self.i..self.i + n];
        self.i += n;
        Ok(b)
    }

    pub fn read_var_u64(&mut self) -> anyhow::Result<u64> {
        let (v, n) = u64::decode_var(&self.b[self.i..])
            .ok_or_else(|| anyhow!("varint parse error at offset {}", self.i))?;
        self.i += n;
        Ok(v)
    }

    pub fn read_var_i64(&mut self) -> anyhow::Result<i64> {
        let (v, n) = i64::decode_var(&self.b[self.i..])
            .ok_or_else(|| anyhow!("varint parse error at offset {}", self.i))?;
        self.i += n;
        Ok(v)
    }

    pub fn read_str(&mut self) -> anyhow::Result<&'a str> {
        let (len, n) = usize::decode_var(&self.b[self.i..])
            .ok_or_else(|| anyhow!("string length parse error at offset {}", self.i))?;
        self.i += n;

        let b = self.read_bytes(len)?;
        std::str::from_utf8(b).map_err(|e| anyhow!(e))
    }
}
