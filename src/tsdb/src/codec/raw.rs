//! The raw struct codec copies fixed-layout records to and from bytes. Every field is
//! stored little-endian in declaration order without padding, so the byte size of a
//! record is the sum of its field sizes.

use std::fmt::Debug;
use std::io::{ErrorKind, Read, Write};
use std::marker::PhantomData;

use byteorder::{ByteOrder, LittleEndian};
use ordered_float::OrderedFloat;

use crate::error::SeriesError;

/// MAX_NESTING_DEPTH limits how deep records may nest other records.
pub const MAX_NESTING_DEPTH: usize = 16;

/// RawStruct is implemented by every type that can live in a fixed-size record slot.
/// Use `fixed_record!` to implement it for a struct.
pub trait RawStruct: Copy + Default + Debug + 'static {
    /// SIZE is the number of bytes of the encoded value.
    const SIZE: usize;

    /// put encodes the value into the first `SIZE` bytes of `dst`.
    fn put(&self, dst: &mut [u8]);

    /// get decodes a value from the first `SIZE` bytes of `src`.
    fn get(src: &[u8]) -> Self;

    /// signature describes the layout of the type.
    fn signature(sig: &mut TypeSignature);
}

/// TypeSignature is a textual description of a record layout such as
/// `Tick{time:i64,value:f64}`. It is persisted with a file so that a file can not be
/// opened with a structurally different record type.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TypeSignature {
    text: String,
    depth: usize,
    max_depth: usize,
    need_sep: bool,
}

impl TypeSignature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn primitive(&mut self, name: &str) {
        self.text.push_str(name);
        self.need_sep = true;
    }

    pub fn begin_struct(&mut self, name: &str) {
        self.text.push_str(name);
        self.text.push('{');
        self.depth += 1;
        self.max_depth = self.max_depth.max(self.depth);
        self.need_sep = false;
    }

    pub fn field(&mut self, name: &str) {
        if self.need_sep {
            self.text.push(',');
        }
        self.text.push_str(name);
        self.text.push(':');
        self.need_sep = false;
    }

    pub fn end_struct(&mut self) {
        self.text.push('}');
        self.depth = self.depth.saturating_sub(1);
        self.need_sep = true;
    }

    /// max_depth returns the deepest struct nesting seen.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn as_str(&self) -> &str {
        self.text.as_str()
    }

    pub fn of<T: RawStruct>() -> Self {
        let mut sig = Self::new();
        T::signature(&mut sig);
        sig
    }
}

macro_rules! impl_raw_number {
    ($type:ty, $name:expr, $read:ident, $write:ident) => {
        impl RawStruct for $type {
            const SIZE: usize = std::mem::size_of::<$type>();

            #[inline]
            fn put(&self, dst: &mut [u8]) {
                LittleEndian::$write(dst, *self);
            }

            #[inline]
            fn get(src: &[u8]) -> Self {
                LittleEndian::$read(src)
            }

            fn signature(sig: &mut TypeSignature) {
                sig.primitive($name);
            }
        }
    };
}
impl_raw_number!(u16, "u16", read_u16, write_u16);
impl_raw_number!(u32, "u32", read_u32, write_u32);
impl_raw_number!(u64, "u64", read_u64, write_u64);
impl_raw_number!(i16, "i16", read_i16, write_i16);
impl_raw_number!(i32, "i32", read_i32, write_i32);
impl_raw_number!(i64, "i64", read_i64, write_i64);
impl_raw_number!(f32, "f32", read_f32, write_f32);
impl_raw_number!(f64, "f64", read_f64, write_f64);

impl RawStruct for u8 {
    const SIZE: usize = 1;

    fn put(&self, dst: &mut [u8]) {
        dst[0] = *self;
    }

    fn get(src: &[u8]) -> Self {
        src[0]
    }

    fn signature(sig: &mut TypeSignature) {
        sig.primitive("u8");
    }
}

impl RawStruct for i8 {
    const SIZE: usize = 1;

    fn put(&self, dst: &mut [u8]) {
        dst[0] = *self as u8;
    }

    fn get(src: &[u8]) -> Self {
        src[0] as i8
    }

    fn signature(sig: &mut TypeSignature) {
        sig.primitive("i8");
    }
}

impl RawStruct for bool {
    const SIZE: usize = 1;

    fn put(&self, dst: &mut [u8]) {
        dst[0] = *self as u8;
    }

    fn get(src: &[u8]) -> Self {
        src[0] != 0
    }

    fn signature(sig: &mut TypeSignature) {
        sig.primitive("bool");
    }
}

impl RawStruct for OrderedFloat<f64> {
    const SIZE: usize = 8;

    fn put(&self, dst: &mut [u8]) {
        LittleEndian::write_f64(dst, self.0);
    }

    fn get(src: &[u8]) -> Self {
        OrderedFloat(LittleEndian::read_f64(src))
    }

    fn signature(sig: &mut TypeSignature) {
        sig.primitive("f64");
    }
}

/// RawCodec reads and writes runs of records of type `T`. Creating the codec validates the
/// record layout once, afterwards the codec can be reused for any number of transfers.
#[derive(Debug, Clone)]
pub struct RawCodec<T: RawStruct> {
    signature: TypeSignature,
    _p: PhantomData<T>,
}

impl<T: RawStruct> RawCodec<T> {
    pub fn new() -> anyhow::Result<Self> {
        let signature = TypeSignature::of::<T>();

        if T::SIZE == 0 {
            return Err(SeriesError::serializer(
                signature.as_str(),
                "record type has no fields",
            )
            .into());
        }
        if signature.max_depth() > MAX_NESTING_DEPTH {
            return Err(SeriesError::serializer(
                signature.as_str(),
                format!(
                    "record nests {} levels deep, at most {} are supported",
                    signature.max_depth(),
                    MAX_NESTING_DEPTH
                ),
            )
            .into());
        }

        Ok(Self {
            signature,
            _p: PhantomData,
        })
    }

    pub fn item_size(&self) -> usize {
        T::SIZE
    }

    pub fn signature(&self) -> &str {
        self.signature.as_str()
    }

    /// encode_into writes `items` into the memory region `dst`.
    pub fn encode_into(&self, dst: &mut [u8], items: &[T]) -> anyhow::Result<()> {
        let need = items.len() * T::SIZE;
        if dst.len() < need {
            return Err(anyhow!(
                "buffer of {} bytes can not hold {} records of {} bytes",
                dst.len(),
                items.len(),
                T::SIZE
            ));
        }

        for (item, chunk) in items.iter().zip(dst.chunks_exact_mut(T::SIZE)) {
            item.put(chunk);
        }
        Ok(())
    }

    /// encode appends `items` to `dst`.
    pub fn encode(&self, dst: &mut Vec<u8>, items: &[T]) {
        let offset = dst.len();
        dst.resize(offset + items.len() * T::SIZE, 0);
        for (item, chunk) in items.iter().zip(dst[offset..].chunks_exact_mut(T::SIZE)) {
            item.put(chunk);
        }
    }

    /// decode_from decodes every record of the memory region `src` and appends them to `out`.
    pub fn decode_from(&self, src: &[u8], out: &mut Vec<T>) -> anyhow::Result<usize> {
        if src.len() % T::SIZE != 0 {
            return Err(anyhow!(
                "truncated record: {} bytes is not a multiple of the record size {}",
                src.len(),
                T::SIZE
            ));
        }

        let n = src.len() / T::SIZE;
        out.reserve(n);
        out.extend(src.chunks_exact(T::SIZE).map(T::get));
        Ok(n)
    }

    /// write writes every record of `items` to the stream. A short write is an error.
    pub fn write<W: Write>(&self, w: &mut W, items: &[T]) -> anyhow::Result<()> {
        let mut buf = Vec::with_capacity(items.len() * T::SIZE);
        self.encode(&mut buf, items);
        w.write_all(buf.as_slice()).map_err(|e| anyhow!(e))
    }

    /// read fills `items` from the stream and returns the number of records read, which is
    /// smaller than `items.len()` only at the end of the stream. A partial record is an error.
    pub fn read<R: Read>(&self, r: &mut R, items: &mut [T]) -> anyhow::Result<usize> {
        let mut buf = vec![0_u8; items.len() * T::SIZE];

        let mut n = 0;
        while n < buf.len() {
            match r.read(&mut buf[n..]) {
                Ok(0) => break,
                Ok(len) => n += len,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(anyhow!(e)),
            }
        }

        if n % T::SIZE != 0 {
            return Err(anyhow!(
                "truncated record: read {} bytes, record size is {}",
                n,
                T::SIZE
            ));
        }

        let count = n / T::SIZE;
        for (item, chunk) in items.iter_mut().zip(buf[..n].chunks_exact(T::SIZE)) {
            *item = T::get(chunk);
        }
        Ok(count)
    }

    /// compare returns true if both runs hold the same number of records with identical bytes.
    pub fn compare(&self, a: &[T], b: &[T]) -> bool {
        if a.len() != b.len() {
            return false;
        }

        let mut x = vec![0_u8; T::SIZE];
        let mut y = vec![0_u8; T::SIZE];
        a.iter().zip(b.iter()).all(|(l, r)| {
            l.put(&mut x);
            r.put(&mut y);
            x == y
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use crate::codec::raw::{RawCodec, RawStruct, TypeSignature};
    use crate::error::{ErrorKind, SeriesError};

    #[derive(Debug, Default, Clone, Copy, PartialEq)]
    struct Quote {
        time: i64,
        bid: f32,
        flag: bool,
    }

    crate::fixed_record!(Quote { time: i64, bid: f32, flag: bool });

    #[derive(Debug, Default, Clone, Copy, PartialEq)]
    struct Pair {
        id: u16,
        quote: Quote,
    }

    crate::fixed_record!(Pair { id: u16, quote: Quote });

    #[derive(Debug, Default, Clone, Copy, PartialEq)]
    struct Empty;

    impl RawStruct for Empty {
        const SIZE: usize = 0;

        fn put(&self, _dst: &mut [u8]) {}

        fn get(_src: &[u8]) -> Self {
            Empty
        }

        fn signature(sig: &mut TypeSignature) {
            sig.begin_struct("Empty");
            sig.end_struct();
        }
    }

    fn quotes(n: usize) -> Vec<Quote> {
        (0..n)
            .map(|i| Quote {
                time: i as i64 * 1000,
                bid: i as f32 / 4.0,
                flag: i % 2 == 0,
            })
            .collect()
    }

    #[test]
    fn test_signature() {
        assert_eq!(Quote::SIZE, 13);
        assert_eq!(Pair::SIZE, 15);

        let codec = RawCodec::<Pair>::new().unwrap();
        assert_eq!(
            codec.signature(),
            "Pair{id:u16,quote:Quote{time:i64,bid:f32,flag:bool}}"
        );
        assert_eq!(TypeSignature::of::<Pair>().max_depth(), 2);
    }

    #[test]
    fn test_empty_record_rejected() {
        let err = RawCodec::<Empty>::new().unwrap_err();
        assert_eq!(SeriesError::kind_of(&err), Some(ErrorKind::Configuration));
    }

    #[test]
    fn test_stream_round_trip() {
        let codec = RawCodec::<Quote>::new().unwrap();
        let values = quotes(10);

        let mut cursor = Cursor::new(Vec::new());
        codec.write(&mut cursor, &values).unwrap();
        assert_eq!(cursor.get_ref().len(), 10 * Quote::SIZE);

        cursor.set_position(0);
        let mut read = vec![Quote::default(); 16];
        let n = codec.read(&mut cursor, &mut read).unwrap();
        assert_eq!(n, 10);
        assert!(codec.compare(&values, &read[..n]));
        assert!(!codec.compare(&values, &read[..n - 1]));
    }

    #[test]
    fn test_read_truncated_record() {
        let codec = RawCodec::<Quote>::new().unwrap();
        let mut buf = vec![];
        codec.encode(&mut buf, &quotes(2));
        buf.pop();

        let mut read = vec![Quote::default(); 2];
        assert!(codec.read(&mut Cursor::new(buf.clone()), &mut read).is_err());
        assert!(codec.decode_from(&buf, &mut vec![]).is_err());
    }

    #[test]
    fn test_memory_region() {
        let codec = RawCodec::<Pair>::new().unwrap();
        let values: Vec<Pair> = quotes(3)
            .into_iter()
            .enumerate()
            .map(|(i, quote)| Pair {
                id: i as u16,
                quote,
            })
            .collect();

        let mut region = vec![0_u8; 3 * Pair::SIZE];
        codec.encode_into(&mut region, &values).unwrap();
        assert!(codec.encode_into(&mut region[1..], &values).is_err());

        let mut out = vec![];
        assert_eq!(codec.decode_from(&region, &mut out).unwrap(), 3);
        assert_eq!(out, values);
    }

    #[test]
    fn test_compare_detects_changed_byte() {
        let codec = RawCodec::<Quote>::new().unwrap();
        let a = quotes(4);
        let mut b = a.clone();
        assert!(codec.compare(&a, &b));

        b[3].bid = 0.1;
        assert!(!codec.compare(&a, &b));
    }
}
