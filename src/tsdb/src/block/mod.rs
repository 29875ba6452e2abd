//! Compressed files store records in fixed-size blocks. A block is decodable on its own:
//! every block starts a fresh delta state, so any block can be read without its
//! predecessors. Ordering checks of the field tree still span blocks: the first record of
//! a block is checked against the last record before it.
//!
//! Block layout: | records | zero padding | count(4B) | crc32(4B) |
//!
//! The count and checksum are little endian, the checksum covers every byte before it. The last block of a file is not padded and may be shorter than the block size.

use byteorder::{ByteOrder, LittleEndian};

use crate::codec::{CodecReader, CodecWriter};
use crate::error::SeriesError;
use crate::field::state::StateStore;
use crate::field::Field;

/// RESERVED_SPACE is the size of the block trailer.
pub const RESERVED_SPACE: usize = 8;

/// BlockCodec packs records into blocks using a field tree.
#[derive(Debug, Clone)]
pub struct BlockCodec<T> {
    root: Box<dyn Field<T>>,
    block_size: usize,
    max_record_size: usize,
    validate: bool,
}

impl<T> BlockCodec<T> {
    /// new validates `root` and checks that at least one record fits into a block.
    pub fn new(root: Box<dyn Field<T>>, block_size: usize, validate: bool) -> anyhow::Result<Self> {
        root.validate()?;

        let max_record_size = root.max_encoded_size();
        let required = max_record_size + RESERVED_SPACE;
        if block_size < required {
            return Err(SeriesError::BlockTooSmall {
                block_size,
                required,
            }
            .into());
        }

        Ok(Self {
            root,
            block_size,
            max_record_size,
            validate,
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn root(&self) -> &dyn Field<T> {
        self.root.as_ref()
    }

    /// encode_block appends one block holding a prefix of `items` to `dst` and returns the
    /// number of records it took. The block is padded to the block size unless `pad` is
    /// false and every item fit. `prev` is the record stored right before `items`, if any.
    pub fn encode_block(
        &self,
        prev: Option<&T>,
        items: &[T],
        dst: &mut Vec<u8>,
        pad: bool,
    ) -> anyhow::Result<usize> {
        if items.is_empty() {
            return Err(anyhow!("can not encode an empty block"));
        }
        if let Some(prev) = prev {
            self.check_continuity(prev, &items[0])?;
        }

        let start = dst.len();
        let capacity = self.block_size - RESERVED_SPACE;

        let mut count = 0;
        {
            let mut state = StateStore::new();
            let mut w = CodecWriter::new(dst);
            for item in items {
                if w.written() + self.max_record_size > capacity {
                    break;
                }
                self.root.serialize(item, &mut w, &mut state)?;
                count += 1;
            }
        }

        if pad || count < items.len() {
            dst.resize(start + capacity, 0);
        }

        let mut trailer = [0_u8; RESERVED_SPACE];
        LittleEndian::write_u32(&mut trailer[..4], count as u32);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&dst[start..]);
        hasher.update(&trailer[..4]);
        let checksum = hasher.finalize();
        LittleEndian::write_u32(&mut trailer[4..], checksum);
        dst.extend_from_slice(&trailer);

        Ok(count)
    }

    /// encode_blocks encodes all `items` into consecutive blocks and returns the number of
    /// blocks written. Only the last block is left unpadded.
    pub fn encode_blocks(
        &self,
        prev: Option<&T>,
        items: &[T],
        dst: &mut Vec<u8>,
    ) -> anyhow::Result<usize> {
        let mut blocks = 0;
        let mut offset = 0;
        while offset < items.len() {
            let prev = if offset == 0 {
                prev
            } else {
                Some(&items[offset - 1])
            };
            offset += self.encode_block(prev, &items[offset..], dst, false)?;
            blocks += 1;
        }
        Ok(blocks)
    }

    /// check_continuity runs the ordering checks of the field tree for `next` following
    /// `prev`. Both are encoded into a scratch buffer that is thrown away.
    fn check_continuity(&self, prev: &T, next: &T) -> anyhow::Result<()> {
        let mut scratch = Vec::with_capacity(2 * self.max_record_size);
        let mut state = StateStore::new();
        let mut w = CodecWriter::new(&mut scratch);
        self.root.serialize(prev, &mut w, &mut state)?;
        self.root.serialize(next, &mut w, &mut state)
    }

    /// record_count reads the number of records of a block from its trailer.
    pub fn record_count(&self, index: u64, block: &[u8]) -> anyhow::Result<usize> {
        if block.len() < RESERVED_SPACE || block.len() > self.block_size {
            return Err(SeriesError::CorruptBlock {
                block: index,
                reason: format!("unexpected block length {}", block.len()),
            }
            .into());
        }

        let trailer = block.len() - RESERVED_SPACE;
        Ok(LittleEndian::read_u32(&block[trailer..trailer + 4]) as usize)
    }

    /// decode_block decodes up to `max` records of `block` into `out` and returns how many
    /// were decoded. `index` only names the block in errors.
    pub fn decode_block(
        &self,
        index: u64,
        block: &[u8],
        max: usize,
        out: &mut Vec<T>,
    ) -> anyhow::Result<usize> {
        let count = self.record_count(index, block)?;
        let trailer = block.len() - RESERVED_SPACE;

        if self.validate {
            let stored = LittleEndian::read_u32(&block[trailer + 4..]);
            let checksum = crc32fast::hash(&block[..trailer + 4]);
            if stored != checksum {
                return Err(SeriesError::CorruptBlock {
                    block: index,
                    reason: format!("checksum mismatch: {:#010x} != {:#010x}", stored, checksum),
                }
                .into());
            }
        }

        let n = count.min(max);
        out.reserve(n);

        let mut state = StateStore::new();
        let mut r = CodecReader::new(&block[..trailer]);
        for i in 0..n {
            let item = self.root.deserialize(&mut r, &mut state).map_err(|e| {
                SeriesError::CorruptBlock {
                    block: index,
                    reason: format!("record {} of {}: {}", i, count, e),
                }
            })?;
            out.push(item);
        }
        Ok(n)
    }

    /// first_record decodes the first record of `block`.
    pub fn first_record(&self, index: u64, block: &[u8]) -> anyhow::Result<T> {
        let mut out = Vec::with_capacity(1);
        if self.decode_block(index, block, 1, &mut out)? == 0 {
            return Err(SeriesError::CorruptBlock {
                block: index,
                reason: "block holds no records".to_string(),
            }
            .into());
        }
        out.pop()
            .ok_or_else(|| anyhow!("block {} holds no records", index))
    }
}

#[cfg(test)]
mod tests {
    use crate::block::{BlockCodec, RESERVED_SPACE};
    use crate::error::{ErrorKind, SeriesError};
    use crate::field::{DeltaType, FieldNode, IncrementalField, RecordFields};

    #[derive(Debug, Default, Clone, Copy, PartialEq)]
    struct Tick {
        time: i64,
        price: f64,
    }

    crate::fixed_record!(Tick { time: i64, price: f64 });

    fn ticks(n: i64) -> Vec<Tick> {
        (0..n)
            .map(|i| Tick {
                time: 1000 + i,
                price: (5000 + i % 7) as f64 / 100.0,
            })
            .collect()
    }

    #[derive(Debug, Default, Clone, Copy, PartialEq)]
    struct Event {
        id: u64,
        time: i64,
    }

    crate::fixed_record!(Event { id: u64, time: i64 });

    fn events() -> Vec<Event> {
        (1..=100)
            .map(|id| Event {
                id,
                time: 1000 + id as i64,
            })
            .collect()
    }

    fn event_codec(block_size: usize) -> BlockCodec<Event> {
        let mut fields = Event::record_fields();
        fields
            .replace_field("id", Box::new(IncrementalField::<u64>::new("id")))
            .unwrap();
        fields
            .member_mut("time")
            .unwrap()
            .set_delta_type(DeltaType::Positive)
            .unwrap();
        BlockCodec::new(Box::new(fields), block_size, true).unwrap()
    }

    fn codec(block_size: usize) -> BlockCodec<Tick> {
        let mut fields = Tick::record_fields();
        fields.member_mut("price").unwrap().set_multiplier(100).unwrap();
        BlockCodec::new(Box::new(fields), block_size, true).unwrap()
    }

    #[test]
    fn test_block_too_small() {
        // two delta fields of at most 10 bytes each
        let err = BlockCodec::new(Box::new(Tick::record_fields()), 25, true).unwrap_err();
        assert_eq!(SeriesError::kind_of(&err), Some(ErrorKind::Configuration));

        assert!(BlockCodec::new(Box::new(Tick::record_fields()), 18 + RESERVED_SPACE, true).is_ok());
    }

    #[test]
    fn test_blocks() {
        let codec = codec(64);
        let items = ticks(100);

        let mut buf = vec![];
        let blocks = codec.encode_blocks(None, &items, &mut buf).unwrap();
        assert!(blocks > 1);
        assert!(buf.len() > (blocks - 1) * 64 && buf.len() <= blocks * 64);

        let mut out = vec![];
        for (i, block) in buf.chunks(64).enumerate() {
            let first = codec.first_record(i as u64, block).unwrap();
            let n = codec.decode_block(i as u64, block, usize::MAX, &mut out).unwrap();
            assert_eq!(first, out[out.len() - n]);
        }
        assert_eq!(out, items);
    }

    #[test]
    fn test_decode_limit() {
        let codec = codec(4096);
        let mut buf = vec![];
        codec.encode_block(None, &ticks(10), &mut buf, true).unwrap();
        assert_eq!(buf.len(), 4096);
        assert_eq!(codec.record_count(0, &buf).unwrap(), 10);

        let mut out = vec![];
        assert_eq!(codec.decode_block(0, &buf, 3, &mut out).unwrap(), 3);
        assert_eq!(out, ticks(3));
    }

    #[test]
    fn test_corrupt_block() {
        let codec = codec(64);
        let mut buf = vec![];
        codec.encode_block(None, &ticks(3), &mut buf, false).unwrap();
        buf[0] ^= 0xFF;

        let err = codec.decode_block(7, &buf, usize::MAX, &mut vec![]).unwrap_err();
        assert_eq!(SeriesError::kind_of(&err), Some(ErrorKind::Format));
        assert!(err.to_string().contains("block 7"), "{}", err);
    }

    #[test]
    fn test_ordering_across_blocks() {
        let codec = event_codec(64);
        let items = events();

        let mut buf = vec![];
        let first = codec.encode_block(None, &items, &mut buf, true).unwrap();
        assert!(first > 1 && first < items.len());

        // the second block starts with a gap
        let mut gap = items.clone();
        gap[first..].iter_mut().for_each(|e| e.id += 5);
        let err = codec.encode_blocks(None, &gap, &mut vec![]).unwrap_err();
        assert_eq!(SeriesError::kind_of(&err), Some(ErrorKind::Ordering));

        // the second block starts with a smaller time
        let mut back = items.clone();
        back[first..].iter_mut().for_each(|e| e.time -= 10);
        let err = codec.encode_blocks(None, &back, &mut vec![]).unwrap_err();
        assert_eq!(SeriesError::kind_of(&err), Some(ErrorKind::Ordering));

        let mut buf = vec![];
        assert!(codec.encode_blocks(None, &items, &mut buf).unwrap() > 1);
        let mut out = vec![];
        for (i, block) in buf.chunks(64).enumerate() {
            codec.decode_block(i as u64, block, usize::MAX, &mut out).unwrap();
        }
        assert_eq!(out, items);
    }

    #[test]
    fn test_ordering_against_previous_record() {
        let codec = event_codec(64);
        let items = events();

        let prev = Event { id: 0, time: 1000 };
        assert!(codec.encode_blocks(Some(&prev), &items, &mut vec![]).is_ok());

        let prev = Event { id: 3, time: 1000 };
        let err = codec.encode_blocks(Some(&prev), &items, &mut vec![]).unwrap_err();
        assert_eq!(SeriesError::kind_of(&err), Some(ErrorKind::Ordering));

        let prev = Event { id: 0, time: 5000 };
        let err = codec.encode_block(Some(&prev), &items, &mut vec![], false).unwrap_err();
        assert_eq!(SeriesError::kind_of(&err), Some(ErrorKind::Ordering));
    }
}
