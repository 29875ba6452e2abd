use std::vec;

use common_base::iterator::TryIterator;

use crate::series::SeriesRecord;

/// SegmentReader gives access to the segments of a file: blocks of a compressed file or
/// fixed runs of records of a raw file.
pub(crate) trait SegmentReader<T> {
    /// read_segment appends every record of segment `segment` to `out`.
    fn read_segment(&self, segment: u64, out: &mut Vec<T>) -> anyhow::Result<()>;
}

/// Segments lazily reads a file segment by segment. Every step performs blocking reads;
/// dropping the iterator stops further I/O.
pub struct Segments<'a, T: SeriesRecord> {
    reader: Option<&'a dyn SegmentReader<T>>,
    next: Option<u64>,
    end: u64,
    from: Option<T::Index>,
    reverse: bool,
    remaining: usize,
}

impl<'a, T: SeriesRecord> Segments<'a, T> {
    /// new iterates from segment `start` towards the end of the file, or towards its
    /// start if `reverse` is set. Records before `from` in iteration order are skipped
    /// in the first segment read.
    pub(crate) fn new(
        reader: &'a dyn SegmentReader<T>,
        start: Option<u64>,
        end: u64,
        from: Option<T::Index>,
        reverse: bool,
        max_count: Option<usize>,
    ) -> Self {
        Self {
            reader: Some(reader),
            next: start,
            end,
            from,
            reverse,
            remaining: max_count.unwrap_or(usize::MAX),
        }
    }

    pub(crate) fn empty() -> Self {
        Self {
            reader: None,
            next: None,
            end: 0,
            from: None,
            reverse: false,
            remaining: 0,
        }
    }

    /// collect_all drains the iterator into a single vector.
    pub fn collect_all(mut self) -> anyhow::Result<Vec<T>> {
        let mut all = vec![];
        while let Some(segment) = self.try_next()? {
            all.extend(segment);
        }
        Ok(all)
    }
}

impl<'a, T: SeriesRecord> TryIterator for Segments<'a, T> {
    type Item = Vec<T>;

    fn try_next(&mut self) -> anyhow::Result<Option<Self::Item>> {
        let reader = match self.reader {
            Some(reader) => reader,
            None => return Ok(None),
        };

        while self.remaining > 0 {
            let i = match self.next {
                Some(i) if i < self.end => i,
                _ => break,
            };
            self.next = if self.reverse {
                i.checked_sub(1)
            } else {
                Some(i + 1)
            };

            let mut segment = vec![];
            reader.read_segment(i, &mut segment)?;

            if let Some(from) = self.from.take() {
                if self.reverse {
                    let n = segment.partition_point(|r| r.index() <= from);
                    segment.truncate(n);
                } else {
                    let n = segment.partition_point(|r| r.index() < from);
                    segment.drain(..n);
                }
            }
            if self.reverse {
                segment.reverse();
            }
            segment.truncate(self.remaining);
            self.remaining -= segment.len();

            if !segment.is_empty() {
                return Ok(Some(segment));
            }
        }

        self.reader = None;
        Ok(None)
    }
}

/// Records flattens `Segments` into single records.
pub struct Records<'a, T: SeriesRecord> {
    segments: Segments<'a, T>,
    current: vec::IntoIter<T>,
}

impl<'a, T: SeriesRecord> Records<'a, T> {
    pub fn new(segments: Segments<'a, T>) -> Self {
        Self {
            segments,
            current: vec![].into_iter(),
        }
    }
}

impl<'a, T: SeriesRecord> TryIterator for Records<'a, T> {
    type Item = T;

    fn try_next(&mut self) -> anyhow::Result<Option<Self::Item>> {
        loop {
            if let Some(item) = self.current.next() {
                return Ok(Some(item));
            }

            match self.segments.try_next()? {
                Some(segment) => self.current = segment.into_iter(),
                None => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use common_base::iterator::TryIterator;

    use crate::series::stream::{Records, SegmentReader, Segments};
    use crate::series::tests::{ticks, Tick};

    /// segments of 4 records with keys 0, 2, 4, ...
    struct Even(u64);

    impl SegmentReader<Tick> for Even {
        fn read_segment(&self, segment: u64, out: &mut Vec<Tick>) -> anyhow::Result<()> {
            let start = segment * 4;
            let end = (start + 4).min(self.0);
            out.extend(ticks((start..end).map(|i| i as i64 * 2)));
            Ok(())
        }
    }

    fn keys(segments: Segments<Tick>) -> Vec<i64> {
        segments
            .collect_all()
            .unwrap()
            .iter()
            .map(|t| t.time)
            .collect()
    }

    #[test]
    fn test_forward() {
        let reader = Even(10);
        let all = keys(Segments::new(&reader, Some(0), 3, None, false, None));
        assert_eq!(all, (0..10).map(|i| i * 2).collect::<Vec<_>>());

        let from = keys(Segments::new(&reader, Some(1), 3, Some(11), false, Some(3)));
        assert_eq!(from, vec![12, 14, 16]);

        // the first segment holds nothing at or after the key
        let skip = keys(Segments::new(&reader, Some(0), 3, Some(7), false, None));
        assert_eq!(skip, vec![8, 10, 12, 14, 16, 18]);
    }

    #[test]
    fn test_reverse() {
        let reader = Even(10);
        let all = keys(Segments::new(&reader, Some(2), 3, None, true, None));
        assert_eq!(all, (0..10).rev().map(|i| i * 2).collect::<Vec<_>>());

        let from = keys(Segments::new(&reader, Some(1), 3, Some(11), true, Some(4)));
        assert_eq!(from, vec![10, 8, 6, 4]);
    }

    #[test]
    fn test_records() {
        let reader = Even(10);
        let mut records = Records::new(Segments::new(&reader, Some(0), 3, Some(5), false, Some(5)));
        let mut keys = vec![];
        while let Some(t) = records.try_next().unwrap() {
            keys.push(t.time);
        }
        assert_eq!(keys, vec![6, 8, 10, 12, 14]);

        let mut empty = Records::new(Segments::<Tick>::empty());
        assert!(empty.try_next().unwrap().is_none());
    }
}
