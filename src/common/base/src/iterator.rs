/// TryIterator is a pull based iterator whose every step may fail, e.g. because
/// producing the next item requires blocking I/O.
pub trait TryIterator {
    type Item;

    fn try_next(&mut self) -> anyhow::Result<Option<Self::Item>>;

    /// into_results adapts the iterator into a std `Iterator` yielding `Result`s.
    /// The adapter is fused: it stops after the first error or the first `None`.
    fn into_results(self) -> Results<Self>
    where
        Self: Sized,
    {
        Results {
            itr: self,
            done: false,
        }
    }
}

pub struct Results<I> {
    itr: I,
    done: bool,
}

impl<I> Iterator for Results<I>
where
    I: TryIterator,
{
    type Item = anyhow::Result<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.itr.try_next() {
            Ok(Some(v)) => Some(Ok(v)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// TryIterators drains a list of iterators one after another.
pub struct TryIterators<ITR>
where
    ITR: TryIterator,
{
    itrs: Vec<ITR>,
    i: usize,
}

impl<ITR> TryIterators<ITR>
where
    ITR: TryIterator,
{
    pub fn new(itrs: Vec<ITR>) -> Self {
        Self { itrs, i: 0 }
    }
}

impl<ITR> TryIterator for TryIterators<ITR>
where
    ITR: TryIterator,
{
    type Item = ITR::Item;

    fn try_next(&mut self) -> anyhow::Result<Option<Self::Item>> {
        while self.i < self.itrs.len() {
            if let Some(v) = self.itrs[self.i].try_next()? {
                return Ok(Some(v));
            }

            self.i += 1;
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use crate::iterator::{TryIterator, TryIterators};

    struct Countdown(u32);

    impl TryIterator for Countdown {
        type Item = u32;

        fn try_next(&mut self) -> anyhow::Result<Option<Self::Item>> {
            if self.0 == 0 {
                return Ok(None);
            }
            self.0 -= 1;
            Ok(Some(self.0))
        }
    }

    struct Failing;

    impl TryIterator for Failing {
        type Item = u32;

        fn try_next(&mut self) -> anyhow::Result<Option<Self::Item>> {
            Err(anyhow::anyhow!("broken"))
        }
    }

    #[test]
    fn test_into_results() {
        let values: Vec<u32> = Countdown(3)
            .into_results()
            .collect::<anyhow::Result<_>>()
            .unwrap();
        assert_eq!(values, vec![2, 1, 0]);
    }

    #[test]
    fn test_into_results_stops_after_error() {
        let mut itr = Failing.into_results();
        assert!(itr.next().unwrap().is_err());
        assert!(itr.next().is_none());
    }

    #[test]
    fn test_try_iterators_chain() {
        let itrs = TryIterators::new(vec![Countdown(2), Countdown(0), Countdown(1)]);
        let values: Vec<u32> = itrs.into_results().map(|x| x.unwrap()).collect();
        assert_eq!(values, vec![1, 0, 0]);
    }
}
