//! K-way merger.

use std::cmp::Ordering;
use std::iter::FusedIterator;
use std::marker::PhantomData;

/// Min-priority queue of `(item, source index)` pairs ordered by a compare function.
///
/// Holds at most one entry per merged source, so its size is bounded by the merge fan-in.
pub struct Frontier<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    entries: Vec<(T, usize)>,
    compare: F,
}

impl<T, F> Frontier<T, F>
where
    F: Fn(&T, &T) -> Ordering,
{
    pub fn with_capacity(capacity: usize, compare: F) -> Self {
        Frontier {
            entries: Vec::with_capacity(capacity),
            compare,
        }
    }

    /// Inserts an item taken from the source `source`.
    pub fn insert(&mut self, item: T, source: usize) {
        self.entries.push((item, source));
        self.sift_up(self.entries.len() - 1);
    }

    /// Removes the smallest item.
    pub fn pop_min(&mut self) -> Option<(T, usize)> {
        if self.entries.is_empty() {
            return None;
        }

        let last = self.entries.len() - 1;
        self.entries.swap(0, last);
        let min = self.entries.pop();
        if !self.entries.is_empty() {
            self.sift_down(0);
        }

        return min;
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn less(&self, a: usize, b: usize) -> bool {
        (self.compare)(&self.entries[a].0, &self.entries[b].0) == Ordering::Less
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if !self.less(pos, parent) {
                break;
            }
            self.entries.swap(pos, parent);
            pos = parent;
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.entries.len();
        loop {
            let left = 2 * pos + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let child = if right < len && self.less(right, left) { right } else { left };
            if !self.less(child, pos) {
                break;
            }
            self.entries.swap(pos, child);
            pos = child;
        }
    }
}

enum State {
    Init,
    Merging,
    Drained,
}

/// K-way merger implementation.
/// Merges multiple sorted inputs into a single sorted output.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of items,
/// *n* is the number of inputs.
///
/// The first error returned by any input is passed through and terminates the merge: the iterator yields nothing
/// after it.
pub struct KWayMerger<T, E, C, F>
where
    C: IntoIterator<Item = Result<T, E>>,
    F: Fn(&T, &T) -> Ordering,
{
    frontier: Frontier<T, F>,
    sources: Vec<C::IntoIter>,
    state: State,

    /// Input error type.
    error_type: PhantomData<E>,
}

impl<T, E, C, F> KWayMerger<T, E, C, F>
where
    C: IntoIterator<Item = Result<T, E>>,
    F: Fn(&T, &T) -> Ordering,
{
    /// Creates an instance of a k-way merger.
    /// Source items should be sorted in ascending order according to `compare` otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `sources` - Inputs to be merged in a single sorted one
    /// * `compare` - Function to be used to compare items
    pub fn new<I>(sources: I, compare: F) -> Self
    where
        I: IntoIterator<Item = C>,
    {
        let sources = Vec::from_iter(sources.into_iter().map(|c| c.into_iter()));
        let frontier = Frontier::with_capacity(sources.len(), compare);

        return KWayMerger {
            frontier,
            sources,
            state: State::Init,
            error_type: PhantomData,
        };
    }

    /// Number of inputs that still have unconsumed items.
    pub fn active(&self) -> usize {
        self.frontier.len()
    }

    fn seed(&mut self) -> Result<(), E> {
        for (idx, source) in self.sources.iter_mut().enumerate() {
            if let Some(item) = source.next() {
                self.frontier.insert(item?, idx);
            }
        }

        return Ok(());
    }

    fn advance(&mut self, idx: usize) -> Result<(), E> {
        match self.sources[idx].next() {
            Some(item) => self.frontier.insert(item?, idx),
            None => log::trace!("merge input {} retired", idx),
        }

        return Ok(());
    }
}

impl<T, E, C, F> Iterator for KWayMerger<T, E, C, F>
where
    C: IntoIterator<Item = Result<T, E>>,
    F: Fn(&T, &T) -> Ordering,
{
    type Item = Result<T, E>;

    /// Returns the next item from the inputs in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            State::Drained => return None,
            State::Init => {
                self.state = State::Merging;
                if let Err(err) = self.seed() {
                    self.state = State::Drained;
                    return Some(Err(err));
                }
            }
            State::Merging => {}
        }

        let (item, idx) = match self.frontier.pop_min() {
            Some(entry) => entry,
            None => {
                self.state = State::Drained;
                return None;
            }
        };
        if let Err(err) = self.advance(idx) {
            self.state = State::Drained;
            return Some(Err(err));
        }

        return Some(Ok(item));
    }
}

impl<T, E, C, F> FusedIterator for KWayMerger<T, E, C, F>
where
    C: IntoIterator<Item = Result<T, E>>,
    F: Fn(&T, &T) -> Ordering,
{
}

#[cfg(test)]
mod test {
    use rand::seq::SliceRandom;
    use rand::Rng;
    use rstest::*;
    use std::error::Error;
    use std::io::{self, ErrorKind};

    use super::{Frontier, KWayMerger};

    #[test]
    fn test_frontier() {
        let mut values = Vec::from_iter(0..50);
        values.shuffle(&mut rand::thread_rng());

        let mut frontier = Frontier::with_capacity(values.len(), |a: &i32, b: &i32| a.cmp(b));
        for (idx, value) in values.iter().enumerate() {
            frontier.insert(*value, idx);
        }
        assert_eq!(frontier.len(), 50);

        let mut popped = Vec::new();
        while let Some((value, idx)) = frontier.pop_min() {
            assert_eq!(values[idx], value);
            popped.push(value);
        }

        assert!(frontier.is_empty());
        assert_eq!(popped, Vec::from_iter(0..50));
    }

    #[test]
    fn test_frontier_reversed() {
        let mut frontier = Frontier::with_capacity(4, |a: &i32, b: &i32| a.cmp(b).reverse());
        for value in [3, 1, 4, 1, 5] {
            frontier.insert(value, 0);
        }

        let popped: Vec<i32> = std::iter::from_fn(|| frontier.pop_min().map(|(value, _)| value)).collect();
        assert_eq!(popped, vec![5, 4, 3, 1, 1]);
    }

    #[rstest]
    #[case(
        vec![],
        vec![],
    )]
    #[case(
        vec![
            vec![],
            vec![]
        ],
        vec![],
    )]
    #[case(
        vec![
            vec![Ok(4), Ok(5), Ok(7)],
            vec![Ok(1), Ok(6)],
            vec![Ok(3)],
            vec![],
        ],
        vec![Ok(1), Ok(3), Ok(4), Ok(5), Ok(6), Ok(7)],
    )]
    #[case(
        vec![
            vec![Ok(2), Ok(2), Ok(5)],
            vec![Ok(2), Ok(5)],
        ],
        vec![Ok(2), Ok(2), Ok(2), Ok(5), Ok(5)],
    )]
    #[case(
        vec![
            vec![Result::Err(io::Error::new(ErrorKind::Other, "test error"))]
        ],
        vec![
            Result::Err(io::Error::new(ErrorKind::Other, "test error"))
        ],
    )]
    #[case(
        vec![
            vec![Ok(3), Result::Err(io::Error::new(ErrorKind::Other, "test error")), Ok(4)],
            vec![Ok(1), Ok(2)],
            vec![Ok(5)],
        ],
        vec![
            Ok(1),
            Ok(2),
            Result::Err(io::Error::new(ErrorKind::Other, "test error")),
        ],
    )]
    fn test_merger(
        #[case] sources: Vec<Vec<Result<i32, io::Error>>>,
        #[case] expected_result: Vec<Result<i32, io::Error>>,
    ) {
        let merger = KWayMerger::new(sources, |a: &i32, b: &i32| a.cmp(b));
        let actual_result: Vec<Result<i32, io::Error>> = merger.collect();
        assert!(
            compare_vectors_of_result::<_, io::Error>(&actual_result, &expected_result),
            "actual={:?}, expected={:?}",
            actual_result,
            expected_result
        );
    }

    #[test]
    fn test_merger_random_sources() {
        let mut rng = rand::thread_rng();
        let mut sources: Vec<Vec<u32>> = (0..17)
            .map(|_| (0..rng.gen_range(0..40)).map(|_| rng.gen_range(0..100)).collect())
            .collect();
        for source in sources.iter_mut() {
            source.sort();
        }

        let mut expected: Vec<u32> = sources.iter().flatten().copied().collect();
        expected.sort();

        let inputs = sources
            .into_iter()
            .map(|source| source.into_iter().map(Ok::<u32, io::Error>));
        let merger = KWayMerger::new(inputs, |a: &u32, b: &u32| a.cmp(b));
        let actual: Result<Vec<u32>, io::Error> = merger.collect();

        assert_eq!(actual.unwrap(), expected);
    }

    #[test]
    fn test_merger_active_inputs() {
        let sources = vec![vec![1, 4], vec![2], vec![], vec![3, 5, 6]];
        let inputs = sources
            .into_iter()
            .map(|source| source.into_iter().map(Ok::<i32, io::Error>));
        let mut merger = KWayMerger::new(inputs, |a: &i32, b: &i32| a.cmp(b));
        assert_eq!(merger.active(), 0);

        let mut steps = Vec::new();
        while let Some(item) = merger.next() {
            steps.push((item.unwrap(), merger.active()));
        }

        assert_eq!(steps, vec![(1, 3), (2, 2), (3, 2), (4, 1), (5, 1), (6, 0)]);
        assert_eq!(merger.active(), 0);
        assert!(merger.next().is_none());
    }

    fn compare_vectors_of_result<T: PartialEq, E: Error + 'static>(
        actual: &Vec<Result<T, E>>,
        expected: &Vec<Result<T, E>>,
    ) -> bool {
        actual.len() == expected.len()
            && actual
                .into_iter()
                .zip(expected)
                .all(
                    |(actual_result, expected_result)| match (actual_result, expected_result) {
                        (Ok(actual_result), Ok(expected_result)) if actual_result == expected_result => true,
                        (Err(actual_err), Err(expected_err)) => actual_err.to_string() == expected_err.to_string(),
                        _ => false,
                    },
                )
    }
}
