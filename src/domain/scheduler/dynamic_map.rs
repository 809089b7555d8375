use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};

use crate::domain::communication::communicator::Communicator;
use crate::domain::communication::protocol::{Source, TagFilter};
use crate::domain::progress::{LogProgress, NoProgress, ProgressReporter};
use crate::domain::rank::RankContext;
use crate::domain::scheduler::coordinator::{CoordinatorState, Departure, WorkerMessage};
use crate::domain::scheduler::worker::run_worker;
use crate::domain::source::{AddressingMode, SliceSource, WorkSource};
use crate::error::{Error, Result};

/// Knobs of [`dynamic_map`] and [`map_unordered`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapOptions {
    pub progress: bool,
    /// Completed items between two progress log lines.
    pub progress_step: usize,
    pub addressing: AddressingMode,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self { progress: false, progress_step: 100, addressing: AddressingMode::Indexable }
    }
}

impl MapOptions {
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_addressing(mut self, addressing: AddressingMode) -> Self {
        self.addressing = addressing;
        self
    }

    fn reporter(&self) -> Box<dyn ProgressReporter> {
        if self.progress { Box::new(LogProgress::new("dynamic_map", self.progress_step)) } else { Box::new(NoProgress) }
    }
}

enum Phase {
    /// Nothing happened yet; the first `next` decides the path.
    Entry,
    Sequential { next_index: usize },
    Coordinating(CoordinatorState),
    Finished,
}

/// Lazy result sequence of one map over a group.
///
/// Every member of the group builds one and drives it to the end. On the
/// coordinator it yields results in completion order. On a worker the first
/// call to `next` runs the whole worker protocol and then reports the end of
/// the sequence, or the error that stopped this worker. In a group of one the
/// function is applied in input order without any messaging.
///
/// Dropping the coordinator's sequence before it is exhausted leaves the
/// workers waiting; there is no cancellation.
pub struct DynamicMap<C, S, F, R> {
    comm: C,
    source: S,
    func: F,
    context: RankContext,
    progress: Box<dyn ProgressReporter>,
    phase: Phase,
    processed: usize,
    failed_workers: usize,
    _result: PhantomData<fn() -> R>,
}

impl<C, S, F, R> DynamicMap<C, S, F, R>
where
    C: Communicator,
    S: WorkSource,
    F: FnMut(S::Item) -> anyhow::Result<R>,
    R: Serialize + DeserializeOwned,
{
    pub fn new(comm: C, source: S, func: F) -> Result<Self> {
        let context = comm.context()?;
        Ok(Self {
            comm,
            source,
            func,
            context,
            progress: Box::new(NoProgress),
            phase: Phase::Entry,
            processed: 0,
            failed_workers: 0,
            _result: PhantomData,
        })
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn context(&self) -> RankContext {
        self.context
    }

    /// Items this member computed (worker, single process) or received (coordinator).
    pub fn processed(&self) -> usize {
        self.processed
    }

    /// Workers that left through an error or a panic instead of running out of items.
    pub fn failed_workers(&self) -> usize {
        self.failed_workers
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Finished)
    }

    fn enter(&mut self) -> Result<()> {
        if self.context.is_single_process() {
            tracing::debug!("Single member group, mapping sequentially.");
            self.progress.start(self.source.len_hint());
            self.phase = Phase::Sequential { next_index: 0 };
            return Ok(());
        }

        self.comm.barrier()?;

        if self.context.is_coordinator() {
            tracing::info!("Coordinator starts dispatching to {} worker(s).", self.context.workers());
            self.progress.start(self.source.len_hint());
            self.progress.describe(&format!("busy: {}", self.context.workers()));
            self.phase = Phase::Coordinating(CoordinatorState::new(self.context.workers()));
        } else {
            self.phase = Phase::Finished;
            let coordinator = self.context.coordinator_rank();
            self.processed = run_worker(&mut self.comm, &mut self.source, &mut self.func, coordinator)?;
        }
        Ok(())
    }

    fn next_sequential(&mut self) -> Option<Result<R>> {
        let index = match self.phase {
            Phase::Sequential { next_index } => next_index,
            _ => return None,
        };

        let Some(item) = self.source.fetch(index) else {
            self.progress.finish();
            self.phase = Phase::Finished;
            return None;
        };
        self.phase = Phase::Sequential { next_index: index + 1 };

        match (self.func)(item) {
            Ok(value) => {
                self.processed += 1;
                self.progress.advance(1);
                Some(Ok(value))
            }
            Err(e) => {
                self.progress.finish();
                self.phase = Phase::Finished;
                Some(Err(Error::FunctionError(e)))
            }
        }
    }

    /// Runs the coordinator loop until the next RESULT arrives or every worker is done.
    fn coordinate(&mut self) -> Result<Option<R>> {
        let Phase::Coordinating(state) = &mut self.phase else {
            return Ok(None);
        };

        while !state.is_finished() {
            let packet = self.comm.recv(Source::Any, TagFilter::Any)?;
            let (sender, message) = WorkerMessage::classify(packet)?;

            match message {
                WorkerMessage::Request => state.assign(&mut self.comm, sender)?,
                WorkerMessage::Result(payload) => {
                    let value: R = bincode::deserialize(&payload)?;
                    // Reply before yielding.
                    state.assign(&mut self.comm, sender)?;
                    self.processed += 1;
                    self.progress.advance(1);
                    return Ok(Some(value));
                }
                WorkerMessage::Done(departure) => {
                    state.retire(sender)?;
                    if departure == Departure::Failed {
                        self.failed_workers += 1;
                        tracing::warn!("Worker {} stopped after a failure.", sender);
                    }
                    self.progress.describe(&format!("busy: {}", state.active_workers()));
                }
            }
        }

        tracing::info!(
            "All workers done: {} result(s), {} indices handed out, {} failed worker(s).",
            self.processed,
            state.next_index(),
            self.failed_workers
        );
        Ok(None)
    }
}

impl<C, S, F, R> Iterator for DynamicMap<C, S, F, R>
where
    C: Communicator,
    S: WorkSource,
    F: FnMut(S::Item) -> anyhow::Result<R>,
    R: Serialize + DeserializeOwned,
{
    type Item = Result<R>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.phase {
                Phase::Entry => {
                    if let Err(e) = self.enter() {
                        self.phase = Phase::Finished;
                        return Some(Err(e));
                    }
                }
                Phase::Sequential { .. } => return self.next_sequential(),
                Phase::Coordinating(_) => {
                    return match self.coordinate() {
                        Ok(Some(value)) => Some(Ok(value)),
                        Ok(None) => {
                            self.progress.finish();
                            self.phase = Phase::Finished;
                            None
                        }
                        Err(e) => {
                            self.progress.finish();
                            self.phase = Phase::Finished;
                            Some(Err(e))
                        }
                    };
                }
                Phase::Finished => return None,
            }
        }
    }
}

/// Maps a fallible `func` over `items` across the group of `comm`.
///
/// Call it identically on every member. Only the coordinator's iterator yields
/// values, in completion order; with a single member the order is the input order.
pub fn dynamic_map<'a, C, T, R, F>(
    comm: C,
    items: &'a [T],
    func: F,
    options: MapOptions,
) -> Result<DynamicMap<C, SliceSource<'a, T>, F, R>>
where
    C: Communicator,
    F: FnMut(&'a T) -> anyhow::Result<R>,
    R: Serialize + DeserializeOwned,
{
    let source = SliceSource::new(items, options.addressing);
    Ok(DynamicMap::new(comm, source, func)?.with_progress(options.reporter()))
}

/// [`dynamic_map`] for functions that cannot fail.
pub fn map_unordered<'a, C, T, R, F>(
    comm: C,
    items: &'a [T],
    mut func: F,
    options: MapOptions,
) -> Result<DynamicMap<C, SliceSource<'a, T>, impl FnMut(&'a T) -> anyhow::Result<R>, R>>
where
    C: Communicator,
    F: FnMut(&'a T) -> R,
    R: Serialize + DeserializeOwned,
{
    dynamic_map(comm, items, move |item| Ok(func(item)), options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::communication::local::LocalGroup;
    use crate::domain::source::Scanning;
    use tracing_test::traced_test;

    fn single_member() -> crate::domain::communication::local::LocalComm {
        LocalGroup::new(1).unwrap().into_endpoints().remove(0)
    }

    #[test]
    fn test_single_process_keeps_input_order() {
        let letters = ['a', 'b', 'c'];
        let map = map_unordered(single_member(), &letters, |c| c.to_ascii_uppercase(), MapOptions::default()).unwrap();

        let output: Vec<char> = map.collect::<Result<_>>().unwrap();
        assert_eq!(output, vec!['A', 'B', 'C']);
    }

    #[test]
    fn test_single_process_scanning_matches_indexable() {
        let data: Vec<u32> = (0..20).collect();
        let options = MapOptions::default().with_addressing(AddressingMode::Scanning).with_progress(true);
        let map = map_unordered(single_member(), &data, |x| x * 3, options).unwrap();

        let output: Vec<u32> = map.collect::<Result<_>>().unwrap();
        assert_eq!(output, data.iter().map(|x| x * 3).collect::<Vec<_>>());
    }

    #[test]
    fn test_single_process_stops_at_first_failure() {
        let data = [1, 2, 0, 4];
        let mut map = dynamic_map(
            single_member(),
            &data,
            |x: &i32| if *x == 0 { Err(anyhow::anyhow!("zero")) } else { Ok(10 / x) },
            MapOptions::default(),
        )
        .unwrap();

        assert_eq!(map.next().unwrap().unwrap(), 10);
        assert_eq!(map.next().unwrap().unwrap(), 5);
        assert!(matches!(map.next(), Some(Err(Error::FunctionError(_)))));
        assert!(map.next().is_none());
        assert!(map.is_finished());
    }

    #[test]
    fn test_generic_source_over_iterator() {
        let words = "one two three";
        let map = DynamicMap::new(single_member(), Scanning::new(words.split(' ')), |w: &str| Ok::<_, anyhow::Error>(w.len())).unwrap();

        let lengths: Vec<usize> = map.collect::<Result<_>>().unwrap();
        assert_eq!(lengths, vec![3, 3, 5]);
    }

    #[test]
    fn test_empty_sequence() {
        let data: [u8; 0] = [];
        let mut map = map_unordered(single_member(), &data, |x| *x, MapOptions::default()).unwrap();
        assert!(map.next().is_none());
        assert_eq!(map.processed(), 0);
    }

    #[traced_test]
    #[test]
    fn test_single_process_logs_its_path() {
        let data = [1u8];
        let map = map_unordered(single_member(), &data, |x| *x, MapOptions::default()).unwrap();
        assert_eq!(map.count(), 1);
        assert!(logs_contain("mapping sequentially"));
    }
}
