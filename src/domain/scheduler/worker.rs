use serde::Serialize;

use crate::domain::communication::communicator::Communicator;
use crate::domain::communication::protocol::{Source, Tag, TagFilter, encode};
use crate::domain::rank::Rank;
use crate::domain::scheduler::coordinator::Departure;
use crate::domain::source::WorkSource;
use crate::error::{Error, Result};

/// Sends DONE to the coordinator when dropped, unless [`DoneGuard::finish`] already did.
///
/// Covers early returns through `?` as well as unwinding panics, so the
/// coordinator always sees exactly one DONE per worker.
pub struct DoneGuard<'a, C: Communicator> {
    comm: &'a mut C,
    coordinator: Rank,
    sent: bool,
}

impl<'a, C: Communicator> DoneGuard<'a, C> {
    pub fn new(comm: &'a mut C, coordinator: Rank) -> Self {
        Self { comm, coordinator, sent: false }
    }

    pub fn comm(&mut self) -> &mut C {
        &mut *self.comm
    }

    /// Regular shutdown after the sequence ran out.
    pub fn finish(mut self) -> Result<()> {
        self.send_done(Departure::Exhausted)
    }

    fn send_done(&mut self, departure: Departure) -> Result<()> {
        self.sent = true;
        self.comm.send(self.coordinator, Tag::Done, departure.to_payload())
    }
}

impl<C: Communicator> Drop for DoneGuard<'_, C> {
    fn drop(&mut self) {
        if self.sent {
            return;
        }
        let rank = self.comm.rank();
        log::warn!("Worker {} leaves the map early, notifying the coordinator.", rank);
        if let Err(e) = self.send_done(Departure::Failed) {
            log::error!("Worker {} could not deliver DONE: {}", rank, e);
        }
    }
}

fn receive_assignment<C: Communicator>(comm: &mut C, coordinator: Rank) -> Result<usize> {
    let packet = comm.recv(Source::Rank(coordinator), TagFilter::Exact(Tag::Assign))?;
    let index: u64 = packet.decode()?;
    Ok(index as usize)
}

/// The worker side of one run. Returns how many items this worker computed.
///
/// A failing `func` aborts the loop with [`Error::FunctionError`] after DONE went out.
pub fn run_worker<C, S, F, R>(comm: &mut C, source: &mut S, func: &mut F, coordinator: Rank) -> Result<usize>
where
    C: Communicator,
    S: WorkSource,
    F: FnMut(S::Item) -> anyhow::Result<R>,
    R: Serialize,
{
    let rank = comm.rank();
    let mut guard = DoneGuard::new(comm, coordinator);

    guard.comm().send(coordinator, Tag::Request, Vec::new())?;
    let mut index = receive_assignment(guard.comm(), coordinator)?;

    let mut processed = 0;
    while let Some(item) = source.fetch(index) {
        let value = func(item).map_err(Error::FunctionError)?;
        guard.comm().send(coordinator, Tag::Result, encode(&value)?)?;
        processed += 1;
        index = receive_assignment(guard.comm(), coordinator)?;
    }

    tracing::debug!("Worker {} ran out of items at index {} after computing {}.", rank, index, processed);
    guard.finish()?;
    Ok(processed)
}
