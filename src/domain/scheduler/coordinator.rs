use crate::domain::communication::communicator::Communicator;
use crate::domain::communication::protocol::{Packet, Tag, encode};
use crate::domain::rank::Rank;
use crate::error::{Error, Result};

/// Why a worker sent DONE.
///
/// Accounting treats both the same; the distinction only feeds logging and
/// [`DynamicMap::failed_workers`](super::dynamic_map::DynamicMap::failed_workers).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Departure {
    Exhausted = 0,
    Failed = 1,
}

impl Departure {
    /// An empty payload is a plain DONE and counts as `Exhausted`.
    pub fn from_payload(payload: &[u8]) -> Self {
        match payload.first() {
            Some(1) => Departure::Failed,
            _ => Departure::Exhausted,
        }
    }

    pub fn to_payload(self) -> Vec<u8> {
        vec![self as u8]
    }
}

/// What the coordinator loop can receive from a worker.
#[derive(Debug, PartialEq, Eq)]
pub enum WorkerMessage {
    Request,
    Result(Vec<u8>),
    Done(Departure),
}

impl WorkerMessage {
    /// Any tag other than REQUEST, RESULT or DONE is a protocol violation.
    pub fn classify(packet: Packet) -> Result<(Rank, WorkerMessage)> {
        let message = match packet.tag() {
            Ok(Tag::Request) => WorkerMessage::Request,
            Ok(Tag::Result) => WorkerMessage::Result(packet.payload),
            Ok(Tag::Done) => WorkerMessage::Done(Departure::from_payload(&packet.payload)),
            Ok(_) | Err(_) => return Err(Error::ProtocolError { tag: packet.tag, sender: packet.source }),
        };
        Ok((packet.source, message))
    }
}

/// Assignment bookkeeping of one run.
#[derive(Debug)]
pub struct CoordinatorState {
    next_index: usize,
    active_workers: usize,
}

impl CoordinatorState {
    pub fn new(workers: usize) -> Self {
        Self { next_index: 0, active_workers: workers }
    }

    pub fn next_index(&self) -> usize {
        self.next_index
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers
    }

    pub fn is_finished(&self) -> bool {
        self.active_workers == 0
    }

    /// Replies with the current counter and advances it. The counter may run past
    /// the end of the sequence; the worker notices that, not us.
    pub fn assign<C: Communicator>(&mut self, comm: &mut C, worker: Rank) -> Result<()> {
        comm.send(worker, Tag::Assign, encode(&(self.next_index as u64))?)?;
        tracing::trace!("Assigned index {} to worker {}.", self.next_index, worker);
        self.next_index += 1;
        Ok(())
    }

    pub fn retire(&mut self, worker: Rank) -> Result<()> {
        self.active_workers = self.active_workers.checked_sub(1).ok_or(Error::WorkerUnderflow { sender: worker })?;
        Ok(())
    }
}
