use std::collections::VecDeque;

use crate::domain::communication::protocol::{Packet, Source, Tag, TagFilter};
use crate::domain::rank::{Rank, RankContext};
use crate::error::Result;

/// Point-to-point tagged messaging plus a group barrier.
///
/// This is all the scheduler needs from a transport. Receives block until a
/// matching packet arrives; packets that do not match are kept for later
/// receives in arrival order.
pub trait Communicator {
    fn rank(&self) -> Rank;
    fn size(&self) -> usize;
    fn send(&mut self, dest: Rank, tag: Tag, payload: Vec<u8>) -> Result<()>;
    fn recv(&mut self, source: Source, tag: TagFilter) -> Result<Packet>;
    fn barrier(&mut self) -> Result<()>;

    fn context(&self) -> Result<RankContext> {
        RankContext::new(self.rank().index(), self.size())
    }
}

impl<C: Communicator + ?Sized> Communicator for &mut C {
    fn rank(&self) -> Rank {
        (**self).rank()
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn send(&mut self, dest: Rank, tag: Tag, payload: Vec<u8>) -> Result<()> {
        (**self).send(dest, tag, payload)
    }

    fn recv(&mut self, source: Source, tag: TagFilter) -> Result<Packet> {
        (**self).recv(source, tag)
    }

    fn barrier(&mut self) -> Result<()> {
        (**self).barrier()
    }
}

/// Packets that arrived while a receive was waiting for something else.
#[derive(Debug, Default)]
pub struct PendingPackets {
    packets: VecDeque<Packet>,
}

impl PendingPackets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes the oldest packet matching the filters.
    pub fn take(&mut self, source: Source, tag: TagFilter) -> Option<Packet> {
        let position = self.packets.iter().position(|p| p.matches(source, tag))?;
        self.packets.remove(position)
    }

    pub fn push(&mut self, packet: Packet) {
        self.packets.push_back(packet);
    }
}
