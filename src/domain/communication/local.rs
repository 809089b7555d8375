use std::sync::{Arc, Barrier};
use std::thread;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::domain::communication::communicator::{Communicator, PendingPackets};
use crate::domain::communication::protocol::{Packet, Source, Tag, TagFilter};
use crate::domain::rank::{Rank, RankContext};
use crate::error::{Error, Result};

/// An in-process group: every rank is an endpoint that is driven by its own thread.
pub struct LocalGroup {
    endpoints: Vec<LocalComm>,
}

impl LocalGroup {
    pub fn new(size: usize) -> Result<Self> {
        // Validates the size once for the whole group.
        RankContext::new(0, size)?;

        let (senders, receivers): (Vec<UnboundedSender<Packet>>, Vec<UnboundedReceiver<Packet>>) =
            (0..size).map(|_| unbounded_channel()).unzip();
        let barrier = Arc::new(Barrier::new(size));

        let endpoints = receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalComm {
                rank: Rank(rank),
                peers: senders.clone(),
                inbox,
                pending: PendingPackets::new(),
                barrier: Arc::clone(&barrier),
            })
            .collect();

        Ok(Self { endpoints })
    }

    pub fn into_endpoints(self) -> Vec<LocalComm> {
        self.endpoints
    }
}

/// One member of a [`LocalGroup`].
pub struct LocalComm {
    rank: Rank,
    peers: Vec<UnboundedSender<Packet>>,
    inbox: UnboundedReceiver<Packet>,
    pending: PendingPackets,
    barrier: Arc<Barrier>,
}

impl Communicator for LocalComm {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&mut self, dest: Rank, tag: Tag, payload: Vec<u8>) -> Result<()> {
        let peer = self.peers.get(dest.index()).ok_or(Error::Unroutable { from: self.rank, to: dest })?;
        peer.send(Packet::new(self.rank, tag, payload)).map_err(|_| Error::Disconnected(dest))
    }

    fn recv(&mut self, source: Source, tag: TagFilter) -> Result<Packet> {
        if let Some(packet) = self.pending.take(source, tag) {
            return Ok(packet);
        }
        loop {
            match self.inbox.blocking_recv() {
                Some(packet) if packet.matches(source, tag) => return Ok(packet),
                Some(packet) => self.pending.push(packet),
                None => return Err(Error::Disconnected(self.rank)),
            }
        }
    }

    fn barrier(&mut self) -> Result<()> {
        self.barrier.wait();
        Ok(())
    }
}

/// Runs `body` once per rank of a fresh [`LocalGroup`], each on its own named thread.
///
/// Returns the per-rank outcome in rank order. A rank whose body panicked shows up
/// as `Err` with the panic payload, the other ranks are still joined.
pub fn run_local<T, F>(size: usize, body: F) -> Result<Vec<thread::Result<T>>>
where
    T: Send,
    F: Fn(LocalComm) -> T + Sync,
{
    let endpoints = LocalGroup::new(size)?.into_endpoints();
    let body = &body;

    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(endpoints.len());
        for comm in endpoints {
            let handle = thread::Builder::new()
                .name(format!("rank-{}", comm.rank()))
                .spawn_scoped(scope, move || body(comm))?;
            handles.push(handle);
        }
        Ok(handles.into_iter().map(|handle| handle.join()).collect())
    })
}
