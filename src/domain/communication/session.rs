use std::collections::{BTreeSet, HashMap};
use std::io;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::api::group_dto::GroupConfig;
use crate::domain::communication::codec::PacketCodec;
use crate::domain::communication::communicator::{Communicator, PendingPackets};
use crate::domain::communication::protocol::{Packet, Source, Tag, TagFilter};
use crate::domain::rank::{Rank, RankContext};
use crate::error::{Error, Result};

type PeerSink = FramedWrite<OwnedWriteHalf, PacketCodec>;

/// What the connection tasks hand to the owning [`TcpComm`].
#[derive(Debug)]
enum Inbound {
    Packet(Packet),
    /// The connection to this rank is gone. Always the last item from that rank.
    Closed(Rank),
}

/// A member of a multi-process group connected over TCP.
///
/// The group is a star around the coordinator: rank 0 accepts one connection per
/// worker, workers only ever talk to rank 0. Socket I/O runs on a private tokio
/// runtime; the [`Communicator`] methods block on it.
pub struct TcpComm {
    context: RankContext,
    peers: HashMap<Rank, PeerSink>,
    loopback: UnboundedSender<Inbound>,
    inbox: UnboundedReceiver<Inbound>,
    pending: PendingPackets,
    closed: BTreeSet<Rank>,
    // Must drop after the sockets above.
    runtime: Runtime,
}

impl TcpComm {
    pub fn connect(config: &GroupConfig) -> Result<Self> {
        let context = RankContext::new(config.rank, config.size)?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(format!("pull-map-io-{}", context.rank()))
            .enable_all()
            .build()?;
        let (loopback, inbox) = unbounded_channel();

        let peers = if context.is_single_process() {
            HashMap::new()
        } else if context.is_coordinator() {
            runtime.block_on(accept_workers(config, context, loopback.clone()))?
        } else {
            runtime.block_on(join_coordinator(config, context, loopback.clone()))?
        };

        tracing::info!("Rank {} connected to {} peer(s).", context, peers.len());
        Ok(Self { context, peers, loopback, inbox, pending: PendingPackets::new(), closed: BTreeSet::new(), runtime })
    }

    fn mark_closed(&mut self, peer: Rank) {
        if self.closed.insert(peer) {
            tracing::debug!("Rank {} lost its connection to rank {}.", self.context, peer);
        }
    }

    /// Moves everything that already arrived into `pending` without blocking.
    fn drain_inbox(&mut self) {
        while let Ok(inbound) = self.inbox.try_recv() {
            match inbound {
                Inbound::Packet(packet) => self.pending.push(packet),
                Inbound::Closed(peer) => self.mark_closed(peer),
            }
        }
    }

    /// Fails once nothing matching `source` can arrive anymore.
    fn ensure_reachable(&self, source: Source) -> Result<()> {
        match source {
            Source::Rank(rank) if self.closed.contains(&rank) => Err(Error::Disconnected(rank)),
            Source::Any if !self.peers.is_empty() && self.closed.len() == self.peers.len() => {
                Err(Error::Disconnected(self.closed.last().copied().unwrap_or(self.context.rank())))
            }
            _ => Ok(()),
        }
    }
}

async fn accept_workers(
    config: &GroupConfig,
    context: RankContext,
    inbox: UnboundedSender<Inbound>,
) -> Result<HashMap<Rank, PeerSink>> {
    let listener = TcpListener::bind(config.coordinator_addr.as_str()).await?;
    tracing::info!("Coordinator listening on {} for {} worker(s).", listener.local_addr()?, context.workers());

    let mut peers = HashMap::new();
    while peers.len() < context.workers() {
        let (stream, remote) = listener.accept().await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        let mut reader = FramedRead::new(read_half, PacketCodec::new());

        let hello = match reader.next().await {
            Some(Ok(packet)) if packet.tag == u8::from(Tag::Hello) => packet,
            Some(Ok(packet)) => {
                return Err(Error::HandshakeError(format!("{} opened with tag {} instead of HELLO", remote, packet.tag)));
            }
            Some(Err(e)) => return Err(e.into()),
            None => return Err(Error::HandshakeError(format!("{} closed before introducing itself", remote))),
        };

        let rank = hello.source;
        if rank == context.rank() || rank.index() >= context.size() {
            return Err(Error::HandshakeError(format!("{} claims rank {} in a group of size {}", remote, rank, context.size())));
        }
        if peers.contains_key(&rank) {
            return Err(Error::HandshakeError(format!("rank {} connected twice", rank)));
        }

        tracing::debug!("Worker {} joined from {}.", rank, remote);
        tokio::spawn(forward(reader, inbox.clone(), rank));
        peers.insert(rank, FramedWrite::new(write_half, PacketCodec::new()));
    }
    Ok(peers)
}

async fn join_coordinator(
    config: &GroupConfig,
    context: RankContext,
    inbox: UnboundedSender<Inbound>,
) -> Result<HashMap<Rank, PeerSink>> {
    let deadline = Instant::now() + Duration::from_millis(config.connect_timeout_ms);
    let retry = Duration::from_millis(config.retry_interval_ms);

    let stream = loop {
        match TcpStream::connect(config.coordinator_addr.as_str()).await {
            Ok(stream) => break stream,
            Err(e) if Instant::now() < deadline => {
                tracing::debug!("Coordinator at {} not reachable yet ({}), retrying.", config.coordinator_addr, e);
                tokio::time::sleep(retry).await;
            }
            Err(e) => return Err(e.into()),
        }
    };
    stream.set_nodelay(true)?;

    let (read_half, write_half) = stream.into_split();
    let mut sink = FramedWrite::new(write_half, PacketCodec::new());
    sink.send(Packet::new(context.rank(), Tag::Hello, Vec::new())).await?;

    let coordinator = context.coordinator_rank();
    tokio::spawn(forward(FramedRead::new(read_half, PacketCodec::new()), inbox, coordinator));

    let mut peers = HashMap::new();
    peers.insert(coordinator, sink);
    Ok(peers)
}

/// Moves decoded packets from one connection into the shared inbox until either side goes away.
async fn forward(mut reader: FramedRead<OwnedReadHalf, PacketCodec>, inbox: UnboundedSender<Inbound>, peer: Rank) {
    while let Some(frame) = reader.next().await {
        match frame {
            Ok(packet) => {
                if inbox.send(Inbound::Packet(packet)).is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::error!("Codec error on connection to rank {}: {}", peer, e);
                break;
            }
        }
    }
    tracing::debug!("Connection to rank {} closed.", peer);
    let _ = inbox.send(Inbound::Closed(peer));
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted)
}

impl Communicator for TcpComm {
    fn rank(&self) -> Rank {
        self.context.rank()
    }

    fn size(&self) -> usize {
        self.context.size()
    }

    fn send(&mut self, dest: Rank, tag: Tag, payload: Vec<u8>) -> Result<()> {
        let packet = Packet::new(self.context.rank(), tag, payload);
        if dest == self.context.rank() {
            return self.loopback.send(Inbound::Packet(packet)).map_err(|_| Error::Disconnected(dest));
        }
        if !self.peers.contains_key(&dest) {
            return Err(Error::Unroutable { from: self.context.rank(), to: dest });
        }

        self.drain_inbox();
        if self.closed.contains(&dest) {
            return Err(Error::Disconnected(dest));
        }
        let sink = self.peers.get_mut(&dest).ok_or(Error::Unroutable { from: self.context.rank(), to: dest })?;
        self.runtime.block_on(sink.send(packet)).map_err(|e| if is_disconnect(&e) { Error::Disconnected(dest) } else { e.into() })
    }

    fn recv(&mut self, source: Source, tag: TagFilter) -> Result<Packet> {
        if let Some(packet) = self.pending.take(source, tag) {
            return Ok(packet);
        }
        loop {
            self.ensure_reachable(source)?;
            // Never `None` while we hold the loopback sender; peers report through `Inbound::Closed`.
            match self.runtime.block_on(self.inbox.recv()) {
                Some(Inbound::Packet(packet)) if packet.matches(source, tag) => return Ok(packet),
                Some(Inbound::Packet(packet)) => self.pending.push(packet),
                Some(Inbound::Closed(peer)) => self.mark_closed(peer),
                None => return Err(Error::Disconnected(self.context.rank())),
            }
        }
    }

    /// Gather-then-release through the coordinator.
    fn barrier(&mut self) -> Result<()> {
        if self.context.is_single_process() {
            return Ok(());
        }
        let coordinator = self.context.coordinator_rank();
        if self.context.is_coordinator() {
            for _ in 0..self.context.workers() {
                self.recv(Source::Any, TagFilter::Exact(Tag::Barrier))?;
            }
            let workers: Vec<Rank> = self.peers.keys().copied().collect();
            for worker in workers {
                self.send(worker, Tag::Barrier, Vec::new())?;
            }
        } else {
            self.send(coordinator, Tag::Barrier, Vec::new())?;
            self.recv(Source::Rank(coordinator), TagFilter::Exact(Tag::Barrier))?;
        }
        Ok(())
    }
}
