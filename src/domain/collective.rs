//! Group-wide call/reply helpers built on plain point-to-point messages.
//!
//! Over [`TcpComm`](crate::domain::communication::session::TcpComm) only the
//! coordinator can reach every member, so `root` has to be rank 0 there.
//!
//! The coordinator of a running map treats any non-protocol message as a
//! violation; start a collective only once every member has left the map.

use serde::{Serialize, de::DeserializeOwned};

use crate::domain::communication::communicator::Communicator;
use crate::domain::communication::protocol::{Source, Tag, TagFilter, encode};
use crate::domain::rank::Rank;
use crate::error::{Error, Result};

pub fn barrier<C: Communicator + ?Sized>(comm: &mut C) -> Result<()> {
    comm.barrier()
}

/// Sends the root's `value` to every member and returns it everywhere.
///
/// Non-root members may pass `None`; their value is ignored either way.
pub fn broadcast<C, T>(comm: &mut C, value: Option<T>, root: Rank) -> Result<T>
where
    C: Communicator + ?Sized,
    T: Serialize + DeserializeOwned,
{
    if comm.rank() == root {
        let value = value.ok_or_else(|| Error::ConfigError(format!("broadcast root {} has no value to send", root)))?;
        let payload = encode(&value)?;
        for member in (0..comm.size()).map(Rank).filter(|member| *member != root) {
            comm.send(member, Tag::Broadcast, payload.clone())?;
        }
        Ok(value)
    } else {
        comm.recv(Source::Rank(root), TagFilter::Exact(Tag::Broadcast))?.decode()
    }
}

/// Collects one value per member on `root`, in rank order. Everybody else gets `None`.
pub fn gather<C, T>(comm: &mut C, value: T, root: Rank) -> Result<Option<Vec<T>>>
where
    C: Communicator + ?Sized,
    T: Serialize + DeserializeOwned,
{
    if comm.rank() != root {
        comm.send(root, Tag::Gather, encode(&value)?)?;
        return Ok(None);
    }

    let mut own = Some(value);
    let mut values = Vec::with_capacity(comm.size());
    for member in (0..comm.size()).map(Rank) {
        if member == root {
            if let Some(value) = own.take() {
                values.push(value);
            }
        } else {
            values.push(comm.recv(Source::Rank(member), TagFilter::Exact(Tag::Gather))?.decode()?);
        }
    }
    Ok(Some(values))
}

/// Runs `func` on the coordinator only and hands its result to every member.
pub fn call_on_coordinator_and_broadcast<C, T, F>(comm: &mut C, func: F) -> Result<T>
where
    C: Communicator + ?Sized,
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> anyhow::Result<T>,
{
    let value = if comm.rank() == Rank::COORDINATOR { Some(func().map_err(Error::FunctionError)?) } else { None };
    broadcast(comm, value, Rank::COORDINATOR)
}
