use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::domain::rank::Rank;
use crate::error::Result;

/// The tags our system puts on the wire.
///
/// Packets carry the raw `u8` so that a receiver can observe values it does not
/// know; [`Tag::try_from`] hands those back unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    /// Coordinator -> worker: the next index to process.
    Assign = 0,
    /// Worker -> coordinator: "give me work", sent once at start.
    Request = 1,
    /// Worker -> coordinator: "I am leaving", sent exactly once.
    Done = 2,
    /// Worker -> coordinator: the value computed for the last assignment.
    Result = 3,
    Broadcast = 8,
    Gather = 9,
    Barrier = 10,
    /// Transport handshake: "Hi, I am rank X".
    Hello = 11,
}

impl From<Tag> for u8 {
    fn from(tag: Tag) -> Self {
        tag as u8
    }
}

impl TryFrom<u8> for Tag {
    type Error = u8;

    fn try_from(raw: u8) -> std::result::Result<Self, Self::Error> {
        match raw {
            0 => Ok(Tag::Assign),
            1 => Ok(Tag::Request),
            2 => Ok(Tag::Done),
            3 => Ok(Tag::Result),
            8 => Ok(Tag::Broadcast),
            9 => Ok(Tag::Gather),
            10 => Ok(Tag::Barrier),
            11 => Ok(Tag::Hello),
            other => Err(other),
        }
    }
}

/// Source filter of a blocking receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Any,
    Rank(Rank),
}

/// Tag filter of a blocking receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagFilter {
    Any,
    Exact(Tag),
}

/// One tagged message between two members of the group.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub source: Rank,
    pub tag: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(source: Rank, tag: Tag, payload: Vec<u8>) -> Self {
        Packet { source, tag: tag.into(), payload }
    }

    pub fn tag(&self) -> std::result::Result<Tag, u8> {
        Tag::try_from(self.tag)
    }

    pub fn matches(&self, source: Source, tag: TagFilter) -> bool {
        let source_ok = match source {
            Source::Any => true,
            Source::Rank(rank) => self.source == rank,
        };
        let tag_ok = match tag {
            TagFilter::Any => true,
            TagFilter::Exact(expected) => self.tag == u8::from(expected),
        };
        source_ok && tag_ok
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(bincode::deserialize(&self.payload)?)
    }
}

pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_tag_is_reported_raw() {
        assert_eq!(Tag::try_from(3), Ok(Tag::Result));
        assert_eq!(Tag::try_from(42), Err(42));
    }

    #[test]
    fn test_packet_filters() {
        let packet = Packet::new(Rank(2), Tag::Result, encode(&7u64).unwrap());

        assert!(packet.matches(Source::Any, TagFilter::Any));
        assert!(packet.matches(Source::Rank(Rank(2)), TagFilter::Exact(Tag::Result)));
        assert!(!packet.matches(Source::Rank(Rank(1)), TagFilter::Any));
        assert!(!packet.matches(Source::Any, TagFilter::Exact(Tag::Done)));
        assert_eq!(packet.decode::<u64>().unwrap(), 7);
    }
}
