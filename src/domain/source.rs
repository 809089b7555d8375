use std::iter::Fuse;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::Error;

/// How a worker locates the element behind an assigned index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressingMode {
    /// Direct positional lookup.
    #[default]
    Indexable,
    /// Walk the sequence from its start, counting positions.
    Scanning,
}

impl FromStr for AddressingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "indexable" | "index" => Ok(AddressingMode::Indexable),
            "scanning" | "scan" => Ok(AddressingMode::Scanning),
            other => Err(Error::ConfigError(format!("unknown addressing mode '{}'", other))),
        }
    }
}

/// A read-only sequence that workers fetch elements from by index.
pub trait WorkSource {
    type Item;

    /// The element at `index`, or `None` once the index lies past the end.
    fn fetch(&mut self, index: usize) -> Option<Self::Item>;

    /// Exact number of elements, if known without walking the sequence.
    fn len_hint(&self) -> Option<usize>;
}

/// Random access over a slice.
#[derive(Debug)]
pub struct Indexed<'a, T> {
    items: &'a [T],
}

impl<'a, T> Indexed<'a, T> {
    pub fn new(items: &'a [T]) -> Self {
        Self { items }
    }
}

impl<'a, T> WorkSource for Indexed<'a, T> {
    type Item = &'a T;

    fn fetch(&mut self, index: usize) -> Option<&'a T> {
        self.items.get(index)
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.items.len())
    }
}

/// Positional scanning over any cloneable iterator.
///
/// A worker is assigned strictly increasing indices, so the scan continues from
/// where the previous fetch stopped. Asking for an earlier index restarts the
/// walk from the beginning.
#[derive(Debug, Clone)]
pub struct Scanning<I: Iterator + Clone> {
    origin: I,
    cursor: Fuse<I>,
    position: usize,
}

impl<I: Iterator + Clone> Scanning<I> {
    pub fn new(items: impl IntoIterator<IntoIter = I>) -> Self {
        let origin = items.into_iter();
        let cursor = origin.clone().fuse();
        Self { origin, cursor, position: 0 }
    }

    /// Number of elements consumed from the underlying iterator so far.
    pub fn position(&self) -> usize {
        self.position
    }
}

impl<I: Iterator + Clone> WorkSource for Scanning<I> {
    type Item = I::Item;

    fn fetch(&mut self, index: usize) -> Option<I::Item> {
        if index < self.position {
            self.cursor = self.origin.clone().fuse();
            self.position = 0;
        }
        let item = self.cursor.nth(index - self.position);
        self.position = index + 1;
        item
    }

    fn len_hint(&self) -> Option<usize> {
        match self.origin.size_hint() {
            (lower, Some(upper)) if lower == upper => Some(lower),
            _ => None,
        }
    }
}

/// A slice addressed either way, chosen at runtime.
#[derive(Debug)]
pub enum SliceSource<'a, T> {
    Indexed(Indexed<'a, T>),
    Scanning(Scanning<std::slice::Iter<'a, T>>),
}

impl<'a, T> SliceSource<'a, T> {
    pub fn new(items: &'a [T], mode: AddressingMode) -> Self {
        match mode {
            AddressingMode::Indexable => SliceSource::Indexed(Indexed::new(items)),
            AddressingMode::Scanning => SliceSource::Scanning(Scanning::new(items.iter())),
        }
    }
}

impl<'a, T> WorkSource for SliceSource<'a, T> {
    type Item = &'a T;

    fn fetch(&mut self, index: usize) -> Option<&'a T> {
        match self {
            SliceSource::Indexed(source) => source.fetch(index),
            SliceSource::Scanning(source) => source.fetch(index),
        }
    }

    fn len_hint(&self) -> Option<usize> {
        match self {
            SliceSource::Indexed(source) => source.len_hint(),
            SliceSource::Scanning(source) => source.len_hint(),
        }
    }
}
