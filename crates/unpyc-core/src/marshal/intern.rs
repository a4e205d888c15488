//! Per-parse table of objects that may be referenced again.

use super::{Node, Value};
use crate::error::{ErrorKind, ParseError, ParseResult};

/// Append-only indexed collection of interned objects.
///
/// Slots are reserved when an object's tag is read (pre-order) and filled once
/// the object is complete. A reserved slot stays unresolvable until filled, so a
/// reference from inside an object to itself is rejected.
#[derive(Debug, Clone, Default)]
pub struct InternTable {
    entries: Vec<Option<Node>>,
}

impl InternTable {
    /// Empty table.
    pub fn new() -> Self { Self::default() }

    /// Number of reserved slots.
    pub fn len(&self) -> u32 { u32::try_from(self.entries.len()).unwrap_or(u32::MAX) }

    /// True when nothing was interned.
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Reserves the next slot.
    pub fn reserve(&mut self) -> u32 {
        let slot = self.len();
        self.entries.push(None);
        slot
    }

    /// Fills a previously reserved slot.
    pub fn fill(&mut self, slot: u32, node: Node) {
        if let Some(entry) = self.entries.get_mut(slot as usize) {
            *entry = Some(node);
        }
    }

    /// Completed entry at `index`.
    pub fn get(&self, index: u32) -> Option<&Node> { self.entries.get(index as usize).and_then(Option::as_ref) }

    /// Completed entry at `index`, or [`ErrorKind::MalformedReference`] reported at `at`.
    pub fn resolve(&self, index: u32, at: u64) -> ParseResult<&Node> {
        self.get(index)
            .ok_or_else(|| ParseError::new(ErrorKind::MalformedReference { index, len: self.len() }, at))
    }

    /// Follows a back-reference one level; any other node is returned as is.
    pub fn deref<'a>(&'a self, node: &'a Node) -> &'a Node {
        match node.value {
            Value::Ref(i) => self.get(i).unwrap_or(node),
            _ => node,
        }
    }

    /// Completed entries with their index.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Node)> + '_ {
        (0_u32..).zip(self.entries.iter()).filter_map(|(i, e)| e.as_ref().map(|n| (i, n)))
    }
}
