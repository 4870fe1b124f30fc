//! Definition identifiers for HIR.
//!
//! - [`DefId`] - Global identifier for declarations (local or imported)
//! - [`CallId`] - Identifier for a call site, unique within a program

use std::fmt;

use serde::{Deserialize, Serialize};

/// A globally unique identifier for a declaration.
///
/// DefIds are assigned when a declaration is added to a [`Program`](super::Program)
/// and remain stable through every effect phase. They serve as keys in the
/// state table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DefId {
    /// Program-local index for this definition.
    pub index: u32,
}

impl DefId {
    /// Create a new DefId with the given index.
    pub const fn new(index: u32) -> Self {
        Self { index }
    }

    /// The index of this definition.
    pub const fn index(self) -> u32 {
        self.index
    }
}

impl fmt::Debug for DefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DefId({})", self.index)
    }
}

impl fmt::Display for DefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "def{}", self.index)
    }
}

/// A call site identifier.
///
/// CallIds are numbered in depth-first, left-to-right order as declarations
/// are added to a program, so they double as a stable source order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CallId {
    pub index: u32,
}

impl CallId {
    pub const fn new(index: u32) -> Self {
        Self { index }
    }
}

impl fmt::Debug for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallId({})", self.index)
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call{}", self.index)
    }
}
