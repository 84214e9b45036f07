//! Entry identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an entry in the tree.
///
/// Ids come in three flavours:
/// - the single root directory,
/// - ids assigned by the server,
/// - ids minted locally for entries the server has never seen.
///
/// Parent links are stored as `Id`s, never as references, so the tree can
/// hold (and detect) cycles without ownership problems.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Id {
    /// The root directory.
    Root,
    /// Server-assigned id.
    Server(String),
    /// Locally created id, not yet known to the server.
    Local(Uuid),
}

impl Id {
    /// Returns the root id.
    #[inline]
    #[must_use]
    pub const fn root() -> Self {
        Id::Root
    }

    /// Creates a server id.
    #[must_use]
    pub fn server(raw: impl Into<String>) -> Self {
        Id::Server(raw.into())
    }

    /// Mints a fresh local id.
    #[must_use]
    pub fn new_local() -> Self {
        Id::Local(Uuid::new_v4())
    }

    /// Returns true for the root id.
    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        matches!(self, Id::Root)
    }

    /// Returns true for server-assigned ids.
    #[inline]
    #[must_use]
    pub fn is_server_id(&self) -> bool {
        matches!(self, Id::Server(_))
    }

    /// Returns true for locally minted ids.
    #[inline]
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Id::Local(_))
    }

    /// Returns the server-side id, if this is a server id.
    #[must_use]
    pub fn server_id(&self) -> Option<&str> {
        match self {
            Id::Server(raw) => Some(raw),
            _ => None,
        }
    }
}

impl Default for Id {
    fn default() -> Self {
        Id::Root
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({self})")
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Root => write!(f, "r"),
            Id::Server(raw) => write!(f, "s:{raw}"),
            Id::Local(uuid) => write!(f, "c:{uuid}"),
        }
    }
}
