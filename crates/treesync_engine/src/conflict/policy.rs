//! Conflict resolution policy and outcomes.

/// Which side wins a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// The server state wins.
    #[default]
    ServerWins,
    /// Local changes win.
    ClientWins,
    /// The most recent modification time wins.
    LastWriteWins,
    /// Nothing is resolved automatically.
    Manual,
}

impl ConflictPolicy {
    /// Returns true if this policy resolves conflicts automatically.
    pub fn auto_resolves(&self) -> bool {
        !matches!(self, ConflictPolicy::Manual)
    }

    /// Picks a side for a conflict between local state and a server update.
    ///
    /// Returns true if the server should win. `Manual` never decides for
    /// the server.
    pub fn server_wins(&self, local_mtime: i64, server_mtime: i64) -> bool {
        match self {
            ConflictPolicy::ServerWins => true,
            ConflictPolicy::ClientWins | ConflictPolicy::Manual => false,
            ConflictPolicy::LastWriteWins => server_mtime >= local_mtime,
        }
    }
}

/// What was done to one entry while resolving a conflict set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    /// Local state kept; the server update was absorbed without applying it.
    KeepLocal,
    /// The server state was accepted.
    AcceptServer,
    /// The entry was renamed to make its name unique.
    Renamed,
    /// The entry was moved to a free sibling position.
    Repositioned,
    /// Mutually dependent updates were applied in one step.
    AppliedTogether,
    /// Left for manual resolution.
    Skip,
}
