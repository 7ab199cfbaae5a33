/// What the poller reports to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A poll changed the timeline; re-render it.
    SnapshotChanged { messages: usize },
    /// A poll failed; polling continues on the normal interval.
    Reconnecting { failures: u32 },
    /// The first successful poll after one or more failures.
    Recovered,
    /// The server denied access to this network identity. Polling stops.
    Blocked,
}
