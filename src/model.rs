use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct TorrentSnapshot {
    pub infohash: String,
    pub name: String,
    pub state: TorrentState,
    pub progress: f64,
    /// `None` when the daemon sent no bitfield at all.
    pub bitfield: Option<Vec<bool>>,
    pub peers: Vec<PeerStat>,
    pub files: Vec<FileEntry>,
    pub total_tx: u64,
    pub total_rx: u64,
}

impl TorrentSnapshot {
    pub fn is_stopped(&self) -> bool {
        self.state == TorrentState::Stopped
    }
}

/// Per-peer transfer counters. The daemon reports session totals; the
/// reconciler turns consecutive samples into per-second rates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerStat {
    pub id: String,
    pub tx: u64,
    pub rx: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileEntry {
    pub length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TorrentState {
    Downloading,
    Seeding,
    Stopped,
    Other(String),
}

impl TorrentState {
    pub fn as_str(&self) -> &str {
        match self {
            TorrentState::Downloading => "downloading",
            TorrentState::Seeding => "seeding",
            TorrentState::Stopped => "stopped",
            TorrentState::Other(raw) => raw,
        }
    }
}

impl From<String> for TorrentState {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "downloading" => TorrentState::Downloading,
            "seeding" => TorrentState::Seeding,
            "stopped" => TorrentState::Stopped,
            _ => TorrentState::Other(raw),
        }
    }
}

impl fmt::Display for TorrentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TorrentAction {
    Start,
    Stop,
    Remove,
    Delete,
}

impl TorrentAction {
    pub fn rpc_value(self) -> &'static str {
        match self {
            TorrentAction::Start => "start",
            TorrentAction::Stop => "stop",
            TorrentAction::Remove => "remove",
            TorrentAction::Delete => "delete",
        }
    }

    pub fn removal(delete_files: bool) -> Self {
        if delete_files {
            TorrentAction::Delete
        } else {
            TorrentAction::Remove
        }
    }

    pub fn past_tense(self) -> &'static str {
        match self {
            TorrentAction::Start => "Started",
            TorrentAction::Stop => "Stopped",
            TorrentAction::Remove => "Removed",
            TorrentAction::Delete => "Deleted",
        }
    }
}

/// Torrents listed by the daemon in one poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotSet {
    pub torrents: Vec<TorrentSnapshot>,
    /// Listed but the status call failed for a reason other than absence.
    pub unresolved: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateFilter {
    #[default]
    All,
    Downloading,
    Seeding,
}

impl StateFilter {
    pub fn label(self) -> &'static str {
        match self {
            StateFilter::All => "all",
            StateFilter::Downloading => "downloading",
            StateFilter::Seeding => "seeding",
        }
    }

    pub fn next(self) -> Self {
        match self {
            StateFilter::All => StateFilter::Downloading,
            StateFilter::Downloading => StateFilter::Seeding,
            StateFilter::Seeding => StateFilter::All,
        }
    }

    pub fn matches(self, state: &TorrentState) -> bool {
        match self {
            StateFilter::All => true,
            StateFilter::Downloading => *state == TorrentState::Downloading,
            StateFilter::Seeding => *state == TorrentState::Seeding,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_state_is_preserved() {
        let state = TorrentState::from("checking".to_string());
        assert_eq!(state, TorrentState::Other("checking".to_string()));
        assert_eq!(state.to_string(), "checking");
    }

    #[test]
    fn filter_cycles_back_to_all() {
        let filter = StateFilter::All.next().next().next();
        assert_eq!(filter, StateFilter::All);
        assert!(StateFilter::Seeding.matches(&TorrentState::Seeding));
        assert!(!StateFilter::Seeding.matches(&TorrentState::Stopped));
        assert!(StateFilter::All.matches(&TorrentState::Other("x".into())));
    }

    #[test]
    fn removal_action_follows_delete_flag() {
        assert_eq!(TorrentAction::removal(true).rpc_value(), "delete");
        assert_eq!(TorrentAction::removal(false).rpc_value(), "remove");
    }
}
