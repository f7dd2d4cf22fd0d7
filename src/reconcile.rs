use std::{
    collections::{HashMap, HashSet},
    fmt, mem,
    time::Instant,
};

use log::{debug, warn};

use crate::{
    format::{
        bitfield_percent, format_peers, format_percent, format_rate, format_rate_totals,
        format_ratio, humanize_bytes, toggle_label, total_size, MalformedData,
    },
    model::{PeerStat, SnapshotSet, StateFilter, TorrentAction, TorrentSnapshot},
};

// unresolved or malformed cycles in a row before a stale row is dropped
const MAX_MISSES: u8 = 2;

const CELL_COUNT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Cell {
    Name,
    State,
    Progress,
    Pieces,
    Rate,
    Ratio,
    Size,
    Peers,
    Toggle,
    Remove,
}

impl Cell {
    pub const ALL: [Cell; CELL_COUNT] = [
        Cell::Name,
        Cell::State,
        Cell::Progress,
        Cell::Pieces,
        Cell::Rate,
        Cell::Ratio,
        Cell::Size,
        Cell::Peers,
        Cell::Toggle,
        Cell::Remove,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowAction {
    Change {
        infohash: String,
        action: TorrentAction,
    },
    Remove {
        infohash: String,
    },
}

pub trait RenderTarget {
    type Handle;

    fn create_row(&mut self, infohash: &str) -> Self::Handle;
    fn set_text(&mut self, row: &Self::Handle, cell: Cell, text: &str);
    /// Replaces any handler previously bound to the same cell.
    fn on_click(&mut self, row: &Self::Handle, cell: Cell, action: RowAction);
    fn remove_row(&mut self, row: Self::Handle);
}

/// Rendered text of every cell; also the fingerprint used for diffing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowContent {
    cells: [String; CELL_COUNT],
    stopped: bool,
}

impl RowContent {
    pub fn build(snapshot: &TorrentSnapshot, rates: &[PeerStat]) -> Result<Self, MalformedData> {
        let pieces = match &snapshot.bitfield {
            Some(bits) => format!("{:.2}%", bitfield_percent(bits)?),
            None => "-".to_string(),
        };
        let progress = format_percent(snapshot.progress)?;
        let name = if snapshot.name.is_empty() {
            snapshot.infohash.clone()
        } else {
            snapshot.name.clone()
        };
        let stopped = snapshot.is_stopped();
        Ok(Self {
            cells: [
                name,
                snapshot.state.to_string(),
                progress,
                pieces,
                format_rate(rates),
                format!("({} ratio)", format_ratio(snapshot.total_tx, snapshot.total_rx)),
                humanize_bytes(total_size(&snapshot.files)),
                format_peers(snapshot.peers.len()),
                toggle_label(stopped).to_string(),
                "\u{2715}".to_string(),
            ],
            stopped,
        })
    }

    pub fn text(&self, cell: Cell) -> &str {
        &self.cells[cell.index()]
    }

    fn changed_cells<'a>(&'a self, previous: &'a RowContent) -> impl Iterator<Item = Cell> + 'a {
        Cell::ALL
            .into_iter()
            .filter(move |cell| self.text(*cell) != previous.text(*cell))
    }
}

#[derive(Debug, Clone)]
struct PeerSample {
    taken_at: Instant,
    counters: HashMap<String, (u64, u64)>,
}

impl PeerSample {
    fn take(peers: &[PeerStat], taken_at: Instant) -> Self {
        let counters = peers
            .iter()
            .filter(|peer| !peer.id.is_empty())
            .map(|peer| (peer.id.clone(), (peer.tx, peer.rx)))
            .collect();
        Self { taken_at, counters }
    }
}

// Peers without a baseline, or whose counters went backwards, read as zero.
fn peer_rates(previous: Option<&PeerSample>, peers: &[PeerStat], now: Instant) -> Vec<PeerStat> {
    let elapsed = previous
        .map(|sample| now.saturating_duration_since(sample.taken_at).as_secs_f64())
        .unwrap_or(0.0);
    peers
        .iter()
        .map(|peer| {
            let baseline = previous.and_then(|sample| sample.counters.get(&peer.id));
            let (tx, rx) = match baseline {
                Some(&(tx0, rx0)) if elapsed > 0.0 => (
                    (peer.tx.saturating_sub(tx0) as f64 / elapsed).round() as u64,
                    (peer.rx.saturating_sub(rx0) as f64 / elapsed).round() as u64,
                ),
                _ => (0, 0),
            };
            PeerStat {
                id: peer.id.clone(),
                tx,
                rx,
            }
        })
        .collect()
}

#[derive(Debug)]
struct TorrentView<H> {
    handle: H,
    content: RowContent,
    misses: u8,
    sample: PeerSample,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalSummary {
    pub torrents: usize,
    pub peers: usize,
    pub total_tx: u64,
    pub total_rx: u64,
    pub rate_tx: u64,
    pub rate_rx: u64,
}

impl fmt::Display for GlobalSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} peers connected on {} torrents ({} ratio) {}",
            self.peers,
            self.torrents,
            format_ratio(self.total_tx, self.total_rx),
            format_rate_totals(self.rate_tx, self.rate_rx)
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub cell_updates: usize,
    pub removed: usize,
    pub skipped: usize,
    pub summary: GlobalSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Created,
    Updated,
    Unchanged,
    Hidden,
    Duplicate,
    Skipped,
}

#[derive(Debug)]
pub struct Reconciler<H> {
    views: HashMap<String, TorrentView<H>>,
    filter: StateFilter,
}

impl<H> Default for Reconciler<H> {
    fn default() -> Self {
        Self {
            views: HashMap::new(),
            filter: StateFilter::default(),
        }
    }
}

impl<H> Reconciler<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(&self) -> StateFilter {
        self.filter
    }

    pub fn set_filter(&mut self, filter: StateFilter) {
        self.filter = filter;
    }

    pub fn begin<'a, R>(&'a mut self, target: &'a mut R, now: Instant) -> ReconcileCycle<'a, R>
    where
        R: RenderTarget<Handle = H>,
    {
        ReconcileCycle {
            reconciler: self,
            target,
            now,
            seen: HashSet::new(),
            stale: HashSet::new(),
            report: ReconcileReport::default(),
            committed: false,
        }
    }

    pub fn reconcile<R>(&mut self, target: &mut R, set: &SnapshotSet, now: Instant) -> ReconcileReport
    where
        R: RenderTarget<Handle = H>,
    {
        let mut cycle = self.begin(target, now);
        for snapshot in &set.torrents {
            cycle.apply(snapshot);
        }
        for infohash in &set.unresolved {
            cycle.mark_unresolved(infohash);
        }
        cycle.commit()
    }
}

/// One open refresh cycle. Dropping it commits.
pub struct ReconcileCycle<'a, R: RenderTarget> {
    reconciler: &'a mut Reconciler<R::Handle>,
    target: &'a mut R,
    now: Instant,
    seen: HashSet<String>,
    stale: HashSet<String>,
    report: ReconcileReport,
    committed: bool,
}

impl<'a, R: RenderTarget> ReconcileCycle<'a, R> {
    pub fn apply(&mut self, snapshot: &TorrentSnapshot) -> Applied {
        let infohash = snapshot.infohash.as_str();
        if !self.reconciler.filter.matches(&snapshot.state) {
            return Applied::Hidden;
        }
        if self.seen.contains(infohash) {
            warn!("duplicate snapshot for {infohash} in one cycle ignored");
            return Applied::Duplicate;
        }

        let previous = self.reconciler.views.get(infohash);
        let rates = peer_rates(previous.map(|view| &view.sample), &snapshot.peers, self.now);
        let content = match RowContent::build(snapshot, &rates) {
            Ok(content) => content,
            Err(err) => {
                warn!("skipping torrent {infohash}: {err}");
                self.report.skipped += 1;
                if previous.is_some() {
                    self.stale.insert(infohash.to_string());
                }
                return Applied::Skipped;
            }
        };
        let sample = PeerSample::take(&snapshot.peers, self.now);
        self.tally(snapshot, &rates);
        self.seen.insert(infohash.to_string());

        let target = &mut *self.target;
        match self.reconciler.views.get_mut(infohash) {
            Some(view) => {
                let mut changed = 0;
                for cell in content.changed_cells(&view.content) {
                    target.set_text(&view.handle, cell, content.text(cell));
                    changed += 1;
                }
                if content.stopped != view.content.stopped {
                    target.on_click(&view.handle, Cell::Toggle, toggle_action(infohash, content.stopped));
                }
                view.content = content;
                view.sample = sample;
                view.misses = 0;
                if changed == 0 {
                    return Applied::Unchanged;
                }
                self.report.updated += 1;
                self.report.cell_updates += changed;
                Applied::Updated
            }
            None => {
                let handle = target.create_row(infohash);
                for cell in Cell::ALL {
                    target.set_text(&handle, cell, content.text(cell));
                }
                target.on_click(&handle, Cell::Toggle, toggle_action(infohash, content.stopped));
                target.on_click(
                    &handle,
                    Cell::Remove,
                    RowAction::Remove {
                        infohash: infohash.to_string(),
                    },
                );
                debug!("created row for {infohash}");
                self.reconciler.views.insert(
                    infohash.to_string(),
                    TorrentView {
                        handle,
                        content,
                        misses: 0,
                        sample,
                    },
                );
                self.report.created += 1;
                Applied::Created
            }
        }
    }

    pub fn mark_unresolved(&mut self, infohash: &str) {
        if self.reconciler.views.contains_key(infohash) && !self.seen.contains(infohash) {
            self.stale.insert(infohash.to_string());
        }
    }

    pub fn commit(mut self) -> ReconcileReport {
        self.finish()
    }

    fn tally(&mut self, snapshot: &TorrentSnapshot, rates: &[PeerStat]) {
        let summary = &mut self.report.summary;
        summary.torrents += 1;
        summary.peers += snapshot.peers.len();
        summary.total_tx = summary.total_tx.saturating_add(snapshot.total_tx);
        summary.total_rx = summary.total_rx.saturating_add(snapshot.total_rx);
        for rate in rates {
            summary.rate_tx = summary.rate_tx.saturating_add(rate.tx);
            summary.rate_rx = summary.rate_rx.saturating_add(rate.rx);
        }
    }

    fn finish(&mut self) -> ReconcileReport {
        if self.committed {
            return ReconcileReport::default();
        }
        self.committed = true;

        let mut doomed = Vec::new();
        for (infohash, view) in self.reconciler.views.iter_mut() {
            if self.seen.contains(infohash) {
                continue;
            }
            if self.stale.contains(infohash) {
                view.misses += 1;
                if view.misses < MAX_MISSES {
                    continue;
                }
            }
            doomed.push(infohash.clone());
        }
        for infohash in doomed {
            if let Some(view) = self.reconciler.views.remove(&infohash) {
                debug!("removing row for {infohash}");
                self.target.remove_row(view.handle);
                self.report.removed += 1;
            }
        }
        mem::take(&mut self.report)
    }
}

impl<'a, R: RenderTarget> Drop for ReconcileCycle<'a, R> {
    fn drop(&mut self) {
        self.finish();
    }
}

fn toggle_action(infohash: &str, stopped: bool) -> RowAction {
    RowAction::Change {
        infohash: infohash.to_string(),
        action: if stopped {
            TorrentAction::Start
        } else {
            TorrentAction::Stop
        },
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{collections::BTreeMap, time::Duration};

    use proptest::prelude::*;

    use super::*;
    use crate::model::{FileEntry, TorrentState};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Op {
        Create(String),
        SetText(u64, Cell, String),
        Click(u64, Cell, RowAction),
        Remove(u64),
    }

    #[derive(Debug, Default)]
    pub(crate) struct RecordingTarget {
        next_id: u64,
        pub rows: BTreeMap<u64, (String, BTreeMap<Cell, String>)>,
        pub ops: Vec<Op>,
    }

    impl RecordingTarget {
        pub fn row(&self, infohash: &str) -> Option<&BTreeMap<Cell, String>> {
            self.rows
                .values()
                .find(|(hash, _)| hash == infohash)
                .map(|(_, cells)| cells)
        }

        pub fn infohashes(&self) -> Vec<String> {
            let mut hashes: Vec<_> = self.rows.values().map(|(hash, _)| hash.clone()).collect();
            hashes.sort();
            hashes
        }

        fn text_updates(&self) -> usize {
            self.ops
                .iter()
                .filter(|op| matches!(op, Op::SetText(..)))
                .count()
        }
    }

    impl RenderTarget for RecordingTarget {
        type Handle = u64;

        fn create_row(&mut self, infohash: &str) -> u64 {
            self.next_id += 1;
            self.rows
                .insert(self.next_id, (infohash.to_string(), BTreeMap::new()));
            self.ops.push(Op::Create(infohash.to_string()));
            self.next_id
        }

        fn set_text(&mut self, row: &u64, cell: Cell, text: &str) {
            let (_, cells) = self.rows.get_mut(row).expect("set_text on removed row");
            cells.insert(cell, text.to_string());
            self.ops.push(Op::SetText(*row, cell, text.to_string()));
        }

        fn on_click(&mut self, row: &u64, cell: Cell, action: RowAction) {
            self.ops.push(Op::Click(*row, cell, action));
        }

        fn remove_row(&mut self, row: u64) {
            assert!(self.rows.remove(&row).is_some(), "row removed twice");
            self.ops.push(Op::Remove(row));
        }
    }

    pub(crate) fn snapshot(infohash: &str, progress: f64) -> TorrentSnapshot {
        TorrentSnapshot {
            infohash: infohash.to_string(),
            name: format!("torrent {infohash}"),
            state: if progress >= 1.0 {
                TorrentState::Seeding
            } else {
                TorrentState::Downloading
            },
            progress,
            bitfield: Some(vec![true, false, true, true]),
            peers: vec![PeerStat {
                id: "peer-1".to_string(),
                tx: 1000,
                rx: 4000,
            }],
            files: vec![FileEntry { length: 2048 }],
            total_tx: 10,
            total_rx: 3,
        }
    }

    fn set(torrents: Vec<TorrentSnapshot>) -> SnapshotSet {
        SnapshotSet {
            torrents,
            unresolved: Vec::new(),
        }
    }

    #[test]
    fn end_to_end_create_then_remove_missing() {
        let mut reconciler = Reconciler::new();
        let mut target = RecordingTarget::default();
        let start = Instant::now();

        let report = reconciler.reconcile(
            &mut target,
            &set(vec![snapshot("a", 0.3), snapshot("b", 1.0)]),
            start,
        );
        assert_eq!(report.created, 2);
        assert_eq!(target.row("a").unwrap()[&Cell::Progress], "30.00%");
        assert_eq!(target.row("b").unwrap()[&Cell::Progress], "100.00%");
        assert_eq!(target.row("a").unwrap()[&Cell::Ratio], "(3.33 ratio)");
        assert_eq!(target.row("a").unwrap()[&Cell::Pieces], "75.00%");

        let report = reconciler.reconcile(
            &mut target,
            &set(vec![snapshot("a", 0.3)]),
            start + Duration::from_secs(1),
        );
        assert_eq!(report.removed, 1);
        assert_eq!(target.infohashes(), vec!["a".to_string()]);
        assert!(!reconciler.views.contains_key("b"));
    }

    #[test]
    fn second_identical_pass_issues_no_updates() {
        let mut reconciler = Reconciler::new();
        let mut target = RecordingTarget::default();
        let now = Instant::now();
        let snapshots = set(vec![snapshot("a", 0.5), snapshot("b", 0.25)]);

        reconciler.reconcile(&mut target, &snapshots, now);
        let before = target.ops.len();
        let report = reconciler.reconcile(&mut target, &snapshots, now + Duration::from_secs(1));
        assert_eq!(report.cell_updates, 0);
        assert_eq!(report.updated, 0);
        assert_eq!(target.ops.len(), before);
    }

    #[test]
    fn update_touches_only_changed_cells() {
        let mut reconciler = Reconciler::new();
        let mut target = RecordingTarget::default();
        let now = Instant::now();
        reconciler.reconcile(&mut target, &set(vec![snapshot("a", 0.5)]), now);
        let before = target.ops.len();

        let report = reconciler.reconcile(
            &mut target,
            &set(vec![snapshot("a", 0.75)]),
            now + Duration::from_secs(1),
        );
        assert_eq!(report.updated, 1);
        assert_eq!(report.cell_updates, 1);
        assert_eq!(
            target.ops[before..],
            [Op::SetText(1, Cell::Progress, "75.00%".to_string())]
        );
    }

    #[test]
    fn rates_are_per_second_deltas() {
        let mut reconciler = Reconciler::new();
        let mut target = RecordingTarget::default();
        let now = Instant::now();
        reconciler.reconcile(&mut target, &set(vec![snapshot("a", 0.5)]), now);
        assert_eq!(target.row("a").unwrap()[&Cell::Rate], "↑ 0 B/s ↓ 0 B/s");

        let mut later = snapshot("a", 0.5);
        later.peers[0].tx += 4096;
        later.peers[0].rx += 8192;
        later.peers.push(PeerStat {
            id: "peer-2".to_string(),
            tx: 1 << 20,
            rx: 1 << 20,
        });
        let report = reconciler.reconcile(&mut target, &set(vec![later]), now + Duration::from_secs(2));
        assert_eq!(target.row("a").unwrap()[&Cell::Rate], "↑ 2 KB/s ↓ 4 KB/s");
        assert_eq!(target.row("a").unwrap()[&Cell::Peers], "2 peers");
        assert_eq!(report.summary.rate_tx, 2048);
    }

    #[test]
    fn malformed_torrent_does_not_block_others() {
        let mut reconciler = Reconciler::new();
        let mut target = RecordingTarget::default();
        let mut broken = snapshot("bad", 0.1);
        broken.bitfield = Some(Vec::new());

        let report = reconciler.reconcile(
            &mut target,
            &set(vec![broken, snapshot("good", 0.2)]),
            Instant::now(),
        );
        assert_eq!(report.skipped, 1);
        assert_eq!(report.created, 1);
        assert_eq!(target.infohashes(), vec!["good".to_string()]);
    }

    #[test]
    fn unresolved_row_survives_one_cycle_only() {
        let mut reconciler = Reconciler::new();
        let mut target = RecordingTarget::default();
        let now = Instant::now();
        reconciler.reconcile(&mut target, &set(vec![snapshot("a", 0.5)]), now);

        let flaky = SnapshotSet {
            torrents: Vec::new(),
            unresolved: vec!["a".to_string()],
        };
        let report = reconciler.reconcile(&mut target, &flaky, now + Duration::from_secs(1));
        assert_eq!(report.removed, 0);
        assert_eq!(target.infohashes(), vec!["a".to_string()]);

        let report = reconciler.reconcile(&mut target, &flaky, now + Duration::from_secs(2));
        assert_eq!(report.removed, 1);
        assert!(target.rows.is_empty());
    }

    #[test]
    fn recovered_row_resets_its_miss_count() {
        let mut reconciler = Reconciler::new();
        let mut target = RecordingTarget::default();
        let now = Instant::now();
        let flaky = SnapshotSet {
            torrents: Vec::new(),
            unresolved: vec!["a".to_string()],
        };
        reconciler.reconcile(&mut target, &set(vec![snapshot("a", 0.5)]), now);
        reconciler.reconcile(&mut target, &flaky, now);
        reconciler.reconcile(&mut target, &set(vec![snapshot("a", 0.5)]), now);
        let report = reconciler.reconcile(&mut target, &flaky, now);
        assert_eq!(report.removed, 0);
    }

    #[test]
    fn state_change_rebinds_toggle() {
        let mut reconciler = Reconciler::new();
        let mut target = RecordingTarget::default();
        let now = Instant::now();
        reconciler.reconcile(&mut target, &set(vec![snapshot("a", 0.5)]), now);

        let mut stopped = snapshot("a", 0.5);
        stopped.state = TorrentState::Stopped;
        reconciler.reconcile(&mut target, &set(vec![stopped]), now + Duration::from_secs(1));

        let last_click = target
            .ops
            .iter()
            .rev()
            .find_map(|op| match op {
                Op::Click(_, Cell::Toggle, action) => Some(action.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            last_click,
            RowAction::Change {
                infohash: "a".to_string(),
                action: TorrentAction::Start,
            }
        );
        assert_eq!(target.row("a").unwrap()[&Cell::Toggle], "\u{25BA}");
    }

    #[test]
    fn filter_hides_rows_on_next_commit() {
        let mut reconciler = Reconciler::new();
        let mut target = RecordingTarget::default();
        let now = Instant::now();
        let snapshots = set(vec![snapshot("a", 0.5), snapshot("b", 1.0)]);
        reconciler.reconcile(&mut target, &snapshots, now);

        reconciler.set_filter(StateFilter::Seeding);
        let report = reconciler.reconcile(&mut target, &snapshots, now);
        assert_eq!(report.removed, 1);
        assert_eq!(target.infohashes(), vec!["b".to_string()]);
        assert_eq!(report.summary.torrents, 1);
    }

    #[test]
    fn row_without_bitfield_renders_from_progress() {
        use crate::rpc::{
            tests::{daemon_status_json, ScriptedTransport},
            XdClient,
        };
        use serde_json::json;

        let transport = ScriptedTransport::with(vec![
            Ok(json!({"Infohashes": ["aa"]})),
            Ok(daemon_status_json("aa")),
        ]);
        let set = XdClient::new(transport, "0").fetch_all_torrents().unwrap();
        let mut reconciler = Reconciler::new();
        let mut target = RecordingTarget::default();
        let report = reconciler.reconcile(&mut target, &set, Instant::now());
        assert_eq!((report.created, report.skipped), (1, 0));
        let row = target.row("aa").unwrap();
        assert_eq!(row[&Cell::Progress], "25.00%");
        assert_eq!(row[&Cell::Pieces], "-");
        assert_eq!(row[&Cell::Size], "4 KB");
    }

    #[test]
    fn dropped_cycle_still_commits() {
        let mut reconciler = Reconciler::new();
        let mut target = RecordingTarget::default();
        let now = Instant::now();
        reconciler.reconcile(&mut target, &set(vec![snapshot("a", 0.5)]), now);
        {
            let mut cycle = reconciler.begin(&mut target, now);
            cycle.apply(&snapshot("b", 0.5));
        }
        assert_eq!(target.infohashes(), vec!["b".to_string()]);
    }

    #[test]
    fn summary_uses_torrent_level_counters() {
        let mut reconciler = Reconciler::new();
        let mut target = RecordingTarget::default();
        let report = reconciler.reconcile(
            &mut target,
            &set(vec![snapshot("a", 0.5), snapshot("b", 0.5)]),
            Instant::now(),
        );
        assert_eq!(
            report.summary.to_string(),
            "2 peers connected on 2 torrents (3.33 ratio) ↑ 0 B/s ↓ 0 B/s"
        );
        assert_eq!(target.text_updates(), 2 * Cell::ALL.len());
    }

    proptest! {
        #[test]
        fn rows_always_match_latest_set(
            first in proptest::collection::btree_map("[a-f]", 0u32..=100, 0..6),
            second in proptest::collection::btree_map("[a-f]", 0u32..=100, 0..6),
        ) {
            let mut reconciler = Reconciler::new();
            let mut target = RecordingTarget::default();
            let now = Instant::now();
            let build = |map: &BTreeMap<String, u32>| set(
                map.iter()
                    .map(|(hash, pct)| snapshot(hash, f64::from(*pct) / 100.0))
                    .collect(),
            );

            reconciler.reconcile(&mut target, &build(&first), now);
            reconciler.reconcile(&mut target, &build(&second), now + Duration::from_secs(1));

            let expected: Vec<String> = second.keys().cloned().collect();
            prop_assert_eq!(target.infohashes(), expected);
            prop_assert_eq!(reconciler.views.len(), second.len());
        }
    }
}
