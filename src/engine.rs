use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::WorkItem;
use crate::error::HarvestError;
use crate::fetch::{FetchOutcome, ItemFetcher};
use crate::index::GroupIndex;
use crate::ledger::CompletionLedger;
use crate::store::DirectoryStore;

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub workers: usize,
    pub dry_run: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            workers: crate::config::DEFAULT_WORKERS,
            dry_run: false,
        }
    }
}

/// Terminal state of one work item within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemOutcome {
    Fetched,
    Empty,
    SkippedEmpty,
    SkippedExisting,
    Failed,
    Duplicate,
    Pending,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupReport {
    pub group: String,
    pub total: usize,
    pub fetched: usize,
    pub empty: usize,
    pub skipped_empty: usize,
    pub skipped_existing: usize,
    pub failed: usize,
    pub duplicates: usize,
    pub pending: usize,
}

impl GroupReport {
    fn new(group: String, total: usize) -> Self {
        Self {
            group,
            total,
            ..Self::default()
        }
    }

    pub fn tally(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Fetched => self.fetched += 1,
            ItemOutcome::Empty => self.empty += 1,
            ItemOutcome::SkippedEmpty => self.skipped_empty += 1,
            ItemOutcome::SkippedExisting => self.skipped_existing += 1,
            ItemOutcome::Failed => self.failed += 1,
            ItemOutcome::Duplicate => self.duplicates += 1,
            ItemOutcome::Pending => self.pending += 1,
        }
    }

    /// Items that reached any terminal state this run.
    pub fn accounted(&self) -> usize {
        self.fetched
            + self.empty
            + self.skipped_empty
            + self.skipped_existing
            + self.failed
            + self.duplicates
            + self.pending
    }

    /// Items that are on disk or in the ledger.
    pub fn settled(&self) -> usize {
        self.fetched + self.empty + self.skipped_empty + self.skipped_existing
    }

    fn absorb(&mut self, other: &GroupReport) {
        self.total += other.total;
        self.fetched += other.fetched;
        self.empty += other.empty;
        self.skipped_empty += other.skipped_empty;
        self.skipped_existing += other.skipped_existing;
        self.failed += other.failed;
        self.duplicates += other.duplicates;
        self.pending += other.pending;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: String,
    pub finished_at: String,
    pub dry_run: bool,
    pub interrupted: bool,
    pub groups: Vec<GroupReport>,
    pub totals: GroupReport,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.totals.failed > 0
    }

    /// Every item is on disk, in the ledger, or failed this run.
    pub fn is_complete(&self) -> bool {
        self.totals.pending == 0
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
    pub group: Option<GroupReport>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Cooperative stop signal. Once triggered, or once the optional deadline
/// passes, workers stop taking new items and in-flight items finish.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(max_runtime: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + max_runtime),
        }
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self
                .deadline
                .map(|deadline| Instant::now() >= deadline)
                .unwrap_or(false)
    }
}

struct Unit {
    group_idx: usize,
    item: WorkItem,
}

pub struct DispatchEngine<F: ItemFetcher> {
    store: DirectoryStore,
    ledger: CompletionLedger,
    fetcher: F,
    options: DispatchOptions,
}

impl<F: ItemFetcher> DispatchEngine<F> {
    pub fn new(
        store: DirectoryStore,
        ledger: CompletionLedger,
        fetcher: F,
        options: DispatchOptions,
    ) -> Self {
        Self {
            store,
            ledger,
            fetcher,
            options,
        }
    }

    pub fn store(&self) -> &DirectoryStore {
        &self.store
    }

    pub fn ledger(&self) -> &CompletionLedger {
        &self.ledger
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn run(
        &self,
        index: &GroupIndex,
        shutdown: &Shutdown,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, HarvestError> {
        let started_at = chrono::Utc::now().to_rfc3339();
        let start = Instant::now();
        if !self.options.dry_run {
            self.store.ensure_root()?;
        }

        let (mut reports, queue) = self.enqueue(index);
        let mut remaining = vec![0usize; reports.len()];
        for unit in &queue {
            remaining[unit.group_idx] += 1;
        }
        sink.event(ProgressEvent {
            message: format!(
                "dispatching {} items across {} groups with {} workers",
                queue.len(),
                reports.len(),
                self.options.workers
            ),
            elapsed: None,
            group: None,
        });
        for (idx, report) in reports.iter().enumerate() {
            if remaining[idx] == 0 {
                emit_group(sink, report, start);
            }
        }

        let workers = self.options.workers.max(1).min(queue.len());
        let queue = Mutex::new(queue);
        if workers > 0 {
            thread::scope(|scope| {
                let (tx, rx) = mpsc::channel::<(usize, ItemOutcome)>();
                let mut handles = Vec::with_capacity(workers);
                for worker in 0..workers {
                    let tx = tx.clone();
                    let queue = &queue;
                    handles.push(scope.spawn(move || {
                        while !shutdown.is_triggered() {
                            let Some(unit) = next_unit(queue) else {
                                break;
                            };
                            let outcome = self.process(&unit.item);
                            if tx.send((unit.group_idx, outcome)).is_err() {
                                break;
                            }
                        }
                        debug!(worker, "worker finished");
                    }));
                }
                drop(tx);

                for (group_idx, outcome) in rx {
                    reports[group_idx].tally(outcome);
                    remaining[group_idx] -= 1;
                    if remaining[group_idx] == 0 {
                        emit_group(sink, &reports[group_idx], start);
                    }
                }

                for handle in handles {
                    if handle.join().is_err() {
                        warn!("dispatch worker panicked");
                    }
                }
            });
        }

        // Whatever is still queued was never started.
        let leftover = match queue.into_inner() {
            Ok(queue) => queue,
            Err(poisoned) => poisoned.into_inner(),
        };
        let interrupted = !leftover.is_empty();
        for unit in leftover {
            reports[unit.group_idx].tally(ItemOutcome::Pending);
            remaining[unit.group_idx] -= 1;
            if remaining[unit.group_idx] == 0 {
                emit_group(sink, &reports[unit.group_idx], start);
            }
        }
        // Units lost to a panicking worker.
        for (idx, lost) in remaining.iter().enumerate() {
            if *lost > 0 {
                reports[idx].failed += lost;
                emit_group(sink, &reports[idx], start);
            }
        }

        let mut totals = GroupReport::new("total".to_string(), 0);
        for report in &reports {
            totals.absorb(report);
        }
        info!(
            fetched = totals.fetched,
            empty = totals.empty,
            skipped_empty = totals.skipped_empty,
            skipped_existing = totals.skipped_existing,
            failed = totals.failed,
            pending = totals.pending,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "run finished"
        );

        Ok(RunReport {
            started_at,
            finished_at: chrono::Utc::now().to_rfc3339(),
            dry_run: self.options.dry_run,
            interrupted,
            groups: reports,
            totals,
        })
    }

    /// Builds the per-group reports and the work queue. Repeated
    /// `(group, id)` pairs are queued once; a group whose directory cannot
    /// be created has its items failed up front.
    fn enqueue(&self, index: &GroupIndex) -> (Vec<GroupReport>, VecDeque<Unit>) {
        let mut reports = Vec::with_capacity(index.group_count());
        let mut queue = VecDeque::with_capacity(index.item_count());
        let mut seen = HashSet::new();

        for (group_idx, (group, ids)) in index.groups().enumerate() {
            let mut report = GroupReport::new(group.to_string(), ids.len());
            let dir_ready = self.options.dry_run
                || match self.store.ensure_group_dir(group) {
                    Ok(_) => true,
                    Err(err) => {
                        warn!(group = %group, "cannot prepare group directory: {err}");
                        false
                    }
                };
            for id in ids {
                let item = WorkItem::new(group.clone(), id.clone());
                if !seen.insert(item.clone()) {
                    report.tally(ItemOutcome::Duplicate);
                } else if !dir_ready {
                    report.tally(ItemOutcome::Failed);
                } else {
                    queue.push_back(Unit { group_idx, item });
                }
            }
            reports.push(report);
        }
        (reports, queue)
    }

    /// Runs one item end to end. Errors never escape; they become
    /// `ItemOutcome::Failed` plus a log line.
    pub fn process(&self, item: &WorkItem) -> ItemOutcome {
        match self.ledger.contains(&item.group, &item.id) {
            Ok(true) => {
                debug!(item = %item, "skipping: known empty");
                return ItemOutcome::SkippedEmpty;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(item = %item, "ledger lookup failed: {err}");
                return ItemOutcome::Failed;
            }
        }
        if self.store.exists(&item.group, &item.id) {
            debug!(item = %item, "skipping: already downloaded");
            return ItemOutcome::SkippedExisting;
        }
        if self.options.dry_run {
            return ItemOutcome::Pending;
        }

        match self.fetcher.fetch(&item.id) {
            FetchOutcome::Data(table) => {
                let written = table
                    .to_tsv()
                    .and_then(|content| self.store.write(&item.group, &item.id, &content));
                match written {
                    Ok(path) => {
                        debug!(item = %item, rows = table.row_count(), path = %path, "saved");
                        ItemOutcome::Fetched
                    }
                    Err(err) => {
                        warn!(item = %item, "failed to save artifact: {err}");
                        ItemOutcome::Failed
                    }
                }
            }
            FetchOutcome::Empty => match self.ledger.record(&item.group, &item.id) {
                Ok(()) => {
                    debug!(item = %item, "no data; recorded in ledger");
                    ItemOutcome::Empty
                }
                Err(err) => {
                    warn!(item = %item, "failed to record empty run: {err}");
                    ItemOutcome::Failed
                }
            },
            FetchOutcome::TransientError(err) => {
                warn!(item = %item, "fetch failed: {err}");
                ItemOutcome::Failed
            }
        }
    }
}

fn next_unit(queue: &Mutex<VecDeque<Unit>>) -> Option<Unit> {
    queue.lock().ok()?.pop_front()
}

fn emit_group(sink: &dyn ProgressSink, report: &GroupReport, start: Instant) {
    sink.event(ProgressEvent {
        message: format!(
            "group {}: fetched={} empty={} skipped_empty={} skipped_existing={} failed={} pending={}",
            report.group,
            report.fetched,
            report.empty,
            report.skipped_empty,
            report.skipped_existing,
            report.failed,
            report.pending
        ),
        elapsed: Some(start.elapsed()),
        group: Some(report.clone()),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_accounts_every_outcome() {
        let mut report = GroupReport::new("D1".to_string(), 7);
        for outcome in [
            ItemOutcome::Fetched,
            ItemOutcome::Empty,
            ItemOutcome::SkippedEmpty,
            ItemOutcome::SkippedExisting,
            ItemOutcome::Failed,
            ItemOutcome::Duplicate,
            ItemOutcome::Pending,
        ] {
            report.tally(outcome);
        }
        assert_eq!(report.accounted(), report.total);
        assert_eq!(report.settled(), 4);
    }

    #[test]
    fn shutdown_deadline_elapses() {
        let shutdown = Shutdown::with_deadline(Duration::ZERO);
        assert!(shutdown.is_triggered());
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_triggered());
        shutdown.clone().trigger();
        assert!(shutdown.is_triggered());
    }
}
