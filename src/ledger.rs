use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::domain::{GroupKey, ItemId};
use crate::error::HarvestError;

/// Durable, append-only record of runs confirmed to have no abundance data.
///
/// Entries are keyed by `(group, id)` and stored one per line as
/// `<group>\t<id>`. A line holding a bare id is a legacy entry that applies
/// to that id under every group.
pub struct CompletionLedger {
    path: Utf8PathBuf,
    inner: Mutex<LedgerInner>,
}

struct LedgerInner {
    scoped: HashSet<(GroupKey, ItemId)>,
    legacy: HashSet<ItemId>,
    file: Option<File>,
}

impl CompletionLedger {
    /// Loads existing entries and opens the file for appending, creating it
    /// and its parent directory when missing.
    pub fn open(path: &Utf8Path) -> Result<Self, HarvestError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| HarvestError::Ledger(format!("create {parent}: {err}")))?;
        }
        let loaded = load_entries(path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_std_path())
            .map_err(|err| HarvestError::Ledger(format!("open {path}: {err}")))?;
        if loaded.unterminated {
            // Keep the next entry off the partial line left by an interrupted append.
            file.write_all(b"\n")
                .map_err(|err| HarvestError::Ledger(format!("append to {path}: {err}")))?;
        }
        Ok(Self::with_inner(path, loaded.scoped, loaded.legacy, Some(file)))
    }

    /// Loads existing entries without touching the filesystem otherwise.
    /// `record` fails on a read-only ledger.
    pub fn open_read_only(path: &Utf8Path) -> Result<Self, HarvestError> {
        let loaded = load_entries(path)?;
        Ok(Self::with_inner(path, loaded.scoped, loaded.legacy, None))
    }

    fn with_inner(
        path: &Utf8Path,
        scoped: HashSet<(GroupKey, ItemId)>,
        legacy: HashSet<ItemId>,
        file: Option<File>,
    ) -> Self {
        debug!(
            path = %path,
            scoped = scoped.len(),
            legacy = legacy.len(),
            "loaded completion ledger"
        );
        Self {
            path: path.to_path_buf(),
            inner: Mutex::new(LedgerInner {
                scoped,
                legacy,
                file,
            }),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn contains(&self, group: &GroupKey, id: &ItemId) -> Result<bool, HarvestError> {
        let inner = self.lock()?;
        Ok(inner.contains(group, id))
    }

    /// Appends `(group, id)` and syncs the file. The entry only becomes
    /// visible to `contains` once the write has succeeded.
    pub fn record(&self, group: &GroupKey, id: &ItemId) -> Result<(), HarvestError> {
        let mut inner = self.lock()?;
        if inner.contains(group, id) {
            return Ok(());
        }
        let line = format!("{group}\t{id}\n");
        let file = inner.file.as_mut().ok_or_else(|| {
            HarvestError::Ledger(format!("{} is opened read-only", self.path))
        })?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|err| HarvestError::Ledger(format!("append to {}: {err}", self.path)))?;
        inner.scoped.insert((group.clone(), id.clone()));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock()
            .map(|inner| inner.scoped.len() + inner.legacy.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LedgerInner>, HarvestError> {
        self.inner
            .lock()
            .map_err(|_| HarvestError::Ledger("ledger lock poisoned".to_string()))
    }
}

impl LedgerInner {
    fn contains(&self, group: &GroupKey, id: &ItemId) -> bool {
        self.legacy.contains(id) || self.scoped.contains(&(group.clone(), id.clone()))
    }
}

#[derive(Default)]
struct LoadedEntries {
    scoped: HashSet<(GroupKey, ItemId)>,
    legacy: HashSet<ItemId>,
    /// The file is non-empty and does not end with a newline.
    unterminated: bool,
}

fn load_entries(path: &Utf8Path) -> Result<LoadedEntries, HarvestError> {
    let mut loaded = LoadedEntries::default();
    if !path.as_std_path().exists() {
        return Ok(loaded);
    }
    let content = fs::read(path.as_std_path())
        .map_err(|err| HarvestError::Ledger(format!("read {path}: {err}")))?;
    // A torn append can leave invalid UTF-8 behind; only that line is lost.
    for line in content.split(|byte| *byte == b'\n') {
        match parse_line(&String::from_utf8_lossy(line)) {
            Some(Entry::Scoped(group, id)) => {
                loaded.scoped.insert((group, id));
            }
            Some(Entry::Legacy(id)) => {
                loaded.legacy.insert(id);
            }
            None => {}
        }
    }
    loaded.unterminated = content.last().is_some_and(|byte| *byte != b'\n');
    Ok(loaded)
}

enum Entry {
    Scoped(GroupKey, ItemId),
    Legacy(ItemId),
}

fn parse_line(line: &str) -> Option<Entry> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match line.split_once('\t') {
        Some((group, id)) => Some(Entry::Scoped(group.parse().ok()?, id.parse().ok()?)),
        None => line.parse().ok().map(Entry::Legacy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_line_variants() {
        assert!(matches!(parse_line("D003093\tSRR1"), Some(Entry::Scoped(_, _))));
        assert!(matches!(parse_line("SRR1"), Some(Entry::Legacy(_))));
        assert!(parse_line("   ").is_none());
        assert!(parse_line("a/b").is_none());
    }
}
