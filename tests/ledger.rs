use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use gmrepo_harvest::domain::{GroupKey, ItemId};
use gmrepo_harvest::error::HarvestError;
use gmrepo_harvest::ledger::CompletionLedger;

fn ledger_path(temp: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(temp.path().join("nested/no_data.log")).unwrap()
}

fn key(group: &str, id: &str) -> (GroupKey, ItemId) {
    (group.parse().unwrap(), id.parse().unwrap())
}

#[test]
fn entries_survive_reopen() {
    let temp = tempfile::tempdir().unwrap();
    let path = ledger_path(&temp);
    let (group, id) = key("D006262", "ERR1190593");

    let ledger = CompletionLedger::open(&path).unwrap();
    assert!(ledger.is_empty());
    ledger.record(&group, &id).unwrap();
    drop(ledger);

    let reopened = CompletionLedger::open(&path).unwrap();
    assert!(reopened.contains(&group, &id).unwrap());
    assert_eq!(reopened.len(), 1);
    assert_eq!(fs::read_to_string(&path).unwrap(), "D006262\tERR1190593\n");
}

#[test]
fn recording_twice_appends_once() {
    let temp = tempfile::tempdir().unwrap();
    let path = ledger_path(&temp);
    let (group, id) = key("D006262", "SRR1");

    let ledger = CompletionLedger::open(&path).unwrap();
    ledger.record(&group, &id).unwrap();
    ledger.record(&group, &id).unwrap();

    assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 1);
}

#[test]
fn bare_ids_apply_to_every_group() {
    let temp = tempfile::tempdir().unwrap();
    let path = ledger_path(&temp);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "SRR1\n\nD001\tSRR2\nnot/valid\n").unwrap();

    let ledger = CompletionLedger::open(&path).unwrap();
    let (d001, srr1) = key("D001", "SRR1");
    let (d002, srr2) = key("D002", "SRR2");
    assert!(ledger.contains(&d001, &srr1).unwrap());
    assert!(ledger.contains(&d002, &srr1).unwrap());
    assert!(ledger.contains(&d001, &srr2).unwrap());
    assert!(!ledger.contains(&d002, &srr2).unwrap());
    assert_eq!(ledger.len(), 2);

    // A legacy entry already covers the pair, so nothing is appended.
    ledger.record(&d002, &srr1).unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 4);
}

#[test]
fn read_only_ledger_rejects_writes() {
    let temp = tempfile::tempdir().unwrap();
    let path = ledger_path(&temp);
    let (group, id) = key("D001", "SRR1");

    let ledger = CompletionLedger::open_read_only(&path).unwrap();
    assert!(ledger.is_empty());
    assert_matches!(ledger.record(&group, &id), Err(HarvestError::Ledger(_)));
    assert!(!ledger.contains(&group, &id).unwrap());
    assert!(!path.as_std_path().exists());
}

#[test]
fn torn_trailing_append_is_skipped() {
    let temp = tempfile::tempdir().unwrap();
    let path = ledger_path(&temp);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    // Second entry cut inside a multi-byte character, with no newline.
    fs::write(&path, b"D001\tSRR1\nD001\tSRR\xe2\x82").unwrap();

    let ledger = CompletionLedger::open(&path).unwrap();
    let (d001, srr1) = key("D001", "SRR1");
    assert!(ledger.contains(&d001, &srr1).unwrap());

    let (d002, srr3) = key("D002", "SRR3");
    ledger.record(&d002, &srr3).unwrap();
    drop(ledger);

    let reopened = CompletionLedger::open(&path).unwrap();
    assert!(reopened.contains(&d001, &srr1).unwrap());
    assert!(reopened.contains(&d002, &srr3).unwrap());
    let content = fs::read(&path).unwrap();
    assert!(content.ends_with(b"\nD002\tSRR3\n"));
}
