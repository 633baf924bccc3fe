use std::fs;

use camino::Utf8PathBuf;

use gmrepo_harvest::domain::{GroupKey, ItemId};
use gmrepo_harvest::store::DirectoryStore;

#[test]
fn layout_paths() {
    let store = DirectoryStore::new(Utf8PathBuf::from("downloads"));
    let group: GroupKey = "D003093".parse().unwrap();
    let id: ItemId = "SRR5936131".parse().unwrap();

    assert_eq!(store.group_dir(&group), Utf8PathBuf::from("downloads/D003093"));
    assert_eq!(
        store.artifact_path(&group, &id),
        Utf8PathBuf::from("downloads/D003093/SRR5936131.tsv")
    );
}

#[test]
fn write_places_the_final_file_only() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let store = DirectoryStore::new(root);
    let group: GroupKey = "D003093".parse().unwrap();
    let id: ItemId = "SRR1".parse().unwrap();

    assert!(!store.exists(&group, &id));
    let dir = store.ensure_group_dir(&group).unwrap();
    let path = store.write(&group, &id, b"a\tb\n1\t2\n").unwrap();

    assert_eq!(path, store.artifact_path(&group, &id));
    assert!(store.exists(&group, &id));
    assert_eq!(fs::read(&path).unwrap(), b"a\tb\n1\t2\n");
    let names: Vec<String> = fs::read_dir(&dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["SRR1.tsv".to_string()]);
}

#[test]
fn directory_named_like_an_artifact_does_not_count() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let store = DirectoryStore::new(root);
    let group: GroupKey = "D1".parse().unwrap();
    let id: ItemId = "SRR1".parse().unwrap();

    fs::create_dir_all(store.artifact_path(&group, &id)).unwrap();
    assert!(!store.exists(&group, &id));
}
