use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use gmrepo_harvest::config::{DEFAULT_GROUP_COLUMN, DEFAULT_ITEM_COLUMN, InputSpec};
use gmrepo_harvest::error::HarvestError;
use gmrepo_harvest::index::{GroupIndex, GroupIndexSource, TableSource};

fn write_input(temp: &tempfile::TempDir, name: &str, content: &str) -> InputSpec {
    let path = temp.path().join(name);
    fs::write(&path, content).unwrap();
    InputSpec {
        path: Utf8PathBuf::from_path_buf(path).unwrap(),
        sheet: None,
        group_column: DEFAULT_GROUP_COLUMN.to_string(),
        item_column: DEFAULT_ITEM_COLUMN.to_string(),
    }
}

fn flatten(index: &GroupIndex) -> Vec<(String, Vec<String>)> {
    index
        .groups()
        .map(|(group, ids)| {
            (
                group.to_string(),
                ids.iter().map(|id| id.to_string()).collect(),
            )
        })
        .collect()
}

#[test]
fn csv_rows_are_grouped_by_disease() {
    let temp = tempfile::tempdir().unwrap();
    let spec = write_input(
        &temp,
        "runs.csv",
        "Run ID,Disease MESH ID,Country\n\
         SRR3,D006262,China\n\
         SRR1,D003093,USA\n\
         SRR2,D006262,China\n",
    );

    let index = TableSource::new(&spec).load().unwrap();
    assert_eq!(
        flatten(&index),
        vec![
            ("D003093".to_string(), vec!["SRR1".to_string()]),
            (
                "D006262".to_string(),
                vec!["SRR3".to_string(), "SRR2".to_string()]
            ),
        ]
    );
    assert_eq!(index.group_count(), 2);
    assert_eq!(index.item_count(), 3);
}

#[test]
fn tsv_skips_rows_with_blank_cells() {
    let temp = tempfile::tempdir().unwrap();
    let spec = write_input(
        &temp,
        "runs.tsv",
        "Disease MESH ID\tRun ID\n\
         D003093\tSRR1\n\
         \tSRR2\n\
         D003093\t \n\
         D003093\tSRR4\n",
    );

    let index = TableSource::new(&spec).load().unwrap();
    assert_eq!(
        flatten(&index),
        vec![(
            "D003093".to_string(),
            vec!["SRR1".to_string(), "SRR4".to_string()]
        )]
    );
}

#[test]
fn json_object_maps_groups_to_ids() {
    let temp = tempfile::tempdir().unwrap();
    let spec = write_input(
        &temp,
        "runs.json",
        r#"{"D006262": ["SRR9", "SRR8"], "D003093": ["ERR1"]}"#,
    );

    let index = TableSource::new(&spec).load().unwrap();
    assert_eq!(
        flatten(&index),
        vec![
            ("D003093".to_string(), vec!["ERR1".to_string()]),
            (
                "D006262".to_string(),
                vec!["SRR9".to_string(), "SRR8".to_string()]
            ),
        ]
    );
}

#[test]
fn custom_column_names_are_honoured() {
    let temp = tempfile::tempdir().unwrap();
    let mut spec = write_input(&temp, "runs.csv", "mesh,run\nD1,SRR1\n");
    spec.group_column = "mesh".to_string();
    spec.item_column = "run".to_string();

    let index = TableSource::new(&spec).load().unwrap();
    assert_eq!(index.item_count(), 1);
}

#[test]
fn missing_column_is_a_load_error() {
    let temp = tempfile::tempdir().unwrap();
    let spec = write_input(&temp, "runs.csv", "Run ID,Country\nSRR1,USA\n");

    let err = TableSource::new(&spec).load().unwrap_err();
    assert_matches!(&err, HarvestError::MissingColumn(column) if column == DEFAULT_GROUP_COLUMN);
    assert!(err.is_load_error());
}

#[test]
fn unsafe_run_id_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let spec = write_input(&temp, "runs.csv", "Disease MESH ID,Run ID\nD1,../escape\n");

    let err = TableSource::new(&spec).load().unwrap_err();
    assert_matches!(err, HarvestError::InvalidItemId(_));
}

#[test]
fn missing_file_and_unknown_extension() {
    let temp = tempfile::tempdir().unwrap();
    let spec = InputSpec {
        path: Utf8PathBuf::from_path_buf(temp.path().join("absent.xlsx")).unwrap(),
        sheet: None,
        group_column: DEFAULT_GROUP_COLUMN.to_string(),
        item_column: DEFAULT_ITEM_COLUMN.to_string(),
    };
    assert_matches!(
        TableSource::new(&spec).load(),
        Err(HarvestError::InputRead { .. })
    );

    let spec = write_input(&temp, "runs.parquet", "");
    assert_matches!(
        TableSource::new(&spec).load(),
        Err(HarvestError::InputFormat(_))
    );
}

const WORKBOOK: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/disease_runs.xlsx");

fn workbook_spec(sheet: Option<&str>) -> InputSpec {
    InputSpec {
        path: Utf8PathBuf::from(WORKBOOK),
        sheet: sheet.map(str::to_string),
        group_column: DEFAULT_GROUP_COLUMN.to_string(),
        item_column: DEFAULT_ITEM_COLUMN.to_string(),
    }
}

#[test]
fn workbook_named_sheet_is_loaded() {
    let index = TableSource::new(&workbook_spec(Some("Run_Ids")))
        .load()
        .unwrap();

    // B3 holds the number 12345 and must not come back as "12345.0".
    assert_eq!(
        flatten(&index),
        vec![
            ("D1".to_string(), vec!["12345".to_string()]),
            ("D2".to_string(), vec!["SRR2".to_string(), "SRR1".to_string()]),
        ]
    );
}

#[test]
fn workbook_unknown_sheet_is_rejected() {
    let err = TableSource::new(&workbook_spec(Some("Runs")))
        .load()
        .unwrap_err();
    assert_matches!(&err, HarvestError::MissingSheet(sheet) if sheet == "Runs");
    assert!(err.is_load_error());
}

#[test]
fn workbook_defaults_to_first_sheet() {
    // The first sheet is a note without the run columns.
    assert_matches!(
        TableSource::new(&workbook_spec(None)).load(),
        Err(HarvestError::MissingColumn(_))
    );
}
