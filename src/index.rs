use std::collections::BTreeMap;
use std::fs;

use calamine::{Data, Reader, open_workbook_auto};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::config::InputSpec;
use crate::domain::{GroupKey, ItemId};
use crate::error::HarvestError;

/// Group key to ordered run ids. Groups iterate in sorted key order, ids in
/// source row order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupIndex {
    groups: BTreeMap<GroupKey, Vec<ItemId>>,
}

impl GroupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, group: GroupKey, id: ItemId) {
        self.groups.entry(group).or_default().push(id);
    }

    pub fn groups(&self) -> impl Iterator<Item = (&GroupKey, &[ItemId])> {
        self.groups.iter().map(|(key, ids)| (key, ids.as_slice()))
    }

    pub fn get(&self, group: &GroupKey) -> Option<&[ItemId]> {
        self.groups.get(group).map(Vec::as_slice)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn item_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl FromIterator<(GroupKey, ItemId)> for GroupIndex {
    fn from_iter<T: IntoIterator<Item = (GroupKey, ItemId)>>(iter: T) -> Self {
        let mut index = GroupIndex::new();
        for (group, id) in iter {
            index.push(group, id);
        }
        index
    }
}

/// Anything able to produce the group index up front.
pub trait GroupIndexSource {
    fn load(&self) -> Result<GroupIndex, HarvestError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableFormat {
    Workbook,
    Delimited(u8),
    Json,
}

/// Loads the index from a spreadsheet, CSV/TSV export, or JSON object of
/// `{group: [ids]}`, chosen by file extension.
#[derive(Debug, Clone)]
pub struct TableSource {
    path: Utf8PathBuf,
    sheet: Option<String>,
    group_column: String,
    item_column: String,
}

impl TableSource {
    pub fn new(spec: &InputSpec) -> Self {
        Self {
            path: spec.path.clone(),
            sheet: spec.sheet.clone(),
            group_column: spec.group_column.clone(),
            item_column: spec.item_column.clone(),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn format(&self) -> Result<TableFormat, HarvestError> {
        let ext = self
            .path
            .extension()
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Ok(TableFormat::Workbook),
            "csv" => Ok(TableFormat::Delimited(b',')),
            "tsv" | "txt" => Ok(TableFormat::Delimited(b'\t')),
            "json" => Ok(TableFormat::Json),
            _ => Err(HarvestError::InputFormat(format!(
                "unsupported input table extension for {}",
                self.path
            ))),
        }
    }

    fn read_error(&self, message: impl ToString) -> HarvestError {
        HarvestError::InputRead {
            path: self.path.clone().into_std_path_buf(),
            message: message.to_string(),
        }
    }

    fn load_workbook(&self) -> Result<GroupIndex, HarvestError> {
        let mut workbook =
            open_workbook_auto(self.path.as_std_path()).map_err(|err| self.read_error(err))?;
        let sheet = match &self.sheet {
            Some(sheet) => {
                if !workbook.sheet_names().iter().any(|name| name == sheet) {
                    return Err(HarvestError::MissingSheet(sheet.clone()));
                }
                sheet.clone()
            }
            None => workbook
                .sheet_names()
                .first()
                .cloned()
                .ok_or_else(|| HarvestError::InputFormat("workbook has no sheets".to_string()))?,
        };
        let range = workbook
            .worksheet_range(&sheet)
            .map_err(|err| self.read_error(err))?;

        let mut rows = range.rows();
        let header = rows
            .next()
            .ok_or_else(|| HarvestError::InputFormat(format!("sheet {sheet:?} is empty")))?
            .iter()
            .map(cell_text)
            .collect::<Vec<_>>();
        let body = rows.map(|row| row.iter().map(cell_text).collect::<Vec<_>>());
        self.collect_rows(&header, body)
    }

    fn load_delimited(&self, delimiter: u8) -> Result<GroupIndex, HarvestError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_path(self.path.as_std_path())
            .map_err(|err| self.read_error(err))?;
        let header = reader
            .headers()
            .map_err(|err| self.read_error(err))?
            .iter()
            .map(|value| value.trim().to_string())
            .collect::<Vec<_>>();
        let body = reader
            .records()
            .map(|record| {
                record
                    .map(|record| record.iter().map(|value| value.to_string()).collect())
                    .map_err(|err| self.read_error(err))
            })
            .collect::<Result<Vec<Vec<String>>, HarvestError>>()?;
        self.collect_rows(&header, body)
    }

    fn load_json(&self) -> Result<GroupIndex, HarvestError> {
        let content =
            fs::read_to_string(self.path.as_std_path()).map_err(|err| self.read_error(err))?;
        let groups: BTreeMap<GroupKey, Vec<ItemId>> = serde_json::from_str(&content)
            .map_err(|err| HarvestError::InputFormat(err.to_string()))?;
        Ok(GroupIndex { groups })
    }

    fn collect_rows<I>(&self, header: &[String], rows: I) -> Result<GroupIndex, HarvestError>
    where
        I: IntoIterator<Item = Vec<String>>,
    {
        let group_idx = column_index(header, &self.group_column)?;
        let item_idx = column_index(header, &self.item_column)?;

        let mut index = GroupIndex::new();
        let mut skipped = 0usize;
        for row in rows {
            let group = row.get(group_idx).map(|value| value.trim()).unwrap_or("");
            let item = row.get(item_idx).map(|value| value.trim()).unwrap_or("");
            if group.is_empty() || item.is_empty() {
                skipped += 1;
                continue;
            }
            index.push(group.parse()?, item.parse()?);
        }
        if skipped > 0 {
            debug!(skipped, path = %self.path, "skipped rows with blank group or run id");
        }
        Ok(index)
    }
}

impl GroupIndexSource for TableSource {
    fn load(&self) -> Result<GroupIndex, HarvestError> {
        if !self.path.as_std_path().is_file() {
            return Err(self.read_error("file not found"));
        }
        let index = match self.format()? {
            TableFormat::Workbook => self.load_workbook()?,
            TableFormat::Delimited(delimiter) => self.load_delimited(delimiter)?,
            TableFormat::Json => self.load_json()?,
        };
        debug!(
            path = %self.path,
            groups = index.group_count(),
            items = index.item_count(),
            "loaded group index"
        );
        Ok(index)
    }
}

fn column_index(header: &[String], column: &str) -> Result<usize, HarvestError> {
    header
        .iter()
        .position(|name| name.trim() == column)
        .ok_or_else(|| HarvestError::MissingColumn(column.to_string()))
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(value) => value.trim().to_string(),
        Data::Int(value) => value.to_string(),
        Data::Float(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
            format!("{}", *value as i64)
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_float_cells_drop_the_fraction() {
        assert_eq!(cell_text(&Data::Float(1234.0)), "1234");
        assert_eq!(cell_text(&Data::Float(0.5)), "0.5");
        assert_eq!(cell_text(&Data::String(" SRR1 ".to_string())), "SRR1");
        assert_eq!(cell_text(&Data::Empty), "");
    }

    #[test]
    fn index_keeps_row_order_within_groups() {
        let index: GroupIndex = [("D2", "SRR3"), ("D1", "SRR2"), ("D2", "SRR1")]
            .into_iter()
            .map(|(group, id)| (group.parse::<GroupKey>().unwrap(), id.parse::<ItemId>().unwrap()))
            .collect();
        let groups = index
            .groups()
            .map(|(key, ids)| {
                (
                    key.as_str().to_string(),
                    ids.iter().map(|id| id.as_str().to_string()).collect::<Vec<_>>(),
                )
            })
            .collect::<Vec<_>>();
        assert_eq!(
            groups,
            vec![
                ("D1".to_string(), vec!["SRR2".to_string()]),
                ("D2".to_string(), vec!["SRR3".to_string(), "SRR1".to_string()]),
            ]
        );
        assert_eq!(index.item_count(), 3);
    }
}
