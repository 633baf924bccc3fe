use serde_json::{Map, Value};

use crate::error::HarvestError;

/// Relative-abundance rows for one run, in the column order the service
/// returned them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AbundanceTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl AbundanceTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, HarvestError> {
        if let Some(row) = rows.iter().find(|row| row.len() != columns.len()) {
            return Err(HarvestError::InvalidTable(format!(
                "row has {} cells but header has {} columns",
                row.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    /// Builds a table from the JSON array returned by the abundance endpoint.
    /// Columns are the union of object keys in first-appearance order; keys
    /// missing from a row render as empty cells.
    pub fn from_json_rows(payload: &Value) -> Result<Self, HarvestError> {
        let items = payload
            .as_array()
            .ok_or_else(|| HarvestError::ApiPayload("expected a JSON array of rows".to_string()))?;

        let objects = items
            .iter()
            .map(|item| {
                item.as_object().ok_or_else(|| {
                    HarvestError::ApiPayload("expected every row to be a JSON object".to_string())
                })
            })
            .collect::<Result<Vec<&Map<String, Value>>, HarvestError>>()?;

        let mut columns: Vec<String> = Vec::new();
        for object in &objects {
            for key in object.keys() {
                if !columns.iter().any(|column| column == key) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = objects
            .iter()
            .map(|object| {
                columns
                    .iter()
                    .map(|column| object.get(column).map(render_cell).unwrap_or_default())
                    .collect()
            })
            .collect();

        Self::new(columns, rows)
    }

    pub fn from_tsv(content: &[u8]) -> Result<Self, HarvestError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .from_reader(content);
        let columns = reader
            .headers()
            .map_err(|err| HarvestError::InvalidTable(err.to_string()))?
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<_>>();
        let rows = reader
            .records()
            .map(|record| {
                record
                    .map(|record| record.iter().map(|value| value.to_string()).collect())
                    .map_err(|err| HarvestError::InvalidTable(err.to_string()))
            })
            .collect::<Result<Vec<Vec<String>>, HarvestError>>()?;
        Self::new(columns, rows)
    }

    pub fn to_tsv(&self) -> Result<Vec<u8>, HarvestError> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(Vec::new());
        writer
            .write_record(&self.columns)
            .map_err(|err| HarvestError::InvalidTable(err.to_string()))?;
        for row in &self.rows {
            writer
                .write_record(row)
                .map_err(|err| HarvestError::InvalidTable(err.to_string()))?;
        }
        writer
            .into_inner()
            .map_err(|err| HarvestError::InvalidTable(err.to_string()))
    }

    /// No columns or no rows: nothing worth persisting.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() || self.rows.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.clone(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn json_rows_keep_first_appearance_column_order() {
        let payload = json!([
            {"taxon_rank_level": "species", "scientific_name": "Bacteroides vulgatus", "relative_abundance": 12.5},
            {"taxon_rank_level": "species", "scientific_name": "Prevotella copri", "relative_abundance": 3, "ncbi_taxon_id": 165179}
        ]);
        let table = AbundanceTable::from_json_rows(&payload).unwrap();
        assert_eq!(
            table.columns(),
            ["taxon_rank_level", "scientific_name", "relative_abundance", "ncbi_taxon_id"]
        );
        assert_eq!(table.rows()[0][3], "");
        assert_eq!(table.rows()[1][2], "3");
        assert_eq!(table.rows()[1][3], "165179");
    }

    #[test]
    fn cells_render_like_a_dataframe_export() {
        let payload = json!([{ "a": null, "b": true, "c": [1, 2], "d": "x" }]);
        let table = AbundanceTable::from_json_rows(&payload).unwrap();
        assert_eq!(table.rows()[0], vec!["", "True", "[1,2]", "x"]);
    }

    #[test]
    fn objects_without_keys_are_empty() {
        let table = AbundanceTable::from_json_rows(&json!([{}, {}])).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn non_array_payload_is_rejected() {
        let err = AbundanceTable::from_json_rows(&json!({"rows": []})).unwrap_err();
        assert_matches!(err, HarvestError::ApiPayload(_));
    }

    #[test]
    fn tsv_output_has_header_and_quotes_embedded_tabs() {
        let table = AbundanceTable::new(
            vec!["name".to_string(), "value".to_string()],
            vec![vec!["a\tb".to_string(), "0.5".to_string()]],
        )
        .unwrap();
        let text = String::from_utf8(table.to_tsv().unwrap()).unwrap();
        assert_eq!(text, "name\tvalue\n\"a\tb\"\t0.5\n");
    }

    #[test]
    fn header_only_tsv_has_no_rows() {
        let table = AbundanceTable::from_tsv(b"name\tvalue\n").unwrap();
        assert_eq!(table.columns().len(), 2);
        assert!(table.is_empty());
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = AbundanceTable::new(vec!["a".to_string()], vec![vec![]]).unwrap_err();
        assert_matches!(err, HarvestError::InvalidTable(_));
    }
}
