use crate::error::{AgentError, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

/// Prediction input row: column name -> JSON value.
pub type Record = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Numeric,
    Text,
}

#[derive(Debug, Clone, Serialize)]
pub struct Column {
    pub name: String,
    pub dtype: ColumnType,
    /// Raw cell values; `None` marks a missing (empty) cell.
    pub values: Vec<Option<String>>,
}

impl Column {
    pub fn distinct_count(&self) -> usize {
        self.values
            .iter()
            .flatten()
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_none()).count()
    }
}

/// In-memory snapshot of an uploaded tabular dataset.
#[derive(Debug, Clone, Serialize)]
pub struct Dataset {
    columns: Vec<Column>,
    n_rows: usize,
}

impl Dataset {
    pub async fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await.map_err(|e| {
            AgentError::invalid_dataset(format!(
                "Failed to read dataset file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_csv_str(&content)
    }

    pub fn from_csv_str(content: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(content.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| AgentError::invalid_dataset(format!("Failed to read CSV header: {}", e)))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        if headers.is_empty() {
            return Err(AgentError::invalid_dataset("CSV has no columns"));
        }

        let mut values: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
        let mut n_rows = 0usize;

        for result in reader.records() {
            let record = result.map_err(|e| {
                AgentError::invalid_dataset(format!("Failed to parse CSV record: {}", e))
            })?;
            if record.len() > headers.len() {
                return Err(AgentError::invalid_dataset(format!(
                    "Row {} has {} cells but the header has {} columns",
                    n_rows + 1,
                    record.len(),
                    headers.len()
                )));
            }
            for (i, cell) in record.iter().enumerate() {
                let cell = cell.trim();
                values[i].push(if cell.is_empty() {
                    None
                } else {
                    Some(cell.to_string())
                });
            }
            // Ragged rows: pad short records with missing cells
            for column in values.iter_mut() {
                if column.len() <= n_rows {
                    column.push(None);
                }
            }
            n_rows += 1;
        }

        let columns = headers
            .into_iter()
            .zip(values)
            .map(|(name, values)| {
                let dtype = infer_column_type(&values);
                Column {
                    name,
                    dtype,
                    values,
                }
            })
            .collect();

        Ok(Self { columns, n_rows })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Feature columns for a run, i.e. everything except the target.
    pub fn feature_names(&self, target: Option<&str>) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| Some(c.name.as_str()) != target)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Checks the invariants a target column must satisfy before training.
    pub fn validate_target(&self, target: &str) -> Result<&Column> {
        if self.n_rows == 0 {
            return Err(AgentError::invalid_dataset("Dataset has zero rows"));
        }
        let column = self.column(target).ok_or_else(|| {
            AgentError::invalid_dataset(format!("Target column '{}' not found", target))
        })?;
        let missing = column.missing_count();
        if missing == column.values.len() {
            return Err(AgentError::invalid_dataset(format!(
                "Target column '{}' is entirely missing",
                target
            )));
        }
        if missing > 0 {
            return Err(AgentError::invalid_dataset(format!(
                "Target column '{}' has {} missing values",
                target, missing
            )));
        }
        Ok(column)
    }

    /// First rows rendered for log output, the way the original UI previews
    /// an upload.
    pub fn preview(&self, rows: usize) -> String {
        let mut out = self
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(",");
        for row in 0..rows.min(self.n_rows) {
            out.push('\n');
            let line = self
                .columns
                .iter()
                .map(|c| c.values[row].as_deref().unwrap_or(""))
                .collect::<Vec<_>>()
                .join(",");
            out.push_str(&line);
        }
        out
    }
}

fn infer_column_type(values: &[Option<String>]) -> ColumnType {
    let mut saw_value = false;
    for value in values.iter().flatten() {
        saw_value = true;
        if value.parse::<f64>().is_err() {
            return ColumnType::Text;
        }
    }
    if saw_value {
        ColumnType::Numeric
    } else {
        ColumnType::Text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IRIS_LIKE: &str = "\
sepal_len,species
5.1,setosa
4.9,setosa
6.3,virginica
5.8,versicolor
";

    #[test]
    fn infers_column_types() {
        let ds = Dataset::from_csv_str(IRIS_LIKE).unwrap();
        assert_eq!(ds.n_rows(), 4);
        assert_eq!(ds.column("sepal_len").unwrap().dtype, ColumnType::Numeric);
        assert_eq!(ds.column("species").unwrap().dtype, ColumnType::Text);
    }

    #[test]
    fn counts_distinct_and_missing() {
        let ds = Dataset::from_csv_str("a,b\n1,x\n2,\n1,y\n").unwrap();
        let a = ds.column("a").unwrap();
        let b = ds.column("b").unwrap();
        assert_eq!(a.distinct_count(), 2);
        assert_eq!(a.missing_count(), 0);
        assert_eq!(b.distinct_count(), 2);
        assert_eq!(b.missing_count(), 1);
    }

    #[test]
    fn short_rows_pad_with_missing_cells() {
        let ds = Dataset::from_csv_str("a,b\n1,x\n2\n").unwrap();
        assert_eq!(ds.n_rows(), 2);
        assert_eq!(ds.column("b").unwrap().missing_count(), 1);
    }

    #[test]
    fn overlong_rows_are_rejected() {
        let err = Dataset::from_csv_str("a,b\n1,x\n2,y,extra\n").unwrap_err();
        assert_eq!(err.category(), "invalid_dataset");
    }

    #[test]
    fn validate_target_rejects_unknown_column() {
        let ds = Dataset::from_csv_str(IRIS_LIKE).unwrap();
        let err = ds.validate_target("petal_len").unwrap_err();
        assert_eq!(err.category(), "invalid_dataset");
    }

    #[test]
    fn validate_target_rejects_missing_values() {
        let ds = Dataset::from_csv_str("a,b\n1,x\n2,\n").unwrap();
        assert!(ds.validate_target("b").is_err());
        assert!(ds.validate_target("a").is_ok());
    }

    #[test]
    fn validate_target_rejects_empty_dataset() {
        let ds = Dataset::from_csv_str("a,b\n").unwrap();
        assert_eq!(ds.n_rows(), 0);
        assert!(ds.validate_target("a").is_err());
    }

    #[test]
    fn features_exclude_target() {
        let ds = Dataset::from_csv_str(IRIS_LIKE).unwrap();
        assert_eq!(ds.feature_names(Some("species")), vec!["sepal_len"]);
        assert_eq!(ds.feature_names(None).len(), 2);
    }

    #[test]
    fn preview_renders_header_and_rows() {
        let ds = Dataset::from_csv_str(IRIS_LIKE).unwrap();
        let preview = ds.preview(2);
        assert!(preview.starts_with("sepal_len,species"));
        assert_eq!(preview.lines().count(), 3);
    }
}
