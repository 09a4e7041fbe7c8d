use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A materialized value exchanged between steps.
///
/// The compute engine that produces it is external; the engine only needs a
/// column list and rows of JSON scalars to hand data between steps and to
/// write it to storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Column names, in order
    pub columns: Vec<String>,
    /// Row values, one entry per column
    pub rows: Vec<Vec<Value>>,
}

impl Dataset {
    /// Creates an empty dataset with the given columns.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Dataset {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Creates a dataset from columns and rows.
    pub fn with_rows<I, S>(columns: I, rows: Vec<Vec<Value>>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut dataset = Dataset::new(columns);
        dataset.rows = rows;
        dataset
    }

    /// Appends a row. Short rows are padded with nulls, long rows truncated.
    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the dataset has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Iterates the values of one column.
    pub fn column<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a Value> + 'a {
        let index = self.column_index(name);
        self.rows
            .iter()
            .filter_map(move |row| index.and_then(|i| row.get(i)))
    }

    /// Returns the value at a row/column pair.
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_push_row_pads_to_width() {
        let mut data = Dataset::new(["id", "name", "score"]);
        data.push_row(vec![json!(1), json!("a")]);
        assert_eq!(data.len(), 1);
        assert_eq!(data.rows[0], vec![json!(1), json!("a"), Value::Null]);
    }

    #[test]
    fn test_column_access() {
        let data = Dataset::with_rows(
            ["id", "amount"],
            vec![vec![json!(1), json!(10.5)], vec![json!(2), json!(4.5)]],
        );
        let total: f64 = data.column("amount").filter_map(Value::as_f64).sum();
        assert_eq!(total, 15.0);
        assert_eq!(data.value(1, "id"), Some(&json!(2)));
        assert!(data.value(0, "missing").is_none());
        assert_eq!(data.column("missing").count(), 0);
    }
}
