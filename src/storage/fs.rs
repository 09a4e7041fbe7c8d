use crate::dataset::Dataset;
use crate::error::{LineageError, Result};
use crate::node::{DataFormat, StorageNode};
use crate::storage::Storage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// How the cells of one CSV column are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum CellEncoding {
    /// Every value is a string, written verbatim
    Text,
    /// Cells hold JSON text; an empty cell is null
    Json,
}

/// Column encodings written beside a CSV file (`<file>.csv.schema`), so a
/// dataset reads back exactly as it was written.
#[derive(Debug, Serialize, Deserialize)]
struct CsvSchema {
    columns: Vec<String>,
    encodings: Vec<CellEncoding>,
}

impl CsvSchema {
    fn of(data: &Dataset) -> Self {
        let encodings = (0..data.columns.len())
            .map(|i| {
                if data.rows.iter().all(|row| matches!(row.get(i), Some(Value::String(_)))) {
                    CellEncoding::Text
                } else {
                    CellEncoding::Json
                }
            })
            .collect();
        CsvSchema {
            columns: data.columns.clone(),
            encodings,
        }
    }
}

/// Filesystem storage. Locations map to files under a root directory; a URI
/// scheme becomes the first path segment (`s3://lake/raw` -> `<root>/s3/lake/raw.csv`).
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// # Arguments
    /// * `root` - Directory all locations are resolved under. Created on first write.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        FsStorage {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn format_of(node: &StorageNode) -> DataFormat {
        node.storage().map(|s| s.format).unwrap_or_default()
    }

    /// Resolves the file backing `node`.
    ///
    /// # Errors
    /// Returns `LineageError::Storage` if the location escapes the root.
    pub fn path_for(&self, node: &StorageNode) -> Result<PathBuf> {
        let location = node.location();
        let relative = match location.split_once("://") {
            Some((scheme, rest)) => Path::new(scheme).join(rest.trim_start_matches('/')),
            None => PathBuf::from(location.trim_start_matches('/')),
        };

        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(LineageError::storage(location, "location must stay under the storage root"));
        }

        let mut path = self.root.join(relative);
        let format = Self::format_of(node);
        if path.extension().and_then(|e| e.to_str()) != Some(format.extension()) {
            let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
            name.push(".");
            name.push(format.extension());
            path.set_file_name(name);
        }
        Ok(path)
    }

    fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
        let mut name = OsString::from(path.as_os_str());
        name.push(suffix);
        PathBuf::from(name)
    }

    fn schema_path(path: &Path) -> PathBuf {
        Self::with_suffix(path, ".schema")
    }

    /// Best-effort typing for CSV files written by something else.
    fn infer_cell(cell: &str) -> Value {
        if cell.is_empty() {
            return Value::Null;
        }
        if let Ok(i) = cell.parse::<i64>() {
            return Value::from(i);
        }
        if let Ok(f) = cell.parse::<f64>() {
            if f.is_finite() {
                return Value::from(f);
            }
        }
        match cell {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(cell.to_string()),
        }
    }

    fn decode_cell(cell: &str, encoding: CellEncoding) -> std::result::Result<Value, serde_json::Error> {
        match encoding {
            CellEncoding::Text => Ok(Value::String(cell.to_string())),
            CellEncoding::Json if cell.is_empty() => Ok(Value::Null),
            CellEncoding::Json => serde_json::from_str(cell),
        }
    }

    fn encode_cell(value: &Value, encoding: CellEncoding) -> String {
        match (encoding, value) {
            (CellEncoding::Text, Value::String(s)) => s.clone(),
            (_, Value::Null) => String::new(),
            (_, other) => other.to_string(),
        }
    }

    fn read_schema(path: &Path) -> Option<CsvSchema> {
        let bytes = fs::read(Self::schema_path(path)).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(schema) => Some(schema),
            Err(e) => {
                log::warn!("Ignoring unreadable schema for {}: {}", path.display(), e);
                None
            }
        }
    }

    fn read_csv(path: &Path) -> std::result::Result<Dataset, String> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| e.to_string())?;
        let mut data = Dataset::new(reader.headers().map_err(|e| e.to_string())?.iter());
        let encodings = Self::read_schema(path)
            .filter(|schema| schema.columns == data.columns && schema.encodings.len() == data.columns.len())
            .map(|schema| schema.encodings);

        for record in reader.records() {
            let record = record.map_err(|e| e.to_string())?;
            let row = match &encodings {
                Some(encodings) => record
                    .iter()
                    .zip(encodings)
                    .map(|(cell, enc)| Self::decode_cell(cell, *enc))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| e.to_string())?,
                None => record.iter().map(Self::infer_cell).collect(),
            };
            data.push_row(row);
        }
        Ok(data)
    }

    fn write_csv(path: &Path, data: &Dataset, schema: &CsvSchema) -> std::result::Result<(), csv::Error> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&data.columns)?;
        for row in &data.rows {
            writer.write_record(
                row.iter()
                    .zip(&schema.encodings)
                    .map(|(value, enc)| Self::encode_cell(value, *enc)),
            )?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl Storage for FsStorage {
    fn read(&self, node: &StorageNode) -> Result<Dataset> {
        let path = self.path_for(node)?;
        let err = |e: &dyn std::fmt::Display| {
            LineageError::storage(node.location(), format!("{}: {}", path.display(), e))
        };
        match Self::format_of(node) {
            DataFormat::Csv => Self::read_csv(&path).map_err(|e| err(&e)),
            DataFormat::Json => {
                let bytes = fs::read(&path).map_err(|e| err(&e))?;
                serde_json::from_slice(&bytes).map_err(|e| err(&e))
            }
        }
    }

    fn write(&self, node: &StorageNode, data: &Dataset) -> Result<()> {
        let path = self.path_for(node)?;
        let err = |e: &dyn std::fmt::Display| {
            LineageError::storage(node.location(), format!("{}: {}", path.display(), e))
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| err(&e))?;
        }

        // write beside the target, then rename over it
        let staging = Self::with_suffix(&path, ".partial");
        match Self::format_of(node) {
            DataFormat::Csv => {
                let schema = CsvSchema::of(data);
                Self::write_csv(&staging, data, &schema).map_err(|e| err(&e))?;
                let schema_staging = Self::with_suffix(&path, ".schema.partial");
                let bytes = serde_json::to_vec(&schema).map_err(|e| err(&e))?;
                fs::write(&schema_staging, bytes).map_err(|e| err(&e))?;
                fs::rename(&schema_staging, Self::schema_path(&path)).map_err(|e| err(&e))?;
            }
            DataFormat::Json => {
                let bytes = serde_json::to_vec_pretty(data).map_err(|e| err(&e))?;
                fs::write(&staging, bytes).map_err(|e| err(&e))?;
            }
        }
        fs::rename(&staging, &path).map_err(|e| err(&e))?;

        log::info!("Materialized {} rows to {}", data.len(), path.display());
        Ok(())
    }

    fn exists(&self, node: &StorageNode) -> Result<bool> {
        Ok(self.path_for(node)?.is_file())
    }

    fn kind(&self) -> &'static str {
        "filesystem"
    }
}
