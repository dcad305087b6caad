// export.rs - JSON/CSV writers over the store's row projections.

use anyhow::{ bail, Context, Result };
use serde_json::{ Map, Value };
use std::path::Path;

fn cell_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Write rows to `out` as pretty JSON or CSV (headers from the first row).
/// Returns the number of rows written.
pub fn write_rows(rows: &[Map<String, Value>], format: &str, out: &Path) -> Result<usize> {
    if let Some(parent) = out.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("create output directory")?;
        }
    }
    match format.to_lowercase().as_str() {
        "json" => {
            let file = std::fs::File::create(out).context("create output file")?;
            serde_json::to_writer_pretty(file, rows).context("write JSON")?;
        }
        "csv" => {
            if rows.is_empty() {
                std::fs::write(out, "").context("write empty CSV")?;
                return Ok(0);
            }
            let headers: Vec<&String> = rows[0].keys().collect();
            let mut writer = csv::Writer::from_path(out).context("create CSV writer")?;
            writer.write_record(headers.iter().map(|h| h.as_str()))?;
            for row in rows {
                let record: Vec<String> = headers
                    .iter()
                    .map(|h| row.get(*h).map(cell_to_string).unwrap_or_default())
                    .collect();
                writer.write_record(&record)?;
            }
            writer.flush()?;
        }
        other => bail!("Unknown format: {} (use json or csv)", other),
    }
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_out(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("solscreener-export-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn sample_rows() -> Vec<Map<String, Value>> {
        let row = json!({"pair_address": "A", "price_usd": 1.5, "note": null});
        vec![row.as_object().unwrap().clone()]
    }

    #[test]
    fn json_roundtrip() {
        let out = temp_out("rows.json");
        let written = write_rows(&sample_rows(), "json", &out).unwrap();
        assert_eq!(written, 1);
        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(parsed[0]["pair_address"], "A");
        assert_eq!(parsed[0]["note"], Value::Null);
    }

    #[test]
    fn csv_has_headers_and_empty_nulls() {
        let out = temp_out("rows.csv");
        write_rows(&sample_rows(), "csv", &out).unwrap();
        let text = std::fs::read_to_string(&out).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.contains("pair_address"));
        let data = lines.next().unwrap();
        assert!(data.contains('A'));
        assert!(data.contains("1.5"));
    }

    #[test]
    fn empty_csv_writes_empty_file() {
        let out = temp_out("empty.csv");
        let written = write_rows(&[], "csv", &out).unwrap();
        assert_eq!(written, 0);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "");
    }

    #[test]
    fn unknown_format_is_an_error() {
        let out = temp_out("rows.xml");
        assert!(write_rows(&sample_rows(), "xml", &out).is_err());
    }
}
