//! Model-output readers: extract modeled vectors from a particle's
//! workspace.

use std::path::Path;

use sc_types::{CalResult, EvaluationError};
use tracing::debug;

/// Extracts the modeled vector a constraint compares against its observed
/// data. Implementations own the knowledge of where their quantity lives
/// inside a simulation output tree.
pub trait ModelReader: Send + Sync {
    /// Read the modeled values for one particle, aggregated over the given
    /// subvolumes.
    fn read(&self, workspace_dir: &Path, snapshot: u32, subvolumes: &[u32]) -> CalResult<Vec<f64>>;
}

/// Reads one numeric column from a tab-separated table per subvolume and
/// accumulates it bin-wise.
///
/// The path template is resolved relative to the workspace; `{snapshot}`
/// and `{subvolume}` placeholders expand per read. Subvolumes each cover a
/// disjoint fraction of the simulated volume, so per-bin counts add.
#[derive(Debug, Clone)]
pub struct TableModelReader {
    path_template: String,
    column: usize,
}

impl TableModelReader {
    pub fn new(path_template: impl Into<String>, column: usize) -> Self {
        Self {
            path_template: path_template.into(),
            column,
        }
    }

    fn resolve(&self, snapshot: u32, subvolume: u32) -> String {
        self.path_template
            .replace("{snapshot}", &snapshot.to_string())
            .replace("{subvolume}", &subvolume.to_string())
    }

    fn read_column(&self, path: &Path) -> CalResult<Vec<f64>> {
        if !path.is_file() {
            return Err(EvaluationError::MissingOutput {
                path: path.display().to_string(),
            }
            .into());
        }

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .comment(Some(b'#'))
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .map_err(|e| EvaluationError::ParseError {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        let mut values = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|e| EvaluationError::ParseError {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

            let field = record.get(self.column).ok_or_else(|| EvaluationError::ParseError {
                path: path.display().to_string(),
                message: format!("row {} has no column {}", line + 1, self.column),
            })?;

            let value: f64 = field.trim().parse().map_err(|e| EvaluationError::ParseError {
                path: path.display().to_string(),
                message: format!("row {}: {}", line + 1, e),
            })?;
            values.push(value);
        }

        Ok(values)
    }
}

impl ModelReader for TableModelReader {
    fn read(&self, workspace_dir: &Path, snapshot: u32, subvolumes: &[u32]) -> CalResult<Vec<f64>> {
        let mut total: Vec<f64> = Vec::new();

        for &subvolume in subvolumes {
            let path = workspace_dir.join(self.resolve(snapshot, subvolume));
            let values = self.read_column(&path)?;
            debug!(
                path = %path.display(),
                bins = values.len(),
                "read model table"
            );

            if total.is_empty() {
                total = values;
            } else if values.len() == total.len() {
                for (acc, v) in total.iter_mut().zip(values) {
                    *acc += v;
                }
            } else {
                return Err(EvaluationError::ParseError {
                    path: path.display().to_string(),
                    message: format!(
                        "subvolume {} has {} bins, expected {}",
                        subvolume,
                        values.len(),
                        total.len()
                    ),
                }
                .into());
            }
        }

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn reads_selected_column() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("output")).unwrap();
        fs::write(
            dir.path().join("output/mf_0.tsv"),
            "# x\ty\n8.5\t1.0\n9.5\t2.0\n10.5\t3.0\n",
        )
        .unwrap();

        let reader = TableModelReader::new("output/mf_{subvolume}.tsv", 1);
        let values = reader.read(dir.path(), 0, &[0]).unwrap();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn accumulates_across_subvolumes() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("output")).unwrap();
        fs::write(dir.path().join("output/mf_0.tsv"), "8.5\t1.0\n9.5\t2.0\n").unwrap();
        fs::write(dir.path().join("output/mf_1.tsv"), "8.5\t0.5\n9.5\t0.5\n").unwrap();

        let reader = TableModelReader::new("output/mf_{subvolume}.tsv", 1);
        let values = reader.read(dir.path(), 0, &[0, 1]).unwrap();
        assert_eq!(values, vec![1.5, 2.5]);
    }

    #[test]
    fn missing_file_is_missing_output() {
        let dir = tempfile::tempdir().unwrap();
        let reader = TableModelReader::new("output/mf_{subvolume}.tsv", 1);

        match reader.read(dir.path(), 0, &[0]) {
            Err(sc_types::CalError::Evaluation(EvaluationError::MissingOutput { .. })) => (),
            other => panic!("expected MissingOutput, got {other:?}"),
        }
    }

    #[test]
    fn mismatched_subvolume_shapes_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("output")).unwrap();
        fs::write(dir.path().join("output/mf_0.tsv"), "8.5\t1.0\n9.5\t2.0\n").unwrap();
        fs::write(dir.path().join("output/mf_1.tsv"), "8.5\t0.5\n").unwrap();

        let reader = TableModelReader::new("output/mf_{subvolume}.tsv", 1);
        assert!(reader.read(dir.path(), 0, &[0, 1]).is_err());
    }

    #[test]
    fn snapshot_placeholder_expands() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("output/snapshot_199")).unwrap();
        fs::write(dir.path().join("output/snapshot_199/mf_0.tsv"), "8.5\t4.0\n").unwrap();

        let reader = TableModelReader::new("output/snapshot_{snapshot}/mf_{subvolume}.tsv", 1);
        let values = reader.read(dir.path(), 199, &[0]).unwrap();
        assert_eq!(values, vec![4.0]);
    }
}
