//! Observational constraints compared against simulation output.

use serde::{Deserialize, Serialize};
use std::path::Path;

use sc_types::{CalResult, EvaluationError};

use crate::reader::{ModelReader, TableModelReader};

/// One observational dataset: bin centers, values, and per-bin errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedData {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub err: Vec<f64>,
}

impl ObservedData {
    pub fn new(x: Vec<f64>, y: Vec<f64>, err: Vec<f64>) -> CalResult<Self> {
        if x.len() != y.len() || x.len() != err.len() {
            return Err(EvaluationError::ShapeMismatch {
                name: "observed data".to_string(),
                observed: x.len(),
                modeled: y.len().max(err.len()),
            }
            .into());
        }
        Ok(Self { x, y, err })
    }

    /// Load a three-column (x, y, err) tab-separated table. Lines starting
    /// with `#` are comments.
    pub fn from_tsv_file<P: AsRef<Path>>(path: P) -> CalResult<Self> {
        let path = path.as_ref();
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

        let mut x = Vec::new();
        let mut y = Vec::new();
        let mut err = Vec::new();

        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|e| EvaluationError::ParseError {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

            let field = |column: usize| -> CalResult<f64> {
                let raw = record.get(column).ok_or_else(|| EvaluationError::ParseError {
                    path: path.display().to_string(),
                    message: format!("row {} has no column {}", line + 1, column),
                })?;
                raw.trim().parse().map_err(|e| {
                    EvaluationError::ParseError {
                        path: path.display().to_string(),
                        message: format!("row {}: {}", line + 1, e),
                    }
                    .into()
                })
            };

            x.push(field(0)?);
            y.push(field(1)?);
            err.push(field(2)?);
        }

        Self::new(x, y, err)
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// One observational dataset plus the rule for comparing a simulation run
/// against it. Read-only and shared across all particles of a run.
pub struct Constraint {
    pub name: String,

    /// Relative weight of this constraint in the aggregate fitness.
    pub weight: f64,

    /// Inclusive x-range retained for scoring. `None` keeps every bin.
    pub domain: Option<(f64, f64)>,

    /// Simulation snapshot the modeled data is read from.
    pub snapshot: u32,

    observed: ObservedData,
    reader: Box<dyn ModelReader>,
}

impl Constraint {
    pub fn new(
        name: impl Into<String>,
        observed: ObservedData,
        reader: Box<dyn ModelReader>,
    ) -> Self {
        Self {
            name: name.into(),
            weight: 1.0,
            domain: None,
            snapshot: 0,
            observed,
            reader,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_domain(mut self, min: f64, max: f64) -> Self {
        self.domain = Some((min, max));
        self
    }

    pub fn with_snapshot(mut self, snapshot: u32) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn observed(&self) -> &ObservedData {
        &self.observed
    }

    /// Extract equal-length (observed, modeled, error) arrays for one
    /// particle's workspace, restricted to this constraint's domain.
    pub fn get_data(
        &self,
        workspace_dir: &Path,
        subvolumes: &[u32],
    ) -> CalResult<(Vec<f64>, Vec<f64>, Vec<f64>)> {
        let modeled = self.reader.read(workspace_dir, self.snapshot, subvolumes)?;

        if modeled.len() != self.observed.len() {
            return Err(EvaluationError::ShapeMismatch {
                name: self.name.clone(),
                observed: self.observed.len(),
                modeled: modeled.len(),
            }
            .into());
        }

        let keep = |x: f64| match self.domain {
            Some((min, max)) => x >= min && x <= max,
            None => true,
        };

        let mut obs = Vec::new();
        let mut model = Vec::new();
        let mut err = Vec::new();
        for (i, &x) in self.observed.x.iter().enumerate() {
            if keep(x) {
                obs.push(self.observed.y[i]);
                model.push(modeled[i]);
                err.push(self.observed.err[i]);
            }
        }

        if obs.is_empty() {
            return Err(EvaluationError::EmptyDomain {
                name: self.name.clone(),
            }
            .into());
        }

        Ok((obs, model, err))
    }
}

impl std::fmt::Debug for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Constraint")
            .field("name", &self.name)
            .field("weight", &self.weight)
            .field("domain", &self.domain)
            .field("snapshot", &self.snapshot)
            .field("bins", &self.observed.len())
            .finish()
    }
}

/// The read-only collection of constraints a run scores against.
#[derive(Debug, Default)]
pub struct ConstraintSet {
    constraints: Vec<Constraint>,
}

impl ConstraintSet {
    pub fn new(constraints: Vec<Constraint>) -> Self {
        Self { constraints }
    }

    pub fn push(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter()
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }
}

/// Serializable recipe for building a [`Constraint`] with the bundled
/// table reader. Lets runs declare their constraint list in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintConfig {
    pub name: String,
    /// Path of the observed (x, y, err) table.
    pub observed_path: String,
    /// Workspace-relative model table template (`{snapshot}`,
    /// `{subvolume}` placeholders).
    pub model_path_template: String,
    /// Zero-based column of the modeled quantity.
    pub model_column: usize,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub domain: Option<(f64, f64)>,
    #[serde(default)]
    pub snapshot: u32,
}

fn default_weight() -> f64 {
    1.0
}

impl ConstraintConfig {
    pub fn build(&self) -> CalResult<Constraint> {
        let observed = ObservedData::from_tsv_file(&self.observed_path)?;
        let reader = TableModelReader::new(self.model_path_template.clone(), self.model_column);

        let mut constraint =
            Constraint::new(self.name.clone(), observed, Box::new(reader)).with_weight(self.weight);
        constraint.snapshot = self.snapshot;
        constraint.domain = self.domain;
        Ok(constraint)
    }
}
