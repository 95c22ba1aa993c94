//! Parameter space definitions for calibration particles.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::errors::{CalResult, ConfigError};

/// One candidate parameter vector, as produced by the external optimizer.
///
/// Components are positions in the search space: log10 values for log-scaled
/// dimensions, physical values otherwise.
pub type Particle = Vec<f64>;

/// A single named, bounded calibration parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Key as it appears in the simulation parameter file.
    pub name: String,

    /// Human-readable label for reports and plots.
    pub label: String,

    /// Whether the optimizer explores this dimension in log10 space.
    #[serde(default)]
    pub log_scale: bool,

    /// Lower search bound (in position space).
    pub lower: f64,

    /// Upper search bound (in position space).
    pub upper: f64,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, lower: f64, upper: f64) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            log_scale: false,
            lower,
            upper,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_log_scale(mut self) -> Self {
        self.log_scale = true;
        self
    }
}

/// The full search space: an immutable, ordered list of parameter specs.
///
/// The order of specs defines particle dimensionality and component order;
/// it never changes after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpace {
    specs: Vec<ParameterSpec>,
}

impl ParameterSpace {
    /// Build a space from an ordered spec list, validating bounds and names.
    pub fn new(specs: Vec<ParameterSpec>) -> CalResult<Self> {
        if specs.is_empty() {
            return Err(ConfigError::InvalidParameterSpace {
                message: "parameter space has no dimensions".to_string(),
            }
            .into());
        }

        let mut seen = HashSet::new();
        for spec in &specs {
            if !spec.lower.is_finite() || !spec.upper.is_finite() {
                return Err(ConfigError::InvalidParameterSpace {
                    message: format!("parameter {} has non-finite bounds", spec.name),
                }
                .into());
            }
            if spec.lower >= spec.upper {
                return Err(ConfigError::InvalidParameterSpace {
                    message: format!(
                        "parameter {} has empty range [{}, {}]",
                        spec.name, spec.lower, spec.upper
                    ),
                }
                .into());
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(ConfigError::InvalidParameterSpace {
                    message: format!("duplicate parameter name: {}", spec.name),
                }
                .into());
            }
        }

        Ok(Self { specs })
    }

    /// Load a space from a JSON spec list.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> CalResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let specs: Vec<ParameterSpec> = serde_json::from_str(&raw)?;
        Self::new(specs)
    }

    /// Number of dimensions a particle must have.
    pub fn dimension(&self) -> usize {
        self.specs.len()
    }

    pub fn specs(&self) -> &[ParameterSpec] {
        &self.specs
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|s| s.name.as_str())
    }

    /// Validate one particle against the space: correct length, every
    /// component within its bounds.
    pub fn validate(&self, particle: &[f64]) -> CalResult<()> {
        if particle.len() != self.specs.len() {
            return Err(ConfigError::ParticleOutOfBounds {
                message: format!(
                    "particle has {} components, space has {} dimensions",
                    particle.len(),
                    self.specs.len()
                ),
            }
            .into());
        }

        for (spec, &value) in self.specs.iter().zip(particle) {
            if !value.is_finite() || value < spec.lower || value > spec.upper {
                return Err(ConfigError::ParticleOutOfBounds {
                    message: format!(
                        "{} = {} outside [{}, {}]",
                        spec.name, value, spec.lower, spec.upper
                    ),
                }
                .into());
            }
        }

        Ok(())
    }

    /// The physical value written into a parameter file for component
    /// `index` at position `position`: `10^position` for log-scaled
    /// dimensions, the position itself otherwise.
    pub fn physical_value(&self, index: usize, position: f64) -> f64 {
        if self.specs[index].log_scale {
            10f64.powf(position)
        } else {
            position
        }
    }
}
