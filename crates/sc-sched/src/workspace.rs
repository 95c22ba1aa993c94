//! Per-particle workspace allocation and parameter-file rendering.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use tracing::{debug, warn};

use sc_types::{CalResult, ConfigError, ParameterSpace, RunConfig};

/// Name of the rendered parameter file inside each workspace.
const PARAM_FILE: &str = "params.cfg";

/// Name of the generated batch submission script inside each workspace.
pub(crate) const SUBMIT_SCRIPT: &str = "submit.sh";

/// Subdirectory the simulation writes its output into.
pub(crate) const OUTPUT_SUBDIR: &str = "output";

/// An isolated per-particle filesystem area. Never reused across
/// iterations or particles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub iteration: u64,
    pub index: usize,
    pub dir: PathBuf,
    pub param_file: PathBuf,
}

impl Workspace {
    /// Directory the simulation's output lands in.
    pub fn output_dir(&self) -> PathBuf {
        self.dir.join(OUTPUT_SUBDIR)
    }
}

/// Allocates workspaces and renders the template parameter file for each
/// particle.
pub struct WorkspaceManager {
    space: ParameterSpace,
    /// Template lines, read once at construction.
    template: Vec<String>,
    /// Parameter name → component index, for leading-token matching.
    name_index: HashMap<String, usize>,
    output_root: PathBuf,
    output_dir_key: String,
    keep_artifacts: bool,
}

impl WorkspaceManager {
    pub fn new(config: &RunConfig, space: ParameterSpace) -> CalResult<Self> {
        let raw = fs::read_to_string(&config.template_path).map_err(|e| {
            ConfigError::TemplateUnreadable {
                path: config.template_path.display().to_string(),
                message: e.to_string(),
            }
        })?;

        let name_index = space
            .names()
            .enumerate()
            .map(|(i, name)| (name.to_string(), i))
            .collect();

        Ok(Self {
            space,
            template: raw.lines().map(str::to_string).collect(),
            name_index,
            output_root: config.output_root.clone(),
            output_dir_key: config.output_dir_key.clone(),
            keep_artifacts: config.keep_artifacts,
        })
    }

    /// Directory holding all of one iteration's workspaces.
    pub fn iteration_dir(&self, iteration: u64) -> PathBuf {
        self.output_root.join(format!("iteration_{iteration:05}"))
    }

    /// Allocate the workspace for one particle and render its parameter
    /// file.
    ///
    /// The directory is keyed by (iteration, particle index), which keeps
    /// it unique under concurrent creation; hitting an existing directory
    /// means the scheduler handed out the same key twice and is a fatal
    /// bug, not something to overwrite.
    pub fn create(&self, iteration: u64, index: usize, particle: &[f64]) -> CalResult<Workspace> {
        let dir = self.iteration_dir(iteration).join(format!("particle_{index:03}"));

        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::create_dir(&dir).map_err(|e| -> sc_types::CalError {
            if e.kind() == ErrorKind::AlreadyExists {
                ConfigError::WorkspaceCollision {
                    path: dir.display().to_string(),
                }
                .into()
            } else {
                e.into()
            }
        })?;

        let workspace = Workspace {
            iteration,
            index,
            param_file: dir.join(PARAM_FILE),
            dir,
        };

        let rendered = self.render(particle, &workspace);
        fs::write(&workspace.param_file, rendered)?;
        debug!(dir = %workspace.dir.display(), "workspace created");

        Ok(workspace)
    }

    /// Render the template for one particle.
    ///
    /// Copies line-by-line; a line whose leading token names a parameter is
    /// replaced with that parameter's physical value, rounded to six
    /// decimal digits in scientific notation. The output-directory
    /// directive is rewritten to point inside the workspace. Parameter
    /// matching stops once every name has been substituted once; the
    /// output directive is rewritten wherever it appears.
    fn render(&self, particle: &[f64], workspace: &Workspace) -> String {
        let mut remaining = self.name_index.len();
        let mut substituted = vec![false; self.space.dimension()];
        let mut out = String::new();

        for line in &self.template {
            let token = line.split_whitespace().next().unwrap_or("");

            if token == self.output_dir_key {
                out.push_str(&format!(
                    "{}  {}\n",
                    self.output_dir_key,
                    workspace.output_dir().display()
                ));
                continue;
            }

            if remaining > 0 {
                if let Some(&i) = self.name_index.get(token) {
                    if !substituted[i] {
                        substituted[i] = true;
                        remaining -= 1;
                        let value = self.space.physical_value(i, particle[i]);
                        out.push_str(&format!("{token}  {value:.6e}\n"));
                        continue;
                    }
                }
            }

            out.push_str(line);
            out.push('\n');
        }

        out
    }

    /// Remove one workspace tree. Honors keep-artifacts; failures are
    /// logged and swallowed.
    pub fn destroy(&self, workspace: &Workspace) {
        if self.keep_artifacts {
            debug!(dir = %workspace.dir.display(), "keeping workspace");
            return;
        }
        if let Err(e) = fs::remove_dir_all(&workspace.dir) {
            warn!(dir = %workspace.dir.display(), error = %e, "workspace removal failed");
        }
    }

    /// Remove per-job temporaries (parameter file, submit script) from one
    /// workspace, leaving the simulation output in place.
    pub fn remove_job_temporaries(&self, workspace: &Workspace) {
        if self.keep_artifacts {
            return;
        }
        for path in [&workspace.param_file, &workspace.dir.join(SUBMIT_SCRIPT)] {
            if path.is_file() {
                if let Err(e) = fs::remove_file(path) {
                    warn!(path = %path.display(), error = %e, "temporary removal failed");
                }
            }
        }
    }

    /// Remove a whole iteration's directory tree. Honors keep-artifacts;
    /// failures are logged and swallowed.
    pub fn cleanup_iteration(&self, iteration: u64) {
        if self.keep_artifacts {
            debug!(iteration, "keeping iteration artifacts");
            return;
        }
        let dir = self.iteration_dir(iteration);
        if let Err(e) = fs::remove_dir_all(&dir) {
            warn!(dir = %dir.display(), error = %e, "iteration cleanup failed");
        }
    }
}
