//! End-to-end scheduler tests against a fake simulation binary.
//!
//! The fake simulation reads the rendered parameter file, honors its
//! `FailFlag` parameter, and writes a fixed mass-function table into the
//! configured output directory, enough to drive both backends through
//! dispatch, waiting, evaluation, and cleanup.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use sc_constraints::{
    Aggregation, Constraint, ConstraintSet, FitnessEvaluator, ObservedData, StatisticalTest,
    TableModelReader,
};
use sc_sched::{IterationCoordinator, IterationRecord, PENALTY_FITNESS};
use sc_types::{CalError, ParameterSpace, ParameterSpec, RetryConfig, RunConfig};

const TEMPLATE: &str = "\
# fake simulation configuration
Knob       0.5
FailFlag   0.0
OutputDir  /placeholder
";

/// Simulation stand-in: crashes without output when `FailFlag` is set,
/// otherwise writes a table matching the observed data exactly.
const FAKE_SIM: &str = r#"#!/bin/sh
out=""
fail="0"
while read -r key val rest; do
    case "$key" in
        OutputDir) out="$val" ;;
        FailFlag) fail="$val" ;;
    esac
done < "$1"
case "$fail" in
    1*) exit 1 ;;
esac
mkdir -p "$out"
printf '8.5\t1.0\n9.5\t2.0\n10.5\t3.0\n' > "$out/mf_0.tsv"
"#;

fn write_executable(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    config: RunConfig,
}

fn fixture(run_name: &str) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();

    let binary = root.join("fake_sim");
    write_executable(&binary, FAKE_SIM);

    let template = root.join("template.cfg");
    fs::write(&template, TEMPLATE).unwrap();

    let config = RunConfig::new(run_name, &binary, &template, root.join("runs")).with_retry(
        RetryConfig {
            max_attempts: 2,
            delay_secs: 0,
        },
    );

    Fixture {
        _dir: dir,
        root,
        config,
    }
}

fn space() -> ParameterSpace {
    ParameterSpace::new(vec![
        ParameterSpec::new("Knob", 0.0, 1.0),
        ParameterSpec::new("FailFlag", 0.0, 1.0),
    ])
    .unwrap()
}

fn evaluator() -> FitnessEvaluator {
    let observed = ObservedData::new(
        vec![8.5, 9.5, 10.5],
        vec![1.0, 2.0, 3.0],
        vec![1.0, 1.0, 1.0],
    )
    .unwrap();
    let constraint = Constraint::new(
        "smf_z0",
        observed,
        Box::new(TableModelReader::new("output/mf_{subvolume}.tsv", 1)),
    );

    FitnessEvaluator::new(
        ConstraintSet::new(vec![constraint]),
        StatisticalTest::Chi2,
        Aggregation::Additive,
        vec![0],
    )
}

#[tokio::test]
async fn direct_backend_all_particles_succeed() {
    let fixture = fixture("direct_ok");
    let mut coordinator =
        IterationCoordinator::new(fixture.config.clone(), space(), evaluator()).unwrap();

    let particles = vec![vec![0.2, 0.0], vec![0.5, 0.0], vec![0.8, 0.0]];
    let fitness = coordinator.evaluate_batch(&particles).await.unwrap();

    assert_eq!(fitness.len(), 3);
    for score in &fitness {
        assert!(score.is_finite());
        // The fake simulation reproduces the observed table exactly.
        assert_eq!(*score, 0.0);
    }

    // Workspaces are gone, the track file is not.
    assert!(!fixture.root.join("runs/iteration_00000").exists());
    let track = fixture.root.join("runs/tracks/track_00000.json");
    let record = IterationRecord::load(&track).unwrap();
    assert_eq!(record.positions, particles);
    assert_eq!(record.fitness, fitness);
}

#[tokio::test]
async fn crashed_particle_is_penalized_alone() {
    let fixture = fixture("direct_crash");
    let mut coordinator =
        IterationCoordinator::new(fixture.config.clone(), space(), evaluator()).unwrap();

    let particles = vec![vec![0.2, 0.0], vec![0.5, 1.0], vec![0.8, 0.0]];
    let fitness = coordinator.evaluate_batch(&particles).await.unwrap();

    assert_eq!(fitness, vec![0.0, PENALTY_FITNESS, 0.0]);
}

#[tokio::test]
async fn iteration_counter_names_consecutive_tracks() {
    let fixture = fixture("direct_counter");
    let mut coordinator =
        IterationCoordinator::new(fixture.config.clone(), space(), evaluator()).unwrap();

    assert_eq!(coordinator.iteration(), 0);
    coordinator
        .evaluate_batch(&[vec![0.2, 0.0]])
        .await
        .unwrap();
    assert_eq!(coordinator.iteration(), 1);
    coordinator
        .evaluate_batch(&[vec![0.4, 0.0]])
        .await
        .unwrap();

    assert!(fixture.root.join("runs/tracks/track_00000.json").is_file());
    assert!(fixture.root.join("runs/tracks/track_00001.json").is_file());
}

#[tokio::test]
async fn out_of_bounds_particle_is_fatal() {
    let fixture = fixture("direct_bounds");
    let mut coordinator =
        IterationCoordinator::new(fixture.config.clone(), space(), evaluator()).unwrap();

    let result = coordinator.evaluate_batch(&[vec![2.0, 0.0]]).await;
    assert!(matches!(result, Err(CalError::Config(_))));
}

#[tokio::test]
async fn export_best_writes_two_lines() {
    let fixture = fixture("export");
    let coordinator =
        IterationCoordinator::new(fixture.config.clone(), space(), evaluator()).unwrap();

    let path = fixture.root.join("best.tsv");
    coordinator
        .export_best_csv(&path, &[0.25, 0.75], 12.5)
        .unwrap();

    let content = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines, vec!["0.25\t0.75", "12.5"]);
}

// --- queue backend against a mock scheduler -------------------------------

/// Mock sbatch: runs the wrapper script synchronously, then reports an id.
const MOCK_SBATCH: &str = "#!/bin/sh\nsh \"$1\" >/dev/null 2>&1\necho \"Submitted batch job 4242\"\n";

/// Mock squeue: always an empty (header-only) listing.
const MOCK_SQUEUE: &str = "#!/bin/sh\necho 'JOBID PARTITION NAME USER ST'\n";

fn queue_fixture(run_name: &str, sbatch_body: &str) -> Fixture {
    let mut fixture = fixture(run_name);

    let sbatch = fixture.root.join("sbatch_mock");
    let squeue = fixture.root.join("squeue_mock");
    write_executable(&sbatch, sbatch_body);
    write_executable(&squeue, MOCK_SQUEUE);

    fixture.config = fixture
        .config
        .clone()
        .with_cpus_per_particle(8)
        .with_direct_cpu_threshold(4);
    fixture.config.queue.submit_command = sbatch.display().to_string();
    fixture.config.queue.stat_command = squeue.display().to_string();
    fixture.config.queue.poll_interval_secs = 0;
    fixture.config.queue.settle_delay_secs = 0;
    fixture
}

#[tokio::test]
async fn queue_backend_stages_and_copies_back() {
    let fixture = queue_fixture("queue_ok", MOCK_SBATCH);
    let mut coordinator =
        IterationCoordinator::new(fixture.config.clone(), space(), evaluator()).unwrap();

    let particles = vec![vec![0.2, 0.0], vec![0.5, 1.0], vec![0.8, 0.0]];
    let fitness = coordinator.evaluate_batch(&particles).await.unwrap();

    // The crashing particle produced no staged output, so its copy-back
    // step failed and evaluation fell through to the penalty.
    assert_eq!(fitness, vec![0.0, PENALTY_FITNESS, 0.0]);
}

#[tokio::test]
async fn failing_submit_command_aborts_the_batch() {
    let fixture = queue_fixture(
        "queue_submit_fail",
        "#!/bin/sh\necho 'sbatch: error: invalid account' >&2\nexit 1\n",
    );
    let mut coordinator =
        IterationCoordinator::new(fixture.config.clone(), space(), evaluator()).unwrap();

    let result = coordinator.evaluate_batch(&[vec![0.2, 0.0]]).await;
    assert!(matches!(result, Err(CalError::Submission(_))));
}

#[tokio::test]
async fn unparsable_job_id_aborts_the_batch() {
    let fixture = queue_fixture("queue_bad_id", "#!/bin/sh\necho 'accepted'\n");
    let mut coordinator =
        IterationCoordinator::new(fixture.config.clone(), space(), evaluator()).unwrap();

    let result = coordinator.evaluate_batch(&[vec![0.2, 0.0]]).await;
    assert!(matches!(result, Err(CalError::Submission(_))));
}

#[tokio::test]
async fn keep_artifacts_preserves_workspaces_and_scripts() {
    let mut fixture = queue_fixture("queue_keep", MOCK_SBATCH);
    fixture.config = fixture.config.clone().with_keep_artifacts(true);
    let mut coordinator =
        IterationCoordinator::new(fixture.config.clone(), space(), evaluator()).unwrap();

    coordinator
        .evaluate_batch(&[vec![0.2, 0.0]])
        .await
        .unwrap();

    let workspace = fixture.root.join("runs/iteration_00000/particle_000");
    assert!(workspace.is_dir());

    let script = fs::read_to_string(workspace.join("submit.sh")).unwrap();
    assert!(script.contains("#SBATCH --job-name=queue_keep"));
    assert!(script.contains("#SBATCH --ntasks=8"));
    assert!(script.contains("#SBATCH --time=08:00:00"));
}
