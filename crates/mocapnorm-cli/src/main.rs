//! mocapnorm CLI: normalise motion-capture trajectory files.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use mocapnorm::{
    ContactLockConfig, DispersionConfig, MemoryStore, NormalizeConfig, Skeleton, SkeletonSpec,
    TrajectoryStore,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "mocapnorm")]
#[command(
    about = "Reduce bone-length dispersion, lock foot contacts and compute pole targets on marker trajectories"
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the bone length statistics table.
    Stats(CliStatsArgs),

    /// Correct bone lengths outside their tolerance interval.
    ReduceDispersion(CliDispersionArgs),

    /// Lock feet to the ground and re-solve ankle heights.
    LockContacts(CliLockArgs),

    /// Compute pole-target trajectories.
    Poles(CliIoArgs),

    /// Run every enabled pass in order.
    Run(CliRunArgs),

    /// Print the skeleton layout (humanoid default when none is given).
    SkeletonInfo {
        /// Skeleton spec (JSON).
        #[arg(long)]
        skeleton: Option<PathBuf>,

        /// Print the full spec as JSON instead of a summary.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Args)]
struct CliIoArgs {
    /// Input trajectories (JSON, `mocapnorm.trajectories.v1`).
    #[arg(long)]
    trajectories: PathBuf,

    /// Path to write the corrected trajectories.
    #[arg(long)]
    out: PathBuf,

    /// Skeleton spec (JSON). Defaults to the humanoid preset.
    #[arg(long)]
    skeleton: Option<PathBuf>,

    /// Path to write the pass report (JSON).
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct CliStatsArgs {
    /// Input trajectories (JSON).
    #[arg(long)]
    trajectories: PathBuf,

    /// Skeleton spec (JSON). Defaults to the humanoid preset.
    #[arg(long)]
    skeleton: Option<PathBuf>,

    /// Scene → display unit multiplier.
    #[arg(long, default_value = "100.0")]
    display_scale: f64,
}

#[derive(Debug, Clone, Args, Default)]
struct CliDispersionOverrides {
    /// Interval derivation mode.
    #[arg(long, value_enum)]
    interval_variable: Option<IntervalVariableArg>,

    /// Tolerance factor (clamped per mode).
    #[arg(long)]
    interval_factor: Option<f64>,

    /// Subject height in scene units (standard_length mode).
    #[arg(long)]
    body_height: Option<f64>,
}

impl CliDispersionOverrides {
    fn apply(&self, config: &mut DispersionConfig) {
        if let Some(v) = self.interval_variable {
            config.interval_variable = v.to_core();
        }
        if let Some(v) = self.interval_factor {
            config.interval_factor = v;
        }
        if let Some(v) = self.body_height {
            config.body_height = v;
        }
    }
}

#[derive(Debug, Clone, Args, Default)]
struct CliLockOverrides {
    /// Feet to lock.
    #[arg(long, value_enum)]
    target_foot: Option<TargetFootArg>,

    /// Base markers used for contact detection.
    #[arg(long, value_enum)]
    target_base_markers: Option<TargetBaseMarkersArg>,

    /// Contact height threshold.
    #[arg(long)]
    z_threshold: Option<f64>,

    /// Ground plane height.
    #[arg(long)]
    ground_level: Option<f64>,

    /// Minimum window length for a full lock.
    #[arg(long)]
    frame_window_min_size: Option<usize>,

    /// Frames blended at the start of a locked window.
    #[arg(long)]
    initial_attenuation_count: Option<usize>,

    /// Frames blended at the end of a locked window.
    #[arg(long)]
    final_attenuation_count: Option<usize>,

    /// Freeze x/y on hard-locked frames.
    #[arg(long)]
    lock_xy: bool,

    /// Share of the ankle correction applied to knee and hip, in [0, 1].
    #[arg(long)]
    knee_hip_compensation: Option<f64>,

    /// Disable torso re-centring between the hips.
    #[arg(long)]
    no_upper_body: bool,

    /// Ankle height solver backend.
    #[arg(long, value_enum)]
    solver: Option<HeightSolverArg>,
}

impl CliLockOverrides {
    fn apply(&self, config: &mut ContactLockConfig) {
        if let Some(v) = self.target_foot {
            config.target_foot = v.to_core();
        }
        if let Some(v) = self.target_base_markers {
            config.target_base_markers = v.to_core();
        }
        if let Some(v) = self.z_threshold {
            config.z_threshold = v;
        }
        if let Some(v) = self.ground_level {
            config.ground_level = v;
        }
        if let Some(v) = self.frame_window_min_size {
            config.frame_window_min_size = v;
        }
        if let Some(v) = self.initial_attenuation_count {
            config.initial_attenuation_count = v;
        }
        if let Some(v) = self.final_attenuation_count {
            config.final_attenuation_count = v;
        }
        if self.lock_xy {
            config.lock_xy_at_ground_level = true;
        }
        if let Some(v) = self.knee_hip_compensation {
            config.knee_hip_compensation_coefficient = v;
        }
        if self.no_upper_body {
            config.compensate_upper_body = false;
        }
        if let Some(v) = self.solver {
            config.solver = v.to_core();
        }
    }
}

#[derive(Debug, Clone, Args)]
struct CliDispersionArgs {
    #[command(flatten)]
    io: CliIoArgs,

    /// Pass configuration (JSON, `NormalizeConfig` layout).
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    dispersion: CliDispersionOverrides,
}

#[derive(Debug, Clone, Args)]
struct CliLockArgs {
    #[command(flatten)]
    io: CliIoArgs,

    /// Pass configuration (JSON, `NormalizeConfig` layout).
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    lock: CliLockOverrides,
}

#[derive(Debug, Clone, Args)]
struct CliRunArgs {
    #[command(flatten)]
    io: CliIoArgs,

    /// Pass configuration (JSON, `NormalizeConfig` layout).
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    dispersion: CliDispersionOverrides,

    #[command(flatten)]
    lock: CliLockOverrides,

    /// Skip dispersion reduction.
    #[arg(long)]
    no_dispersion: bool,

    /// Skip contact locking.
    #[arg(long)]
    no_lock: bool,

    /// Skip pole targets.
    #[arg(long)]
    no_poles: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum IntervalVariableArg {
    CaptureMedian,
    CaptureStdev,
    StandardLength,
}

impl IntervalVariableArg {
    fn to_core(self) -> mocapnorm::IntervalVariable {
        match self {
            Self::CaptureMedian => mocapnorm::IntervalVariable::CaptureMedian,
            Self::CaptureStdev => mocapnorm::IntervalVariable::CaptureStdev,
            Self::StandardLength => mocapnorm::IntervalVariable::StandardLength,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TargetFootArg {
    Left,
    Right,
    Both,
}

impl TargetFootArg {
    fn to_core(self) -> mocapnorm::TargetFoot {
        match self {
            Self::Left => mocapnorm::TargetFoot::Left,
            Self::Right => mocapnorm::TargetFoot::Right,
            Self::Both => mocapnorm::TargetFoot::Both,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TargetBaseMarkersArg {
    FootIndex,
    Heel,
    Both,
}

impl TargetBaseMarkersArg {
    fn to_core(self) -> mocapnorm::TargetBaseMarkers {
        match self {
            Self::FootIndex => mocapnorm::TargetBaseMarkers::FootIndex,
            Self::Heel => mocapnorm::TargetBaseMarkers::Heel,
            Self::Both => mocapnorm::TargetBaseMarkers::Both,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum HeightSolverArg {
    GaussNewton,
    Lm,
    GoldenSection,
}

impl HeightSolverArg {
    fn to_core(self) -> mocapnorm::HeightSolver {
        match self {
            Self::GaussNewton => mocapnorm::HeightSolver::GaussNewton,
            Self::Lm => mocapnorm::HeightSolver::Lm,
            Self::GoldenSection => mocapnorm::HeightSolver::GoldenSection,
        }
    }
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Stats(args) => run_stats(&args),
        Commands::ReduceDispersion(args) => run_reduce_dispersion(&args),
        Commands::LockContacts(args) => run_lock_contacts(&args),
        Commands::Poles(args) => run_poles(&args),
        Commands::Run(args) => run_all(&args),
        Commands::SkeletonInfo { skeleton, json } => run_skeleton_info(skeleton.as_deref(), json),
    }
}

// ── shared io ──────────────────────────────────────────────────────────

fn load_skeleton(path: Option<&Path>) -> CliResult<Skeleton> {
    match path {
        Some(p) => {
            tracing::info!("Loading skeleton: {}", p.display());
            Skeleton::from_json_file(p)
                .map_err(|e| -> CliError { format!("skeleton {}: {}", p.display(), e).into() })
        }
        None => Ok(Skeleton::default()),
    }
}

fn load_store(path: &Path) -> CliResult<MemoryStore> {
    tracing::info!("Loading trajectories: {}", path.display());
    let store = MemoryStore::from_json_file(path)
        .map_err(|e| -> CliError { format!("trajectories {}: {}", path.display(), e).into() })?;
    let (start, end) = store.frame_range();
    tracing::info!(
        "{} trajectories, frames {}..={} ({} frames)",
        store.len(),
        start,
        end,
        store.frame_count()
    );
    Ok(store)
}

fn load_config(path: Option<&Path>) -> CliResult<NormalizeConfig> {
    match path {
        Some(p) => NormalizeConfig::from_json_file(p)
            .map_err(|e| -> CliError { format!("config {}: {}", p.display(), e).into() }),
        None => Ok(NormalizeConfig::default()),
    }
}

fn write_outputs<R: serde::Serialize>(
    io: &CliIoArgs,
    store: &MemoryStore,
    report: &R,
) -> CliResult<()> {
    store.to_json_file(&io.out)?;
    tracing::info!("Trajectories written to {}", io.out.display());
    if let Some(path) = &io.report {
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(path, &json)?;
        tracing::info!("Report written to {}", path.display());
    }
    Ok(())
}

// ── stats ──────────────────────────────────────────────────────────────

fn run_stats(args: &CliStatsArgs) -> CliResult<()> {
    let skeleton = load_skeleton(args.skeleton.as_deref())?;
    let store = load_store(&args.trajectories)?;

    let results = mocapnorm::compute_bone_stats(&store, &skeleton.bones);
    for (bone, r) in skeleton.bones.iter().zip(&results) {
        if let Err(e) = r {
            tracing::warn!("bone '{}': {}", bone.name, e);
        }
    }
    print!(
        "{}",
        mocapnorm::StatsTable::from_results(&results, args.display_scale)
    );
    Ok(())
}

// ── reduce-dispersion ──────────────────────────────────────────────────

fn run_reduce_dispersion(args: &CliDispersionArgs) -> CliResult<()> {
    let skeleton = load_skeleton(args.io.skeleton.as_deref())?;
    let mut store = load_store(&args.io.trajectories)?;
    let mut config = load_config(args.config.as_deref())?.dispersion;
    args.dispersion.apply(&mut config);

    let report =
        mocapnorm::reduce_dispersion(&mut store, &skeleton.hierarchy, &skeleton.bones, &config)?;

    println!("before ({}):", report.mode);
    print!("{}", report.before);
    println!("after:");
    print!("{}", report.after);
    tracing::info!("Corrected {} bone frames", report.total_corrected());

    write_outputs(&args.io, &store, &report)
}

// ── lock-contacts ──────────────────────────────────────────────────────

fn run_lock_contacts(args: &CliLockArgs) -> CliResult<()> {
    let skeleton = load_skeleton(args.io.skeleton.as_deref())?;
    let mut store = load_store(&args.io.trajectories)?;
    let mut config = load_config(args.config.as_deref())?.contact_lock;
    args.lock.apply(&mut config);

    let report = mocapnorm::lock_contacts(&mut store, &skeleton, &config)?;
    for limb in &report.limbs {
        tracing::info!(
            "{} foot: {} frames touched, {} ankle frames solved, {} failed",
            limb.side,
            limb.n_frames_touched,
            limb.n_ankle_solved,
            limb.n_ankle_failed,
        );
    }

    write_outputs(&args.io, &store, &report)
}

// ── poles ──────────────────────────────────────────────────────────────

fn run_poles(args: &CliIoArgs) -> CliResult<()> {
    let skeleton = load_skeleton(args.skeleton.as_deref())?;
    let mut store = load_store(&args.trajectories)?;

    let report = mocapnorm::apply_pole_targets(&mut store, &skeleton.poles)?;
    for chain in &report.chains {
        match &chain.error {
            Some(e) => tracing::warn!("{}: {}", chain.name, e),
            None => tracing::info!(
                "{} → {}: {} primary, {} blended, {} undefined",
                chain.name,
                chain.output,
                chain.n_primary,
                chain.n_blended,
                chain.n_undefined,
            ),
        }
    }

    write_outputs(args, &store, &report)
}

// ── run ────────────────────────────────────────────────────────────────

fn run_all(args: &CliRunArgs) -> CliResult<()> {
    let skeleton = load_skeleton(args.io.skeleton.as_deref())?;
    let mut store = load_store(&args.io.trajectories)?;
    let mut config = load_config(args.config.as_deref())?;
    args.dispersion.apply(&mut config.dispersion);
    args.lock.apply(&mut config.contact_lock);
    if args.no_dispersion {
        config.reduce_dispersion = false;
    }
    if args.no_lock {
        config.lock_contacts = false;
    }
    if args.no_poles {
        config.add_pole_targets = false;
    }

    let report = mocapnorm::normalize(&mut store, &skeleton, &config)?;
    if let Some(d) = &report.dispersion {
        println!("before ({}):", d.mode);
        print!("{}", d.before);
        println!("after:");
        print!("{}", d.after);
    }

    write_outputs(&args.io, &store, &report)
}

// ── skeleton-info ──────────────────────────────────────────────────────

/// Pretty JSON of a skeleton spec, validated the same way the passes load it.
fn skeleton_spec_json(path: Option<&Path>) -> CliResult<String> {
    let spec = match path {
        Some(p) => {
            let data = std::fs::read_to_string(p)?;
            Skeleton::from_json_str(&data)
                .map_err(|e| -> CliError { format!("skeleton {}: {}", p.display(), e).into() })?;
            serde_json::from_str::<SkeletonSpec>(&data)?
        }
        None => SkeletonSpec::humanoid(),
    };
    Ok(serde_json::to_string_pretty(&spec)?)
}

fn run_skeleton_info(path: Option<&Path>, json: bool) -> CliResult<()> {
    if json {
        println!("{}", skeleton_spec_json(path)?);
        return Ok(());
    }

    let skeleton = load_skeleton(path)?;
    println!("skeleton: {}", skeleton.name);
    println!("  hierarchy markers: {}", skeleton.hierarchy.len());
    println!("  bones:             {}", skeleton.bones.len());
    for b in &skeleton.bones {
        match b.reference_length {
            Some(r) => println!("    {:<14} {} → {}  (ref {:.3})", b.name, b.head, b.tail, r),
            None => println!("    {:<14} {} → {}", b.name, b.head, b.tail),
        }
    }
    println!("  feet:              {}", skeleton.feet.len());
    for f in &skeleton.feet {
        println!(
            "    {:<5} ankle={} heel={} foot_index={} compensation=[{}]",
            f.side.to_string(),
            f.ankle,
            f.heel,
            f.foot_index,
            f.compensation.join(", ")
        );
    }
    if let Some(u) = &skeleton.upper_body {
        println!(
            "  upper body:        root={} hips=({}, {})",
            u.root, u.left_hip, u.right_hip
        );
    }
    println!("  pole chains:       {}", skeleton.poles.len());
    for p in &skeleton.poles {
        println!(
            "    {:<14} {} → {} → {}  τ={}  output={}",
            p.name,
            p.base,
            p.pole,
            p.target,
            p.threshold,
            p.output_name()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "mocapnorm-cli-{}-{}",
            std::process::id(),
            name
        ));
        std::fs::write(&path, contents).expect("write temp file");
        path
    }

    #[test]
    fn poles_subcommand_has_no_config_flag() {
        let base = ["mocapnorm", "poles", "--trajectories", "in.json", "--out", "out.json"];
        assert!(Cli::try_parse_from(base).is_ok());
        let with_config = base.iter().copied().chain(["--config", "cfg.json"]);
        assert!(Cli::try_parse_from(with_config).is_err());
    }

    #[test]
    fn pass_subcommands_accept_config() {
        for cmd in ["reduce-dispersion", "lock-contacts", "run"] {
            let cli = Cli::try_parse_from([
                "mocapnorm",
                cmd,
                "--trajectories",
                "in.json",
                "--out",
                "out.json",
                "--config",
                "cfg.json",
            ]);
            assert!(cli.is_ok(), "{}", cmd);
        }
    }

    #[test]
    fn skeleton_json_rejects_invalid_spec() {
        let mut spec = SkeletonSpec::humanoid();
        let dup = spec.bones[0].clone();
        spec.bones.push(dup);
        let path = write_temp(
            "dup-bone.json",
            &serde_json::to_string(&spec).expect("serialize"),
        );
        let err = skeleton_spec_json(Some(&path)).expect_err("duplicate bone");
        assert!(err.to_string().contains("skeleton"));

        let mut spec = SkeletonSpec::humanoid();
        spec.schema = "mocapnorm.skeleton.v0".to_string();
        let path = write_temp(
            "old-schema.json",
            &serde_json::to_string(&spec).expect("serialize"),
        );
        assert!(skeleton_spec_json(Some(&path)).is_err());
    }

    #[test]
    fn skeleton_json_prints_valid_spec() {
        let json = serde_json::to_string(&SkeletonSpec::humanoid()).expect("serialize");
        let path = write_temp("humanoid.json", &json);
        let out = skeleton_spec_json(Some(&path)).expect("valid");
        let back: SkeletonSpec = serde_json::from_str(&out).expect("parse");
        assert_eq!(back.bones.len(), SkeletonSpec::humanoid().bones.len());
        assert!(skeleton_spec_json(None).is_ok());
    }
}
