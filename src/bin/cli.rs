//! CLI for building AU delta tables and retargeting landmark frames.
//!
//! Usage:
//!   facial-retarget precompute --manifest models.json --muscles musclePatches.json -o deltaTransfer.json
//!   facial-retarget evaluate --neutral neutral.json --current frame.json [--json]
//!   facial-retarget retarget --mesh face.obj --neutral neutral.json frame_*.json -o out.obj
//!   facial-retarget inspect deltaTransfer.bin.bz2

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use facial_retarget::{
    bounds, landmarks::load_frame, loaders, precompute_table, Accumulation, ActivationResult,
    AuDeltaTable, BlendshapeManifest, DistancePolicy, ObjMesh, RetargetConfig, Retargeter,
    RetargeterBuilder, Vec3,
};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "facial-retarget")]
#[command(author, version, about = "Facial landmark to muscle mesh retargeting", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Retargeting config (data paths, thresholds, distance policy)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Lower activation threshold
    #[arg(long, global = true)]
    threshold_min: Option<f32>,

    /// Upper activation threshold
    #[arg(long, global = true)]
    threshold_max: Option<f32>,

    /// Distance policy for entries with several landmark pairs
    #[arg(long, global = true, value_parser = parse_policy)]
    policy: Option<DistancePolicy>,

    /// Show debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Diff every blendshape against the neutral mesh and save the delta table
    Precompute {
        /// Model paths document: neutral mesh and AU blendshapes
        #[arg(long)]
        manifest: PathBuf,

        /// Muscle index map (defaults to the config's)
        #[arg(long)]
        muscles: Option<PathBuf>,

        /// Output table (.json, .bin, optionally .bz2)
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Report the active AU of one frame against a neutral frame
    Evaluate {
        #[arg(long)]
        neutral: PathBuf,

        #[arg(long)]
        current: PathBuf,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Deform an OBJ mesh through a sequence of frames
    Retarget {
        #[arg(long)]
        mesh: PathBuf,

        #[arg(long)]
        neutral: PathBuf,

        /// Frames, applied in order
        #[arg(required = true)]
        frames: Vec<PathBuf>,

        /// Output OBJ
        #[arg(short, long)]
        output: PathBuf,

        /// Accumulation state to resume from and save back to
        #[arg(long)]
        state: Option<PathBuf>,
    },

    /// Summarize a delta table
    Inspect { table: PathBuf },
}

fn parse_policy(s: &str) -> Result<DistancePolicy, String> {
    match s {
        "lastPair" | "last-pair" | "last" => Ok(DistancePolicy::LastPair),
        "mean" => Ok(DistancePolicy::Mean),
        _ => Err(format!("unknown distance policy '{}' (expected last-pair or mean)", s)),
    }
}

/// Frame evaluation output for JSON serialization
#[derive(Serialize)]
struct EvaluateOutput {
    neutral: String,
    current: String,
    features: usize,
    activation: Option<ActivationResult>,
}

/// Per-frame line of the retarget summary
#[derive(Serialize)]
struct FrameOutput {
    frame: String,
    au_id: Option<u32>,
    intensity: f32,
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Args) -> Result<RetargetConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => RetargetConfig::load(path)?,
        None => RetargetConfig::default(),
    };
    if let Some(min) = args.threshold_min {
        config.thresholds.min = min;
    }
    if let Some(max) = args.threshold_max {
        config.thresholds.max = max;
    }
    if let Some(policy) = args.policy {
        config.distance_policy = policy;
    }
    config.thresholds.validate()?;
    Ok(config)
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(args)?;

    match &args.command {
        Command::Precompute {
            manifest,
            muscles,
            output,
        } => precompute(&config, manifest, muscles.as_deref(), output),
        Command::Evaluate {
            neutral,
            current,
            json,
        } => evaluate(&config, neutral, current, *json),
        Command::Retarget {
            mesh,
            neutral,
            frames,
            output,
            state,
        } => retarget(&config, mesh, neutral, frames, output, state.as_deref()),
        Command::Inspect { table } => inspect(table),
    }
}

fn precompute(
    config: &RetargetConfig,
    manifest: &Path,
    muscles: Option<&Path>,
    output: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let muscle_path = muscles.unwrap_or(config.muscle_index_map.as_path());
    let mut muscle_map = loaders::load_muscle_index_map(muscle_path).into_value();
    if muscle_map.is_empty() {
        return Err(format!("no muscles loaded from {}", muscle_path.display()).into());
    }

    let manifest = BlendshapeManifest::load(manifest)?.into_value();
    let neutral = manifest.load_neutral()?;
    muscle_map.retain_in_bounds(neutral.len());

    let jobs = manifest.load_jobs().into_value();
    let table = precompute_table(&neutral, &jobs, &muscle_map);
    table.save(output)?;

    info!(path = %output.display(), "saved AU delta table");
    println!(
        "{} action units, {} side variants -> {}",
        table.len(),
        table.entry_count(),
        output.display()
    );
    Ok(())
}

/// Tables and maps for frame evaluation, without a real mesh.
fn evaluator(config: &RetargetConfig) -> Result<Retargeter<ObjMesh>, Box<dyn std::error::Error>> {
    let landmark_map = loaders::load_action_unit_mappings(&config.landmarks_action_units)?;
    let pixel_index = loaders::load_landmark_indices(&config.landmarks_pixel_index)?;
    Ok(RetargeterBuilder::new()
        .mesh(ObjMesh::default())
        .delta_table(AuDeltaTable::new())
        .landmark_map(landmark_map.into_value())
        .pixel_landmark_indices(pixel_index)
        .thresholds(config.thresholds)
        .distance_policy(config.distance_policy)
        .build()?)
}

fn evaluate(
    config: &RetargetConfig,
    neutral: &Path,
    current: &Path,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut retargeter = evaluator(config)?;
    retargeter.set_neutral_frame(&load_frame(neutral)?)?;

    let frame = load_frame(current)?;
    let features = retargeter.features(&frame).map_or(0, |f| f.len());
    let activation = retargeter.detect(&frame)?;

    if json {
        let output = EvaluateOutput {
            neutral: neutral.display().to_string(),
            current: current.display().to_string(),
            features,
            activation,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        match activation {
            Some(a) => println!(
                "AU{} {}: distance {:.4} -> {:.4} (delta {:.4}), intensity {:.3}",
                a.au_id,
                a.side,
                a.base_distance,
                a.current_distance,
                a.delta(),
                a.intensity
            ),
            None => println!("No active AU ({} features evaluated)", features),
        }
    }
    Ok(())
}

fn retarget(
    config: &RetargetConfig,
    mesh: &Path,
    neutral: &Path,
    frames: &[PathBuf],
    output: &Path,
    state: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut builder = RetargeterBuilder::from_config(config)?.mesh(ObjMesh::load(mesh)?);
    if let Some(path) = state.filter(|p| p.exists()) {
        let saved: Accumulation = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        builder = builder.state(saved);
    }
    let mut retargeter = builder.build()?;
    retargeter.set_neutral_frame(&load_frame(neutral)?)?;

    for frame_path in frames {
        let frame = match load_frame(frame_path) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(frame = %frame_path.display(), "skipping frame: {}", e);
                continue;
            }
        };
        let activation = retargeter.process_frame(&frame)?;
        let line = FrameOutput {
            frame: frame_path.display().to_string(),
            au_id: activation.as_ref().map(|a| a.au_id),
            intensity: activation.as_ref().map_or(0.0, |a| a.intensity),
        };
        println!("{}", serde_json::to_string(&line)?);
    }

    retargeter.mesh().save(output)?;
    if let Some(path) = state {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, retargeter.accumulation())?;
        writer.flush()?;
    }
    info!(path = %output.display(), "wrote deformed mesh");
    Ok(())
}

fn inspect(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let table = AuDeltaTable::load(path)?;
    println!(
        "{}: {} action units, {} side variants",
        path.display(),
        table.len(),
        table.entry_count()
    );
    for au in table.iter() {
        let positions: Vec<Vec3> = au
            .muscles()
            .flat_map(|m| m.deltas.iter().map(|vd| vd.position))
            .collect();
        let extent = bounds(&positions)
            .map(|(lo, hi)| Vec3::extent(hi, lo))
            .unwrap_or_default();
        println!(
            "  AU{:<3} {:<18} active {:>2} passive {:>2} vertex deltas {:>6} extent {:.3} x {:.3} x {:.3}",
            au.au_id,
            au.side.as_str(),
            au.active_muscles.len(),
            au.passive_muscles.len(),
            au.vertex_delta_count(),
            extent.x,
            extent.y,
            extent.z
        );
    }
    Ok(())
}
