//! fp-plan - recompute a flight plan and print its waypoints.
//!
//! Usage:
//!   fp-plan plan.json --hardware drone.json --ground 420 > waypoints.json

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use fp_core::elevation::shared_grid;
use fp_core::{
    Engine, EngineConfig, EngineContext, EngineError, FlatElevation, FlightPlan, HardwareConfiguration, TerrainGrid,
};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Recompute a flight plan and emit its waypoints as JSON")]
struct Args {
    /// Flight plan JSON
    plan: PathBuf,

    /// Camera and platform description JSON (defaults when omitted)
    #[arg(long)]
    hardware: Option<PathBuf>,

    /// Terrain grid JSON; overrides --ground
    #[arg(long)]
    terrain: Option<PathBuf>,

    /// Constant ground height above the ellipsoid, meters
    #[arg(long, default_value_t = 0.0)]
    ground: f64,

    /// Write the recomputed plan here as well
    #[arg(long)]
    save: Option<PathBuf>,

    /// Pretty-print the output
    #[arg(long)]
    pretty: bool,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[derive(Serialize)]
struct AoiReport<'a> {
    name: &'a str,
    waypoints: usize,
    error: Option<String>,
    overlap_warning: bool,
}

#[derive(Serialize)]
struct Output<'a> {
    plan: &'a str,
    aois: Vec<AoiReport<'a>>,
    waypoints: Vec<&'a fp_core::Waypoint>,
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("fp_core=info,fp_plan=info"))?;
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json)?;

    let mut plan: FlightPlan = read_json(&args.plan)?;
    let hardware: HardwareConfiguration = match &args.hardware {
        Some(path) => read_json(path)?,
        None => HardwareConfiguration::default(),
    };

    let mut ctx = EngineContext::new(hardware).with_config(EngineConfig::from_env());
    ctx = match &args.terrain {
        Some(path) => {
            let key = path.display().to_string();
            let grid = shared_grid(&key, || {
                let text = fs::read_to_string(path)
                    .map_err(|e| EngineError::InvalidInput(format!("reading {key}: {e}")))?;
                Ok(serde_json::from_str::<TerrainGrid>(&text)?)
            })
            .with_context(|| format!("loading terrain {}", path.display()))?;
            ctx.with_elevation(grid)
        }
        None => ctx.with_elevation(Arc::new(FlatElevation::new(args.ground))),
    };

    let engine = Engine::new(ctx);
    tracing::info!(plan = %plan.name, statements = plan.statements.len(), "recomputing");
    engine.recompute(&mut plan).context("recompute failed")?;

    let aois: Vec<AoiReport<'_>> = plan
        .aois()
        .map(|a| AoiReport {
            name: &a.name,
            waypoints: a.derived.waypoints.len(),
            error: a.last_error().map(ToString::to_string),
            overlap_warning: a.derived.overlap_warning,
        })
        .collect();
    let failed = aois.iter().filter(|a| a.error.is_some()).count();

    let output = Output {
        plan: &plan.name,
        aois,
        waypoints: plan.waypoints(),
    };
    let json = if args.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{json}");

    if let Some(path) = &args.save {
        fs::write(path, serde_json::to_string_pretty(&plan)?)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    if failed > 0 && failed == output.aois.len() {
        bail!("no area of interest could be planned");
    }
    Ok(())
}
