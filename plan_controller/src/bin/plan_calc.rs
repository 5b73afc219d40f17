use anyhow::{Context, Result};
use clap::Parser;
use rad_plan_controller::{EngineConfig, PlanBundle, PlanController, RunOptions, phantom};
use rad_plan_data::{Beam, Plan, Prescription, StructureRole, StructureSet, Technique};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Runs the planning pipeline on the built-in water-phantom commissioning
/// setup and prints the resulting statistics.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Compute dose on the commissioning phantom.", long_about = "")]
struct Cli {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Seed for the genetic optimizer and Monte Carlo transport
    #[arg(short, long, default_value_t = 0)]
    seed: u64,
    /// Write the resulting plan bundle to this JSON file
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Verbose
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let controller = PlanController::new(config)?;

    // 32³ water phantom, a 40 mm PTV at the isocenter and a single 6 MV
    // field, 2 Gy in one fraction.
    let ct = phantom::water_ct(32, 5.0);
    let mut structures = StructureSet::new();
    structures
        .insert(phantom::centered_box_structure(&ct, "PTV", StructureRole::Ptv, 4))
        .context("building the phantom structure set")?;
    let mut plan = Plan::new("commissioning", Technique::ThreeDCrt, Prescription::new(2.0, 1));
    plan.beams.push(Beam {
        id: "AP".into(),
        ..Beam::default()
    });

    let options = RunOptions {
        seed: cli.seed,
        ..RunOptions::default()
    };
    let report = controller.run(&plan, &ct, &structures, &options)?;

    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
    for (name, dvh) in &report.dvhs {
        println!("{name}:");
        println!("  D_mean (Gy): {:.3}", dvh.d_mean());
        println!("  D_min  (Gy): {:.3}", dvh.d_min());
        println!("  D_max  (Gy): {:.3}", dvh.d_max());
        println!("  D98    (Gy): {:.3}", dvh.d_at_percent(98.0));
        println!("  D2     (Gy): {:.3}", dvh.d_at_percent(2.0));
        if cli.verbose {
            println!("  D2cc   (Gy): {:.3}", dvh.d2cc());
            println!("  V95%       : {:.3}", dvh.v_at_dose(0.95 * 2.0));
        }
    }
    if let Some(metrics) = &report.metrics {
        println!("CI (Paddick): {:.3}", metrics.ci_paddick);
        println!("HI          : {:.3}", metrics.hi);
        println!("GI          : {:.3}", metrics.gi);
        if cli.verbose {
            println!("Hot voxels  : {}", metrics.hot_spot_voxels);
            println!("Cold voxels : {}", metrics.cold_spot_voxels);
            println!("Max dose    : {:.3} Gy", metrics.global_max_gy);
        }
    }
    for bio in &report.bio {
        println!(
            "{}: BED {:.2} Gy, EQD2 {:.2} Gy (a/b {:.1})",
            bio.structure, bio.bed_gy, bio.eqd2_gy, bio.alpha_beta_gy
        );
    }

    if let Some(path) = &cli.output {
        PlanBundle::new(&plan, "phantom", &report)
            .write_json(path)
            .with_context(|| format!("writing plan bundle to {}", path.display()))?;
        println!("Plan bundle written to {}", path.display());
    }
    Ok(())
}
