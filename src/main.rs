mod config;
mod domain;
mod executor;
mod physics;
mod planner;
mod ports;
mod store;
mod telemetry;
mod types;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{AppConfig, PlannerKind};
use domain::PlanRequest;
use physics::simulate_slot;
use planner::{rule_based::RuleBasedPlanner, Planner};
use std::io::Read as _;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use types::Price;

#[derive(Parser)]
#[command(name = "oec", about = "Home battery planning and execution core")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the configured planner against a `PlanRequest` JSON document
    /// and prints the resulting `Plan` as JSON.
    Plan {
        /// Path to a JSON-encoded PlanRequest. Reads stdin when omitted.
        #[arg(long)]
        request: Option<PathBuf>,

        /// Overrides the planner selected in config.
        #[arg(long)]
        planner: Option<PlannerKind>,
    },

    /// Runs the physics model for a single slot and prints the resulting
    /// `SlotResult` as JSON — useful for spot-checking energy routing
    /// without building a full plan request.
    SimulateSlot {
        #[arg(long, default_value_t = 10.0)]
        capacity_kwh: f64,
        #[arg(long, default_value_t = 10.0)]
        min_soc_pct: f64,
        #[arg(long, default_value_t = 95.0)]
        max_soc_pct: f64,
        #[arg(long, default_value_t = 5.0)]
        max_charge_kw: f64,
        #[arg(long, default_value_t = 5.0)]
        max_discharge_kw: f64,
        #[arg(long, default_value_t = 0.95)]
        charge_efficiency: f64,
        #[arg(long, default_value_t = 0.95)]
        discharge_efficiency: f64,
        #[arg(long, default_value_t = 5.0)]
        export_limit_kw: f64,

        #[arg(long, value_enum)]
        mode: SlotMode,
        #[arg(long)]
        rate_kw: Option<f64>,
        #[arg(long)]
        target_soc_pct: Option<f64>,

        #[arg(long)]
        soc_start_pct: f64,
        #[arg(long, default_value_t = 0.0)]
        solar_kw: f64,
        #[arg(long, default_value_t = 0.0)]
        load_kw: f64,
        #[arg(long, default_value_t = 20.0)]
        import_price_pence: f64,
        #[arg(long, default_value_t = 15.0)]
        export_price_pence: f64,
    },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum SlotMode {
    SelfUse,
    FeedInPriority,
    ForceCharge,
    ForceDischarge,
}

fn build_planner(kind: PlannerKind, #[allow(unused_variables)] cfg: &AppConfig) -> Result<Arc<dyn Planner>> {
    match kind {
        PlannerKind::RuleBased => Ok(Arc::new(RuleBasedPlanner)),
        #[cfg(feature = "optimization")]
        PlannerKind::Lp => Ok(Arc::new(planner::lp::LpPlanner)),
        #[cfg(not(feature = "optimization"))]
        PlannerKind::Lp => anyhow::bail!("the lp planner requires the `optimization` feature"),
        #[cfg(feature = "ml")]
        PlannerKind::Ml => {
            let ml_planner = match &cfg.planner.model_path {
                Some(path) => {
                    let bytes = std::fs::read(path)
                        .with_context(|| format!("reading ML model artefact from {}", path.display()))?;
                    let artefact = planner::ml::MlModelArtefact::load_from_bytes(&bytes)?;
                    planner::ml::MlPlanner::with_artefact(artefact)
                }
                None => {
                    info!("no planner.model_path configured; the ML planner will use its fallback heuristic");
                    planner::ml::MlPlanner::new()
                }
            };
            Ok(Arc::new(ml_planner))
        }
        #[cfg(not(feature = "ml"))]
        PlannerKind::Ml => anyhow::bail!("the ml planner requires the `ml` feature"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = AppConfig::load().context("loading configuration")?;
    telemetry::init_tracing(&cfg.telemetry.log_level);

    match cli.command {
        Command::Plan { request, planner } => {
            let raw = match request {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading plan request from {}", path.display()))?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf).context("reading plan request from stdin")?;
                    buf
                }
            };
            let plan_request: PlanRequest = serde_json::from_str(&raw).context("parsing plan request JSON")?;

            let kind = planner.unwrap_or(cfg.planner.kind);
            let planner = build_planner(kind, &cfg)?;
            info!(planner = planner.info().name, slots = plan_request.n_slots(), "creating plan");
            let plan = planner.create_plan(&plan_request).await.context("planner failed")?;

            println!("{}", serde_json::to_string_pretty(&plan)?);
            Ok(())
        }

        Command::SimulateSlot {
            capacity_kwh,
            min_soc_pct,
            max_soc_pct,
            max_charge_kw,
            max_discharge_kw,
            charge_efficiency,
            discharge_efficiency,
            export_limit_kw,
            mode,
            rate_kw,
            target_soc_pct,
            soc_start_pct,
            solar_kw,
            load_kw,
            import_price_pence,
            export_price_pence,
        } => {
            let caps = domain::BatteryCapabilities {
                capacity_kwh,
                min_soc_pct,
                max_soc_pct,
                max_charge_kw,
                max_discharge_kw,
                charge_efficiency,
                discharge_efficiency,
                export_limit_kw,
            };
            let mode = match mode {
                SlotMode::SelfUse => domain::OperatingMode::SelfUse,
                SlotMode::FeedInPriority => domain::OperatingMode::FeedInPriority,
                SlotMode::ForceCharge => domain::OperatingMode::ForceCharge { rate_kw: rate_kw.unwrap_or(f64::MAX) },
                SlotMode::ForceDischarge => domain::OperatingMode::ForceDischarge {
                    rate_kw: rate_kw.unwrap_or(f64::MAX),
                    target_soc: target_soc_pct,
                },
            };

            let result = simulate_slot(
                &caps,
                mode,
                soc_start_pct,
                solar_kw,
                load_kw,
                Price::pence_per_kwh(import_price_pence),
                Price::pence_per_kwh(export_price_pence),
            );
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}
