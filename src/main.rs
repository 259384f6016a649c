use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ioni_drive_supervisor::config::{ControlPolicy, DriveConfig, RunBudget, SIM_ENDPOINT};
use ioni_drive_supervisor::discovery;
use ioni_drive_supervisor::drive::SimulatedDrive;
use ioni_drive_supervisor::runtime::{BenchPlan, run_bench};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser)]
#[command(name = "ioni-drive-supervisor", about = "Supervise an IONI servo drive session")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports that look like drive endpoints
    Ports {
        /// Include USB ids and product names
        #[arg(long)]
        verbose: bool,
    },
    /// Run one supervised session against the simulated drive
    Bench(BenchArgs),
}

#[derive(Args)]
struct BenchArgs {
    /// Session config (JSON); defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = SIM_ENDPOINT)]
    endpoint: String,

    /// Command this constant setpoint instead of the torque-adaptive policy
    #[arg(long, allow_hyphen_values = true)]
    fixed: Option<i32>,

    /// Stop after this many control cycles
    #[arg(long, conflicts_with = "duration_ms")]
    cycles: Option<u64>,

    /// Stop after this much time in Running
    #[arg(long)]
    duration_ms: Option<u64>,

    /// Fault mask the drive reports at power-up (hex with 0x prefix or decimal)
    #[arg(long, value_parser = parse_mask, default_value = "0")]
    initial_faults: u32,

    /// Faults survive the clear request
    #[arg(long)]
    sticky_faults: bool,

    /// Simulated torque per unit of setpoint
    #[arg(long, default_value_t = 6, allow_hyphen_values = true)]
    load_factor: i32,

    /// Publish status on zenoh and accept stop requests from it
    #[arg(long)]
    zenoh: bool,

    /// Any key press stops the drive
    #[arg(long)]
    keyboard_stop: bool,
}

fn parse_mask(value: &str) -> Result<u32, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid fault mask '{}': {}", value, e))
}

impl BenchArgs {
    fn into_plan(self) -> Result<BenchPlan, BoxError> {
        let mut config = match &self.config {
            Some(path) => DriveConfig::from_json_file(path)?,
            None => DriveConfig::default(),
        };

        if let Some(setpoint) = self.fixed {
            config.policy = ControlPolicy::FixedSetpoint(setpoint);
        }
        if let Some(cycles) = self.cycles {
            config.run_budget = RunBudget::Cycles(cycles);
        }
        if let Some(ms) = self.duration_ms {
            config.run_budget = RunBudget::Duration(std::time::Duration::from_millis(ms));
        }
        config.validate()?;

        let after_clear = if self.sticky_faults {
            self.initial_faults
        } else {
            0
        };
        let drive = SimulatedDrive::new(config.params)
            .with_faults(self.initial_faults)
            .with_faults_after_clear(after_clear)
            .with_load_factor(self.load_factor);

        Ok(BenchPlan {
            config,
            endpoint: self.endpoint,
            drive,
            zenoh: self.zenoh,
            keyboard_stop: self.keyboard_stop,
        })
    }
}

fn list_ports(verbose: bool) -> Result<i32, BoxError> {
    let ports = if verbose {
        discovery::describe_candidates()?
    } else {
        discovery::list_candidate_endpoints()?
    };
    if ports.is_empty() {
        info!("No candidate drive ports found");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(0)
}

async fn bench(args: BenchArgs) -> Result<i32, BoxError> {
    let outcome = run_bench(args.into_plan()?).await?;
    println!("{}", serde_json::to_string(&outcome)?);
    Ok(if outcome.is_success() { 0 } else { 2 })
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=debug for per-cycle status)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Ports { verbose } => list_ports(verbose),
        Command::Bench(args) => bench(args).await,
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Runtime error: {}", e);
            std::process::exit(1);
        }
    }
}
