use anyhow::Result;
use clap::Parser;
use kube_dump::{
	commands::{self, dump::DumpArgs},
	config::DumpMode,
	telemetry,
};
use tracing::Level;

#[derive(Parser)]
#[command(name = "kube-dump")]
#[command(about = "Dump Kubernetes cluster resources as clean YAML manifests", long_about = None)]
#[command(version = env!("KUBE_DUMP_VERSION"))]
struct Cli {
	/// What to dump: all|dump, ns|dump-namespaces, cls|dump-cluster
	#[arg(value_enum, env = "MODE", default_value = "all", hide_possible_values = true)]
	mode: DumpMode,

	#[command(flatten)]
	args: DumpArgs,

	/// Only log warnings and errors
	#[arg(short = 's', long, env = "SILENT")]
	silent: bool,

	/// Log level (trace, debug, info, warn, error). Overrides RUST_LOG and --silent
	#[arg(long, env = "LOG_LEVEL")]
	log_level: Option<Level>,
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	let _telemetry = telemetry::init(cli.log_level, cli.silent)?;

	commands::dump::run(cli.args, cli.mode)
}
