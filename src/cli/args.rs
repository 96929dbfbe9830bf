/// CLI argument parsing and configuration
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "certman-operator")]
#[command(about = "Kubernetes operator that keeps ACME TLS certificates current for a fleet of managed clusters", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(global = true, short, long, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the operator's reconcile loops
    Run(RunArgs),

    /// Print the operator's CustomResourceDefinitions as JSON
    Crds,
}

#[derive(Parser)]
pub struct RunArgs {
    /// Path to the operator's TOML config file
    #[arg(short, long, default_value = "/etc/certman-operator/config.toml")]
    pub config: String,
}
