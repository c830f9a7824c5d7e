use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "ida",
    about = "Identity allocation backend: label sets to cluster-wide numeric IDs",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run several nodes against one in-memory store and report the identities
    Simulate(SimulateArgs),
    /// Split a label set into discoverable and canonical-only labels
    Partition(PartitionArgs),
    /// Print the effective configuration
    Config(ConfigArgs),
    /// Launch a health endpoint, probe it, and shut it down
    Health(HealthArgs),
}

#[derive(Args)]
pub struct SimulateArgs {
    /// Number of nodes sharing the store
    #[arg(short, long, default_value = "2")]
    pub nodes: usize,

    /// Label sets to allocate, as `source:key=value,...`
    #[arg(short, long = "key", required = true)]
    pub keys: Vec<String>,

    /// First numeric ID handed out
    #[arg(long, default_value = "1000")]
    pub first_id: u64,

    /// Release every reference after acquiring it
    #[arg(long)]
    pub release: bool,

    /// Store without patch or status-subresource support
    #[arg(long)]
    pub minimal_store: bool,
}

#[derive(Args)]
pub struct PartitionArgs {
    /// Labels as `source:key=value,...`
    pub labels: String,

    /// Governing label source
    #[arg(short, long)]
    pub source: Option<String>,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// Print built-in defaults instead of the loaded file
    #[arg(long)]
    pub defaults: bool,
}

#[derive(Args)]
pub struct HealthArgs {
    /// Node name reported by the responder
    #[arg(long)]
    pub node: Option<String>,

    #[arg(long)]
    pub v4_health_ip: Option<Ipv4Addr>,

    #[arg(long)]
    pub v6_health_ip: Option<Ipv6Addr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simulate() {
        let cli = Cli::try_parse_from([
            "ida", "simulate", "-n", "3", "-k", "k8s:app=web", "-k", "k8s:app=db",
        ])
        .unwrap();
        if let Command::Simulate(args) = cli.command {
            assert_eq!(args.nodes, 3);
            assert_eq!(args.keys, vec!["k8s:app=web", "k8s:app=db"]);
            assert_eq!(args.first_id, 1000);
            assert!(!args.release);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn simulate_requires_a_key() {
        assert!(Cli::try_parse_from(["ida", "simulate"]).is_err());
    }

    #[test]
    fn parse_partition() {
        let cli =
            Cli::try_parse_from(["ida", "partition", "reserved:a=1,custom:b=2", "-s", "reserved"])
                .unwrap();
        if let Command::Partition(args) = cli.command {
            assert_eq!(args.labels, "reserved:a=1,custom:b=2");
            assert_eq!(args.source.as_deref(), Some("reserved"));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_health_ips() {
        let cli = Cli::try_parse_from(["ida", "health", "--v4-health-ip", "10.0.0.9"]).unwrap();
        if let Command::Health(args) = cli.command {
            assert_eq!(args.v4_health_ip, Some(Ipv4Addr::new(10, 0, 0, 9)));
            assert!(args.v6_health_ip.is_none());
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_global_flags() {
        let cli = Cli::try_parse_from([
            "ida", "--format", "json", "-c", "ida.toml", "--verbose", "config",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.config, Some(PathBuf::from("ida.toml")));
        assert!(cli.verbose);
    }
}
