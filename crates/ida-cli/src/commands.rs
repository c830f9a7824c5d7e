use colored::Colorize;
use ida_health::{launch_as_endpoint, NodeAddressing};
use ida_types::{sanitize_labels, LabelKey, LabelMap};

use crate::cli::*;
use crate::config::IdaConfig;
use crate::simulate::{run_simulation, SimulationPlan, SimulationReport};

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = IdaConfig::load(cli.config.as_deref())?;
    match cli.command {
        Command::Simulate(args) => cmd_simulate(&config, args, cli.format).await,
        Command::Partition(args) => cmd_partition(&config, args, cli.format),
        Command::Config(args) => cmd_config(&config, args, cli.format),
        Command::Health(args) => cmd_health(&config, args, cli.format).await,
    }
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_labels(labels: &LabelMap) -> String {
    if labels.is_empty() {
        return "(none)".into();
    }
    labels
        .iter()
        .map(|(k, v)| if v.is_empty() { k.clone() } else { format!("{k}={v}") })
        .collect::<Vec<_>>()
        .join(", ")
}

async fn cmd_simulate(config: &IdaConfig, args: SimulateArgs, format: OutputFormat) -> anyhow::Result<()> {
    let plan = SimulationPlan {
        nodes: args.nodes,
        keys: args.keys.iter().map(|k| LabelKey::parse(k)).collect(),
        first_id: args.first_id,
        release: args.release,
        minimal_store: args.minimal_store,
    };
    let report = run_simulation(config, &plan).await?;
    match format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Text => {
            print_simulation(&report);
            Ok(())
        }
    }
}

fn print_simulation(report: &SimulationReport) {
    println!(
        "{} {} identities across {} nodes (store version {})",
        "✓".green().bold(),
        report.identities.len().to_string().bold(),
        report.nodes.len(),
        report.resource_version
    );
    for identity in &report.identities {
        println!("\n{}", format!("identity {}", identity.id).yellow().bold());
        println!("  labels:       {}", render_labels(&identity.security_labels));
        println!("  discoverable: {}", render_labels(&identity.discoverable_labels).cyan());
        if identity.nodes.is_empty() {
            println!("  nodes:        {}", "unused".dimmed());
        } else {
            println!("  nodes:        {}", identity.nodes.join(", ").green());
        }
    }
    println!();
    for node in &report.nodes {
        println!(
            "{}  add {}  modify {}  delete {}",
            node.name.bold(),
            node.adds,
            node.modifies,
            node.deletes
        );
    }
}

fn cmd_partition(config: &IdaConfig, args: PartitionArgs, format: OutputFormat) -> anyhow::Result<()> {
    let source = args.source.unwrap_or_else(|| config.backend.label_source.clone());
    let key = LabelKey::parse(&args.labels);
    let partitioned = sanitize_labels(key.labels(), &source);
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "source": source,
            "selected": partitioned.selected,
            "skipped": partitioned.skipped,
        })),
        OutputFormat::Text => {
            println!("Source:   {}", source.bold());
            println!("Selected: {}", render_labels(&partitioned.selected).green());
            println!("Skipped:  {}", render_labels(&partitioned.skipped).yellow());
            Ok(())
        }
    }
}

fn cmd_config(config: &IdaConfig, args: ConfigArgs, format: OutputFormat) -> anyhow::Result<()> {
    let defaults;
    let shown = if args.defaults {
        defaults = IdaConfig::default();
        &defaults
    } else {
        config
    };
    match format {
        OutputFormat::Json => print_json(shown),
        OutputFormat::Text => {
            print!("{}", shown.to_toml()?);
            Ok(())
        }
    }
}

async fn cmd_health(config: &IdaConfig, args: HealthArgs, format: OutputFormat) -> anyhow::Result<()> {
    let addressing = NodeAddressing {
        node_name: args.node.unwrap_or_else(|| config.backend.node_name.clone()),
        v4_health_ip: args.v4_health_ip,
        v6_health_ip: args.v6_health_ip,
    };
    let endpoint = launch_as_endpoint(&config.health, &addressing, None).await?;
    let addr = endpoint.addr();
    let hello = endpoint.ping().await;
    endpoint.cleanup().await?;
    let hello = hello?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "addr": addr.to_string(),
            "node": hello.node,
            "status": hello.status,
        })),
        OutputFormat::Text => {
            println!(
                "{} health endpoint {} answered for {} ({})",
                "✓".green().bold(),
                addr.to_string().bold(),
                hello.node.yellow(),
                hello.status.green()
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_render_in_key_order() {
        let labels: LabelMap = [("b", "2"), ("a", ""), ("c", "3")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(render_labels(&labels), "a, b=2, c=3");
        assert_eq!(render_labels(&LabelMap::new()), "(none)");
    }

    #[tokio::test]
    async fn health_command_round_trip() {
        let args = HealthArgs {
            node: Some("worker-1".into()),
            v4_health_ip: None,
            v6_health_ip: None,
        };
        cmd_health(&IdaConfig::default(), args, OutputFormat::Json)
            .await
            .unwrap();
    }

    #[test]
    fn partition_uses_configured_source() {
        let mut config = IdaConfig::default();
        config.backend.label_source = "reserved".into();
        let args = PartitionArgs {
            labels: "reserved:a=1,custom:b=2".into(),
            source: None,
        };
        cmd_partition(&config, args, OutputFormat::Text).unwrap();
    }
}
