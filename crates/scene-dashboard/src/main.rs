use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use scene_core::RawTimeRange;
use scene_dashboard::{Dashboard, DryRunFetcher, EngineConfig};
use scene_variables::VariableValue;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod logging;

fn cli() -> Command {
    Command::new("scene-engine")
        .version(scene_dashboard::VERSION)
        .about("Load dashboards into a scene graph and drive their queries")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Engine configuration (TOML)"),
        )
        .arg(
            Arg::new("log")
                .long("log")
                .global(true)
                .help("Log filter, overrides the configured one"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("inspect")
                .about("List panels, queries and variables")
                .arg(dashboard_arg()),
        )
        .subcommand(
            Command::new("interpolate")
                .about("Interpolate a template against the dashboard variables")
                .arg(dashboard_arg())
                .arg(
                    Arg::new("template")
                        .required(true)
                        .help("Template text, e.g. 'up{job=~\"$job\"}'"),
                )
                .arg(
                    Arg::new("panel")
                        .long("panel")
                        .value_parser(value_parser!(u64))
                        .help("Resolve as seen from this panel"),
                )
                .arg(set_arg()),
        )
        .subcommand(
            Command::new("run")
                .about("Activate the dashboard with a dry-run fetcher and print every query")
                .arg(dashboard_arg())
                .arg(set_arg())
                .arg(Arg::new("from").long("from").help("Time range start, e.g. now-1h"))
                .arg(Arg::new("to").long("to").help("Time range end"))
                .arg(
                    Arg::new("timeout-ms")
                        .long("timeout-ms")
                        .default_value("5000")
                        .value_parser(value_parser!(u64))
                        .help("How long to wait for queries to settle"),
                )
                .arg(
                    Arg::new("snapshot")
                        .long("snapshot")
                        .action(ArgAction::SetTrue)
                        .help("Print the dashboard JSON with current values instead of the report"),
                ),
        )
}

fn dashboard_arg() -> Arg {
    Arg::new("dashboard")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Dashboard JSON file")
}

fn set_arg() -> Arg {
    Arg::new("set")
        .long("set")
        .action(ArgAction::Append)
        .value_name("NAME=VALUE")
        .help("Set a variable; comma-separated values select several")
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => EngineConfig::from_path(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(filter) = matches.get_one::<String>("log") {
        config.log.filter.clone_from(filter);
    }
    if matches.get_flag("json") {
        config.log.json = true;
    }
    logging::init(&config.log)?;

    match matches.subcommand() {
        Some(("inspect", args)) => {
            inspect(&load(args, &config)?);
            Ok(())
        }
        Some(("interpolate", args)) => {
            let dashboard = load(args, &config)?;
            apply_sets(&dashboard, args)?;
            let template = args
                .get_one::<String>("template")
                .context("missing template")?;
            let panel = args.get_one::<u64>("panel").copied();
            println!("{}", dashboard.interpolate(template, panel)?);
            Ok(())
        }
        Some(("run", args)) => run(&load(args, &config)?, args).await,
        _ => bail!("unknown command"),
    }
}

fn load(args: &ArgMatches, config: &EngineConfig) -> Result<Dashboard> {
    let path = args
        .get_one::<PathBuf>("dashboard")
        .context("missing dashboard path")?;
    Dashboard::from_path(path, Arc::new(DryRunFetcher), config)
        .with_context(|| format!("loading dashboard {}", path.display()))
}

fn parse_set(raw: &str) -> Result<(&str, VariableValue)> {
    let Some((name, value)) = raw.split_once('=') else {
        bail!("expected NAME=VALUE, got '{raw}'");
    };
    let values: Vec<String> = value.split(',').map(str::to_string).collect();
    let value = if values.len() == 1 {
        VariableValue::Single(value.to_string())
    } else {
        VariableValue::Multi(values)
    };
    Ok((name, value))
}

fn apply_sets(dashboard: &Dashboard, args: &ArgMatches) -> Result<()> {
    for raw in args.get_many::<String>("set").into_iter().flatten() {
        let (name, value) = parse_set(raw)?;
        dashboard
            .set_variable(name, value)
            .with_context(|| format!("setting variable '{name}'"))?;
    }
    Ok(())
}

fn inspect(dashboard: &Dashboard) {
    let range = dashboard.time_range();
    println!("{}", dashboard.title());
    println!("  time: {} to {}", range.from, range.to);
    println!("  variables:");
    for binding in dashboard.variables() {
        println!("    {} = {}", binding.name, binding.value);
    }
    println!("  panels:");
    for panel in dashboard.panels() {
        let id = panel.id.map_or_else(|| "-".to_string(), |id| id.to_string());
        println!("    [{id}] {}", panel.title);
        for query in &panel.queries {
            let definition = query.definition();
            println!("      {}: {}", definition.ref_id, definition.expr);
        }
    }
}

async fn run(dashboard: &Dashboard, args: &ArgMatches) -> Result<()> {
    let timeout = args.get_one::<u64>("timeout-ms").copied().unwrap_or(5000);

    dashboard.activate()?;
    apply_sets(dashboard, args)?;
    let from = args.get_one::<String>("from");
    let to = args.get_one::<String>("to");
    if from.is_some() || to.is_some() {
        let current = dashboard.time_range();
        let range = RawTimeRange::new(
            from.cloned().unwrap_or(current.from),
            to.cloned().unwrap_or(current.to),
        );
        dashboard.set_time_range(&range)?;
    }

    if !dashboard.wait_settled(Duration::from_millis(timeout)).await {
        tracing::warn!(timeout_ms = timeout, "queries did not settle in time");
    }

    let output = if args.get_flag("snapshot") {
        dashboard.to_json()?
    } else {
        serde_json::to_string_pretty(&dashboard.report())?
    };
    dashboard.deactivate();
    println!("{output}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn set_splits_on_commas() {
        let (name, value) = parse_set("region=us,eu").unwrap();
        assert_eq!(name, "region");
        assert_eq!(value, VariableValue::Multi(vec!["us".into(), "eu".into()]));

        let (_, value) = parse_set("job=api").unwrap();
        assert_eq!(value, VariableValue::Single("api".into()));

        assert!(parse_set("nonsense").is_err());
    }
}
