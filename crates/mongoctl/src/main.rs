use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use common::{EventKind, ReconciliationEvent, RelationBag, UnitConfig, UnitName};
use controller::workload::pod_spec;
use controller::{ClusterState, Collaborators, EventLoop, Reconciler, UnitPhase, UnitStatus};
use membership::MembershipManager;
use serde::{Deserialize, Serialize};
use sim_mongod::{SimMongodConfig, SimulatedMongod};
use sim_orchestrator::SimPlatform;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let format =
            std::env::var("MONGOCTL_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

        // Logs go to stderr so rendered output stays pipeable.
        if format.eq_ignore_ascii_case("json") {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter.clone())
                .with_target(true)
                .with_writer(std::io::stderr)
                .json()
                .flatten_event(true)
                .init();
        } else {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .with_writer(std::io::stderr)
                .compact()
                .init();
        }
    });
}

#[derive(Parser)]
#[command(name = "mongoctl")]
#[command(about = "MongoDB replica-set unit controller", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the workload spec generated from a unit configuration
    Render {
        /// YAML unit configuration (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Print a client connection URI from persisted unit state
    Uri {
        /// Persisted unit state (JSON)
        #[arg(short, long)]
        state: PathBuf,
        /// Unit the state belongs to, e.g. mongodb/0
        #[arg(short, long)]
        unit: UnitName,
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Address the first replica-set member instead of the service
        #[arg(long)]
        replica_set: bool,
    },
    /// Replay a lifecycle scenario against simulated collaborators
    Simulate {
        /// YAML scenario file
        #[arg(short, long)]
        scenario: PathBuf,
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
}

/// Scripted lifecycle for a single unit.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Scenario {
    #[serde(default = "default_unit")]
    unit: UnitName,
    #[serde(default)]
    config: UnitConfig,
    #[serde(default)]
    leader: bool,
    #[serde(default = "default_ready")]
    ready: bool,
    /// Application bag as left by a previous leader.
    #[serde(default)]
    app_data: RelationBag,
    #[serde(default)]
    unit_data: BTreeMap<UnitName, RelationBag>,
    steps: Vec<Step>,
    /// Extra passes to retry deferred events once the steps ran out.
    #[serde(default = "default_settle_passes")]
    settle_passes: usize,
}

fn default_unit() -> UnitName {
    UnitName::new(common::DEFAULT_APP_NAME, 0)
}

fn default_ready() -> bool {
    true
}

fn default_settle_passes() -> usize {
    3
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Step {
    Event(EventKind),
    Leader { leader: bool },
    Ready { ready: bool },
    Rename { replica_set_name: String },
}

impl Step {
    fn describe(&self) -> String {
        match self {
            Step::Event(kind) => kind.name().to_string(),
            Step::Leader { leader } => format!("leader={}", leader),
            Step::Ready { ready } => format!("ready={}", ready),
            Step::Rename { replica_set_name } => format!("replica_set_name={}", replica_set_name),
        }
    }
}

#[derive(Debug, Serialize)]
struct StepRecord {
    step: String,
    handled: usize,
    deferred: usize,
    fatal: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    steps: Vec<StepRecord>,
    status: UnitStatus,
    phase: UnitPhase,
    pending: Vec<String>,
    initialized_replica_set: Option<String>,
    /// Known members and the address each one published.
    peers: BTreeMap<String, Option<String>>,
    reconfigurations: Vec<Vec<String>>,
    standalone_uri: Option<String>,
    replica_set_uri: Option<String>,
}

fn simulate(scenario: Scenario) -> Result<SimulationReport> {
    let platform = SimPlatform::new(scenario.config);
    platform.leadership.set_leader(scenario.leader);
    for (key, value) in &scenario.app_data {
        platform.relation.seed_app_data(key, value);
    }
    for (unit, bag) in &scenario.unit_data {
        for (key, value) in bag {
            platform.relation.set_unit_data(unit, key, value);
        }
    }

    let mongod = Arc::new(SimulatedMongod::new(SimMongodConfig {
        ready: scenario.ready,
        ..SimMongodConfig::default()
    }));
    let deps = Collaborators {
        gateway: mongod.clone(),
        relation: platform.relation.clone(),
        leadership: platform.leadership.clone(),
        config: platform.config.clone(),
        workload: platform.workload.clone(),
    };
    let mut event_loop = EventLoop::new(Reconciler::new(scenario.unit, deps));

    let mut records = Vec::with_capacity(scenario.steps.len());
    for step in scenario.steps {
        let label = step.describe();
        match step {
            Step::Event(kind) => event_loop.submit(ReconciliationEvent::new(kind)),
            Step::Leader { leader } => platform.leadership.set_leader(leader),
            Step::Ready { ready } => mongod.set_ready(ready),
            Step::Rename { replica_set_name } => {
                platform.config.set_replica_set_name(&replica_set_name)
            }
        }
        let report = event_loop.run_pass();
        records.push(StepRecord {
            step: label,
            handled: report.handled,
            deferred: report.deferred,
            fatal: report.fatal.iter().map(ToString::to_string).collect(),
        });
    }

    for _ in 0..scenario.settle_passes {
        if event_loop.pending().next().is_none() {
            break;
        }
        let report = event_loop.run_pass();
        records.push(StepRecord {
            step: "redeliver".to_string(),
            handled: report.handled,
            deferred: report.deferred,
            fatal: report.fatal.iter().map(ToString::to_string).collect(),
        });
    }

    let pending = event_loop
        .pending()
        .map(|event| event.name().to_string())
        .collect();
    let reconciler = event_loop.into_reconciler();
    info!(status = %reconciler.status(), "scenario finished");

    let directory = reconciler.state().peers();
    let peers = directory
        .members()
        .units()
        .iter()
        .map(|unit| (unit.to_string(), directory.address(unit).map(str::to_string)))
        .collect();

    Ok(SimulationReport {
        steps: records,
        status: reconciler.status().clone(),
        phase: reconciler.state().phase(),
        pending,
        initialized_replica_set: reconciler
            .state()
            .initialized_replica_set()
            .map(str::to_string),
        peers,
        reconfigurations: mongod.reconfigure_calls(),
        standalone_uri: reconciler.standalone_uri().ok(),
        replica_set_uri: reconciler.replica_set_uri().ok(),
    })
}

fn load_config(path: Option<&Path>) -> Result<UnitConfig> {
    match path {
        Some(path) => UnitConfig::load(path),
        None => Ok(UnitConfig::default()),
    }
}

fn print<T: Serialize>(value: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Render { config, format } => {
            let config = load_config(config.as_deref())?;
            print(&pod_spec(&config), format)?;
        }
        Commands::Uri {
            state,
            unit,
            config,
            replica_set,
        } => {
            let config = load_config(config.as_deref())?;
            let state = ClusterState::open(&state, unit)?;
            let manager = MembershipManager::from_config(&config);
            let uri = if replica_set {
                manager.replica_set_uri(state.credentials(), &state.peers().members())?
            } else {
                manager.standalone_uri(state.credentials())?
            };
            println!("{}", uri);
        }
        Commands::Simulate { scenario, format } => {
            let raw = fs::read_to_string(&scenario)
                .with_context(|| format!("failed to read scenario {}", scenario.display()))?;
            let scenario: Scenario =
                serde_yaml::from_str(&raw).context("failed to parse scenario")?;
            scenario.config.validate()?;
            print(&simulate(scenario)?, format)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario(raw: &str) -> Scenario {
        serde_yaml::from_str(raw).unwrap()
    }

    #[test]
    fn test_scenario_steps_parse() {
        let parsed = scenario(
            r#"
leader: true
steps:
  - kind: start
  - kind: peer_joined
    unit: mongodb/1
  - leader: false
  - ready: false
  - replica_set_name: other
"#,
        );
        assert_eq!(parsed.unit, UnitName::new("mongodb", 0));
        assert!(parsed.ready);
        assert!(matches!(parsed.steps[0], Step::Event(EventKind::Start)));
        assert!(matches!(parsed.steps[2], Step::Leader { leader: false }));
        assert!(matches!(parsed.steps[3], Step::Ready { ready: false }));
        assert!(matches!(parsed.steps[4], Step::Rename { .. }));
    }

    #[test]
    fn test_leader_scenario_reconfigures_with_new_peer() {
        let report = simulate(scenario(
            r#"
leader: true
unit_data:
  mongodb/1:
    private-address: 10.0.0.1
steps:
  - kind: config_changed
  - kind: leader_elected
  - kind: start
  - kind: peer_joined
    unit: mongodb/1
"#,
        ))
        .unwrap();

        assert_eq!(report.phase, UnitPhase::Running);
        assert_eq!(report.status, UnitStatus::Active);
        assert_eq!(
            report.reconfigurations,
            vec![vec![
                "mongodb-0.mongodb-endpoints".to_string(),
                "mongodb-1.mongodb-endpoints".to_string(),
            ]]
        );
        assert!(report
            .standalone_uri
            .unwrap()
            .ends_with("@mongodb:27017/admin"));
        assert_eq!(
            report.peers.get("mongodb/1"),
            Some(&Some("10.0.0.1".to_string()))
        );
        assert_eq!(report.peers.get("mongodb/0"), Some(&None));
    }

    #[test]
    fn test_deferred_start_settles_once_ready() {
        let report = simulate(scenario(
            r#"
leader: true
ready: false
steps:
  - kind: start
  - ready: true
"#,
        ))
        .unwrap();

        assert_eq!(report.steps[0].deferred, 1);
        assert_eq!(report.steps[1].handled, 1);
        assert!(report.pending.is_empty());
        assert_eq!(report.initialized_replica_set.as_deref(), Some("rs0"));
    }

    #[test]
    fn test_unit_flag_parses_unit_name() {
        let cli = Cli::try_parse_from([
            "mongoctl", "uri", "--state", "state.json", "--unit", "mongodb/3",
        ])
        .unwrap();
        let Commands::Uri { unit, .. } = cli.command else {
            panic!("expected uri command");
        };
        assert_eq!(unit.ordinal(), 3);
    }
}
