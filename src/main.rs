mod client;
mod config;
mod dashboard;
mod notifications;
mod storage;
mod types;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::{Settings, DEFAULT_CONFIG_FILE};
use crate::dashboard::state::log_events;
use crate::dashboard::{Command, CommandOutcome, Dashboard, KeyPrompt, StrategyEdit, StrategyView};
use crate::notifications::{AlertSink, Notification};
use crate::types::{format_fraction, ApiCredentials, ApiKeyCredential, EntityId, Side};

#[derive(Parser)]
#[command(name = "instance-desk")]
#[command(version = "0.1.0")]
#[command(about = "Manage trading instances, strategies, API keys and indicators", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a configuration file with default settings
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// List tradable symbols
    Symbols,
    /// List exchanges an API key can be added for
    Exchanges,
    /// Manage exchange API keys
    #[command(subcommand)]
    Keys(KeyCommands),
    /// Manage trading instances
    #[command(subcommand)]
    Instances(InstanceCommands),
    /// Manage strategies of the active API key's instances
    #[command(subcommand)]
    Strategies(StrategyCommands),
    /// Manage the indicators of one strategy side
    #[command(subcommand)]
    Indicators(IndicatorCommands),
}

#[derive(Subcommand)]
enum KeyCommands {
    List,
    Add {
        /// Exchange id (see `exchanges`)
        #[arg(short, long)]
        exchange: String,
        #[arg(long)]
        api_key: String,
        #[arg(long)]
        secret_key: String,
        #[arg(long)]
        passphrase: Option<String>,
    },
    Remove { id: String },
    /// Make a key the active one
    Select { id: String },
}

#[derive(Subcommand)]
enum InstanceCommands {
    List,
    /// Create an instance with one strategy and save both
    Create {
        name: String,
        #[command(flatten)]
        strategy: StrategyArgs,
    },
    Start { instance: String, strategy: String },
    Stop { instance: String },
    Remove { instance: String },
    /// Write the operation history as CSV into the export directory
    Export { instance: String },
}

#[derive(Subcommand)]
enum StrategyCommands {
    /// List strategies; `--all` includes strategies outside the active key
    List {
        #[arg(long)]
        all: bool,
    },
    /// Unlock, change and save a stopped strategy
    Edit {
        id: String,
        #[command(flatten)]
        strategy: StrategyArgs,
    },
    Start { id: String },
    Stop { id: String },
    Remove { id: String },
}

#[derive(Subcommand)]
enum IndicatorCommands {
    List { strategy: String, side: Side },
    Edit {
        strategy: String,
        side: Side,
        /// Number of new indicators to add
        #[arg(long, default_value = "0")]
        add: usize,
        /// Indicator ids to delete
        #[arg(long, num_args = 1..)]
        remove: Vec<String>,
        /// Indicator ids to flag as mandatory
        #[arg(long, num_args = 1..)]
        mandatory: Vec<String>,
        /// Indicator ids to flag as optional
        #[arg(long, num_args = 1..)]
        optional: Vec<String>,
    },
}

#[derive(Args)]
struct StrategyArgs {
    #[arg(long)]
    symbol: Option<String>,
    /// Buy percent, 0-100
    #[arg(long)]
    buy_percent: Option<String>,
    #[arg(long)]
    buy_condition_limit: Option<u32>,
    /// Seconds between buy checks
    #[arg(long)]
    buy_interval: Option<f64>,
    #[arg(long)]
    simultaneous_operations: Option<u32>,
    #[arg(long)]
    sell_condition_limit: Option<u32>,
    /// Seconds between sell checks
    #[arg(long)]
    sell_interval: Option<f64>,
}

impl StrategyArgs {
    fn edits(&self) -> Vec<StrategyEdit> {
        let mut edits = Vec::new();
        if let Some(symbol) = &self.symbol {
            edits.push(StrategyEdit::Symbol(symbol.clone()));
        }
        if let Some(percent) = &self.buy_percent {
            edits.push(StrategyEdit::BuyPercent(percent.clone()));
        }
        if let Some(limit) = self.buy_condition_limit {
            edits.push(StrategyEdit::BuyConditionLimit(limit));
        }
        if let Some(interval) = self.buy_interval {
            edits.push(StrategyEdit::BuyInterval(interval));
        }
        if let Some(count) = self.simultaneous_operations {
            edits.push(StrategyEdit::SimultaneousOperations(Some(count)));
        }
        if let Some(limit) = self.sell_condition_limit {
            edits.push(StrategyEdit::SellConditionLimit(limit));
        }
        if let Some(interval) = self.sell_interval {
            edits.push(StrategyEdit::SellInterval(interval));
        }
        edits
    }
}

/// Prints blocking alerts to stderr as soon as they are raised.
struct StderrAlerts;

impl AlertSink for StderrAlerts {
    fn present(&self, notification: &Notification) {
        eprintln!("! {}", notification.message());
    }
}

/// Asks on the terminal which key to use. Blocks until a line is read.
struct StdinPrompt;

impl KeyPrompt for StdinPrompt {
    fn choose(&self, keys: &[ApiKeyCredential]) -> Option<EntityId> {
        let mut stderr = io::stderr();
        let _ = writeln!(stderr, "\nNo active API key. Choose one:");
        for (index, key) in keys.iter().enumerate() {
            let _ = writeln!(stderr, "  {}) {} [id {}]", index + 1, key.label(), key.id);
        }
        let _ = write!(stderr, "> ");
        let _ = stderr.flush();

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line).ok()?;
        let answer = line.trim();
        if answer.is_empty() {
            return None;
        }

        match answer.parse::<usize>() {
            Ok(index) if (1..=keys.len()).contains(&index) => Some(keys[index - 1].id.clone()),
            _ => keys
                .iter()
                .find(|key| key.id.to_string() == answer)
                .map(|key| key.id.clone()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { force } = &cli.command {
        init_logging(cli.verbose, None)?;
        return write_default_config(&cli.config, *force);
    }

    let settings = Settings::load(&cli.config)?;
    init_logging(cli.verbose, settings.log_filter.as_deref())?;
    let dashboard = Dashboard::from_settings(&settings, Some(Arc::new(StderrAlerts)))?;

    tokio::spawn(log_events(dashboard.state.subscribe()));

    match cli.command {
        Commands::Init { .. } => {}
        Commands::Symbols => {
            let symbols = dashboard.symbols.load().await;
            if symbols.is_empty() {
                warn!("No symbols available");
            }
            for symbol in symbols {
                println!("{}", symbol);
            }
        }
        Commands::Exchanges => {
            println!("\n=== Exchanges ===");
            for exchange in dashboard.api_keys.exchanges().await {
                let demo = if exchange.is_demo { " (demo)" } else { "" };
                println!("{:>4}  {}{}", exchange.id, exchange.name, demo);
            }
        }
        Commands::Keys(command) => run_keys(&dashboard, command).await?,
        Commands::Instances(command) => run_instances(&dashboard, command).await?,
        Commands::Strategies(command) => run_strategies(&dashboard, command).await?,
        Commands::Indicators(command) => run_indicators(&dashboard, command).await?,
    }

    Ok(())
}

fn init_logging(verbose: bool, directive: Option<&str>) -> Result<()> {
    let filter = match (verbose, directive) {
        (true, _) => EnvFilter::new("instance_desk=debug"),
        (false, Some(directive)) => EnvFilter::try_new(directive)?,
        (false, None) => {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("instance_desk=info"))
        }
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn write_default_config(path: &str, force: bool) -> Result<()> {
    if Path::new(path).exists() && !force {
        bail!("{} already exists; pass --force to overwrite it", path);
    }
    std::fs::write(path, Settings::default().to_toml()?)?;
    info!("Wrote default settings to {}", path);
    Ok(())
}

async fn run_keys(dashboard: &Dashboard, command: KeyCommands) -> Result<()> {
    match command {
        KeyCommands::List => {
            let active = dashboard.state.store.active_api_key()?;
            println!("\n=== API Keys ===");
            for key in dashboard.api_keys.list().await {
                let marker = if active.as_ref() == Some(&key.id) { "*" } else { " " };
                let created = key
                    .created_at
                    .map(|at| at.format("%Y-%m-%d").to_string())
                    .unwrap_or_default();
                println!("{} {:>4}  {}  {}", marker, key.id, key.label(), created);
            }
        }
        KeyCommands::Add {
            exchange,
            api_key,
            secret_key,
            passphrase,
        } => {
            let credentials = ApiCredentials {
                api_key,
                secret_key,
                passphrase,
            };
            let keys = dashboard
                .api_keys
                .create(EntityId::from(exchange), credentials)
                .await?;
            println!("API key added; {} keys on file", keys.len());
        }
        KeyCommands::Remove { id } => {
            dashboard.dispatch(Command::RemoveApiKey(EntityId::from(id))).await?;
            println!("API key removed");
        }
        KeyCommands::Select { id } => {
            dashboard.symbols.load().await;
            dashboard.dispatch(Command::SelectApiKey(EntityId::from(id))).await?;
            if let Some(active) = dashboard.api_keys.active().await {
                let count = dashboard.instances.all().await.len();
                println!("API key {} selected; {} instances", active, count);
            }
        }
    }
    Ok(())
}

async fn run_instances(dashboard: &Dashboard, command: InstanceCommands) -> Result<()> {
    dashboard.bootstrap(&StdinPrompt).await?;

    match command {
        InstanceCommands::List => print_instances(dashboard).await,
        InstanceCommands::Create { name, strategy } => {
            let drafted = dashboard
                .dispatch(Command::CreateInstance { name: name.clone() })
                .await?;
            let CommandOutcome::Drafted { strategy_id, .. } = drafted else {
                bail!("instance {} was not drafted", name);
            };
            for edit in strategy.edits() {
                dashboard.strategies.apply_edit(&strategy_id, edit).await?;
            }

            let saved = dashboard
                .dispatch(Command::CommitInstance {
                    strategy_id,
                    name: name.clone(),
                })
                .await?;
            if let CommandOutcome::InstanceSaved(id) = saved {
                println!("Instance {} saved as {}", name, id);
            }
        }
        InstanceCommands::Start { instance, strategy } => {
            let command = Command::StartInstance {
                instance_id: EntityId::from(instance),
                strategy_id: EntityId::from(strategy),
            };
            dashboard.dispatch(command).await?;
            println!("Instance started");
        }
        InstanceCommands::Stop { instance } => {
            dashboard.dispatch(Command::StopInstance(EntityId::from(instance))).await?;
            println!("Instance stopped");
        }
        InstanceCommands::Remove { instance } => {
            dashboard.dispatch(Command::RemoveInstance(EntityId::from(instance))).await?;
            println!("Instance removed");
        }
        InstanceCommands::Export { instance } => {
            let outcome = dashboard
                .dispatch(Command::ExportInstance(EntityId::from(instance)))
                .await?;
            if let CommandOutcome::Exported(path) = outcome {
                println!("Operations written to {}", path.display());
            }
        }
    }
    Ok(())
}

async fn run_strategies(dashboard: &Dashboard, command: StrategyCommands) -> Result<()> {
    dashboard.bootstrap(&StdinPrompt).await?;

    match command {
        StrategyCommands::List { all: false } => print_instances(dashboard).await,
        StrategyCommands::List { all: true } => {
            println!("\n=== All Strategies ===");
            for strategy in dashboard.strategies.list_all().await {
                let instance = strategy
                    .instance_id
                    .as_ref()
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}  instance {}  {}  [{}]",
                    strategy.id,
                    instance,
                    strategy.symbol.as_deref().unwrap_or("-"),
                    strategy.status
                );
            }
        }
        StrategyCommands::Edit { id, strategy } => {
            let id = EntityId::from(id);
            let edits = strategy.edits();
            if edits.is_empty() {
                bail!("nothing to change");
            }
            dashboard.dispatch(Command::ToggleEdit(id.clone())).await?;
            for edit in edits {
                dashboard.strategies.apply_edit(&id, edit).await?;
            }
            dashboard.dispatch(Command::ToggleEdit(id.clone())).await?;
            println!("Strategy {} saved", id);
        }
        StrategyCommands::Start { id } => {
            dashboard.dispatch(Command::StartStrategy(EntityId::from(id))).await?;
            println!("Strategy started");
        }
        StrategyCommands::Stop { id } => {
            dashboard.dispatch(Command::StopStrategy(EntityId::from(id))).await?;
            println!("Strategy stopped");
        }
        StrategyCommands::Remove { id } => {
            dashboard.dispatch(Command::RemoveStrategy(EntityId::from(id))).await?;
            println!("Strategy removed");
        }
    }
    Ok(())
}

async fn run_indicators(dashboard: &Dashboard, command: IndicatorCommands) -> Result<()> {
    match command {
        IndicatorCommands::List { strategy, side } => {
            let strategy = EntityId::from(strategy);
            let indicators = dashboard.indicators.open(&strategy, side).await;
            dashboard.indicators.close(&strategy, side).await;

            println!("\n=== {} indicators of strategy {} ===", side, strategy);
            for indicator in indicators {
                let flag = if indicator.mandatory { "mandatory" } else { "optional" };
                println!("{}  {}", indicator.id, flag);
            }
        }
        IndicatorCommands::Edit {
            strategy,
            side,
            add,
            remove,
            mandatory,
            optional,
        } => {
            let strategy = EntityId::from(strategy);
            dashboard.indicators.open(&strategy, side).await;

            for _ in 0..add {
                let indicator = dashboard.indicators.add(&strategy, side).await?;
                println!("Added indicator {}", indicator.id);
            }
            for id in remove {
                dashboard
                    .indicators
                    .remove(&strategy, side, &EntityId::from(id))
                    .await?;
            }
            let flags = mandatory
                .into_iter()
                .map(|id| (id, true))
                .chain(optional.into_iter().map(|id| (id, false)));
            for (id, flag) in flags {
                dashboard
                    .indicators
                    .set_mandatory(&strategy, side, &EntityId::from(id), flag)
                    .await?;
            }

            let command = Command::SaveIndicators {
                strategy_id: strategy,
                side,
            };
            dashboard.dispatch(command).await?;
            println!("Indicators saved");
        }
    }
    Ok(())
}

async fn print_instances(dashboard: &Dashboard) {
    let instances = dashboard.instances.all().await;
    println!("\n=== Instances ===");
    if instances.is_empty() {
        println!("(none)");
    }

    for view in instances {
        let instance = &view.instance;
        let updated = instance
            .updated_at
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!("{}  {}  [{}]  {}", instance.id, instance.name, instance.status, updated);

        for strategy in dashboard.strategies.for_instance(&instance.id).await {
            print_strategy(&strategy);
        }
    }
}

fn print_strategy(view: &StrategyView) {
    let strategy = &view.strategy;
    let simultaneous = strategy
        .buy
        .simultaneous_operations
        .map(|count| format!(" x{}", count))
        .unwrap_or_default();
    println!(
        "    {}  {}  [{}]  buy {} after {} every {}s{} | sell {} after {} every {}s",
        strategy.id,
        strategy.symbol.as_deref().unwrap_or("-"),
        strategy.status,
        format_fraction(strategy.buy.percent),
        strategy.buy.condition_limit,
        strategy.buy.interval,
        simultaneous,
        format_fraction(strategy.sell.percent()),
        strategy.sell.condition_limit,
        strategy.sell.interval,
    );

    let actions: Vec<&str> = view.commands().iter().map(|command| command.label()).collect();
    println!("      actions: {}", actions.join(", "));
}
