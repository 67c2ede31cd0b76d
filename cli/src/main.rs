//! CallWatch CLI
//!
//! Command-line interface for running and querying API call monitors.

use anyhow::{bail, Context, Result};
use callwatch_core::{
    Agent, ApiPolicyRule, Command, Config, MonitorClient, PolicyTable, Response, StaticContext,
    Verdict, AGENT_TAG, SERVER_TAG,
};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::io::BufRead;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// CallWatch - API Call Monitor
#[derive(Parser)]
#[command(name = "callwatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value = "pretty", global = true)]
    format: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a monitor agent in the foreground until a controller sends `close`
    Serve {
        /// Candidate port, tried in the given order (can be specified multiple times)
        #[arg(short, long = "port")]
        ports: Vec<u16>,

        /// Package name reported to connection checks
        #[arg(long, default_value = "callwatch-cli")]
        package: String,

        /// Policy file
        #[arg(long)]
        policy: Option<PathBuf>,

        /// Record every stdin line as a call payload
        #[arg(long)]
        record_stdin: bool,
    },
    /// Send one command to a running monitor and print the rows
    Query {
        /// Command to send
        #[arg(value_enum)]
        command: QueryCommand,

        /// Monitor host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Monitor port (default: first configured port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Connect and read timeout (milliseconds)
        #[arg(long, default_value = "10000")]
        timeout_ms: u64,
    },
    /// Evaluate the policy for a method call
    Policy {
        /// Method signature
        method: String,

        /// Resources touched by the call
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        resources: Vec<String>,

        /// Policy file (default: from configuration)
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Show version information
    Version,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Pretty,
    Json,
    Compact,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum QueryCommand {
    Check,
    Logs,
    Time,
    Close,
}

impl From<QueryCommand> for Command {
    fn from(c: QueryCommand) -> Self {
        match c {
            QueryCommand::Check => Command::ConnectionCheck,
            QueryCommand::Logs => Command::GetLogs,
            QueryCommand::Time => Command::GetTime,
            QueryCommand::Close => Command::Close,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let config = load_config(cli.config.as_deref());
    init_logging(&config);

    match cli.command {
        Commands::Version => {
            print_version();
            Ok(())
        }
        Commands::Init { force } => {
            let path = match cli.config {
                Some(path) => path,
                None => {
                    Config::ensure_config_dir()?;
                    Config::default_path()?
                }
            };
            if write_default_config(&path, force)? {
                println!("{} {}", "Wrote".green().bold(), path.display());
            } else {
                println!(
                    "{} {} (use --force to overwrite)",
                    "Exists:".yellow().bold(),
                    path.display()
                );
            }
            Ok(())
        }
        Commands::Serve {
            ports,
            package,
            policy,
            record_stdin,
        } => serve(config, ports, package, policy, record_stdin),
        Commands::Query {
            command,
            host,
            port,
            timeout_ms,
        } => {
            let port = match port {
                Some(port) => port,
                None => *config
                    .server
                    .ports
                    .first()
                    .context("No port given and none configured")?,
            };
            query(command.into(), &host, port, timeout_ms, cli.format)
        }
        Commands::Policy {
            method,
            resources,
            file,
        } => {
            let path = match file {
                Some(path) => path,
                None => config.policy.effective_file()?,
            };
            evaluate_policy(&path, &method, &resources, cli.format)
        }
    }
}

fn load_config(path: Option<&Path>) -> Config {
    match path {
        Some(path) => Config::load_from_path(path).unwrap_or_else(|e| {
            eprintln!(
                "[callwatch] Warning: Failed to load config from {}: {}, using defaults",
                path.display(),
                e
            );
            Config::default()
        }),
        None => Config::load().unwrap_or_else(|e| {
            eprintln!("[callwatch] Warning: Failed to load config: {}, using defaults", e);
            Config::default()
        }),
    }
}

/// Save the default configuration to `path`. Returns false when the file
/// exists and `force` is not set.
fn write_default_config(path: &Path, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    Config::default()
        .save(path)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;
    Ok(true)
}

/// `RUST_LOG` wins over the configured level
fn init_logging(config: &Config) {
    let env = env_logger::Env::default().default_filter_or(config.logging.level.as_str());
    env_logger::Builder::from_env(env).init();
}

fn print_version() {
    println!("{} v{}", "CallWatch".cyan().bold(), callwatch_core::VERSION);
    println!("API call monitor and policy engine");
    println!();
    println!("Core library: {}", callwatch_core::NAME);
}

fn serve(
    mut config: Config,
    ports: Vec<u16>,
    package: String,
    policy: Option<PathBuf>,
    record_stdin: bool,
) -> Result<()> {
    if !ports.is_empty() {
        config.server.ports = ports;
    }
    if policy.is_some() {
        config.policy.file = policy;
    }

    let agent = Arc::new(Agent::launch(config).context("Failed to build agent")?);
    let port = match agent.server_port() {
        Some(port) => port,
        None => bail!(
            "Monitor server could not start on any of {:?}",
            agent.config().server.ports
        ),
    };
    agent.init(Arc::new(StaticContext::new(package)));

    println!();
    println!(
        "{} {}",
        "\u{25c9} Monitoring on port".green().bold(),
        port.to_string().cyan().bold()
    );
    println!(
        "  {} {}",
        "Policy:".dimmed(),
        agent.policy().path().display()
    );
    println!();

    if record_stdin {
        let recorder = Arc::clone(&agent);
        std::thread::Builder::new()
            .name("callwatch-stdin".to_string())
            .spawn(move || record_lines(&recorder, std::io::stdin().lock()))
            .context("Failed to spawn stdin reader")?;
    }

    agent.wait();
    agent.shutdown();

    println!("{}", "Monitor closed by controller".dimmed());
    Ok(())
}

/// Record each line as a payload; lines carrying a reserved tag are skipped
fn record_lines<R: BufRead>(agent: &Agent, input: R) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::warn!("stdin read failed: {}", e);
                break;
            }
        };
        if line.is_empty() {
            continue;
        }
        if line.contains(SERVER_TAG) || line.contains(AGENT_TAG) {
            log::warn!("Skipping line carrying a reserved log tag: {}", line);
            continue;
        }
        agent.record_log(line);
    }
}

fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("Failed to resolve {}:{}", host, port))?
        .next()
        .with_context(|| format!("No address for {}:{}", host, port))
}

fn query(command: Command, host: &str, port: u16, timeout_ms: u64, format: OutputFormat) -> Result<()> {
    let addr = resolve_addr(host, port)?;
    let client = MonitorClient::new(addr).timeout(Duration::from_millis(timeout_ms));
    let rows = client
        .query(command)
        .with_context(|| format!("Query '{}' to {} failed", command, addr))?;

    print_rows(command, &rows, format)
}

fn print_rows(command: Command, rows: &Response, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Pretty => {
            println!();
            println!("{} {}", "\u{25b6}".cyan(), command.to_string().cyan().bold());
            println!("{}", "\u{2500}".repeat(50));
            if rows.is_empty() {
                println!("  {}", "(no rows)".dimmed());
            }
            for row in rows {
                let [a, b, c] = row.columns();
                match command {
                    Command::ConnectionCheck => {
                        println!("  {} {}", "pid:".dimmed(), a.unwrap_or("-"));
                        println!("  {} {}", "package:".dimmed(), b.unwrap_or("-"));
                    }
                    Command::GetLogs => {
                        println!(
                            "  {} [{}] {}",
                            b.unwrap_or("-").dimmed(),
                            a.unwrap_or("-"),
                            c.unwrap_or_default()
                        );
                    }
                    Command::GetTime | Command::Close => {
                        println!("  {}", a.unwrap_or("-"));
                    }
                }
            }
            println!();
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(rows)?);
        }
        OutputFormat::Compact => {
            for row in rows {
                let cells: Vec<&str> = row
                    .columns()
                    .iter()
                    .map(|cell| cell.unwrap_or("-"))
                    .collect();
                println!("{}", cells.join("\t"));
            }
        }
    }
    Ok(())
}

fn evaluate_policy(path: &Path, method: &str, resources: &[String], format: OutputFormat) -> Result<()> {
    let table = PolicyTable::load(path)
        .with_context(|| format!("Failed to load policy file {}", path.display()))?;
    let rule = table.find(method, resources);
    let verdict = rule.map(|r| r.verdict).unwrap_or_default();

    match format {
        OutputFormat::Pretty => {
            println!();
            println!("  {} {}", "Method:".dimmed(), method);
            if !resources.is_empty() {
                println!("  {} {}", "Resources:".dimmed(), resources.join(", "));
            }
            println!("  {} {}", "Verdict:".dimmed(), colored_verdict(verdict));
            match rule {
                Some(rule) => println!("  {} {}", "Rule:".dimmed(), describe_rule(rule)),
                None => println!("  {}", "No matching rule".dimmed()),
            }
            println!();
        }
        OutputFormat::Json => {
            let result = serde_json::json!({
                "method": method,
                "resources": resources,
                "verdict": verdict,
                "rule": rule.map(describe_rule),
                "rules_loaded": table.len(),
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Compact => {
            println!("[{}] {} {}", verdict, method, resources.join(" "));
        }
    }
    Ok(())
}

fn colored_verdict(verdict: Verdict) -> colored::ColoredString {
    let text = verdict.to_string();
    match verdict {
        Verdict::Allow => text.green().bold(),
        Verdict::Deny => text.red().bold(),
        Verdict::Mock => text.yellow().bold(),
    }
}

fn describe_rule(rule: &ApiPolicyRule) -> String {
    if rule.resources.is_empty() {
        format!("{} -> {}", rule.method, rule.verdict)
    } else {
        format!("{} [{}] -> {}", rule.method, rule.resources.join(", "), rule.verdict)
    }
}
