//! Contest environment manager: lab-PC restrictions for programming contests

mod output;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use contest_core::{Config, ConfigLoader, ContestManager, Monitor};
use contest_netfilter::{
    CommandOutput, HostGateway, Invocation, RecordingGateway, SystemGateway, Username,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

const DEFAULT_USER: &str = "participant";

#[derive(Parser, Debug)]
#[command(
    name = "contest-manager",
    about = "Restrict a contest account to whitelisted sites and no USB storage",
    version
)]
struct Cli {
    /// Directory holding contest.toml, the whitelist and the dependency cache
    #[arg(long, value_name = "DIR", default_value = "/etc/contest-manager")]
    config_dir: PathBuf,

    /// Config file (TOML), overrides the one in the config directory
    #[arg(long, short = 'c', value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Log system commands and file changes instead of performing them
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recreate the contest account, install software and back up its home
    Setup {
        #[arg(default_value = DEFAULT_USER)]
        user: String,
    },
    /// Restore the contest account to its post-setup state
    Reset {
        #[arg(default_value = DEFAULT_USER)]
        user: String,
    },
    /// Apply network and USB restrictions
    Restrict {
        #[arg(default_value = DEFAULT_USER)]
        user: String,
        /// Re-analyze dependencies of every whitelisted site
        #[arg(long)]
        refresh: bool,
    },
    /// Remove network and USB restrictions
    Unrestrict {
        #[arg(default_value = DEFAULT_USER)]
        user: String,
    },
    /// Show the restriction state
    Status {
        #[arg(default_value = DEFAULT_USER)]
        user: String,
    },
    /// Add a domain to the whitelist
    Add { domain: String },
    /// Remove a domain from the whitelist
    Remove { domain: String },
    /// List whitelisted domains
    List,
    /// Show cached dependencies of whitelisted domains
    Dependencies,
    /// Re-apply restrictions periodically until interrupted
    Monitor {
        #[arg(default_value = DEFAULT_USER)]
        user: String,
        /// Minutes between passes
        #[arg(long, value_name = "MIN", value_parser = clap::value_parser!(u64).range(1..))]
        interval: Option<u64>,
    },
}

impl Command {
    fn needs_root(&self) -> bool {
        !matches!(
            self,
            Command::Status { .. } | Command::List | Command::Dependencies
        )
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Loaded before logging so `[common] verbose` can raise the level
    let config = ConfigLoader::load(cli.config.as_deref(), &cli.config_dir);
    let verbose = cli.verbose || config.as_ref().is_ok_and(|c| c.common.verbose);

    // Initialize logging
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    let Some(command) = cli.command else {
        eprintln!("No command given, see --help");
        std::process::exit(1);
    };

    let outcome = match config.context("Failed to load configuration") {
        Err(e) => Err(e),
        Ok(config) if matches!(command, Command::Monitor { .. }) => {
            // The monitor stops cleanly on Ctrl-C itself
            execute(config, &cli.config_dir, cli.dry_run, command).await
        }
        Ok(config) => {
            tokio::select! {
                outcome = execute(config, &cli.config_dir, cli.dry_run, command) => outcome,
                _ = tokio::signal::ctrl_c() => Err(anyhow::anyhow!("Interrupted")),
            }
        }
    };

    match outcome {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            tracing::error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

/// Run one command. `Ok(false)` means it finished with failures already reported.
async fn execute(config: Config, config_dir: &Path, dry_run: bool, command: Command) -> Result<bool> {
    if command.needs_root() && !dry_run && !running_as_root() {
        bail!("This command must be run as root");
    }

    let monitor_config = config.monitor.clone();
    let gateway: Arc<dyn SystemGateway> = if dry_run {
        Arc::new(dry_run_gateway())
    } else {
        Arc::new(HostGateway)
    };
    let mut manager = ContestManager::new(config, config_dir, gateway);
    if dry_run {
        manager = manager.without_cache_writes();
    }

    match command {
        Command::Setup { user } => {
            let user = parse_user(&user)?;
            let failures = manager.setup(&user)?;
            output::print_setup(&user, failures);
            Ok(failures == 0)
        }
        Command::Reset { user } => {
            let user = parse_user(&user)?;
            let failures = manager.reset(&user)?;
            output::print_reset(&user, failures);
            Ok(failures == 0)
        }
        Command::Restrict { user, refresh } => {
            let user = parse_user(&user)?;
            let report = manager.restrict(&user, refresh).await?;
            output::print_restrict(&user, &report);
            Ok(report.is_complete())
        }
        Command::Unrestrict { user } => {
            let user = parse_user(&user)?;
            let failures = manager.unrestrict(&user);
            println!("Restrictions removed for '{}'", user);
            Ok(failures == 0)
        }
        Command::Status { user } => {
            let user = parse_user(&user)?;
            output::print_status(&manager.status(&user)?);
            Ok(true)
        }
        Command::Add { domain } => {
            let (domain, change) = manager.add_domain(&domain)?;
            output::print_change(&domain, change);
            Ok(true)
        }
        Command::Remove { domain } => {
            let (domain, change) = manager.remove_domain(&domain)?;
            output::print_change(&domain, change);
            Ok(true)
        }
        Command::List => {
            output::print_list(&manager.list_domains()?);
            Ok(true)
        }
        Command::Dependencies => {
            match manager.dependency_report()? {
                Some(report) => output::print_dependencies(&report),
                None => println!("No dependency cache yet, run 'restrict' first"),
            }
            Ok(true)
        }
        Command::Monitor { user, interval } => {
            let user = parse_user(&user)?;
            let mut monitor = Monitor::new(manager, user, &monitor_config);
            if let Some(minutes) = interval {
                monitor = monitor.with_interval(minutes_to_duration(minutes));
            }
            monitor.run().await;
            Ok(true)
        }
    }
}

fn parse_user(name: &str) -> Result<Username> {
    Username::parse(name).with_context(|| format!("Invalid user name {:?}", name))
}

fn minutes_to_duration(minutes: u64) -> Duration {
    Duration::from_secs(minutes.saturating_mul(60))
}

fn running_as_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Commands that only read host state still run under `--dry-run`
fn is_query(inv: &Invocation) -> bool {
    match inv.program.as_str() {
        "id" | "which" | "pgrep" | "iptables-save" | "ip6tables-save" => true,
        "iptables" | "ip6tables" => inv
            .args
            .first()
            .is_some_and(|flag| matches!(flag.as_str(), "-S" | "-L" | "-C")),
        "systemctl" => inv.matches("systemctl", &["is-enabled"]),
        _ => false,
    }
}

fn dry_run_gateway() -> RecordingGateway {
    RecordingGateway::with_responder(|inv| {
        if !is_query(inv) {
            return CommandOutput::ok();
        }
        HostGateway
            .run(inv)
            .unwrap_or_else(|e| CommandOutput::failed(127, e.to_string()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["contest-manager", "restrict"]).unwrap();
        assert_eq!(cli.config_dir, PathBuf::from("/etc/contest-manager"));
        match cli.command {
            Some(Command::Restrict { user, refresh }) => {
                assert_eq!(user, "participant");
                assert!(!refresh);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_cli_global_flags_after_command() {
        let cli =
            Cli::try_parse_from(["contest-manager", "monitor", "team1", "--interval", "10", "--dry-run"])
                .unwrap();
        assert!(cli.dry_run);
        assert!(matches!(
            cli.command,
            Some(Command::Monitor { ref user, interval: Some(10) }) if user == "team1"
        ));
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(Cli::try_parse_from(["contest-manager", "monitor", "--interval", "0"]).is_err());
        let cli = Cli::try_parse_from(["contest-manager", "monitor", "--interval", "18446744073709551615"])
            .unwrap();
        let Some(Command::Monitor { interval: Some(minutes), .. }) = cli.command else {
            panic!("unexpected {:?}", cli.command);
        };
        assert_eq!(minutes_to_duration(minutes), Duration::from_secs(u64::MAX));
        assert_eq!(minutes_to_duration(10), Duration::from_secs(600));
    }

    #[test]
    fn test_root_check_uses_effective_uid() {
        let euid = unsafe { libc::geteuid() };
        assert_eq!(running_as_root(), euid == 0);
    }

    #[test]
    fn test_read_only_commands_skip_root() {
        assert!(!Command::List.needs_root());
        assert!(!Command::Status { user: "x".into() }.needs_root());
        assert!(Command::Add { domain: "a.b".into() }.needs_root());
    }

    #[test]
    fn test_query_classification() {
        assert!(is_query(&Invocation::new("iptables", ["-S", "OUTPUT"])));
        assert!(is_query(&Invocation::new("systemctl", ["is-enabled", "x.service"])));
        assert!(!is_query(&Invocation::new("iptables", ["-A", "OUTPUT"])));
        assert!(!is_query(&Invocation::new("systemctl", ["enable", "x.service"])));
        assert!(!is_query(&Invocation::new("useradd", ["bob"])));
    }
}
