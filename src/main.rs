mod chain;
mod config;
mod error;
mod expect;
mod session;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};

use config::Config;
use session::PtySession;

#[derive(Parser)]
#[command(
    name = "hopssh",
    about = "Alias-driven SSH login chains.",
    long_about = "Hopssh resolves a short alias to a server from your config file,\n\
                  logs into any required jump hosts along the way, and drops you\n\
                  into an interactive shell on the target.",
    version
)]
struct Cli {
    /// Path to the server config file
    #[arg(long, default_value = "config.json")]
    config: String,

    /// Generate shell completions
    #[arg(long, value_name = "SHELL")]
    completions: Option<Shell>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a server by alias, hopping through required logins first
    Connect {
        /// Alias of the target server
        alias: String,
    },
    /// List configured servers and their aliases
    List,
    /// Add a server to the config (not implemented yet)
    Create,
}

fn resolve_config_path(path: &str) -> Result<PathBuf> {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(rest))
    } else {
        Ok(PathBuf::from(path))
    }
}

fn main() {
    let cli = Cli::parse();
    // Single exit point for every failure category: config, protocol, usage
    if let Err(err) = run(cli) {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    // Shell completions (no config file needed)
    if let Some(shell) = cli.completions {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "hopssh", &mut std::io::stdout());
        return Ok(());
    }

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        std::process::exit(2);
    };

    let config_path = resolve_config_path(&cli.config)?;

    match command {
        Commands::Connect { alias } => {
            let config = Config::load(&config_path)?;
            handle_connect(&config, &alias)
        }
        Commands::List => {
            let config = Config::load(&config_path)?;
            handle_list(&config);
            Ok(())
        }
        Commands::Create => {
            println!(
                "'create' isn't implemented yet. Edit {} by hand.",
                config_path.display()
            );
            Ok(())
        }
    }
}

fn handle_connect(config: &Config, alias: &str) -> Result<()> {
    let target = config.resolve(alias)?;
    let chain = chain::resolve_chain(config, target)?;

    let (rows, cols) = session::current_terminal_size();
    let mut session = PtySession::new(rows, cols);
    chain::login(&mut session, &chain)?;

    // From here the terminal belongs to the remote shell; our exit status
    // is whatever the interactive session's is.
    let status = session.interact()?;
    std::process::exit(status.exit_code() as i32);
}

fn handle_list(config: &Config) {
    if config.servers.is_empty() {
        println!("No servers configured. Add some to the config file!");
        return;
    }
    for record in &config.servers {
        println!("{:<20} {}", record.server, record.aliases.join(", "));
    }
}
