//! `limestone` - CLI for the rock sizing dashboard
//!
//! This binary runs the HTTP server and provides maintenance commands for the
//! measurement store.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::PathBuf;

use clap::Parser;

use limestone::cli::{Cli, Command, ConfigCommand, ServeCommand};
use limestone::{init_logging, server, Config, Storage};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Execute the command
    match cli.command {
        Command::Serve(serve_cmd) => handle_serve(Config::load_from(cli.config)?, serve_cmd),
        Command::Status(status_cmd) => {
            handle_status(&Config::load_from(cli.config)?, status_cmd.json)
        }
        Command::Reset(reset_cmd) => handle_reset(&Config::load_from(cli.config)?, reset_cmd.yes),
        Command::Config(config_cmd) => handle_config(cli.config, config_cmd),
    }
}

fn handle_serve(mut config: Config, cmd: ServeCommand) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(bind) = cmd.bind {
        config.server.bind = bind;
    }
    if config.auth.api_key.is_none() {
        tracing::warn!("No api_key configured; every node report will be rejected");
    }
    if config.auth.username.is_none() || config.auth.password.is_none() {
        tracing::warn!("No operator credentials configured; login is disabled");
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(server::serve(config))?;
    Ok(())
}

fn handle_status(config: &Config, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let storage = Storage::open(config.database_path())?;
    let stats = storage.stats()?;

    if json {
        let status = serde_json::json!({
            "database_path": storage.path(),
            "bind": config.server.bind,
            "timezone": config.dashboard.timezone,
            "storage": stats,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        let show = |t: Option<chrono::DateTime<chrono::Utc>>| {
            t.map_or_else(|| "-".to_string(), |t| t.to_rfc3339())
        };
        println!("limestone status");
        println!("----------------");
        println!("Database:      {}", storage.path().display());
        println!("Size:          {} bytes", stats.db_size_bytes);
        println!("Measurements:  {}", stats.total_measurements);
        println!("Nodes:         {}", stats.nodes);
        println!("Oldest:        {}", show(stats.oldest_measurement));
        println!("Newest:        {}", show(stats.newest_measurement));
        println!("Last update:   {}", show(stats.last_update));
    }
    Ok(())
}

fn handle_reset(config: &Config, yes: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = config.database_path();
    if !yes {
        println!("This will delete every measurement in {}.", path.display());
        println!("Use --yes to confirm.");
        return Ok(());
    }

    let mut storage = Storage::open(&path)?;
    let deleted = storage.reset()?;
    println!("Deleted {deleted} measurements.");
    Ok(())
}

fn handle_config(
    config_path: Option<PathBuf>,
    cmd: ConfigCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        ConfigCommand::Show { json } => {
            let shown = Config::load_from(config_path)?.redacted();
            if json {
                println!("{}", serde_json::to_string_pretty(&shown)?);
            } else {
                let secret = |v: &Option<String>| v.as_deref().unwrap_or("(unset)").to_string();
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Server]");
                println!("  Bind:               {}", shown.server.bind);
                println!("  Session TTL (h):    {}", shown.server.session_ttl_hours);
                println!("  Cookie name:        {}", shown.server.cookie_name);
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", shown.database_path().display());
                println!();
                println!("[Auth]");
                println!("  Username:           {}", secret(&shown.auth.username));
                println!("  Password:           {}", secret(&shown.auth.password));
                println!("  API key:            {}", secret(&shown.auth.api_key));
                println!("  Reset key:          {}", secret(&shown.auth.reset_key));
                println!();
                println!("[Dashboard]");
                println!("  Timezone:           {}", shown.dashboard.timezone);
                println!("  History days:       {}", shown.dashboard.history_days);
                println!("  Trend hours:        {}", shown.dashboard.trend_hours);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file
                .or(config_path)
                .unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
