//! Dropkeep CLI
//!
//! Command-line interface for Dropbox credentials and files.
//!
//! # Usage
//!
//! ```bash
//! # Print the URL to visit for an access code
//! dropkeep authorize-url
//!
//! # After putting the code in the config (or DROPKEEP_ACCESS_CODE),
//! # obtain and persist the first token
//! dropkeep token
//!
//! # Work with files under the configured prefix
//! dropkeep put dropbox://notes/todo.txt ./todo.txt
//! dropkeep get dropbox://notes/todo.txt -o todo.txt
//! dropkeep link dropbox://notes/todo.txt
//! ```

mod app;

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use dropkeep_core::storage::{Severity, target_of};
use dropkeep_core::{ExchangeClient, FileAdapter};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt};

use crate::app::App;

#[derive(Parser)]
#[command(name = "dropkeep")]
#[command(about = "Auto-refreshing Dropbox credentials and file access")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Keep tokens in memory only; nothing is persisted
    #[arg(long, global = true)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the authorization URL to obtain an access code
    AuthorizeUrl {
        /// OAuth scopes to request (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        scopes: Vec<String>,
    },

    /// Obtain a usable access token, bootstrapping or refreshing as needed
    Token {
        /// Print the access token itself instead of a summary
        #[arg(long)]
        show: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Show the stored token without contacting Dropbox
    Status {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Print the public link for a file
    Link {
        /// File URI (e.g., dropbox://images/photo.jpg)
        uri: String,
    },

    /// Download a file
    Get {
        /// File URI
        uri: String,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Upload a file, replacing any existing one
    Put {
        /// File URI
        uri: String,

        /// Local file to upload
        file: PathBuf,
    },

    /// Show file metadata
    Stat {
        /// File URI
        uri: String,
    },

    /// Delete a file
    Rm {
        /// File URI
        uri: String,
    },

    /// Verify that the credentials can reach Dropbox
    Check,

    /// Remove the stored token so the next run bootstraps again
    Forget {
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let app = App::load(cli.config.as_deref(), cli.ephemeral)?;
    init_logging(cli.verbose, &app.settings.log_level);
    debug!("Loaded configuration from {:?}", app.settings.config_path);

    match cli.command {
        Commands::AuthorizeUrl { scopes } => authorize_url(&app, &scopes),
        Commands::Token { show, format } => token(&app, show, format).await,
        Commands::Status { format } => status(&app, format).await,
        Commands::Link { uri } => link(&app, &uri).await,
        Commands::Get { uri, output } => get(&app, &uri, output).await,
        Commands::Put { uri, file } => put(&app, &uri, file).await,
        Commands::Stat { uri } => stat(&app, &uri).await,
        Commands::Rm { uri } => rm(&app, &uri).await,
        Commands::Check => check(&app).await,
        Commands::Forget { force } => forget(&app, force).await,
    }
}

fn init_logging(verbose: bool, default_level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn authorize_url(app: &App, scopes: &[String]) -> Result<()> {
    let url = app.exchange()?.authorization_url(scopes)?;

    println!("Visit this URL and approve access:");
    println!();
    println!("  {}", url);
    println!();
    println!(
        "Then set credentials.access_code in {:?} (or DROPKEEP_ACCESS_CODE) and run `dropkeep token`.",
        app.settings.config_path
    );
    Ok(())
}

async fn token(app: &App, show: bool, format: Format) -> Result<()> {
    let manager = app.manager()?;
    let token = manager
        .acquire_token()
        .await
        .with_context(|| format!("Failed to obtain a token for {}", manager.target()))?;

    match (format, show) {
        (Format::Json, true) => {
            let value = serde_json::json!({
                "target": manager.target(),
                "access_token": token.access_token.expose(),
                "summary": token.summary(),
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        (Format::Json, false) => {
            println!("{}", serde_json::to_string_pretty(&token.summary())?);
        }
        (Format::Text, true) => println!("{}", token.access_token.expose()),
        (Format::Text, false) => println!("{}: {}", manager.target(), token.summary()),
    }
    Ok(())
}

async fn status(app: &App, format: Format) -> Result<()> {
    let manager = app.manager()?;
    let stored = manager
        .current_token()
        .await
        .context("Failed to read stored token")?;

    if format == Format::Json {
        let value = serde_json::json!({
            "target": manager.target(),
            "backend": format!("{:?}", app.backend()).to_lowercase(),
            "token": stored.as_ref().map(|t| t.summary()),
            "fresh": stored.as_ref().map(|t| t.is_fresh()),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Target:  {}", manager.target());
    println!("Backend: {:?}", app.backend());
    match stored {
        None => println!("Token:   No token stored"),
        Some(token) => {
            println!("Token:   {}", token.summary());
            match token.remaining() {
                Some(left) => println!("State:   fresh, {} min left", left.num_minutes()),
                None if token.is_fresh() => println!("State:   fresh"),
                None => println!("State:   stale, refreshes on next use"),
            }
        }
    }
    Ok(())
}

async fn link(app: &App, uri: &str) -> Result<()> {
    let facade = app.facade()?;
    match facade.shareable_link(&target_of(uri)).await {
        Some(url) => {
            println!("{}", url);
            Ok(())
        }
        None => bail!("No shared link available for {}", uri),
    }
}

async fn get(app: &App, uri: &str, output: Option<PathBuf>) -> Result<()> {
    let adapter = app.facade()?.adapter().await;
    let contents = adapter
        .read(uri)
        .await
        .with_context(|| format!("Failed to download {}", uri))?;

    match output {
        Some(path) => {
            tokio::fs::write(&path, &contents)
                .await
                .with_context(|| format!("Failed to write {:?}", path))?;
            eprintln!("Wrote {} bytes to {:?}", contents.len(), path);
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&contents)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

async fn put(app: &App, uri: &str, file: PathBuf) -> Result<()> {
    let contents = tokio::fs::read(&file)
        .await
        .with_context(|| format!("Failed to read {:?}", file))?;

    let adapter = app.facade()?.adapter().await;
    let metadata = adapter
        .write(uri, contents)
        .await
        .with_context(|| format!("Failed to upload {}", uri))?;

    println!(
        "Uploaded {} ({} bytes)",
        metadata.path_display.as_deref().unwrap_or(&metadata.name),
        metadata.size.unwrap_or_default()
    );
    Ok(())
}

async fn stat(app: &App, uri: &str) -> Result<()> {
    let adapter = app.facade()?.adapter().await;
    let metadata = adapter
        .metadata(uri)
        .await
        .with_context(|| format!("Failed to get metadata for {}", uri))?;

    println!("{}", serde_json::to_string_pretty(&metadata)?);
    Ok(())
}

async fn rm(app: &App, uri: &str) -> Result<()> {
    let adapter = app.facade()?.adapter().await;
    adapter
        .delete(uri)
        .await
        .with_context(|| format!("Failed to delete {}", uri))?;

    println!("Deleted {}", uri);
    Ok(())
}

async fn check(app: &App) -> Result<()> {
    let diagnostics = app.facade()?.ensure().await;

    if diagnostics.is_empty() {
        println!("OK: Dropbox is reachable with the configured credentials");
        return Ok(());
    }

    for diagnostic in &diagnostics {
        let label = match diagnostic.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        eprintln!("{}: {}", label, diagnostic.message);
    }

    if diagnostics.iter().any(|d| d.severity == Severity::Error) {
        bail!("{} problem(s) found", diagnostics.len());
    }
    Ok(())
}

async fn forget(app: &App, force: bool) -> Result<()> {
    let target = &app.settings.target;

    if !force {
        print!("Remove the stored token for {}? [y/N] ", target);
        std::io::stdout().flush()?;

        let mut answer = String::new();
        std::io::stdin()
            .read_line(&mut answer)
            .context("Failed to read confirmation")?;
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            println!("Aborted");
            return Ok(());
        }
    }

    if app.forget().await? {
        println!("Removed stored token for {}", target);
    } else {
        println!("No token stored for {}", target);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["dropkeep", "status", "--ephemeral", "-c", "/tmp/x.toml"])
            .unwrap();
        assert!(cli.ephemeral);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/x.toml")));
        assert!(matches!(cli.command, Commands::Status { format: Format::Text }));
    }

    #[test]
    fn test_parse_scopes_list() {
        let cli = Cli::try_parse_from([
            "dropkeep",
            "authorize-url",
            "--scopes",
            "files.content.read,sharing.read",
        ])
        .unwrap();
        match cli.command {
            Commands::AuthorizeUrl { scopes } => {
                assert_eq!(scopes, vec!["files.content.read", "sharing.read"]);
            }
            _ => panic!("expected authorize-url"),
        }
    }

    #[test]
    fn test_put_requires_file() {
        assert!(Cli::try_parse_from(["dropkeep", "put", "dropbox://a.txt"]).is_err());
    }
}
