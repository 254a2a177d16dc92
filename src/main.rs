//! `streamfed` CLI - exercise a gateway session from the terminal

use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use streamfed::config::{FormatterConfig, UserConfig};
use streamfed::models::Extras;
use streamfed::{default_config_path, load_config, FormatContext, Formatter, ParsedStream, Services, Session};

#[derive(Parser)]
#[command(name = "streamfed")]
#[command(about = "Federation gateway for media content addons")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.config/streamfed/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the merged manifest
    Manifest,

    /// Fetch, shape and format streams
    Streams {
        /// Content type (movie, series, ...)
        r#type: String,
        /// Content id (tt0111161, tt0903747:1:1, ...)
        id: String,
    },

    /// Fetch a merged catalog page
    Catalog {
        r#type: String,
        /// Namespaced catalog id (`{instance}.{catalog}`)
        id: String,

        /// Catalog extra as key=value (repeatable)
        #[arg(short, long = "extra", value_name = "K=V")]
        extras: Vec<String>,
    },

    /// Resolve metadata for an item
    Meta { r#type: String, id: String },

    /// Render templates against a stream read as JSON from stdin
    Format {
        /// Name template
        #[arg(short, long)]
        name: String,

        /// Description template
        #[arg(short, long)]
        description: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Format { name, description } => cmd_format(cli.config.as_ref(), name, description),
        Commands::Manifest => {
            let session = open_session(cli.config.as_ref()).await?;
            print_json(&session.get_manifest())
        }
        Commands::Streams { r#type, id } => {
            let session = open_session(cli.config.as_ref()).await?;
            print_json(&session.get_streams(&r#type, &id).await)
        }
        Commands::Catalog { r#type, id, extras } => {
            let extras = parse_extra_args(&extras)?;
            let session = open_session(cli.config.as_ref()).await?;
            print_json(&session.get_catalog(&r#type, &id, &extras).await)
        }
        Commands::Meta { r#type, id } => {
            let session = open_session(cli.config.as_ref()).await?;
            print_json(&session.get_meta(&r#type, &id).await)
        }
    }
}

async fn open_session(path: Option<&PathBuf>) -> Result<Session> {
    let path = path.cloned().unwrap_or_else(default_config_path);
    let config = load_config(&path)?;
    let services = Services::for_config(&config)?;
    Ok(Session::initialise(config, services).await?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_extra_args(raw: &[String]) -> Result<Extras> {
    raw.iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => bail!("extra '{pair}' must look like key=value"),
        })
        .collect()
}

fn cmd_format(config_path: Option<&PathBuf>, name: String, description: Option<String>) -> Result<()> {
    let config = match config_path {
        Some(path) => load_config(path)?,
        None => UserConfig::default(),
    };

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("failed to read stream JSON from stdin")?;
    let stream: ParsedStream = serde_json::from_str(&input).context("stdin is not a valid stream object")?;

    let formatter_config = FormatterConfig {
        name: Some(name),
        description: Some(description.unwrap_or_default()),
        ..config.formatter.clone()
    };
    let context = FormatContext {
        addon_name: config.addon_name.clone(),
        languages: config.languages.clone(),
    };
    let formatted = Formatter::new(&formatter_config, context).format(&stream);

    print_json(&json!({ "name": formatted.name, "description": formatted.description }))
}
