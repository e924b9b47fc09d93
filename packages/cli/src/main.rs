//! `gjson`: Graphable JSON command-line interface.
//!
//! Provides two subcommands:
//!
//! - **`resolve`**: print every value of a relationship, following links,
//!   collections and pagination.
//! - **`relationships`**: list the relationships a document exposes and the
//!   keys (literal, link, versioned) that store them.
//!
//! A SOURCE is a file path, `-` for stdin, or an `http(s)://` URL.
//!
//! Every resolver setting is a global flag that falls back to the matching
//! `GRAPHABLE_*` environment variable (the same variables
//! [`ResolverConfig::from_env`] reads). Logging is controlled with `RUST_LOG`
//! and goes to stderr.

use std::fs;
use std::io::{self, Read};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use graphablejson::render::{render_relationships, render_value};
use graphablejson::{
    relationships, Direction, HttpFetcher, LinkFetcher, ResolveOptions, Resolver,
    ResolverConfig, Url, Version,
};
use serde_json::Value;

/// gjson: Graphable JSON CLI
///
/// Resolve relationships the way a tolerant client would: literal values,
/// links, collections and paginated collections all produce the same stream.
#[derive(Parser)]
#[command(name = "gjson", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Command,
}

/// Resolver settings; unset flags fall back to the environment, then to
/// [`ResolverConfig::default`].
#[derive(Args)]
struct Settings {
    /// Sibling link fetches kept in flight.
    #[arg(long, global = true, value_name = "N", env = "GRAPHABLE_MAX_CONCURRENCY")]
    max_concurrency: Option<usize>,

    /// Stop following a collection's pagination after N pages.
    #[arg(long, global = true, value_name = "N", env = "GRAPHABLE_MAX_PAGES")]
    max_pages: Option<usize>,

    /// HTTP request timeout in seconds.
    #[arg(long, global = true, value_name = "SECS", env = "GRAPHABLE_TIMEOUT_SECS")]
    timeout: Option<u64>,

    /// HTTP User-Agent header.
    #[arg(long, global = true, value_name = "TEXT", env = "GRAPHABLE_USER_AGENT")]
    user_agent: Option<String>,
}

impl Settings {
    fn apply(self, mut config: ResolverConfig) -> ResolverConfig {
        if let Some(n) = self.max_concurrency {
            config.max_concurrent_fetches = n;
        }
        if self.max_pages.is_some() {
            config.max_pages = self.max_pages;
        }
        if let Some(secs) = self.timeout {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(ua) = self.user_agent {
            config.user_agent = ua;
        }
        config
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    /// One compact JSON document per line.
    Json,
    /// Human-readable text.
    Text,
}

#[derive(Subcommand)]
enum Command {
    /// Print every value of a relationship.
    ///
    /// Values are printed in source order as they arrive; pages are only
    /// fetched when needed, so `--limit` also limits network traffic.
    /// Exits 1 if any element failed to resolve.
    ///
    /// Examples:
    ///   gjson resolve customer.json email
    ///   gjson resolve https://api.example.com/customers/7 order --limit 20
    ///   gjson resolve customer.json address --rel-version v2 --format text
    Resolve {
        /// Path to a JSON file, `-` for stdin, or an http(s) URL.
        source: String,

        /// Relationship name (e.g. `address`).
        name: String,

        /// Resolve the `<name>__<version>` slot instead of the base slot.
        #[arg(short = 'r', long, value_name = "VERSION")]
        rel_version: Option<Version>,

        /// Follow `prev` instead of `next` when paginating.
        #[arg(long)]
        backward: bool,

        /// Stop after N values.
        #[arg(short = 'n', long, value_name = "N")]
        limit: Option<usize>,

        /// Base URL for relative links in a local document.
        #[arg(long, value_name = "URL")]
        base: Option<Url>,

        #[arg(short = 'f', long, value_enum, default_value = "json")]
        format: Format,
    },

    /// List the relationships a document exposes.
    Relationships {
        /// Path to a JSON file, `-` for stdin, or an http(s) URL.
        source: String,

        #[arg(short = 'f', long, value_enum, default_value = "text")]
        format: Format,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "graphablejson=warn,gjson=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.settings.apply(ResolverConfig::default());
    tracing::debug!("config: {config:?}");
    let fetcher = Arc::new(
        HttpFetcher::from_config(&config)
            .unwrap_or_else(|e| fatal(&format!("failed to build HTTP client: {e}"))),
    );

    match cli.command {
        Command::Resolve {
            source,
            name,
            rel_version,
            backward,
            limit,
            base,
            format,
        } => {
            let resolver = Resolver::with_config(fetcher, config);
            let options = ResolveOptions {
                version: rel_version,
                direction: if backward {
                    Direction::Backward
                } else {
                    Direction::Forward
                },
                base,
            };

            let resolved = if is_url(&source) {
                resolver.resolve_url(&source, &name, &options).await
            } else {
                let doc = parse_document(&read_input(&source));
                resolver.resolve_with(&doc, &name, &options)
            };
            let stream = resolved.unwrap_or_else(|e| fatal(&e.to_string()));
            let mut stream = match limit {
                Some(n) => stream.take(n).boxed(),
                None => stream,
            };

            let mut failed = false;
            let mut index = 0usize;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(value) => print_value(&value, format, index),
                    Err(e) => {
                        eprintln!("error in element {index}: {e}");
                        failed = true;
                    }
                }
                index += 1;
            }

            if failed {
                process::exit(1);
            }
        }

        Command::Relationships { source, format } => {
            let doc = if is_url(&source) {
                fetcher
                    .fetch(&source)
                    .await
                    .unwrap_or_else(|e| fatal(&format!("failed to fetch {source}: {e}")))
            } else {
                parse_document(&read_input(&source))
            };

            let rels = relationships(&doc);
            match format {
                Format::Text => print!("{}", render_relationships(&rels)),
                Format::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&rels)
                        .unwrap_or_else(|e| fatal(&format!("failed to serialise output: {e}")))
                ),
            }
        }
    }
}

fn print_value(value: &Value, format: Format, index: usize) {
    match format {
        Format::Json => println!("{value}"),
        Format::Text => {
            if index > 0 {
                println!();
            }
            print!("{}", render_value(value));
        }
    }
}

fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Read the full contents of a file, or stdin when the path is `"-"`.
fn read_input(path: &str) -> String {
    if path == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .unwrap_or_else(|e| fatal(&format!("failed to read stdin: {e}")));
        buf
    } else {
        fs::read_to_string(path).unwrap_or_else(|e| fatal(&format!("failed to read {path}: {e}")))
    }
}

fn parse_document(json: &str) -> Value {
    serde_json::from_str(json).unwrap_or_else(|e| fatal(&format!("input is not valid JSON: {e}")))
}

/// Print an error message to stderr and exit with code 2.
fn fatal(msg: &str) -> ! {
    eprintln!("gjson: {msg}");
    process::exit(2);
}
