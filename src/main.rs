use clap::{Parser, Subcommand};
use festival_geo::config::{CacheConfig, GeocodeConfig, ProviderConfig};
use festival_geo::feed;
use festival_geo::location::ResolutionPipeline;
use serde::Serialize;
use std::path::PathBuf;

/// festgeo: place festival venues on a map.
///
/// Resolves free-text venue strings to coordinates and a country, with a
/// persistent cache so each venue is geocoded only once.
///
/// Examples:
///   festgeo resolve "Lloret de Mar, Spain" "Kraków, Poland"
///   festgeo resolve --feed festivals.json
///   festgeo resolve --offline "Lloret de Mar, Spain"
///   festgeo serve --port 5000
#[derive(Parser)]
#[command(name = "festgeo", version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.festgeo/config.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging.
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve venue strings, or every venue in a feed file.
    Resolve {
        /// Venue strings to resolve.
        locations: Vec<String>,

        /// JSON feed of {name, date, location, links} records.
        #[arg(long, conflicts_with = "locations")]
        feed: Option<PathBuf>,

        /// Cache file override.
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Geocode through this proxy URL instead of calling OpenCage.
        #[arg(long)]
        proxy: Option<String>,

        /// Offline mode: only use cached results.
        #[arg(long)]
        offline: bool,
    },
    /// Run the geocode proxy server.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, default_value_t = 5000)]
        port: u16,

        /// Cache file override.
        #[arg(long)]
        cache: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut config = GeocodeConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    match cli.command {
        Command::Resolve {
            locations,
            feed: feed_path,
            cache,
            proxy,
            offline,
        } => {
            apply_cli_flags(&mut config, cache, proxy);
            let mut pipeline = ResolutionPipeline::from_config(&config);
            pipeline.set_offline(offline);

            match feed_path {
                Some(path) => {
                    let records = feed::load(&path).unwrap_or_else(|e| {
                        eprintln!("Error: {}", e);
                        std::process::exit(1);
                    });
                    print_json(&feed::place_on_map(&records, &mut pipeline));
                }
                None if locations.is_empty() => {
                    eprintln!("Error: No locations given. Pass venue strings or --feed FILE.");
                    std::process::exit(1);
                }
                None => print_json(&pipeline.resolve_all(&locations)),
            }
        }
        Command::Serve { host, port, cache } => {
            apply_cli_flags(&mut config, cache, None);
            let pipeline = ResolutionPipeline::from_config(&config);

            let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
                eprintln!("Error: Cannot start runtime: {}", e);
                std::process::exit(1);
            });
            if let Err(e) = runtime.block_on(festival_geo::server::start(&host, port, pipeline)) {
                eprintln!("Error: Server on {}:{} failed: {}", host, port, e);
                std::process::exit(1);
            }
        }
    }
}

fn apply_cli_flags(config: &mut GeocodeConfig, cache: Option<PathBuf>, proxy: Option<String>) {
    if let Some(path) = cache {
        config.cache = CacheConfig::Local { path: Some(path) };
    }
    if let Some(url) = proxy {
        config.provider = ProviderConfig::Proxy { url };
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error: Cannot serialize output: {}", e);
            std::process::exit(1);
        }
    }
}
