// valuecast entry point.
//
// Usage: valuecast [--base-dir DIR] [QUERY_JSON_FILE]
//
// 1. Initialize tracing (stderr, so stdout carries only the result)
// 2. Load config from DIR, or the default base directory
// 3. Load the baseline catalog
// 4. Read one PriceQuery as JSON from the file, or stdin
// 5. Print the SuggestionResult as JSON

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::info;
use valuecast_app::SuggestionService;
use valuecast_core::config;
use valuecast_core::PriceQuery;
use valuecast_pricing::CatalogStore;

#[derive(Debug, Default)]
struct Args {
    base_dir: Option<PathBuf>,
    query_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let args = parse_args(std::env::args().skip(1))?;
    let base_dir = args.base_dir.unwrap_or_else(config::default_base_dir);

    let config = config::load_config_from(&base_dir).context("failed to load configuration")?;
    let catalog_path = resolve(&base_dir, &config.pricing.catalog_path);
    let catalog = Arc::new(CatalogStore::load(&catalog_path));
    info!(
        entries = catalog.len(),
        brands = catalog.brand_count(),
        ai_enabled = config.api_key().is_some(),
        "valuecast ready"
    );

    let text = match &args.query_path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read query file {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read query from stdin")?;
            buf
        }
    };
    let query: PriceQuery =
        serde_json::from_str(&text).context("query is not valid PriceQuery JSON")?;

    let service = SuggestionService::from_config(&config, catalog);
    let result = service.suggest_price(&query).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Args> {
    let mut parsed = Args::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--base-dir" => {
                let Some(dir) = args.next() else {
                    bail!("--base-dir requires a directory");
                };
                parsed.base_dir = Some(PathBuf::from(dir));
            }
            "-h" | "--help" => {
                bail!("usage: valuecast [--base-dir DIR] [QUERY_JSON_FILE]");
            }
            flag if flag.starts_with('-') => bail!("unknown option {flag}"),
            path => {
                if parsed.query_path.is_some() {
                    bail!("only one query file may be given");
                }
                parsed.query_path = Some(PathBuf::from(path));
            }
        }
    }
    Ok(parsed)
}

/// Relative catalog paths are taken from the base directory.
fn resolve(base_dir: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("valuecast=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
