use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use std::path::PathBuf;

use ymlmerge::catalog::{render_change_table, write_change_table_tsv};
use ymlmerge::config::Config;
use ymlmerge::feed::{build_client, load_feed_list};
use ymlmerge::output::ShardWriter;
use ymlmerge::pipeline::{load_previous, run, RunOptions};

#[derive(Parser, Debug)]
#[command(
    name = "ymlmerge",
    about = "Merge supplier YML feeds into size-bounded catalog shards"
)]
struct Args {
    /// Configuration file
    #[arg(long, value_name = "FILE", default_value = "ymlmerge.toml")]
    config: PathBuf,

    /// Feed list, one `URL [prefix]` per line (overrides config)
    #[arg(long, value_name = "FILE")]
    feeds: Option<PathBuf>,

    /// Directory to write shards to (overrides config)
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Maximum shard size in MiB (overrides config)
    #[arg(long, value_name = "N")]
    max_shard_mb: Option<usize>,

    /// Previous output document(s) to compare prices and stock against.
    /// Defaults to the shards already in the output directory.
    #[arg(long, value_name = "FILE")]
    previous: Vec<PathBuf>,

    /// Also write the change table as TSV (overrides config)
    #[arg(long, value_name = "FILE")]
    changes: Option<PathBuf>,

    /// Print the summary and changes as JSON
    #[arg(long)]
    json: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(feeds) = &self.feeds {
            config.feeds_file = feeds.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(mb) = self.max_shard_mb {
            config.max_shard_bytes = mb.saturating_mul(1024 * 1024);
        }
        if let Some(changes) = &self.changes {
            config.changes_file = Some(changes.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays clean for --json
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    args.apply(&mut config);

    if !config.feeds_file.exists() {
        eprintln!("Error: No feed list found at {}", config.feeds_file.display());
        eprintln!();
        eprintln!("Create it with one feed URL per line, optionally followed by a prefix:");
        eprintln!("  https://supplier.example.com/export.yml acme");
        eprintln!();
        eprintln!("Or point to another file with --feeds.");
        std::process::exit(1);
    }

    let feeds = load_feed_list(&config.feeds_file, config.allow_private_hosts)
        .await
        .context("Failed to read feed list")?;
    if feeds.is_empty() {
        eprintln!("Warning: No valid feeds found in {}", config.feeds_file.display());
    } else {
        tracing::info!(
            feeds = feeds.len(),
            path = %config.feeds_file.display(),
            "Loaded feed list"
        );
    }

    let client = build_client(&config.user_agent).context("Failed to build HTTP client")?;

    // Must happen before the writer replaces the shards it reads
    let previous = load_previous(&args.previous, &config.output_dir, &config.output_stem)
        .context("Failed to read previous output")?;
    tracing::debug!(offers = previous.len(), "Loaded previous run");

    let writer = ShardWriter::new(
        &config.output_dir,
        config.output_stem.clone(),
        config.shop.clone(),
    );
    let options = RunOptions {
        fetch: config.fetch_options(),
        max_shard_bytes: config.max_shard_bytes,
        generated_at: Local::now().naive_local(),
    };

    let report = run(&client, &feeds, &previous, &writer, &options)
        .await
        .context("Failed to write catalog")?;

    if let Some(path) = &config.changes_file {
        write_change_table_tsv(path, &report.changes)
            .with_context(|| format!("Failed to write change table to {}", path.display()))?;
    }

    if args.json {
        let json = serde_json::json!({
            "summary": report.summary,
            "changes": report.changes,
            "shards": report.shards,
        });
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else {
        println!("{}", report.summary);
        if report.changes.is_empty() {
            println!("No price or stock changes.");
        } else {
            println!();
            print!("{}", render_change_table(&report.changes));
        }
    }

    Ok(())
}
