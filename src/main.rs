use clap::{Parser, Subcommand};
use publish::config::{self, Overrides, PublishConfig};
use publish::pipeline::{self, BuildOptions};
use publish::sync::b2::{B2Credentials, B2Store};
use publish::sync::kv::{KvAuth, KvCredentials, KvStore};
use publish::sync::{SyncOptions, SyncStats, sync_tree};
use publish::output;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt as tfmt};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "publish")]
#[command(about = "Build a JSON:API content tree from markdown and sync it to remote stores")]
#[command(long_about = "\
Build a JSON:API content tree from markdown and sync it to remote stores

Content structure:

  content/
  ├── publish.toml                 # Site config (optional)
  ├── posts/
  │   ├── hello-world.md           # Front matter + markdown body
  │   └── 2018/winter-notes.md     # Any depth; README.md and dot-dirs skipped
  └── galleries/
      └── iceland/
          ├── iceland.md           # Album index (required)
          ├── dawn.md              # Photo; takes dawn.jpg unless `image:` is set
          └── dawn.jpg

Output (under --output):

  posts/<slug>.json  posts/page/<n>.json  posts.json
  galleries/...      archives/<kind>.json archives/<kind>/<year>/<month>.json
  feeds/atom.xml     feeds/feed.rss       manifest.json

Logging goes to stderr and follows RUST_LOG (default: info).

Run 'publish gen-config' to generate a documented publish.toml.")]
#[command(version)]
struct Cli {
    /// Content directory
    #[arg(long, default_value = "content", global = true)]
    source: PathBuf,

    /// Output directory
    #[arg(long, default_value = "dist", global = true)]
    output: PathBuf,

    /// Publish items marked `draft: true`
    #[arg(long, global = true)]
    drafts: bool,

    /// Concurrent sync workers (overrides [sync].workers)
    #[arg(long, env = "PUBLISH_WORKERS", global = true)]
    workers: Option<usize>,

    /// Remote key prefix (overrides [sync].prefix)
    #[arg(long, env = "PUBLISH_PREFIX", global = true)]
    prefix: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the output tree, feed and manifest
    Build,
    /// Walk and parse content without writing anything
    Check,
    /// Regenerate manifest.json for an existing output tree
    Manifest,
    /// Upload changed files from the output tree
    Sync {
        #[command(subcommand)]
        target: Target,
    },
    /// Build, then sync to every configured store
    Publish {
        #[command(flatten)]
        b2: B2Args,
        #[command(flatten)]
        kv: KvArgs,
    },
    /// Print a stock publish.toml with all options documented
    GenConfig,
}

#[derive(Subcommand)]
enum Target {
    /// Backblaze B2 bucket
    B2(B2Args),
    /// Workers KV namespace
    Kv(KvArgs),
}

#[derive(clap::Args, Clone)]
struct B2Args {
    #[arg(long, env = "B2_ACCOUNT_ID")]
    b2_account_id: Option<String>,
    #[arg(long, env = "B2_APPLICATION_KEY", hide_env_values = true)]
    b2_application_key: Option<String>,
    #[arg(long, env = "B2_BUCKET")]
    b2_bucket: Option<String>,
}

impl B2Args {
    /// `None` when nothing is set; an error when only some of it is.
    fn credentials(&self) -> CliResult<Option<B2Credentials>> {
        match (&self.b2_account_id, &self.b2_application_key, &self.b2_bucket) {
            (None, None, None) => Ok(None),
            (Some(account_id), Some(application_key), Some(bucket)) => Ok(Some(B2Credentials {
                account_id: account_id.clone(),
                application_key: application_key.clone(),
                bucket: bucket.clone(),
            })),
            _ => Err("B2 needs B2_ACCOUNT_ID, B2_APPLICATION_KEY and B2_BUCKET".into()),
        }
    }
}

#[derive(clap::Args, Clone)]
struct KvArgs {
    #[arg(long, env = "KV_ACCOUNT_ID")]
    kv_account_id: Option<String>,
    #[arg(long, env = "KV_NAMESPACE_ID")]
    kv_namespace_id: Option<String>,
    #[arg(long, env = "KV_API_TOKEN", hide_env_values = true)]
    kv_api_token: Option<String>,
    #[arg(long, env = "KV_EMAIL")]
    kv_email: Option<String>,
    #[arg(long, env = "KV_API_KEY", hide_env_values = true)]
    kv_api_key: Option<String>,
}

impl KvArgs {
    fn credentials(&self) -> CliResult<Option<KvCredentials>> {
        let (Some(account_id), Some(namespace_id)) = (&self.kv_account_id, &self.kv_namespace_id)
        else {
            if self.kv_account_id.is_none() && self.kv_namespace_id.is_none() {
                return Ok(None);
            }
            return Err("KV needs both KV_ACCOUNT_ID and KV_NAMESPACE_ID".into());
        };
        let auth = KvAuth::from_parts(
            self.kv_api_token.clone(),
            self.kv_email.clone(),
            self.kv_api_key.clone(),
        )?;
        Ok(Some(KvCredentials {
            account_id: account_id.clone(),
            namespace_id: namespace_id.clone(),
            auth,
        }))
    }
}

fn main() -> CliResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let cli = Cli::parse();
    let overrides = Overrides {
        workers: cli.workers,
        prefix: cli.prefix.clone(),
    };
    let options = BuildOptions { drafts: cli.drafts };

    match &cli.command {
        Command::Build => {
            let config = load(&cli.source, &overrides)?;
            build(&cli, &config, &options)?;
        }
        Command::Check => {
            let config = load(&cli.source, &overrides)?;
            println!("==> Checking {}", cli.source.display());
            let reports = pipeline::check(&cli.source, &config, &options);
            output::print_check_report(&reports);
            let problems: usize = reports
                .iter()
                .map(|k| k.invalid + usize::from(k.fatal))
                .sum();
            if problems > 0 {
                return Err(format!("{problems} content problems found").into());
            }
            println!("==> Content is valid");
        }
        Command::Manifest => {
            let config = load(&cli.source, &overrides)?;
            let manifest = pipeline::write_manifest(&cli.output, &config.sync.prefix)?;
            println!("Manifest: {} entries", manifest.len());
        }
        Command::Sync { target } => {
            let config = load(&cli.source, &overrides)?;
            let runtime = tokio::runtime::Runtime::new()?;
            let (name, stats) = match target {
                Target::B2(args) => {
                    let creds = args
                        .credentials()?
                        .ok_or("B2 is not configured: set B2_ACCOUNT_ID, B2_APPLICATION_KEY and B2_BUCKET")?;
                    ("b2", runtime.block_on(sync_b2(&cli.output, &config, &creds))?)
                }
                Target::Kv(args) => {
                    let creds = args
                        .credentials()?
                        .ok_or("KV is not configured: set KV_ACCOUNT_ID and KV_NAMESPACE_ID")?;
                    ("kv", runtime.block_on(sync_kv(&cli.output, &config, creds))?)
                }
            };
            output::print_sync_stats(name, &stats);
            if stats.failed > 0 {
                return Err(format!("{name}: {} transfers failed", stats.failed).into());
            }
        }
        Command::Publish { b2, kv } => {
            let config = load(&cli.source, &overrides)?;
            let b2 = b2.credentials()?;
            let kv = kv.credentials()?;
            let built = build(&cli, &config, &options);

            let runtime = tokio::runtime::Runtime::new()?;
            let mut failed = 0;
            if let Some(creds) = b2 {
                failed += report("b2", runtime.block_on(sync_b2(&cli.output, &config, &creds)));
            } else {
                tracing::info!("b2 not configured, skipping");
            }
            if let Some(creds) = kv {
                failed += report("kv", runtime.block_on(sync_kv(&cli.output, &config, creds)));
            } else {
                tracing::info!("kv not configured, skipping");
            }
            built?;
            if failed > 0 {
                return Err(format!("{failed} sync failures").into());
            }
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

fn load(source: &Path, overrides: &Overrides) -> CliResult<PublishConfig> {
    Ok(config::load_config(source)?.with_overrides(overrides)?)
}

fn build(cli: &Cli, config: &PublishConfig, options: &BuildOptions) -> CliResult<()> {
    println!("==> Building {} → {}", cli.source.display(), cli.output.display());
    let report = pipeline::build(&cli.source, &cli.output, config, options)?;
    output::print_build_report(&report);
    let failures = report.failures();
    if failures > 0 {
        return Err(format!("build finished with {failures} failures").into());
    }
    println!("==> Build complete: {}", cli.output.display());
    Ok(())
}

/// Print a store's result and return how many transfers failed.
fn report(name: &str, result: Result<SyncStats, publish::sync::SyncError>) -> u32 {
    match result {
        Ok(stats) => {
            output::print_sync_stats(name, &stats);
            stats.failed
        }
        Err(err) => {
            tracing::error!(store = name, error = %err, "sync aborted");
            1
        }
    }
}

async fn sync_b2(
    output: &Path,
    config: &PublishConfig,
    creds: &B2Credentials,
) -> Result<SyncStats, publish::sync::SyncError> {
    let store = B2Store::connect(creds, Duration::from_secs(config.sync.timeout_secs)).await?;
    sync_tree(Arc::new(store), output, &SyncOptions::from_config(&config.sync)).await
}

async fn sync_kv(
    output: &Path,
    config: &PublishConfig,
    creds: KvCredentials,
) -> Result<SyncStats, publish::sync::SyncError> {
    let store = KvStore::new(creds, Duration::from_secs(config.sync.timeout_secs))?;
    sync_tree(Arc::new(store), output, &SyncOptions::from_config(&config.sync)).await
}
