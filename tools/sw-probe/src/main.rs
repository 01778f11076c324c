//! Probe for the Solar System offline cache gatekeeper.
//!
//! Runs the worker's event handlers in-process against a live origin, with an
//! in-memory cache, and prints what each handler did.
//!
//! ## Usage
//!
//! ```bash
//! # Precache the manifest and activate
//! sw-probe --config sw.json install
//!
//! # Install, then route requests through the worker
//! sw-probe fetch http://localhost:8080/ http://localhost:8080/planets.json --twice
//!
//! # Sweep stale generations
//! sw-probe activate --stale solar-system-v0 --stale scratch
//!
//! # Post a page message
//! sw-probe message '{"type":"SKIP_WAITING"}'
//! ```

use clap::{Parser, Subcommand};
use serde_json::Value;
use solar_common::{init_logging, LogConfig, LogFormat, ResultExt};
use solar_net::{LoaderConfig, Request, ResourceLoader};
use solar_sw::{
    run_lifecycle, CacheStore, FetchOutcome, Gatekeeper, GatekeeperConfig, InstallReport,
    MemoryCacheStorage, ServiceWorkerContainer,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use url::Url;

#[derive(Parser)]
#[command(name = "sw-probe")]
#[command(about = "Drive the Solar System offline cache gatekeeper")]
struct Cli {
    /// Gatekeeper configuration (JSON); defaults are used when absent
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log format: pretty, compact or json
    #[arg(long, default_value = "pretty", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Precache the manifest and activate the worker
    Install {
        /// Script URL the worker is registered with
        #[arg(long, default_value = "/sw.js")]
        script: String,
    },

    /// Install, then route requests through the fetch handler
    Fetch {
        /// URLs to request
        #[arg(required = true)]
        urls: Vec<String>,
        /// Send the requests as top-level navigations
        #[arg(long)]
        navigate: bool,
        /// Request every URL a second time after background writes settle
        #[arg(long)]
        twice: bool,
        /// Skip the install step
        #[arg(long)]
        cold: bool,
    },

    /// Create stale generations, then run the activate sweep
    Activate {
        /// Generation names to create before activating
        #[arg(long)]
        stale: Vec<String>,
    },

    /// Post a JSON message to the worker
    Message {
        /// Message payload, e.g. '{"type":"SKIP_WAITING"}'
        json: String,
    },

    /// Deliver a push event, then click the notification
    Push {
        /// Push payload text
        payload: Option<String>,
        /// Notification action to click (explore, close)
        #[arg(long)]
        action: Option<String>,
    },

    /// Print the effective configuration
    Config,
}

struct Probe {
    gatekeeper: Gatekeeper,
    container: Arc<ServiceWorkerContainer>,
    store: Arc<MemoryCacheStorage>,
}

impl Probe {
    fn new(config: GatekeeperConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let loader = ResourceLoader::new(LoaderConfig::for_origin(config.origin.clone()))?;
        let (container, mut events) = ServiceWorkerContainer::new(config.origin.clone());
        let container = Arc::new(container);
        let store = Arc::new(MemoryCacheStorage::new());

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                debug!(?event, "Container event");
            }
        });

        let gatekeeper = Gatekeeper::new(
            config,
            store.clone(),
            Arc::new(loader),
            container.clone(),
        )?;

        Ok(Self {
            gatekeeper,
            container,
            store,
        })
    }

    async fn install(&self, script: &str) -> Result<InstallReport, Box<dyn std::error::Error>> {
        let script_url = self.gatekeeper.config().resolve(script)?;
        let report = run_lifecycle(&self.gatekeeper, &self.container, script_url).await?;

        println!("Install:");
        println!("  Cache:   {}", self.gatekeeper.cache_name());
        println!("  Cached:  {}", report.cached.len());
        for url in &report.cached {
            println!("    + {url}");
        }
        println!("  Failed:  {}", report.failed.len());
        for (url, reason) in &report.failed {
            println!("    - {url}: {reason}");
        }
        Ok(report)
    }

    async fn fetch(&self, url: &Url, navigate: bool) {
        let request = if navigate {
            Request::navigate(url.clone())
        } else {
            Request::get(url.clone())
        };

        match self.gatekeeper.handle(request).await {
            FetchOutcome::PassThrough => println!("  {url} -> pass-through"),
            FetchOutcome::Respond(response) => println!(
                "  {url} -> {} {:?} {} ({} bytes)",
                response.status.as_u16(),
                response.response_type,
                response.content_type().unwrap_or("-"),
                response.body().len()
            ),
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<GatekeeperConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => GatekeeperConfig::from_path(path)?,
        None => GatekeeperConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(LogConfig::from_verbosity(cli.verbose).with_format(cli.log_format))?;

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Config => println!("{}", serde_json::to_string_pretty(&config)?),
        command => run(Probe::new(config)?, command).await?,
    }

    Ok(())
}

async fn run(probe: Probe, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Install { script } => {
            let report = probe.install(&script).await?;
            if report.cached.is_empty() {
                std::process::exit(1);
            }
        }

        Commands::Fetch {
            urls,
            navigate,
            twice,
            cold,
        } => {
            if !cold {
                probe.install("/sw.js").await?;
            }

            let urls = urls
                .iter()
                .map(|u| probe.gatekeeper.config().resolve(u))
                .collect::<Result<Vec<_>, _>>()?;

            println!("Fetch:");
            for url in &urls {
                probe.fetch(url, navigate).await;
            }
            probe.gatekeeper.settle().await;

            if twice {
                println!("Fetch (again):");
                for url in &urls {
                    probe.fetch(url, navigate).await;
                }
            }

            let cached = probe.store.keys(probe.gatekeeper.cache_name()).await?;
            println!("Cached entries: {}", cached.len());
        }

        Commands::Activate { stale } => {
            for name in &stale {
                probe.store.open(name).await?;
            }
            let mut deleted = probe.gatekeeper.activate().await?;
            deleted.sort();

            println!("Activate:");
            println!("  Kept:    {}", probe.store.generations().await?.join(", "));
            println!("  Deleted: {}", deleted.join(", "));
        }

        Commands::Message { json } => {
            let data: Value = serde_json::from_str(&json).context("message is not JSON")?;
            let handled = probe.gatekeeper.message(&data).await;
            println!("Message handled: {handled}");
        }

        Commands::Push { payload, action } => {
            probe.gatekeeper.push(payload.as_deref()).await;
            for notification in probe.container.notifications().await {
                println!("{}", serde_json::to_string_pretty(&notification)?);
            }

            let opened = probe.gatekeeper.notification_click(action.as_deref()).await?;
            match opened {
                Some(url) => println!("Opened: {url}"),
                None => println!("Dismissed"),
            }
        }

        Commands::Config => {}
    }

    Ok(())
}
