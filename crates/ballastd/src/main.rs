//! ballastd — the Ballast daemon.
//!
//! Runs the node annotation controller: a leader-elected loop that
//! stamps Prometheus load metrics and hot values onto nodes for the
//! scheduler plugins to consume.
//!
//! ```text
//! ballastd controller \
//!     --policy-config-path /etc/kubernetes/policy.yaml \
//!     --prometheus-address http://prometheus.monitoring:9090
//! ```

mod health;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use kube::Client;
use tokio::sync::watch;
use tracing::{error, info};

use ballast_annotator::Controller;
use ballast_core::pod::system_namespace;
use ballast_core::policy::DynamicSchedulerPolicy;
use ballast_kube::{spawn_event_feed, KubeNodeStore, LeaderElection, LeaseConfig};
use ballast_metrics::{Auth, MetricsClient, PromClient};

#[derive(Parser)]
#[command(name = "ballastd", about = "Ballast load-aware scheduling daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the node annotation controller.
    Controller(ControllerArgs),
}

#[derive(Args)]
struct ControllerArgs {
    /// Path to the scheduler policy file.
    #[arg(long, default_value = "/etc/kubernetes/policy.yaml")]
    policy_config_path: PathBuf,

    /// Address of the Prometheus endpoint metrics are pulled from.
    #[arg(long)]
    prometheus_address: String,

    /// Basic-auth username for Prometheus.
    #[arg(long)]
    prometheus_username: Option<String>,

    /// Basic-auth password for Prometheus.
    #[arg(long)]
    prometheus_password: Option<String>,

    /// Bearer token for Prometheus.
    #[arg(long)]
    prometheus_bearer_token: Option<String>,

    /// Max size of the binding heap backing hot-value counts.
    #[arg(long, default_value_t = 1024)]
    binding_heap_size: usize,

    /// Number of node sync workers running concurrently.
    #[arg(long, default_value_t = 1)]
    concurrent_syncs: usize,

    /// Path to a kubeconfig file (in-cluster config when omitted).
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Kubernetes API server address, overriding the kubeconfig.
    #[arg(long)]
    master: Option<String>,

    /// Port of the health endpoint.
    #[arg(long, default_value_t = 8090)]
    health_port: u16,

    /// Whether to run leader election before starting the loops.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    leader_elect: bool,

    /// Name of the leader-election lease.
    #[arg(long, default_value = "ballast-controller")]
    leader_elect_resource_name: String,

    /// How long a lease is valid before it can be taken over.
    #[arg(long, default_value = "15s")]
    leader_elect_lease_duration: humantime::Duration,

    /// How often the holder renews and challengers retry.
    #[arg(long, default_value = "2s")]
    leader_elect_retry_period: humantime::Duration,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ballastd=debug,ballast=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Controller(args) => run_controller(args).await,
    }
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    let policy = DynamicSchedulerPolicy::from_file(&args.policy_config_path)
        .context("failed to load scheduler policy")?;

    let mut prom = PromClient::new(&args.prometheus_address)?;
    if let (Some(username), Some(password)) =
        (&args.prometheus_username, &args.prometheus_password)
    {
        prom = prom.with_auth(Auth::Basic {
            username: username.clone(),
            password: password.clone(),
        });
    } else if let Some(token) = &args.prometheus_bearer_token {
        prom = prom.with_auth(Auth::Bearer(token.clone()));
    }
    let metrics: Arc<dyn MetricsClient> = Arc::new(prom);

    let client = build_client(args.kubeconfig.as_deref(), args.master.as_deref()).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("received interrupt, shutting down");
            let _ = shutdown_tx.send(true);
        });
    }

    tokio::spawn(health::serve(args.health_port, shutdown_rx.clone()));

    if args.leader_elect {
        let (leader_tx, mut leader_rx) = watch::channel(false);
        let election = LeaderElection::new(
            client.clone(),
            LeaseConfig {
                namespace: system_namespace(),
                name: args.leader_elect_resource_name.clone(),
                identity: format!("{}_{}", hostname(), std::process::id()),
                lease_duration: args.leader_elect_lease_duration.into(),
                retry_period: args.leader_elect_retry_period.into(),
            },
        );
        tokio::spawn(async move {
            if let Err(err) = election.run(leader_tx).await {
                error!(error = %err, "leader election ended");
            }
        });

        info!("waiting for leadership");
        while !*leader_rx.borrow_and_update() {
            leader_rx
                .changed()
                .await
                .context("leader election task stopped before acquiring leadership")?;
        }

        // Losing the lease is fatal; a fresh election proceeds elsewhere.
        let mut leader_rx = leader_rx.clone();
        tokio::spawn(async move {
            loop {
                if leader_rx.changed().await.is_err() {
                    break;
                }
                if !*leader_rx.borrow() {
                    error!("leadership lost, exiting");
                    std::process::exit(1);
                }
            }
        });
    }

    let nodes = Arc::new(KubeNodeStore::new(client.clone()).await?);
    let (events, _event_feed) = spawn_event_feed(client.clone(), 256, shutdown_rx.clone());

    let controller = Arc::new(Controller::new(
        policy,
        nodes,
        metrics,
        args.binding_heap_size,
    ));
    controller
        .run(args.concurrent_syncs, events, shutdown_rx)
        .await;

    Ok(())
}

async fn build_client(kubeconfig: Option<&Path>, master: Option<&str>) -> anyhow::Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = kube::config::Kubeconfig::read_from(path)
                .context("failed to read kubeconfig")?;
            kube::Config::from_custom_kubeconfig(
                kubeconfig,
                &kube::config::KubeConfigOptions::default(),
            )
            .await?
        }
        None => kube::Config::infer().await?,
    };
    if let Some(master) = master {
        config.cluster_url = master.parse().context("invalid --master address")?;
    }
    Ok(Client::try_from(config)?)
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "ballastd".to_string())
}
