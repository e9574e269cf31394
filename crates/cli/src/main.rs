use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use tether_core::prelude::*;
use tether_kubehub::{deadline_from_env, get_kube_client, KubeStore};
use tether_lifecycle::{CompanionPhase, ManifestLifecycle};

#[derive(Parser, Debug)]
#[command(name = "tetherctl", version, about = "Tether companion lifecycle CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Manifest name
    #[arg(long = "manifest", global = true, env = "TETHER_MANIFEST")]
    manifest: Option<String>,

    /// Manifest namespace in the control plane
    #[arg(long = "ns", global = true, env = "TETHER_MANIFEST_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Kubeconfig context holding manifests (default: current context)
    #[arg(long = "control-context", global = true, env = "TETHER_CONTROL_CONTEXT")]
    control_context: Option<String>,

    /// Kubeconfig context receiving companions (default: current context)
    #[arg(long = "target-context", global = true, env = "TETHER_TARGET_CONTEXT")]
    target_context: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify the manifest's companion lifecycle without writing
    Observe,
    /// Attach the lifecycle and label-removal finalizers
    EnsureFinalizers,
    /// Create the companion instance and protect it with its finalizer
    CreateCompanion,
    /// Delete the companion instance and release its finalizer
    DeleteCompanion,
    /// Strip the ownership label from synced resources and the companion
    StripLabels,
    /// Run full reconcile passes until the manifest settles
    Reconcile {
        /// Maximum number of passes
        #[arg(long = "passes", default_value_t = 1)]
        passes: u32,
        /// Pause between passes
        #[arg(long = "interval-ms", default_value_t = 2000)]
        interval_ms: u64,
    },
}

/// Where a reconcile pass left the manifest.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Step {
    Pending,
    Ready,
    Gone,
}

fn init_tracing() {
    let env = std::env::var("TETHER_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("TETHER_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid TETHER_METRICS_ADDR; expected host:port");
        }
    }
}

async fn build_lifecycle(cli: &Cli) -> Result<ManifestLifecycle> {
    let deadline = deadline_from_env();
    let control = get_kube_client(cli.control_context.as_deref()).await.context("control-plane client")?;
    let target = get_kube_client(cli.target_context.as_deref()).await.context("target client")?;
    Ok(ManifestLifecycle::new(
        Arc::new(KubeStore::new(control, "control-plane", deadline)),
        Arc::new(KubeStore::new(target, "target", deadline)),
        LifecycleConfig::from_env(),
    ))
}

async fn load(lifecycle: &ManifestLifecycle, key: &ObjectKey) -> Result<Manifest> {
    lifecycle
        .manifests()
        .get(key)
        .await
        .with_context(|| format!("fetching manifest {}", key))?
        .with_context(|| format!("manifest {} not found", key))
}

/// One pass of the deletion or creation flow, with the status patched
/// against what the pass started from.
async fn reconcile_once(lifecycle: &ManifestLifecycle, key: &ObjectKey) -> Result<Step> {
    let Some(mut manifest) = lifecycle.manifests().get(key).await? else {
        return Ok(Step::Gone);
    };
    let previous = manifest.status.clone();
    let outcome = if manifest.is_deletion_requested() {
        delete_flow(lifecycle, &mut manifest).await
    } else {
        create_flow(lifecycle, &mut manifest).await
    };
    lifecycle.update_status(&mut manifest, &previous).await?;
    Ok(outcome?)
}

async fn delete_flow(lifecycle: &ManifestLifecycle, manifest: &mut Manifest) -> tether_lifecycle::LifecycleResult<Step> {
    if manifest.status.state != State::Error {
        let status = manifest.status.clone().with_state(State::Deleting).with_operation("deletion in progress");
        manifest.set_status(status);
    }
    if lifecycle.delete_companion(manifest).await? == Completion::Pending {
        return Ok(Step::Pending);
    }
    lifecycle.remove_managed_label(manifest).await?;
    lifecycle.manifests().remove_mandatory_finalizers(manifest).await?;
    Ok(Step::Pending)
}

async fn create_flow(lifecycle: &ManifestLifecycle, manifest: &mut Manifest) -> tether_lifecycle::LifecycleResult<Step> {
    lifecycle.manifests().add_mandatory_finalizers(manifest).await?;
    lifecycle.create_companion(manifest).await?;
    let status = manifest.status.clone().with_state(State::Ready).with_operation("companion instance ready");
    manifest.set_status(status);
    Ok(Step::Ready)
}

fn emit(output: Output, key: &ObjectKey, field: &str, value: serde_json::Value) -> Result<()> {
    match output {
        Output::Human => {
            let shown = match &value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            println!("{} • {} • {}", key, field, shown);
        }
        Output::Json => {
            let mut doc = serde_json::Map::new();
            doc.insert("manifest".to_string(), key.to_string().into());
            doc.insert(field.to_string(), value);
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let name = cli.manifest.clone().context("--manifest is required")?;
    let key = ObjectKey::new(Some(cli.namespace.as_str()), &name);
    let lifecycle = build_lifecycle(&cli).await?;

    match cli.command {
        Commands::Observe => {
            let manifest = load(&lifecycle, &key).await?;
            let phase: CompanionPhase = lifecycle.observe(&manifest).await?;
            emit(cli.output, &key, "phase", serde_json::to_value(phase)?)?;
        }
        Commands::EnsureFinalizers => {
            let mut manifest = load(&lifecycle, &key).await?;
            let changed = lifecycle.manifests().add_mandatory_finalizers(&mut manifest).await?;
            emit(cli.output, &key, "changed", changed.into())?;
        }
        Commands::CreateCompanion => {
            let mut manifest = load(&lifecycle, &key).await?;
            let previous = manifest.status.clone();
            let created = lifecycle.create_companion(&mut manifest).await;
            lifecycle.update_status(&mut manifest, &previous).await?;
            created?;
            emit(cli.output, &key, "finalizers", serde_json::to_value(manifest.finalizers())?)?;
        }
        Commands::DeleteCompanion => {
            let mut manifest = load(&lifecycle, &key).await?;
            let previous = manifest.status.clone();
            let done = lifecycle.delete_companion(&mut manifest).await;
            lifecycle.update_status(&mut manifest, &previous).await?;
            emit(cli.output, &key, "done", done?.is_done().into())?;
        }
        Commands::StripLabels => {
            let mut manifest = load(&lifecycle, &key).await?;
            let previous = manifest.status.clone();
            let swept = lifecycle.remove_managed_label(&mut manifest).await;
            lifecycle.update_status(&mut manifest, &previous).await?;
            let report = swept?;
            let value = serde_json::json!({
                "updated": report.updated,
                "untouched": report.untouched,
                "missing": report.missing,
            });
            emit(cli.output, &key, "labels", value)?;
        }
        Commands::Reconcile { passes, interval_ms } => {
            let mut last = Step::Pending;
            for pass in 1..=passes.max(1) {
                match reconcile_once(&lifecycle, &key).await {
                    Ok(step) => {
                        info!(manifest = %key, pass, step = ?step, "reconcile pass finished");
                        last = step;
                        if step != Step::Pending {
                            break;
                        }
                    }
                    Err(e) => warn!(manifest = %key, pass, error = %e, "reconcile pass failed"),
                }
                if pass < passes {
                    tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                }
            }
            let shown = match last {
                Step::Pending => "pending",
                Step::Ready => "ready",
                Step::Gone => "gone",
            };
            emit(cli.output, &key, "result", shown.into())?;
        }
    }
    Ok(())
}
