use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use registry_operator::health::{HEALTH_ADDR, HealthState, run_health_server};
use registry_operator::{LogFormat, OperatorConfig, run_controller};

const LEASE_NAME: &str = "dockerregistry-operator-lock";
const LEASE_TTL: Duration = Duration::from_secs(15);
const LEASE_RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Time in-flight passes get to finish after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn init_tracing(format: &LogFormat) -> Result<(), BoxError> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new("registry_operator=info,kube=info,kube_leader_election=warn")
    })?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
    Ok(())
}

/// Holder identity and lease namespace of this replica
fn lease_identity() -> (String, String) {
    let holder = std::env::var("POD_NAME").unwrap_or_else(|_| {
        hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "registry-operator".to_string())
    });
    let namespace = std::env::var("POD_NAMESPACE").unwrap_or_else(|_| {
        warn!("POD_NAMESPACE not set, using 'kyma-system' for the lease");
        "kyma-system".to_string()
    });
    (holder, namespace)
}

/// Block until this replica holds the lease. Returns false on shutdown.
async fn acquire_leadership(lock: &LeaseLock, shutdown: &CancellationToken) -> bool {
    loop {
        match lock.try_acquire_or_renew().await {
            Ok(lease) if lease.acquired_lease => return true,
            Ok(_) => info!("another replica holds the lease"),
            Err(e) => warn!(error = %e, "lease acquisition failed"),
        }
        tokio::select! {
            () = tokio::time::sleep(LEASE_RENEW_INTERVAL) => {}
            () = shutdown.cancelled() => return false,
        }
    }
}

/// Renew the lease until it is lost or `shutdown` fires
async fn hold_leadership(lock: LeaseLock, shutdown: CancellationToken) -> Result<(), BoxError> {
    loop {
        tokio::select! {
            () = tokio::time::sleep(LEASE_RENEW_INTERVAL) => {}
            () = shutdown.cancelled() => return Ok(()),
        }
        let lease = lock.try_acquire_or_renew().await?;
        if !lease.acquired_lease {
            return Err("lease taken over by another replica".into());
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "operator failed");
            eprintln!("registry-operator: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), BoxError> {
    let config = OperatorConfig::from_env()?;
    init_tracing(&config.log_format)?;
    info!(
        chart = %config.chart_path.display(),
        default_gateway = %config.default_gateway,
        namespace = config.watch_namespace.as_deref().unwrap_or("*"),
        "starting registry-operator"
    );

    let client = Client::try_default().await?;
    let health_state = Arc::new(HealthState::new());
    let shutdown = CancellationToken::new();

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    // probes answer while waiting for the lease
    let probes = tokio::spawn({
        let state = health_state.clone();
        let shutdown = shutdown.clone();
        async move { run_health_server(state, HEALTH_ADDR, shutdown).await }
    });

    let (holder, lease_namespace) = lease_identity();
    let lease = |holder: &str| {
        LeaseLock::new(
            client.clone(),
            &lease_namespace,
            LeaseLockParams {
                holder_id: holder.to_string(),
                lease_name: LEASE_NAME.to_string(),
                lease_ttl: LEASE_TTL,
            },
        )
    };

    info!(%holder, namespace = %lease_namespace, lease = LEASE_NAME, "waiting for leadership");
    if !acquire_leadership(&lease(&holder), &shutdown).await {
        return Ok(());
    }
    info!("leadership acquired");

    let mut renewal = tokio::spawn(hold_leadership(lease(&holder), shutdown.clone()));
    let mut controller = tokio::spawn(run_controller(
        client.clone(),
        config,
        Some(health_state.clone()),
        shutdown.clone(),
    ));

    let outcome = tokio::select! {
        joined = &mut renewal => match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(e.into()),
        },
        joined = &mut controller => joined.map_err(BoxError::from),
        joined = probes => match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(e.into()),
        },
    };

    health_state.set_ready(false);
    shutdown.cancel();
    if !controller.is_finished()
        && tokio::time::timeout(SHUTDOWN_GRACE, controller).await.is_err()
    {
        warn!(grace = ?SHUTDOWN_GRACE, "controller did not stop within the grace period");
    }

    info!("operator stopped");
    outcome
}

/// Resolves on SIGTERM or SIGINT
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => {}
        () = terminate => {}
    }
}
