mod store;

use anyhow::Result;
use clap::Parser;
use std::{
    collections::HashSet,
    fs,
    path::PathBuf,
    str::FromStr,
    sync::Arc,
};
use store::SecureBlockStore;
use tokio::sync::oneshot;
use tracing::info;

#[derive(Parser, Debug, Clone)]
#[command(name = "neuro-node", version, about = "NeuroStore storage node")]
struct Args {
    #[arg(long, default_value = "./node-data")]
    storage_path: String,

    #[arg(long, default_value_t = 50)]
    max_gb: u64,

    #[arg(long, default_value = "/ip4/0.0.0.0/tcp/9000")]
    listen: String,

    #[arg(long, num_args = 0..)]
    bootstrap: Vec<String>,

    #[arg(long, num_args = 0..)]
    allow_peer: Vec<String>,

    #[arg(long, default_value_t = false, hide = true)]
    run_as_service: bool,

    #[arg(long, default_value = "NeurostoreNode")]
    service_name: String,

    #[arg(long, default_value_t = false)]
    print_peer_id: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .with_target(true)
        .init();

    let args = Args::parse();

    #[cfg(windows)]
    if args.run_as_service {
        return windows_service_host::run(args);
    }
    #[cfg(not(windows))]
    if args.run_as_service {
        anyhow::bail!("--run-as-service is only supported on Windows");
    }

    run_foreground(args).await
}

async fn run_foreground(args: Args) -> Result<()> {
    fs::create_dir_all(&args.storage_path)?;
    if args.print_peer_id {
        let keypair = load_or_create_identity(&args.storage_path)?;
        println!("{}", keypair.public().to_peer_id());
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(());
    });
    run_node_with_shutdown(&args, shutdown_rx).await
}

async fn run_node_with_shutdown(args: &Args, shutdown_rx: oneshot::Receiver<()>) -> Result<()> {
    fs::create_dir_all(&args.storage_path)?;

    let store: Arc<dyn neuro_transport::LocalShardStore> = Arc::new(SecureBlockStore::new(&args.storage_path, args.max_gb));
    let keypair = load_or_create_identity(&args.storage_path)?;
    let peer_store = Arc::new(neuro_peerstore::PeerStore::new(neuro_peerstore::HealthWeights::default()));

    let listen_addr: libp2p::Multiaddr = args.listen.parse()?;
    let bootstrap_addrs = args.bootstrap.iter().map(|s| s.parse()).collect::<Result<Vec<_>, _>>()?;
    let allowlist = args.allow_peer.iter().map(|s| libp2p::PeerId::from_str(s)).collect::<Result<HashSet<_>, _>>()?;

    let (transport, swarm_task) = neuro_transport::spawn(keypair, listen_addr, bootstrap_addrs, allowlist, peer_store, store).await?;

    info!(peer_id = %transport.local_peer_id, "storage node identity loaded");
    info!(max_gb = args.max_gb, path = %args.storage_path, "storage allocation configured");

    tokio::select! {
        _ = shutdown_rx => {
            info!("shutdown signal received, stopping node");
        }
        _ = swarm_task => {
            info!("transport task exited");
        }
    }
    Ok(())
}

fn load_or_create_identity(storage_path: &str) -> Result<libp2p_identity::Keypair> {
    let key_path = PathBuf::from(storage_path).join("node_identity.key");
    if key_path.exists() {
        let bytes = fs::read(&key_path)?;
        return Ok(libp2p_identity::Keypair::from_protobuf_encoding(&bytes)?);
    }
    let keypair = libp2p_identity::Keypair::generate_ed25519();
    fs::write(&key_path, keypair.to_protobuf_encoding()?)?;
    Ok(keypair)
}

#[cfg(windows)]
mod windows_service_host {
    use super::{run_node_with_shutdown, Args};
    use anyhow::Context;
    use std::{
        ffi::OsString,
        sync::{Mutex, OnceLock},
        time::Duration,
    };
    use tokio::sync::oneshot;
    use windows_service::{
        define_windows_service,
        service::{ServiceControl, ServiceControlAccept, ServiceExitCode, ServiceState, ServiceStatus, ServiceType},
        service_control_handler::{self, ServiceControlHandlerResult, ServiceStatusHandle},
        service_dispatcher,
    };

    static SERVICE_ARGS: OnceLock<Args> = OnceLock::new();

    pub fn run(args: Args) -> anyhow::Result<()> {
        let service_name = args.service_name.clone();
        SERVICE_ARGS.set(args).map_err(|_| anyhow::anyhow!("windows service runtime already initialized"))?;
        service_dispatcher::start(service_name.as_str(), ffi_service_main)
            .with_context(|| format!("failed to start windows service dispatcher for {service_name}"))?;
        Ok(())
    }

    define_windows_service!(ffi_service_main, service_main);

    fn service_main(_arguments: Vec<OsString>) {
        if let Err(err) = run_service() {
            eprintln!("windows service error: {err:#}");
        }
    }

    fn run_service() -> anyhow::Result<()> {
        let args = SERVICE_ARGS.get().context("missing service args")?.clone();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let shutdown_tx = Mutex::new(Some(shutdown_tx));
        let status_handle = service_control_handler::register(
            args.service_name.as_str(),
            move |control_event| match control_event {
                ServiceControl::Stop | ServiceControl::Shutdown => {
                    if let Some(tx) = shutdown_tx.lock().ok().and_then(|mut guard| guard.take()) {
                        let _ = tx.send(());
                    }
                    ServiceControlHandlerResult::NoError
                }
                ServiceControl::Interrogate => ServiceControlHandlerResult::NoError,
                _ => ServiceControlHandlerResult::NotImplemented,
            },
        )?;

        set_service_status(&status_handle, ServiceState::StartPending)?;
        set_service_status(&status_handle, ServiceState::Running)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to create tokio runtime for windows service")?;
        let run_result = runtime.block_on(run_node_with_shutdown(&args, shutdown_rx));

        set_service_status(&status_handle, ServiceState::Stopped)?;
        run_result
    }

    fn set_service_status(status_handle: &ServiceStatusHandle, state: ServiceState) -> anyhow::Result<()> {
        let controls_accepted = if state == ServiceState::Running {
            ServiceControlAccept::STOP | ServiceControlAccept::SHUTDOWN
        } else {
            ServiceControlAccept::empty()
        };
        let wait_hint = if state == ServiceState::StartPending { Duration::from_secs(10) } else { Duration::default() };

        status_handle.set_service_status(ServiceStatus {
            service_type: ServiceType::OWN_PROCESS,
            current_state: state,
            controls_accepted,
            exit_code: ServiceExitCode::Win32(0),
            checkpoint: 0,
            wait_hint,
            process_id: None,
        })?;
        Ok(())
    }
}
