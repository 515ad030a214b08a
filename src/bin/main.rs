use std::{path::Path, process::ExitCode, time::Instant};

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cyfire::{
    cache::CompanionCache,
    cli::{Cli, Commands, ExecutorArgs, parse_args},
    config::{Workspace, load_options, load_workspace},
    endpoint::{PortProbe, Probe, ServiceEndpoint},
    error::HarnessError,
    executors::{
        Collaborators, ExecutorContext, RawPolicyOptions,
        deploy::{self, RawDeployOptions},
        e2e::{self, E2eMode, RawE2eOptions},
        emulators::{self, RawEmulatorsOptions},
        serve::{self, RawServeOptions},
    },
    process::ProcessSupervisor,
    readiness::ReadinessWaiter,
    reclaim::{PortReclaimer, Protocol, Reclaim},
    registry::LifecycleRegistry,
};

fn main() -> ExitCode {
    let args = parse_args();
    init_logging(&args);

    let registry = LifecycleRegistry::new();
    if let Err(err) = registry.install_signal_handler() {
        warn!("{err}");
    }

    match dispatch(args, &registry) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn dispatch(args: Cli, registry: &LifecycleRegistry) -> Result<bool, HarnessError> {
    let workspace = args.workspace.as_deref();

    match args.command {
        Commands::Run(executor) => run_e2e(E2eMode::Run, workspace, &executor, registry),
        Commands::E2eCi(executor) => run_e2e(E2eMode::E2eCi, workspace, &executor, registry),
        Commands::Open(executor) => run_e2e(E2eMode::Open, workspace, &executor, registry),
        Commands::Serve(executor) => {
            let raw: RawServeOptions = read_options(&executor)?;
            let options = raw.normalize()?;
            with_context(workspace, &executor, registry, |ctx| {
                let collaborators = Collaborators::system(ctx.host.workspace_root())?;
                serve::execute(&options, ctx, collaborators).map(|result| result.success)
            })
        }
        Commands::Emulators(executor) => {
            let raw: RawEmulatorsOptions = read_options(&executor)?;
            let options = raw.normalize()?;
            with_context(workspace, &executor, registry, |ctx| {
                let collaborators = Collaborators::system(ctx.host.workspace_root())?;
                emulators::execute(&options, ctx, collaborators).map(|result| result.success)
            })
        }
        Commands::Deploy(executor) => {
            let raw: RawDeployOptions = read_options(&executor)?;
            let options = raw.normalize();
            with_context(workspace, &executor, registry, |ctx| {
                deploy::execute(&options, ctx, &ProcessSupervisor::new())
            })
        }
        Commands::Reclaim { port, udp } => {
            let protocol = if udp { Protocol::Udp } else { Protocol::Tcp };
            PortReclaimer::new().force_free_port(port, protocol)?;
            info!("Port {port}/{protocol} is free");
            Ok(true)
        }
        Commands::Probe {
            endpoint,
            timeout_ms,
            poll_interval_ms,
        } => probe(&endpoint, timeout_ms, poll_interval_ms),
    }
}

fn run_e2e(
    mode: E2eMode,
    workspace: Option<&Path>,
    executor: &ExecutorArgs,
    registry: &LifecycleRegistry,
) -> Result<bool, HarnessError> {
    let raw: RawE2eOptions = read_options(executor)?;
    let options = raw.normalize(mode)?;
    with_context(workspace, executor, registry, |ctx| {
        let collaborators = Collaborators::system(ctx.host.workspace_root())?;
        e2e::execute(&options, ctx, collaborators).map(|result| result.success)
    })
}

fn read_options<T>(executor: &ExecutorArgs) -> Result<T, HarnessError>
where
    T: serde::de::DeserializeOwned + Default,
{
    match &executor.options {
        Some(path) => load_options(path),
        None => Ok(T::default()),
    }
}

fn with_context<F>(
    workspace: Option<&Path>,
    executor: &ExecutorArgs,
    registry: &LifecycleRegistry,
    run: F,
) -> Result<bool, HarnessError>
where
    F: FnOnce(&ExecutorContext<'_>) -> Result<bool, HarnessError>,
{
    let workspace: Workspace = load_workspace(workspace)?;
    let cache = CompanionCache::in_scratch_dir();
    let mut ctx = ExecutorContext::new(&workspace, executor.project.clone(), registry)
        .with_configuration(executor.configuration.clone());
    if !executor.no_cache {
        ctx = ctx.with_cache(&cache);
    }
    run(&ctx)
}

fn probe(
    raw: &str,
    timeout_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
) -> Result<bool, HarnessError> {
    let endpoint = ServiceEndpoint::parse(raw)?;
    let probe = PortProbe::new()?;

    let Some(timeout_ms) = timeout_ms else {
        let up = probe.probe(&endpoint);
        println!("{endpoint} {}", if up { "is up" } else { "is down" });
        return Ok(up);
    };

    let policy = RawPolicyOptions {
        timeout_ms: Some(timeout_ms),
        poll_interval_ms,
        reuse_existing_server: None,
    }
    .normalize()?;
    let started = Instant::now();
    ReadinessWaiter::new(probe).wait_until_ready(&endpoint, &policy)?;
    println!("{endpoint} is up after {}ms", started.elapsed().as_millis());
    Ok(true)
}
