use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use alloy::{primitives::Address, signers::local::PrivateKeySigner};
use clap::{Args as ClapArgs, Parser, Subcommand};
use eyre::{bail, OptionExt, WrapErr};
use tokio::sync::RwLock;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use url::Url;

use xbridge::{
    annotate::{Annotator, GeminiAnnotator},
    asset::{builtin_assets, AssetCatalog},
    config::BridgeConfig,
    discovery::{
        Announcer, InjectedFlags, InjectedSigner, ProviderDiscovery, ProviderHandle, ProviderInfo,
        StaticAnnouncer,
    },
    monitor::{Health, Monitor},
    network::{Network, NetworkId, NetworkKind, ProtocolContracts, RoutingIds},
    orchestrator::{Components, Orchestrator, TransferRequest},
    proof::{
        IrisAttestationSource, ProofSource, ProofSources, RelayScanSource, SimulatedProofSource,
    },
    registry::{HubSpec, JsonFileStore, NetworkRegistry},
    rpc::{FallbackClient, SimulatedTransport},
    signer::{LocalSigner, Session, SimulatedSigner},
    stage::Stage,
    strategy::ProtocolKind,
};

#[derive(Parser)]
#[command(name = "xbridge", version, about = "Move assets between EVM networks")]
struct Args {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(long, env = "XBRIDGE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List registered networks with their current health.
    Networks,
    /// Show an account's balances on one network.
    Balances {
        #[arg(long)]
        address: Address,
        #[arg(long)]
        network: NetworkId,
    },
    /// List the wallets that answer discovery.
    Discover {
        #[command(flatten)]
        wallet: WalletArgs,
    },
    /// Register a custom test hub.
    DeployHub {
        #[arg(long)]
        chain_id: u64,
        /// Comma separated RPC endpoints, in fallback order.
        #[arg(long)]
        rpc: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        explorer: Option<Url>,
        /// Network the hub forks; its contracts and asset addresses fill the gaps.
        #[arg(long, default_value = "mainnet")]
        fork_of: NetworkId,
        #[arg(long)]
        token_messenger: Option<Address>,
        #[arg(long)]
        message_transmitter: Option<Address>,
        #[arg(long)]
        relay_endpoint: Option<Address>,
        #[arg(long)]
        cctp_domain: Option<u32>,
        #[arg(long)]
        relay_eid: Option<u32>,
    },
    /// Run one transfer to completion.
    Bridge {
        #[arg(long)]
        from: NetworkId,
        #[arg(long)]
        to: NetworkId,
        #[arg(long)]
        asset: String,
        #[arg(long, required_unless_present = "token_id", conflicts_with = "token_id")]
        amount: Option<String>,
        #[arg(long)]
        token_id: Option<String>,
        /// `cctp` or `layerzero`; only honored where the asset allows a choice.
        #[arg(long)]
        protocol: Option<ProtocolKind>,
        #[command(flatten)]
        wallet: WalletArgs,
    },
}

#[derive(ClapArgs)]
struct WalletArgs {
    #[arg(long, env = "BRIDGE_PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,
    /// Use a simulated wallet, RPC and proof service instead of real ones.
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = BridgeConfig::load_or_default(args.config.as_deref())
        .wrap_err("loading configuration")?;
    let registry = NetworkRegistry::open(Box::new(JsonFileStore::new(
        &config.storage.custom_networks,
    )))?;

    match args.command {
        Command::Networks => {
            let networks = registry.list();
            let monitor = Monitor::new(FallbackClient::http(config.rpc.timeout()));
            let health = monitor.check_all(&networks).await;
            for network in &networks {
                let state = health.get(&network.id).copied().unwrap_or(Health::Unknown);
                println!(
                    "{:<28} {:>10}  {:<12} {:?}",
                    network.id.as_str(),
                    network.chain_id(),
                    format!("{:?}", network.kind),
                    state
                );
            }
        }
        Command::Balances { address, network } => {
            let network = registry.get(&network)?;
            let catalog = AssetCatalog::load(builtin_assets(), &registry.ids())?;
            let monitor = Monitor::new(FallbackClient::http(config.rpc.timeout()));
            let balances = monitor.fetch_balances(address, catalog.iter(), &network).await;
            for asset in catalog.iter() {
                if let Some(balance) = balances.get(&asset.symbol) {
                    let note = if balance.degraded { " (unavailable)" } else { "" };
                    println!("{:<6} {}{note}", asset.symbol, balance.formatted);
                }
            }
        }
        Command::Discover { wallet } => {
            let handles = discover(&wallet, &registry.list(), &config).await?;
            if handles.is_empty() {
                println!("no wallets found");
            }
            for handle in handles {
                println!("{:<20} {}", handle.info.name, handle.info.uuid);
            }
        }
        Command::DeployHub {
            chain_id,
            rpc,
            name,
            explorer,
            fork_of,
            token_messenger,
            message_transmitter,
            relay_endpoint,
            cctp_domain,
            relay_eid,
        } => {
            let mut registry = registry;
            let id = registry.deploy_hub(HubSpec {
                chain_id,
                rpc,
                name,
                explorer_url: explorer,
                fork_of: Some(fork_of),
                contracts: ProtocolContracts {
                    token_messenger,
                    message_transmitter,
                    relay_endpoint,
                },
                routing: RoutingIds {
                    cctp_domain,
                    relay_eid,
                },
            })?;
            println!("registered hub {id}");
        }
        Command::Bridge {
            from,
            to,
            asset,
            amount,
            token_id,
            protocol,
            wallet,
        } => {
            let amount = amount.or(token_id).ok_or_eyre("an amount or token id is required")?;
            let request = TransferRequest {
                source: from,
                destination: to,
                asset,
                amount,
                protocol,
            };
            bridge(request, wallet, registry, config).await?;
        }
    }

    Ok(())
}

async fn discover(
    wallet: &WalletArgs,
    networks: &[Network],
    config: &BridgeConfig,
) -> eyre::Result<Vec<ProviderHandle>> {
    let mut announcers: Vec<Arc<dyn Announcer>> = Vec::new();
    if let Some(key) = &wallet.private_key {
        let key: PrivateKeySigner = key.parse().wrap_err("parsing BRIDGE_PRIVATE_KEY")?;
        let active = networks.first().map_or(1, Network::chain_id);
        let signer = LocalSigner::new(key, networks, active);
        announcers.push(Arc::new(StaticAnnouncer::new(ProviderHandle::new(
            ProviderInfo {
                uuid: "local-key".into(),
                name: "Local Key".into(),
                icon: String::new(),
                rdns: "local.xbridge".into(),
            },
            Arc::new(signer),
        ))));
    }

    let mut injected = Vec::new();
    if wallet.simulate {
        injected.push(InjectedSigner {
            flags: InjectedFlags::default(),
            signer: Arc::new(SimulatedSigner::new(networks, Duration::from_millis(300))),
        });
    }

    Ok(ProviderDiscovery::new(announcers, injected)
        .discover(config.discovery.window())
        .await)
}

fn proof_sources(
    simulate: bool,
    source: &Network,
    config: &BridgeConfig,
) -> eyre::Result<ProofSources> {
    if simulate {
        let simulated =
            SimulatedProofSource::new(Duration::from_millis(config.proof.simulated_delay_ms));
        return Ok(ProofSources::single(Arc::new(simulated)));
    }
    let (iris, scan) = match source.kind {
        NetworkKind::Mainnet => (IrisAttestationSource::PRODUCTION, RelayScanSource::MAINNET),
        NetworkKind::Testnet | NetworkKind::CustomHub => {
            (IrisAttestationSource::SANDBOX, RelayScanSource::TESTNET)
        }
    };
    let attestation: Arc<dyn ProofSource> = Arc::new(IrisAttestationSource::new(iris.parse()?));
    let relay: Arc<dyn ProofSource> = Arc::new(RelayScanSource::new(scan.parse()?));
    Ok(ProofSources { attestation, relay })
}

async fn bridge(
    request: TransferRequest,
    wallet: WalletArgs,
    registry: NetworkRegistry,
    config: BridgeConfig,
) -> eyre::Result<()> {
    let networks = registry.list();
    let source = registry.get(&request.source)?;
    let destination = registry.get(&request.destination)?;
    let assets = AssetCatalog::load(builtin_assets(), &registry.ids())?;

    let handle = discover(&wallet, &networks, &config)
        .await?
        .into_iter()
        .next()
        .ok_or_eyre("no wallet found; pass --private-key or --simulate")?;
    let session = Session::connect(handle).await?;
    if let (Some(handle), Some(account)) = (session.handle(), session.account()) {
        println!("connected {} as {account}", handle.info.name);
    }

    let rpc = if wallet.simulate {
        FallbackClient::new(Arc::new(SimulatedTransport), config.rpc.timeout())
    } else {
        FallbackClient::http(config.rpc.timeout())
    };
    let annotator = GeminiAnnotator::from_config(&config.annotator)
        .map(|a| Arc::new(a) as Arc<dyn Annotator>);
    let components = Components {
        registry: Arc::new(RwLock::new(registry)),
        assets,
        rpc: rpc.clone(),
        proofs: proof_sources(wallet.simulate, &source, &config)?,
        annotator,
        monitor: Some(Arc::new(Monitor::new(rpc))),
    };
    let orchestrator = Orchestrator::new(components, config);

    let mut updates = orchestrator.subscribe();
    orchestrator.submit(&session, request).await?;

    let mut shown: Option<Stage> = None;
    let mut resumed = false;
    loop {
        let snapshot = updates.borrow_and_update().clone();
        let Some(attempt) = snapshot.attempt else {
            if let Some(abandoned) = snapshot.last_abandoned {
                println!("transfer abandoned; send tx {:?}", abandoned.artifacts.send_tx);
            }
            return Ok(());
        };
        if shown != Some(attempt.stage) {
            println!("{}", attempt.stage);
            shown = Some(attempt.stage);
        }
        if attempt.awaiting_network_switch {
            if resumed {
                bail!("wallet did not switch to {}", attempt.source);
            }
            resumed = true;
            orchestrator.resume(&session).await?;
        }
        match attempt.stage {
            Stage::Completed => {
                if let Some(summary) = &attempt.summary {
                    println!("{summary}");
                }
                let links = [
                    ("sent", &source, attempt.artifacts.send_tx),
                    ("finalized", &destination, attempt.artifacts.finalize_tx),
                ];
                for (label, network, tx) in links {
                    let Some(tx) = tx else { continue };
                    let link = network.explorer_tx_url(tx).unwrap_or_else(|| tx.to_string());
                    println!("{label} {link}");
                }
                return Ok(());
            }
            Stage::Failed => {
                let failure = attempt.failure.ok_or_eyre("failed attempt has no cause")?;
                bail!("{} (during {})", failure.message, failure.stage);
            }
            _ => {}
        }

        tokio::select! {
            changed = updates.changed() => changed?,
            _ = tokio::signal::ctrl_c() => {
                if let Err(err) = orchestrator.reset().await {
                    warn!(%err, "cannot abandon the transfer at this point");
                }
            }
        }
    }
}
