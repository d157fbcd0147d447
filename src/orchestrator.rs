use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy::primitives::{Address, TxHash};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::annotate::{annotate, Annotator, SummaryRequest};
use crate::asset::{Asset, AssetCatalog, TransferAmount};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, FailureKind, RegistryError, RpcError, SignerError, StepError};
use crate::monitor::Monitor;
use crate::network::{Network, NetworkId};
use crate::proof::{Backoff, Proof, ProofCanceller, ProofSources, ProofStatus, ProofWait};
use crate::registry::NetworkRegistry;
use crate::rpc::{FallbackClient, ReceiptStatus};
use crate::signer::{Session, Signer, TxRequest};
use crate::stage::{Artifacts, Stage, TransferAttempt, TransferSnapshot};
use crate::strategy::{ProtocolKind, ProtocolSelector, ProtocolStrategy, TransferPlan, TransferRoute};

/// A transfer as the user asks for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub source: NetworkId,
    pub destination: NetworkId,
    pub asset: String,
    /// Decimal units, or the token id for a collection.
    pub amount: String,
    pub protocol: Option<ProtocolKind>,
}

/// Collaborators the orchestrator drives.
pub struct Components {
    pub registry: Arc<RwLock<NetworkRegistry>>,
    pub assets: AssetCatalog,
    pub rpc: FallbackClient,
    pub proofs: ProofSources,
    pub annotator: Option<Arc<dyn Annotator>>,
    pub monitor: Option<Arc<Monitor>>,
}

/// Runs at most one transfer attempt at a time and publishes its progress.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<RwLock<NetworkRegistry>>,
    assets: AssetCatalog,
    selector: ProtocolSelector,
    rpc: FallbackClient,
    proofs: ProofSources,
    annotator: Option<Arc<dyn Annotator>>,
    monitor: Option<Arc<Monitor>>,
    config: BridgeConfig,
    state: Mutex<State>,
    snapshot: watch::Sender<TransferSnapshot>,
    next_id: AtomicU64,
}

#[derive(Default)]
struct State {
    attempt: Option<TransferAttempt>,
    last_abandoned: Option<TransferAttempt>,
    driver: Option<JoinHandle<()>>,
    proof_wait: Option<ProofCanceller>,
}

impl State {
    fn snapshot(&self) -> TransferSnapshot {
        TransferSnapshot {
            attempt: self.attempt.clone(),
            last_abandoned: self.last_abandoned.clone(),
        }
    }

    fn stop_driver(&mut self) {
        if let Some(wait) = self.proof_wait.take() {
            wait.cancel();
        }
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

/// Everything one driver run needs, resolved before it starts.
struct Job {
    id: u64,
    signer: Arc<dyn Signer>,
    account: Address,
    source: Network,
    destination: Network,
    asset: Asset,
    amount: TransferAmount,
    strategy: ProtocolStrategy,
    plan: TransferPlan,
    seed: Artifacts,
}

/// Why a driver run stopped short of completion.
enum Halt {
    Failed(StepError),
    /// Waiting for the user to confirm a network switch.
    Parked,
    /// The attempt was reset or abandoned under the driver.
    Detached,
}

impl From<StepError> for Halt {
    fn from(err: StepError) -> Self {
        Self::Failed(err)
    }
}

impl From<SignerError> for Halt {
    fn from(err: SignerError) -> Self {
        Self::Failed(err.into())
    }
}

impl From<RpcError> for Halt {
    fn from(err: RpcError) -> Self {
        Self::Failed(err.into())
    }
}

impl From<RegistryError> for Halt {
    fn from(err: RegistryError) -> Self {
        Self::Failed(err.into())
    }
}

impl Orchestrator {
    pub fn new(components: Components, config: BridgeConfig) -> Self {
        let Components {
            registry,
            assets,
            rpc,
            proofs,
            annotator,
            monitor,
        } = components;
        Self {
            inner: Arc::new(Inner {
                registry,
                assets,
                selector: ProtocolSelector::new(config.canonical_stablecoin.clone()),
                rpc,
                proofs,
                annotator,
                monitor,
                config,
                state: Mutex::new(State::default()),
                snapshot: watch::channel(TransferSnapshot::default()).0,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn selector(&self) -> &ProtocolSelector {
        &self.inner.selector
    }

    pub fn subscribe(&self) -> watch::Receiver<TransferSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    /// Resolves once `done` holds for a published snapshot.
    pub async fn wait_for(&self, mut done: impl FnMut(&TransferSnapshot) -> bool) -> TransferSnapshot {
        let mut updates = self.subscribe();
        let snapshot = match updates.wait_for(|s| done(s)).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        };
        snapshot
    }

    /// Resolves once there is no attempt in flight.
    pub async fn wait_terminal(&self) -> TransferSnapshot {
        self.wait_for(|s| s.attempt.as_ref().map_or(true, |a| a.stage.is_terminal()))
            .await
    }

    /// Starts a new attempt. Rejected, never queued, while another is in
    /// flight; a failed attempt must be reset or retried first.
    pub async fn submit(
        &self,
        session: &Session,
        request: TransferRequest,
    ) -> Result<TransferSnapshot, BridgeError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        check_can_start(&state)?;

        let asset = inner
            .assets
            .get(&request.asset)
            .ok_or_else(|| BridgeError::Config(format!("unknown asset {}", request.asset)))?;
        let amount = TransferAmount::parse(asset, &request.amount).map_err(BridgeError::Config)?;
        let protocol = inner.selector.resolve(asset, request.protocol)?;

        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let attempt = TransferAttempt::new(
            id,
            request.source,
            request.destination,
            asset.symbol.clone(),
            amount,
            protocol,
        );
        let job = inner.job(session, &attempt, Artifacts::default()).await?;

        info!(
            attempt = id,
            asset = %attempt.asset,
            amount = %amount.describe(&job.asset),
            source = %attempt.source,
            destination = %attempt.destination,
            %protocol,
            "transfer submitted"
        );
        Ok(inner.install(&mut state, attempt, job))
    }

    /// Re-enters the network check of an attempt parked on a switch request.
    pub async fn resume(&self, session: &Session) -> Result<TransferSnapshot, BridgeError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        let attempt = match &state.attempt {
            Some(a) if a.stage == Stage::CheckingNetwork && a.awaiting_network_switch => a.clone(),
            _ => return Err(BridgeError::NotAwaitingSwitch),
        };
        let job = inner.job(session, &attempt, attempt.artifacts.clone()).await?;
        if let Some(current) = state.attempt.as_mut() {
            current.awaiting_network_switch = false;
        }
        debug!(attempt = attempt.id, "resuming network check");
        state.driver = Some(tokio::spawn(drive(inner.clone(), job)));
        inner.publish(&state);
        Ok(state.snapshot())
    }

    /// Starts a new attempt from a failed one, skipping every step whose
    /// transaction already went through.
    pub async fn retry(&self, session: &Session) -> Result<TransferSnapshot, BridgeError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        let failed = match &state.attempt {
            Some(a) if a.stage == Stage::Failed => a.clone(),
            Some(a) => return Err(BridgeError::NotRetryable(a.stage)),
            None => return Err(BridgeError::NoAttempt),
        };

        let seed = carry_over(&failed);
        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut attempt = TransferAttempt::new(
            id,
            failed.source.clone(),
            failed.destination.clone(),
            failed.asset.clone(),
            failed.amount,
            failed.protocol,
        );
        attempt.artifacts = seed.clone();
        attempt.summary = failed.summary.clone();
        let job = inner.job(session, &attempt, seed).await?;

        info!(attempt = id, previous = failed.id, "retrying transfer");
        Ok(inner.install(&mut state, attempt, job))
    }

    /// Clears a finished attempt, or abandons one that is waiting on the
    /// network switch or the proof. An abandoned attempt is kept as
    /// `last_abandoned`; its on-chain send stays where it is.
    pub async fn reset(&self) -> Result<TransferSnapshot, BridgeError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        let Some(stage) = state.attempt.as_ref().map(|a| a.stage) else {
            return Ok(state.snapshot());
        };
        match stage {
            Stage::Completed | Stage::Failed => {
                state.stop_driver();
                state.attempt = None;
                info!("transfer state reset");
            }
            Stage::Idle | Stage::CheckingNetwork | Stage::AwaitingProof(_) => {
                state.stop_driver();
                state.last_abandoned = state.attempt.take();
                warn!(?stage, "transfer abandoned; any submitted transaction is left as is");
            }
            other => return Err(BridgeError::ResetNotAllowed(other)),
        }
        inner.publish(&state);
        Ok(state.snapshot())
    }
}

fn check_can_start(state: &State) -> Result<(), BridgeError> {
    match state.attempt.as_ref().map(|a| a.stage) {
        None | Some(Stage::Completed) => Ok(()),
        Some(Stage::Failed) => Err(BridgeError::ResetRequired),
        Some(stage) => Err(BridgeError::AttemptInProgress(stage)),
    }
}

/// Artifacts a retry may trust. A reverted finalize tx is dropped so the
/// destination step is submitted again. A reverted relay delivery also drops
/// the proof it came from, so the retry waits for a fresh delivery.
fn carry_over(failed: &TransferAttempt) -> Artifacts {
    let mut seed = failed.artifacts.clone();
    if failed.failure.as_ref().map(|f| f.kind) == Some(FailureKind::Reverted) {
        seed.finalize_tx = None;
        if failed.protocol == ProtocolKind::Relay {
            seed.proof = None;
        }
    }
    seed
}

impl Inner {
    fn publish(&self, state: &State) {
        self.snapshot.send_replace(state.snapshot());
    }

    fn install(self: &Arc<Self>, state: &mut State, attempt: TransferAttempt, job: Job) -> TransferSnapshot {
        state.stop_driver();
        state.attempt = Some(attempt);
        state.driver = Some(tokio::spawn(drive(self.clone(), job)));
        self.publish(state);
        state.snapshot()
    }

    /// Resolves networks, asset and transactions for `attempt`. Every config
    /// problem surfaces here, before anything is signed.
    async fn job(
        &self,
        session: &Session,
        attempt: &TransferAttempt,
        seed: Artifacts,
    ) -> Result<Job, BridgeError> {
        let signer = session.signer().ok_or(BridgeError::SignerUnavailable)?;
        let account = session.account().ok_or(BridgeError::SignerUnavailable)?;
        if attempt.source == attempt.destination {
            return Err(BridgeError::Config(
                "source and destination are the same network".into(),
            ));
        }
        let (source, destination) = {
            let registry = self.registry.read().await;
            (registry.get(&attempt.source)?, registry.get(&attempt.destination)?)
        };
        let asset = self
            .assets
            .get(&attempt.asset)
            .cloned()
            .ok_or_else(|| BridgeError::Config(format!("unknown asset {}", attempt.asset)))?;

        let strategy = ProtocolStrategy::new(attempt.protocol, &self.config.relay);
        let plan = strategy
            .plan(&TransferRoute {
                source: &source,
                destination: &destination,
                asset: &asset,
                amount: attempt.amount,
                recipient: account,
            })
            .map_err(BridgeError::Config)?;

        Ok(Job {
            id: attempt.id,
            signer,
            account,
            source,
            destination,
            asset,
            amount: attempt.amount,
            strategy,
            plan,
            seed,
        })
    }

    /// Applies `f` to the attempt if it is still the current one.
    async fn update(&self, id: u64, f: impl FnOnce(&mut TransferAttempt)) -> Result<(), Halt> {
        let mut state = self.state.lock().await;
        let attempt = state
            .attempt
            .as_mut()
            .filter(|a| a.id == id)
            .ok_or(Halt::Detached)?;
        f(attempt);
        self.publish(&state);
        Ok(())
    }

    async fn enter(&self, id: u64, stage: Stage) -> Result<(), Halt> {
        self.update(id, |attempt| {
            if attempt.advance(stage) {
                info!(attempt = id, stage = %stage, "transfer stage");
            }
        })
        .await
    }

    async fn record(&self, id: u64, f: impl FnOnce(&mut Artifacts)) -> Result<(), Halt> {
        self.update(id, |attempt| f(&mut attempt.artifacts)).await
    }

    async fn fail(&self, id: u64, err: &StepError) {
        let kind = err.kind();
        let message = err.user_message();
        let result = self
            .update(id, |attempt| {
                let stage = attempt.stage;
                if attempt.fail(kind, message) {
                    error!(attempt = id, ?kind, %stage, %err, "transfer failed");
                }
            })
            .await;
        if result.is_err() {
            debug!(attempt = id, %err, "failure on a detached attempt ignored");
        }
    }

    /// Drops an attempt whose proof wait gave up on its own, as a reset would.
    async fn abandon(&self, id: u64) {
        let mut state = self.state.lock().await;
        if state.attempt.as_ref().is_some_and(|a| a.id == id) {
            state.proof_wait = None;
            state.driver = None;
            state.last_abandoned = state.attempt.take();
            warn!(attempt = id, "proof wait gave up; transfer abandoned");
            self.publish(&state);
        }
    }

    fn refresh_balances(self: &Arc<Self>, job: &Job, network: &Network) {
        let Some(monitor) = self.monitor.clone() else {
            return;
        };
        let (owner, asset, network) = (job.account, job.asset.clone(), network.clone());
        tokio::spawn(async move {
            monitor.fetch_balances(owner, [&asset], &network).await;
        });
    }

    fn request_summary(self: &Arc<Self>, job: &Job, tx: TxHash) {
        let Some(annotator) = self.annotator.clone() else {
            return;
        };
        let request = SummaryRequest {
            amount: job.amount.describe(&job.asset),
            source: job.source.name.clone(),
            destination: job.destination.name.clone(),
            protocol: job.strategy.kind(),
            tx,
        };
        let (inner, id, timeout) = (self.clone(), job.id, self.config.annotator.timeout());
        tokio::spawn(async move {
            let text = annotate(annotator.as_ref(), &request, timeout).await;
            // the attempt may be gone by now; the summary is advisory anyway
            let _ = inner.update(id, |attempt| attempt.summary = Some(text)).await;
        });
    }

    async fn confirm(&self, network: &Network, tx: TxHash) -> Result<(), StepError> {
        let finalize = &self.config.finalize;
        for poll in 0..finalize.receipt_polls.max(1) {
            match self.rpc.transaction_receipt(&network.rpc_urls, tx).await? {
                Some(ReceiptStatus::Success) => {
                    debug!(%tx, poll, "receipt confirmed");
                    return Ok(());
                }
                Some(ReceiptStatus::Reverted) => return Err(StepError::Reverted(tx)),
                None => tokio::time::sleep(finalize.receipt_interval()).await,
            }
        }
        Err(StepError::Unconfirmed(tx))
    }

    /// Puts the signer on `network`. `Ok(false)` means the signer accepted the
    /// request but still reports another chain.
    async fn ensure_chain(&self, signer: &dyn Signer, network: &Network) -> Result<bool, Halt> {
        if signer.active_chain().await? == network.chain_id() {
            return Ok(true);
        }
        NetworkRegistry::switch_or_register(signer, network).await?;
        Ok(signer.active_chain().await? == network.chain_id())
    }

    async fn await_proof(self: &Arc<Self>, job: &Job, send_tx: TxHash) -> Result<Proof, Halt> {
        let request = job.strategy.proof_request(&job.source, send_tx);
        let source = self.proofs.for_protocol(job.strategy.kind());
        let mut wait = ProofWait::start(source, request, Backoff::from(&self.config.proof));
        {
            let mut state = self.state.lock().await;
            if !state.attempt.as_ref().is_some_and(|a| a.id == job.id) {
                wait.cancel();
                return Err(Halt::Detached);
            }
            state.proof_wait = Some(wait.canceller());
        }

        match wait.settled().await {
            ProofStatus::Ready(proof) => {
                self.record(job.id, |a| a.proof = Some(proof.clone())).await?;
                Ok(proof)
            }
            ProofStatus::Pending | ProofStatus::Abandoned => {
                self.abandon(job.id).await;
                Err(Halt::Detached)
            }
        }
    }

    async fn finalize(&self, job: &Job, tx: TxRequest) -> Result<TxHash, Halt> {
        if !self.ensure_chain(job.signer.as_ref(), &job.destination).await? {
            return Err(StepError::Config(format!(
                "signer did not switch to {}",
                job.destination.name
            ))
            .into());
        }

        let mut retries_left = self.config.finalize.retries;
        loop {
            let outcome = match job.signer.send_transaction(tx.clone()).await {
                Ok(hash) => {
                    self.record(job.id, |a| a.finalize_tx = Some(hash)).await?;
                    self.confirm(&job.destination, hash).await.map(|()| hash)
                }
                Err(err) => Err(err.into()),
            };
            match outcome {
                Ok(hash) => return Ok(hash),
                Err(err) if retries_left > 0 && err.kind() != FailureKind::UserRejected => {
                    retries_left -= 1;
                    warn!(attempt = job.id, %err, retries_left, "finalize step failed, resubmitting");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn run(self: &Arc<Self>, job: &Job) -> Result<(), Halt> {
        let id = job.id;
        let kind = job.strategy.kind();
        let signer = job.signer.as_ref();

        self.enter(id, Stage::CheckingNetwork).await?;
        // once the send is on chain only the destination matters
        let sent = job.seed.send_tx.is_some();
        if !sent && signer.active_chain().await? != job.source.chain_id() {
            NetworkRegistry::switch_or_register(signer, &job.source).await?;
            self.update(id, |a| a.awaiting_network_switch = true).await?;
            info!(attempt = id, chain_id = job.source.chain_id(), "waiting for the signer to confirm the network switch");
            return Err(Halt::Parked);
        }

        if let (Some(approval), None) = (&job.plan.approval, job.seed.approval_tx) {
            self.enter(id, Stage::Approving).await?;
            let hash = signer.send_transaction(approval.clone()).await?;
            self.record(id, |a| a.approval_tx = Some(hash)).await?;
        }

        let send_tx = match job.seed.send_tx {
            Some(hash) => hash,
            None => {
                self.enter(id, Stage::Sending(kind.send_kind())).await?;
                let hash = signer.send_transaction(job.plan.send.clone()).await?;
                self.record(id, |a| a.send_tx = Some(hash)).await?;
                info!(attempt = id, tx = %hash, "source transaction submitted");
                self.request_summary(job, hash);
                self.refresh_balances(job, &job.source);
                hash
            }
        };

        let proof = match &job.seed.proof {
            Some(proof) => proof.clone(),
            None => {
                self.enter(id, Stage::AwaitingProof(kind.proof_kind())).await?;
                self.await_proof(job, send_tx).await?
            }
        };

        self.enter(id, Stage::Finalizing(kind.finalize_kind())).await?;
        let finalize_tx = match job.seed.finalize_tx {
            Some(hash) => {
                self.confirm(&job.destination, hash).await?;
                hash
            }
            None => match job.strategy.finalize(&job.destination, &proof).map_err(StepError::Config)? {
                Some(tx) => self.finalize(job, tx).await?,
                None => {
                    let hash = proof.delivery_tx.ok_or_else(|| {
                        StepError::Config("relay delivery carries no destination transaction".into())
                    })?;
                    self.record(id, |a| a.finalize_tx = Some(hash)).await?;
                    self.confirm(&job.destination, hash).await?;
                    hash
                }
            },
        };

        self.enter(id, Stage::Completed).await?;
        info!(attempt = id, tx = %finalize_tx, "transfer completed");
        self.refresh_balances(job, &job.destination);
        Ok(())
    }
}

async fn drive(inner: Arc<Inner>, job: Job) {
    match inner.run(&job).await {
        Ok(()) | Err(Halt::Parked) => {}
        Err(Halt::Detached) => debug!(attempt = job.id, "driver stopped; attempt no longer current"),
        Err(Halt::Failed(err)) => inner.fail(job.id, &err).await,
    }
    let mut state = inner.state.lock().await;
    if state.attempt.as_ref().is_some_and(|a| a.id == job.id) {
        state.driver = None;
        state.proof_wait = None;
    }
}
