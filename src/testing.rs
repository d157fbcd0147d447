//! In-memory stand-ins for the engine's external boundaries: RPC transport,
//! wallet signer and proof service. Used by the unit and integration tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use alloy::primitives::{Address, Bytes, TxHash};
use async_trait::async_trait;
use serde_json::{json, Value};
use url::Url;

use crate::error::{EndpointError, ProofError, SignerError};
use crate::proof::{Proof, ProofPoll, ProofRequest, ProofSource};
use crate::rpc::RpcTransport;
use crate::signer::{ChainDefinition, Signer, SwitchOutcome, TxRequest};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone)]
enum Reply {
    Fail,
    Body(Value),
    Delayed(Duration, Value),
}

fn rpc_result(result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": 1, "result": result })
}

/// Canned JSON-RPC replies per endpoint, optionally per method. Endpoints
/// without a reply fail at the transport level. Clones share the hit log.
#[derive(Debug, Clone, Default)]
pub struct StaticTransport {
    replies: HashMap<(Url, Option<String>), Reply>,
    hits: Arc<Mutex<Vec<Url>>>,
}

impl StaticTransport {
    pub fn fail(mut self, endpoint: &Url) -> Self {
        self.replies.insert((endpoint.clone(), None), Reply::Fail);
        self
    }

    /// Successful reply carrying `result`, whatever the method.
    pub fn result(mut self, endpoint: &Url, result: Value) -> Self {
        self.replies
            .insert((endpoint.clone(), None), Reply::Body(rpc_result(result)));
        self
    }

    /// Successful reply carrying `result` for `method` only.
    pub fn method(mut self, endpoint: &Url, method: &str, result: Value) -> Self {
        self.replies.insert(
            (endpoint.clone(), Some(method.to_string())),
            Reply::Body(rpc_result(result)),
        );
        self
    }

    /// Raw response body, returned as is.
    pub fn body(mut self, endpoint: &Url, body: Value) -> Self {
        self.replies.insert((endpoint.clone(), None), Reply::Body(body));
        self
    }

    pub fn delayed(mut self, endpoint: &Url, delay: Duration, result: Value) -> Self {
        self.replies.insert(
            (endpoint.clone(), None),
            Reply::Delayed(delay, rpc_result(result)),
        );
        self
    }

    /// Endpoints contacted so far, in order.
    pub fn hits(&self) -> Vec<Url> {
        lock(&self.hits).clone()
    }
}

#[async_trait]
impl RpcTransport for StaticTransport {
    async fn send(&self, endpoint: &Url, request: &Value) -> Result<Value, EndpointError> {
        lock(&self.hits).push(endpoint.clone());
        let method = request
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_string);
        let reply = self
            .replies
            .get(&(endpoint.clone(), method))
            .or_else(|| self.replies.get(&(endpoint.clone(), None)))
            .cloned();
        match reply {
            None | Some(Reply::Fail) => Err(EndpointError::Transport(format!(
                "connection refused: {endpoint}"
            ))),
            Some(Reply::Body(body)) => Ok(body),
            Some(Reply::Delayed(delay, body)) => {
                tokio::time::sleep(delay).await;
                Ok(body)
            }
        }
    }
}

#[derive(Debug)]
struct SignerState {
    active: u64,
    known: HashSet<u64>,
    added: Vec<u64>,
    sent: Vec<TxRequest>,
    reject_switch: bool,
    unavailable: bool,
    failing_selectors: Vec<([u8; 4], SignerError)>,
    switches: usize,
}

/// A wallet that answers from a script. Knows mainnet, Sepolia and its
/// starting chain; accepts everything unless told otherwise. Clones share state.
#[derive(Debug, Clone)]
pub struct ScriptedSigner {
    account: Address,
    latency: Duration,
    state: Arc<Mutex<SignerState>>,
}

impl ScriptedSigner {
    pub fn new(active_chain: u64) -> Self {
        Self {
            account: Address::repeat_byte(0xaa),
            latency: Duration::ZERO,
            state: Arc::new(Mutex::new(SignerState {
                active: active_chain,
                known: HashSet::from([1, 11_155_111, active_chain]),
                added: Vec::new(),
                sent: Vec::new(),
                reject_switch: false,
                unavailable: false,
                failing_selectors: Vec::new(),
                switches: 0,
            })),
        }
    }

    /// Every chain switch is declined by the user.
    pub fn reject_switch(self) -> Self {
        lock(&self.state).reject_switch = true;
        self
    }

    /// Every call fails as if the wallet went away.
    pub fn unavailable(self) -> Self {
        lock(&self.state).unavailable = true;
        self
    }

    /// Transactions whose calldata starts with `selector` are declined.
    pub fn reject_selector(self, selector: [u8; 4]) -> Self {
        self.fail_selector(selector, SignerError::UserRejected)
    }

    pub fn fail_selector(self, selector: [u8; 4], error: SignerError) -> Self {
        lock(&self.state).failing_selectors.push((selector, error));
        self
    }

    /// The user stops declining: scripted rejections and failures are dropped.
    pub fn clear_failures(&self) {
        let mut state = lock(&self.state);
        state.failing_selectors.clear();
        state.reject_switch = false;
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub fn active_chain_now(&self) -> u64 {
        lock(&self.state).active
    }

    /// Switches the wallet as the user would, outside any request.
    pub fn set_active_chain(&self, chain_id: u64) {
        let mut state = lock(&self.state);
        state.known.insert(chain_id);
        state.active = chain_id;
    }

    pub fn added_chains(&self) -> Vec<u64> {
        lock(&self.state).added.clone()
    }

    /// Transactions accepted so far, in order.
    pub fn sent(&self) -> Vec<TxRequest> {
        lock(&self.state).sent.clone()
    }

    pub fn switches(&self) -> usize {
        lock(&self.state).switches
    }

    fn available(&self) -> Result<MutexGuard<'_, SignerState>, SignerError> {
        let state = lock(&self.state);
        if state.unavailable {
            return Err(SignerError::Unavailable);
        }
        Ok(state)
    }
}

#[async_trait]
impl Signer for ScriptedSigner {
    async fn request_accounts(&self) -> Result<Address, SignerError> {
        self.available()?;
        Ok(self.account)
    }

    async fn active_chain(&self) -> Result<u64, SignerError> {
        Ok(self.available()?.active)
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<SwitchOutcome, SignerError> {
        let mut state = self.available()?;
        state.switches += 1;
        if state.reject_switch {
            return Err(SignerError::UserRejected);
        }
        if !state.known.contains(&chain_id) {
            return Ok(SwitchOutcome::UnknownChain);
        }
        state.active = chain_id;
        Ok(SwitchOutcome::Switched)
    }

    async fn add_chain(&self, definition: &ChainDefinition) -> Result<(), SignerError> {
        let mut state = self.available()?;
        state.known.insert(definition.chain_id);
        state.added.push(definition.chain_id);
        Ok(())
    }

    async fn send_transaction(&self, tx: TxRequest) -> Result<TxHash, SignerError> {
        tokio::time::sleep(self.latency).await;
        let mut state = self.available()?;
        if let Some((_, error)) = state
            .failing_selectors
            .iter()
            .find(|(selector, _)| tx.data.starts_with(selector))
        {
            return Err(error.clone());
        }
        state.sent.push(tx);
        let nonce = state.sent.len() as u64;
        Ok(TxHash::left_padding_from(&nonce.to_be_bytes()))
    }

    async fn read_only_call(&self, _to: Address, _data: Bytes) -> Result<Bytes, SignerError> {
        self.available()?;
        Ok(Bytes::from(vec![0u8; 32]))
    }
}

#[derive(Debug, Clone)]
enum ProofScript {
    Never,
    ReadyAfter(u32, Proof),
    Failing(String),
}

/// Proof service answering from a script. Clones share the poll counter.
#[derive(Debug, Clone)]
pub struct ScriptedProofSource {
    script: ProofScript,
    polls: Arc<Mutex<u32>>,
    requests: Arc<Mutex<Vec<ProofRequest>>>,
}

impl ScriptedProofSource {
    fn scripted(script: ProofScript) -> Self {
        Self {
            script,
            polls: Default::default(),
            requests: Default::default(),
        }
    }

    /// Pending for `pending` polls, then ready with `proof`.
    pub fn ready_after(pending: u32, proof: Proof) -> Self {
        Self::scripted(ProofScript::ReadyAfter(pending, proof))
    }

    pub fn never() -> Self {
        Self::scripted(ProofScript::Never)
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self::scripted(ProofScript::Failing(reason.into()))
    }

    pub fn polls(&self) -> u32 {
        *lock(&self.polls)
    }

    pub fn requests(&self) -> Vec<ProofRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl ProofSource for ScriptedProofSource {
    async fn poll(&self, request: &ProofRequest) -> Result<ProofPoll, ProofError> {
        let polls = {
            let mut polls = lock(&self.polls);
            *polls += 1;
            *polls
        };
        lock(&self.requests).push(request.clone());
        match &self.script {
            ProofScript::Never => Ok(ProofPoll::Pending),
            ProofScript::ReadyAfter(pending, proof) if polls > *pending => {
                Ok(ProofPoll::Ready(proof.clone()))
            }
            ProofScript::ReadyAfter(..) => Ok(ProofPoll::Pending),
            ProofScript::Failing(reason) => Err(ProofError::Transport(reason.clone())),
        }
    }
}
