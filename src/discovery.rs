use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info};

use crate::signer::Signer;

/// Wallet identity as announced by the wallet itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub uuid: String,
    pub name: String,
    pub icon: String,
    pub rdns: String,
}

/// A discovered signer.
#[derive(Clone)]
pub struct ProviderHandle {
    pub info: ProviderInfo,
    signer: Arc<dyn Signer>,
}

impl ProviderHandle {
    pub fn new(info: ProviderInfo, signer: Arc<dyn Signer>) -> Self {
        Self { info, signer }
    }

    pub fn signer(&self) -> Arc<dyn Signer> {
        self.signer.clone()
    }
}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Answers a discovery request by sending zero or more handles on `reply`.
/// Implementations must not block; slow wallets announce from a spawned task.
pub trait Announcer: Send + Sync {
    fn request(&self, reply: mpsc::Sender<ProviderHandle>);
}

/// Announces one fixed handle, optionally after a delay.
pub struct StaticAnnouncer {
    handle: ProviderHandle,
    delay: Duration,
}

impl StaticAnnouncer {
    pub fn new(handle: ProviderHandle) -> Self {
        Self {
            handle,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Announcer for StaticAnnouncer {
    fn request(&self, reply: mpsc::Sender<ProviderHandle>) {
        let handle = self.handle.clone();
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // receiver gone means the window already closed
            let _ = reply.send(handle).await;
        });
    }
}

/// Flags a statically injected wallet exposes about itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct InjectedFlags {
    pub is_metamask: bool,
    pub is_coinbase_wallet: bool,
    pub is_rabby: bool,
}

impl InjectedFlags {
    fn wallet_name(self) -> &'static str {
        if self.is_metamask {
            "MetaMask"
        } else if self.is_coinbase_wallet {
            "Coinbase Wallet"
        } else if self.is_rabby {
            "Rabby"
        } else {
            "Injected Wallet"
        }
    }
}

/// A signer already present in the execution context, with no identity metadata.
#[derive(Clone)]
pub struct InjectedSigner {
    pub flags: InjectedFlags,
    pub signer: Arc<dyn Signer>,
}

pub struct ProviderDiscovery {
    announcers: Vec<Arc<dyn Announcer>>,
    injected: Vec<InjectedSigner>,
}

impl ProviderDiscovery {
    pub fn new(announcers: Vec<Arc<dyn Announcer>>, injected: Vec<InjectedSigner>) -> Self {
        Self {
            announcers,
            injected,
        }
    }

    /// Collects announcements for `window`, then folds in injected signers.
    /// The subscription is closed before returning; an empty result is normal.
    pub async fn discover(&self, window: Duration) -> Vec<ProviderHandle> {
        let (reply, mut announcements) = mpsc::channel(32);
        for announcer in &self.announcers {
            announcer.request(reply.clone());
        }
        drop(reply);

        let mut found = Vec::new();
        let deadline = Instant::now() + window;
        while let Ok(Some(handle)) = timeout_at(deadline, announcements.recv()).await {
            push_unique(&mut found, handle);
        }
        announcements.close();
        while let Ok(handle) = announcements.try_recv() {
            push_unique(&mut found, handle);
        }
        let announced = found.len();

        for (index, injected) in self.injected.iter().enumerate() {
            let name = injected.flags.wallet_name();
            if found.iter().any(|h| h.info.name == name) {
                continue;
            }
            push_unique(
                &mut found,
                ProviderHandle::new(
                    ProviderInfo {
                        uuid: format!("injected-{index}"),
                        name: name.to_string(),
                        icon: String::new(),
                        rdns: String::new(),
                    },
                    injected.signer.clone(),
                ),
            );
        }

        info!(announced, total = found.len(), "provider discovery finished");
        found
    }
}

fn push_unique(found: &mut Vec<ProviderHandle>, handle: ProviderHandle) {
    if found.iter().any(|h| h.info.uuid == handle.info.uuid) {
        debug!(uuid = %handle.info.uuid, "duplicate provider announcement ignored");
        return;
    }
    found.push(handle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedSigner;
    use proptest::prelude::*;

    fn handle(uuid: &str, name: &str) -> ProviderHandle {
        ProviderHandle::new(
            ProviderInfo {
                uuid: uuid.into(),
                name: name.into(),
                icon: String::new(),
                rdns: format!("io.{name}").to_lowercase(),
            },
            Arc::new(ScriptedSigner::new(1)),
        )
    }

    fn announcer(uuid: &str, name: &str, delay_ms: u64) -> Arc<dyn Announcer> {
        Arc::new(StaticAnnouncer::new(handle(uuid, name)).with_delay(Duration::from_millis(delay_ms)))
    }

    #[tokio::test(start_paused = true)]
    async fn late_announcements_are_dropped() {
        let discovery = ProviderDiscovery::new(
            vec![announcer("a", "Alpha", 10), announcer("b", "Beta", 900)],
            vec![],
        );
        let found = discovery.discover(Duration::from_millis(500)).await;
        let names: Vec<_> = found.iter().map(|h| h.info.name.as_str()).collect();
        assert_eq!(names, ["Alpha"]);
    }

    #[tokio::test(start_paused = true)]
    async fn injected_signers_fold_in_by_name() {
        let discovery = ProviderDiscovery::new(
            vec![announcer("mm-uuid", "MetaMask", 0)],
            vec![
                InjectedSigner {
                    flags: InjectedFlags {
                        is_metamask: true,
                        ..Default::default()
                    },
                    signer: Arc::new(ScriptedSigner::new(1)),
                },
                InjectedSigner {
                    flags: InjectedFlags::default(),
                    signer: Arc::new(ScriptedSigner::new(1)),
                },
            ],
        );
        let found = discovery.discover(Duration::from_millis(100)).await;
        let ids: Vec<_> = found.iter().map(|h| h.info.uuid.as_str()).collect();
        assert_eq!(ids, ["mm-uuid", "injected-1"]);
        assert_eq!(found[1].info.name, "Injected Wallet");
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_found_is_empty_not_an_error() {
        let discovery = ProviderDiscovery::new(vec![], vec![]);
        let started = Instant::now();
        assert!(discovery.discover(Duration::from_millis(500)).await.is_empty());
        assert!(started.elapsed() <= Duration::from_millis(500));
    }

    proptest! {
        #[test]
        fn never_returns_duplicate_uuids(uuids in proptest::collection::vec(0u8..5, 0..20)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .start_paused(true)
                .build()
                .unwrap();
            let found = rt.block_on(async {
                let announcers = uuids
                    .iter()
                    .enumerate()
                    .map(|(i, u)| announcer(&format!("uuid-{u}"), &format!("W{i}"), i as u64))
                    .collect();
                ProviderDiscovery::new(announcers, vec![])
                    .discover(Duration::from_millis(100))
                    .await
            });
            let mut seen: Vec<_> = found.iter().map(|h| h.info.uuid.clone()).collect();
            let total = seen.len();
            seen.sort();
            seen.dedup();
            prop_assert_eq!(seen.len(), total);
            let mut distinct = uuids.clone();
            distinct.sort();
            distinct.dedup();
            prop_assert_eq!(total, distinct.len());
        }
    }
}
