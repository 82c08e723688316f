//! Delivery path classification.
//!
//! Rules, first match wins:
//!
//! 1. Local account, legacy not forced, account registered, single device → [`PathKind::LocalSelf`]
//! 2. Legacy forced, account unregistered, or key exchange → [`PathKind::LegacyTransport`]
//! 3. Push group, distribution list, or an individual whose registration
//!    resolves to registered → the matching push path; anything else is legacy
//!
//! Discovery failures degrade to legacy and are never returned to the caller.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AccountState;
use crate::recipient::{Recipient, RegisteredState};
use crate::types::RecipientId;

/// How a message leaves the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathKind {
    /// Destination is this account's only device. No network job.
    LocalSelf,
    PushIndividual,
    PushGroup,
    PushDistributionList,
    /// SMS/MMS.
    LegacyTransport,
}

impl PathKind {
    pub fn is_push(&self) -> bool {
        matches!(
            self,
            Self::PushIndividual | Self::PushGroup | Self::PushDistributionList
        )
    }
}

/// Looks up whether a recipient can be reached over push.
pub trait RegistrationDiscovery: Send + Sync {
    /// One-shot registration refresh. May block on the network.
    fn refresh(&self, recipient: &Recipient) -> io::Result<RegisteredState>;
}

/// Discovery backed by a fixed table.
///
/// Unknown recipients resolve to [`RegisteredState::NotRegistered`].
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    states: Mutex<HashMap<RecipientId, RegisteredState>>,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, recipient_id: RecipientId, state: RegisteredState) {
        self.states
            .lock()
            .expect("lock poisoned")
            .insert(recipient_id, state);
    }

    /// Makes every following refresh fail with an IO error.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of refreshes performed.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RegistrationDiscovery for StaticDiscovery {
    fn refresh(&self, recipient: &Recipient) -> io::Result<RegisteredState> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "directory lookup timed out",
            ));
        }
        Ok(self
            .states
            .lock()
            .expect("lock poisoned")
            .get(&recipient.id())
            .copied()
            .unwrap_or(RegisteredState::NotRegistered))
    }
}

/// Flags that influence classification besides the recipient.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassifyRequest {
    pub force_legacy: bool,
    /// Only meaningful on the text path.
    pub key_exchange: bool,
}

/// Maps a recipient plus account state to a [`PathKind`].
pub struct DeliveryClassifier {
    account: Arc<AccountState>,
    discovery: Arc<dyn RegistrationDiscovery>,
}

impl DeliveryClassifier {
    pub fn new(account: Arc<AccountState>, discovery: Arc<dyn RegistrationDiscovery>) -> Self {
        Self { account, discovery }
    }

    pub fn account(&self) -> &AccountState {
        &self.account
    }

    pub fn classify(&self, recipient: &Recipient, request: ClassifyRequest) -> PathKind {
        let path = self.classify_inner(recipient, request);
        debug!(recipient = %recipient.id(), path = ?path, "Classified delivery path");
        path
    }

    fn classify_inner(&self, recipient: &Recipient, request: ClassifyRequest) -> PathKind {
        if !request.force_legacy && self.is_local_self_send(recipient) {
            return PathKind::LocalSelf;
        }

        if request.force_legacy || !self.account.is_registered() || request.key_exchange {
            return PathKind::LegacyTransport;
        }

        match recipient {
            Recipient::PushGroup { .. } => PathKind::PushGroup,
            Recipient::DistributionList { .. } => PathKind::PushDistributionList,
            Recipient::LocalAccount { .. } => PathKind::PushIndividual,
            Recipient::Individual { registered, .. } => match self.resolve(recipient, *registered) {
                RegisteredState::Registered => PathKind::PushIndividual,
                _ => PathKind::LegacyTransport,
            },
        }
    }

    /// True when the recipient is this account and no other device needs a copy.
    pub fn is_local_self_send(&self, recipient: &Recipient) -> bool {
        let is_self = matches!(recipient, Recipient::LocalAccount { .. })
            || recipient.id() == self.account.self_id();
        is_self && self.account.is_registered() && !self.account.is_multi_device()
    }

    fn resolve(&self, recipient: &Recipient, cached: RegisteredState) -> RegisteredState {
        if cached != RegisteredState::Unknown {
            return cached;
        }
        match self.discovery.refresh(recipient) {
            Ok(state) => state,
            Err(e) => {
                warn!(recipient = %recipient.id(), error = %e, "Registration refresh failed, using legacy transport");
                RegisteredState::NotRegistered
            }
        }
    }
}
