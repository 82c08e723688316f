//! Recipient variants.
//!
//! The variant decides the delivery path and the queue key; it is matched once
//! by the classifier and never re-derived downstream.

use crate::types::{DistributionListId, QueueKey, RecipientId};
use serde::{Deserialize, Serialize};

/// Cached registration state of an individual.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisteredState {
    Registered,
    NotRegistered,
    #[default]
    Unknown,
}

impl RegisteredState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::NotRegistered => "not_registered",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "registered" => Self::Registered,
            "not_registered" => Self::NotRegistered,
            _ => Self::Unknown,
        }
    }
}

/// A message destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recipient {
    /// A single contact.
    Individual {
        id: RecipientId,
        registered: RegisteredState,
    },
    /// A push group.
    PushGroup { id: RecipientId },
    /// A story distribution list.
    DistributionList {
        id: RecipientId,
        list_id: DistributionListId,
    },
    /// The local account itself ("Note to Self").
    LocalAccount { id: RecipientId },
}

impl Recipient {
    pub fn individual(id: i64, registered: RegisteredState) -> Self {
        Self::Individual {
            id: RecipientId(id),
            registered,
        }
    }

    pub fn push_group(id: i64) -> Self {
        Self::PushGroup { id: RecipientId(id) }
    }

    pub fn distribution_list(id: i64, list_id: i64) -> Self {
        Self::DistributionList {
            id: RecipientId(id),
            list_id: DistributionListId(list_id),
        }
    }

    pub fn local_account(id: i64) -> Self {
        Self::LocalAccount { id: RecipientId(id) }
    }

    pub fn id(&self) -> RecipientId {
        match self {
            Self::Individual { id, .. }
            | Self::PushGroup { id }
            | Self::DistributionList { id, .. }
            | Self::LocalAccount { id } => *id,
        }
    }

    pub fn queue_key(&self) -> QueueKey {
        self.id().to_queue_key()
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Self::PushGroup { .. })
    }

    pub fn is_distribution_list(&self) -> bool {
        matches!(self, Self::DistributionList { .. })
    }

    /// Storage tag for the variant.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::Individual { .. } => "individual",
            Self::PushGroup { .. } => "push_group",
            Self::DistributionList { .. } => "distribution_list",
            Self::LocalAccount { .. } => "local_account",
        }
    }

    /// Rebuilds a recipient from its stored columns.
    pub fn from_parts(
        id: RecipientId,
        kind: &str,
        registered: RegisteredState,
        list_id: Option<DistributionListId>,
    ) -> Option<Self> {
        match kind {
            "individual" => Some(Self::Individual { id, registered }),
            "push_group" => Some(Self::PushGroup { id }),
            "distribution_list" => list_id.map(|list_id| Self::DistributionList { id, list_id }),
            "local_account" => Some(Self::LocalAccount { id }),
            _ => None,
        }
    }
}
