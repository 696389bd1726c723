//! Fallback Usage Ledger
//!
//! Bounded, append-only record of every time a project connected with fallback
//! credentials. Kept in memory for operational monitoring.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use tokio::sync::RwLock;
use tracing::warn;

/// Maximum number of retained entries
pub const DEFAULT_LEDGER_CAPACITY: usize = 1000;

/// Default page size for recent-usage queries
pub const DEFAULT_RECENT_LIMIT: usize = 100;

const STATS_RECENT_LIMIT: usize = 100;
const STATS_TOP_REASONS: usize = 10;

/// Which part of a project's credentials was replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialType {
    User,
    Password,
    Both,
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialType::User => write!(f, "user"),
            CredentialType::Password => write!(f, "password"),
            CredentialType::Both => write!(f, "both"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackUsageEntry {
    pub project_ref: String,
    pub reason: String,
    pub credential_type: CredentialType,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasonCount {
    pub reason: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackUsageStats {
    pub total_entries: usize,
    pub unique_projects: usize,
    pub recent_usage: Vec<FallbackUsageEntry>,
    pub most_common_reasons: Vec<ReasonCount>,
}

/// In-memory ring buffer of fallback events
pub struct FallbackLedger {
    entries: RwLock<VecDeque<FallbackUsageEntry>>,
    capacity: usize,
}

impl FallbackLedger {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LEDGER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Record a fallback event, evicting the oldest entries beyond capacity
    pub async fn log_fallback_usage(
        &self,
        project_ref: &str,
        reason: impl Into<String>,
        credential_type: CredentialType,
    ) {
        let reason = reason.into();
        warn!(
            project_ref,
            reason = %reason,
            credential_type = %credential_type,
            "Fallback database credentials used"
        );

        // Stamped under the lock so insertion order matches timestamp order
        let mut entries = self.entries.write().await;
        entries.push_back(FallbackUsageEntry {
            project_ref: project_ref.to_string(),
            reason,
            credential_type,
            timestamp: Utc::now(),
        });
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// Up to `limit` entries, most recent first
    pub async fn get_recent_fallback_usage(&self, limit: usize) -> Vec<FallbackUsageEntry> {
        let entries = self.entries.read().await;
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub async fn get_fallback_usage_stats(&self) -> FallbackUsageStats {
        let entries = self.entries.read().await;

        let unique_projects = entries
            .iter()
            .map(|e| e.project_ref.as_str())
            .collect::<HashSet<_>>()
            .len();

        // Counts keep first-seen order so the stable sort breaks ties by it
        let mut reasons: Vec<ReasonCount> = Vec::new();
        let mut positions: HashMap<&str, usize> = HashMap::new();
        for entry in entries.iter() {
            match positions.get(entry.reason.as_str()) {
                Some(&i) => reasons[i].count += 1,
                None => {
                    positions.insert(entry.reason.as_str(), reasons.len());
                    reasons.push(ReasonCount {
                        reason: entry.reason.clone(),
                        count: 1,
                    });
                }
            }
        }
        reasons.sort_by(|a, b| b.count.cmp(&a.count));
        reasons.truncate(STATS_TOP_REASONS);

        FallbackUsageStats {
            total_entries: entries.len(),
            unique_projects,
            recent_usage: entries.iter().rev().take(STATS_RECENT_LIMIT).cloned().collect(),
            most_common_reasons: reasons,
        }
    }

    pub async fn clear_fallback_usage_log(&self) {
        self.entries.write().await.clear();
    }
}

impl Default for FallbackLedger {
    fn default() -> Self {
        Self::new()
    }
}
