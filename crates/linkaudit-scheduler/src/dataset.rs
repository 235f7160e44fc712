//! Audited datasets and the store keys and hooks derived from them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A dataset audited independently of the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dataset {
    /// Hyperlinks found in content.
    Link,
    /// Embedded images found in content.
    Image,
}

impl Dataset {
    /// All datasets, in display order.
    pub const ALL: [Dataset; 2] = [Dataset::Link, Dataset::Image];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dataset::Link => "link",
            Dataset::Image => "image",
        }
    }

    pub fn status_key(&self) -> String {
        format!("linkaudit_{}_status", self.as_str())
    }

    pub fn history_key(&self) -> String {
        format!("linkaudit_{}_history", self.as_str())
    }

    pub fn queue_key(&self) -> String {
        format!("linkaudit_{}_manual_queue", self.as_str())
    }

    /// Hook that starts a job with its first batch.
    pub fn first_batch_hook(&self) -> String {
        format!("linkaudit_{}_first_batch", self.as_str())
    }

    /// Hook that continues a job with its next batch.
    pub fn next_batch_hook(&self) -> String {
        format!("linkaudit_{}_next_batch", self.as_str())
    }

    /// Hook of the automatic cadence.
    pub fn recurring_hook(&self) -> String {
        format!("linkaudit_{}_recurring", self.as_str())
    }

    /// Resolve the dataset that owns a hook name.
    pub fn from_hook(hook: &str) -> Option<Dataset> {
        Self::ALL.into_iter().find(|d| {
            hook.strip_prefix("linkaudit_")
                .and_then(|rest| rest.strip_prefix(d.as_str()))
                .is_some_and(|rest| rest.starts_with('_'))
        })
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dataset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "link" | "links" => Ok(Dataset::Link),
            "image" | "images" => Ok(Dataset::Image),
            other => Err(format!("unknown dataset '{}'", other)),
        }
    }
}
