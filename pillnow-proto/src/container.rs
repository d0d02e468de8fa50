//! Container documents - the persisted form of a medicine compartment's schedule

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

const KEY_PREFIX: &str = "container_";

/// Compartment number on the dispenser, starting at 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(u32);

impl ContainerId {
    pub fn new(slot: u32) -> Result<Self, DocumentError> {
        if slot == 0 {
            return Err(DocumentError::InvalidSlot(slot));
        }
        Ok(Self(slot))
    }

    pub fn slot(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContainerId {
    type Err = DocumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let slot = s
            .trim()
            .parse::<u32>()
            .map_err(|_| DocumentError::InvalidId(s.to_string()))?;
        Self::new(slot)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("container slot must be 1 or greater, got {0}")]
    InvalidSlot(u32),
    #[error("invalid container id: {0:?}")]
    InvalidId(String),
    #[error("invalid document key: {0:?}")]
    InvalidKey(String),
    #[error("container {container}: invalid alarm timestamp {value:?}: {source}")]
    InvalidAlarm {
        container: ContainerId,
        value: String,
        source: chrono::ParseError,
    },
}

/// Document key for a container owned by a user: `container_<slot>_<userId>`
pub fn document_key(id: ContainerId, user_id: &str) -> String {
    format!("{KEY_PREFIX}{}_{user_id}", id.slot())
}

/// Split a document key back into its container and user id
pub fn parse_document_key(key: &str) -> Result<(ContainerId, String), DocumentError> {
    let invalid = || DocumentError::InvalidKey(key.to_string());
    let rest = key.strip_prefix(KEY_PREFIX).ok_or_else(invalid)?;
    let (slot, user_id) = rest.split_once('_').ok_or_else(invalid)?;
    let id = slot.parse::<ContainerId>().map_err(|_| invalid())?;
    if user_id.is_empty() {
        return Err(invalid());
    }
    Ok((id, user_id.to_string()))
}

/// On-disk container document. Alarms stay as ISO-8601 strings so that one
/// malformed entry only fails the container it belongs to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDocument {
    #[serde(default)]
    pub pill_name: Option<String>,
    #[serde(default)]
    pub alarms: Vec<String>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

/// One reminder time for a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmEntry {
    pub container: ContainerId,
    pub medicine: Option<String>,
    pub at: DateTime<Utc>,
}

/// Parsed schedule of a single container
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSchedule {
    pub id: ContainerId,
    pub user_id: String,
    pub medicine: Option<String>,
    /// Insertion order, not time order
    pub alarms: Vec<DateTime<Utc>>,
    pub phone_number: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl ContainerSchedule {
    pub fn new(id: ContainerId, user_id: &str) -> Self {
        Self {
            id,
            user_id: user_id.to_string(),
            medicine: None,
            alarms: Vec::new(),
            phone_number: None,
            last_updated: None,
        }
    }

    pub fn from_document(id: ContainerId, doc: &ContainerDocument) -> Result<Self, DocumentError> {
        let alarms = doc
            .alarms
            .iter()
            .map(|value| {
                DateTime::parse_from_rfc3339(value)
                    .map(|at| at.with_timezone(&Utc))
                    .map_err(|source| DocumentError::InvalidAlarm {
                        container: id,
                        value: value.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id,
            user_id: doc.user_id.clone(),
            medicine: non_empty(doc.pill_name.as_deref()),
            alarms,
            phone_number: non_empty(doc.phone_number.as_deref()),
            last_updated: doc.last_updated,
        })
    }

    pub fn to_document(&self) -> ContainerDocument {
        ContainerDocument {
            pill_name: self.medicine.clone(),
            alarms: self
                .alarms
                .iter()
                .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true))
                .collect(),
            user_id: self.user_id.clone(),
            last_updated: self.last_updated,
            phone_number: self.phone_number.clone(),
        }
    }

    /// Human readable name used in reminders
    pub fn label(&self) -> String {
        match &self.medicine {
            Some(name) => name.clone(),
            None => format!("Container {}", self.id),
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = AlarmEntry> + '_ {
        self.alarms.iter().map(|at| AlarmEntry {
            container: self.id,
            medicine: self.medicine.clone(),
            at: *at,
        })
    }
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
