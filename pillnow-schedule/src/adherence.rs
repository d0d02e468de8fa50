//! Dose history: one record per fired reminder
//!
//! The file is shared between the alarm daemon and one-off commands, so
//! every change is made against what is on disk at that moment.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use log::{info, warn};
use pillnow_proto::ContainerId;
use serde::{Deserialize, Serialize};

use crate::store::{StoreError, read_json, write_json};

pub const ADHERENCE_FILE: &str = "adherence.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoseStatus {
    Pending,
    Taken,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoseRecord {
    pub container: ContainerId,
    pub medicine: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub status: DoseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taken_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdherenceSummary {
    pub taken: usize,
    pub total: usize,
}

impl AdherenceSummary {
    /// 0 when nothing has been scheduled yet
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.taken as f64 * 100.0 / self.total as f64
    }
}

pub struct AdherenceLog {
    path: PathBuf,
    /// Last copy read from or written to disk
    records: Mutex<Vec<DoseRecord>>,
}

impl AdherenceLog {
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        let records = read_json(&path)?;
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn open_in_home(home: &Path) -> Result<Self, StoreError> {
        Self::open(home.join(ADHERENCE_FILE))
    }

    fn records_mut(&self) -> MutexGuard<'_, Vec<DoseRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock, then bring the copy up to date with the file
    fn reload(&self) -> Result<MutexGuard<'_, Vec<DoseRecord>>, StoreError> {
        let mut records = self.records_mut();
        *records = read_json(&self.path)?;
        Ok(records)
    }

    /// Readers fall back to the last good copy
    fn latest(&self) -> MutexGuard<'_, Vec<DoseRecord>> {
        let mut records = self.records_mut();
        match read_json(&self.path) {
            Ok(fresh) => *records = fresh,
            Err(e) => warn!("Failed to reload dose history, showing last known: {e}"),
        }
        records
    }

    /// A reminder went off; the dose is pending until marked taken
    pub fn record(
        &self,
        container: ContainerId,
        medicine: Option<&str>,
        scheduled_at: DateTime<Utc>,
    ) -> Result<DoseRecord, StoreError> {
        let record = DoseRecord {
            container,
            medicine: medicine.map(str::to_string),
            scheduled_at,
            status: DoseStatus::Pending,
            taken_at: None,
        };
        let mut records = self.reload()?;
        records.push(record.clone());
        write_json(&self.path, &*records)?;
        Ok(record)
    }

    /// Marks the most recent pending dose of `container`. `None` when
    /// nothing is pending.
    pub fn mark_taken(
        &self,
        container: ContainerId,
        at: DateTime<Utc>,
    ) -> Result<Option<DoseRecord>, StoreError> {
        let mut records = self.reload()?;
        let Some(record) = records
            .iter_mut()
            .rev()
            .find(|r| r.container == container && r.status == DoseStatus::Pending)
        else {
            return Ok(None);
        };

        record.status = DoseStatus::Taken;
        record.taken_at = Some(at);
        let marked = record.clone();
        write_json(&self.path, &*records)?;
        info!("Marked dose from container {container} as taken");
        Ok(Some(marked))
    }

    pub fn records(&self) -> Vec<DoseRecord> {
        self.latest().clone()
    }

    pub fn summary(&self) -> AdherenceSummary {
        let records = self.latest();
        AdherenceSummary {
            taken: records.iter().filter(|r| r.status == DoseStatus::Taken).count(),
            total: records.len(),
        }
    }
}
