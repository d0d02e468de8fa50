//! Container schedules, persisted as `containers.json`

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use pillnow_proto::{
    ContainerDocument, ContainerId, ContainerSchedule, DocumentError, document_key,
    parse_document_key,
};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub const CONTAINERS_FILE: &str = "containers.json";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("container {0} not found")]
    ContainerNotFound(ContainerId),
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{}: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Document(#[from] DocumentError),
}

/// Where the scheduler reads container schedules from
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn container(&self, id: ContainerId) -> Result<ContainerSchedule, StoreError>;

    /// Every container of the current user, in slot order
    async fn containers(&self) -> Result<Vec<ContainerSchedule>, StoreError>;
}

/// Missing file reads as the default value
pub(crate) fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StoreError> {
    if !path.exists() {
        return Ok(T::default());
    }
    let data = fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&data).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let data = serde_json::to_string_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, data).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

type Documents = BTreeMap<String, ContainerDocument>;

/// Documents of every user live in one file; a store only sees its own.
pub struct JsonStore {
    path: PathBuf,
    user_id: String,
    /// Serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl JsonStore {
    pub fn new(path: PathBuf, user_id: &str) -> Self {
        Self {
            path,
            user_id: user_id.to_string(),
            write_lock: Mutex::new(()),
        }
    }

    /// `containers.json` inside the application home
    pub fn in_home(home: &Path, user_id: &str) -> Self {
        Self::new(home.join(CONTAINERS_FILE), user_id)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn load(&self) -> Result<Documents, StoreError> {
        read_json(&self.path)
    }

    fn get(&self, id: ContainerId) -> Result<ContainerSchedule, StoreError> {
        let docs = self.load()?;
        let doc = docs
            .get(&document_key(id, &self.user_id))
            .ok_or(StoreError::ContainerNotFound(id))?;
        Ok(ContainerSchedule::from_document(id, doc)?)
    }

    fn list(&self) -> Result<Vec<ContainerSchedule>, StoreError> {
        let docs = self.load()?;
        let mut schedules = Vec::new();
        for (key, doc) in &docs {
            let (id, user_id) = match parse_document_key(key) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("Ignoring document {key:?}: {e}");
                    continue;
                }
            };
            if user_id == self.user_id {
                schedules.push(ContainerSchedule::from_document(id, doc)?);
            }
        }
        schedules.sort_by_key(|s| s.id);
        Ok(schedules)
    }

    /// Load (or start) a container, apply `change`, stamp and save it
    fn update<F>(&self, id: ContainerId, change: F) -> Result<ContainerSchedule, StoreError>
    where
        F: FnOnce(&mut ContainerSchedule),
    {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut docs = self.load()?;
        let key = document_key(id, &self.user_id);

        let mut schedule = match docs.get(&key) {
            Some(doc) => ContainerSchedule::from_document(id, doc)?,
            None => ContainerSchedule::new(id, &self.user_id),
        };
        change(&mut schedule);
        schedule.last_updated = Some(Utc::now());

        docs.insert(key, schedule.to_document());
        write_json(&self.path, &docs)?;
        debug!("Saved container {id} to {}", self.path.display());
        Ok(schedule)
    }

    pub fn select_pill(&self, id: ContainerId, medicine: &str) -> Result<ContainerSchedule, StoreError> {
        let medicine = medicine.trim();
        self.update(id, |s| {
            s.medicine = (!medicine.is_empty()).then(|| medicine.to_string());
        })
    }

    /// Appends unless the exact time is already on the list
    pub fn add_alarm(&self, id: ContainerId, at: DateTime<Utc>) -> Result<ContainerSchedule, StoreError> {
        self.update(id, |s| {
            if !s.alarms.contains(&at) {
                s.alarms.push(at);
            }
        })
    }

    pub fn set_alarms(
        &self,
        id: ContainerId,
        alarms: Vec<DateTime<Utc>>,
    ) -> Result<ContainerSchedule, StoreError> {
        self.update(id, |s| {
            s.alarms.clear();
            for at in alarms {
                if !s.alarms.contains(&at) {
                    s.alarms.push(at);
                }
            }
        })
    }

    pub fn set_phone_number(
        &self,
        id: ContainerId,
        phone: Option<&str>,
    ) -> Result<ContainerSchedule, StoreError> {
        let phone = phone.map(str::trim).filter(|p| !p.is_empty()).map(str::to_string);
        self.update(id, |s| s.phone_number = phone)
    }

    /// Returns whether the container existed
    pub fn remove_container(&self, id: ContainerId) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut docs = self.load()?;
        let removed = docs.remove(&document_key(id, &self.user_id)).is_some();
        if removed {
            write_json(&self.path, &docs)?;
        }
        Ok(removed)
    }
}

#[async_trait]
impl ScheduleStore for JsonStore {
    async fn container(&self, id: ContainerId) -> Result<ContainerSchedule, StoreError> {
        self.get(id)
    }

    async fn containers(&self) -> Result<Vec<ContainerSchedule>, StoreError> {
        self.list()
    }
}
