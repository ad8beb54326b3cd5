//! Variable stores for merged batch results.
//!
//! Two stores receive every stored variable:
//! - [`ContextStore`]: ephemeral, in-process, lives as long as the session.
//! - [`StateStore`]: durable when opened on a directory (redb), memory-only
//!   otherwise.
//!
//! Both overwrite by variable name. Writes are single-writer-at-a-time: redb
//! serializes write transactions and `DashMap` shards its locks.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use redb::{Database, ReadableTable, TableDefinition, TableError};
use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::graph::Record;
use crate::provenance::Provenance;

/// Result type for state store operations.
pub type StateResult<T> = std::result::Result<T, StateError>;

/// Table of stored variables (name → JSON-encoded [`StateVariable`]).
const VARIABLES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("variables");

/// File name of the redb database inside the state directory.
const DB_FILE: &str = "graph-analyst.redb";

/// A named collection of records with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateVariable {
    pub name: String,
    pub items: Vec<Record>,
    pub provenance: Provenance,
}

/// Session-scoped variables.
#[derive(Debug, Default)]
pub struct ContextStore {
    variables: DashMap<String, Vec<Record>>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `items` under `name`, replacing any previous value.
    pub fn set(&self, name: &str, items: Vec<Record>) {
        self.variables.insert(name.to_string(), items);
    }

    pub fn get(&self, name: &str) -> Option<Vec<Record>> {
        self.variables.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

enum Backing {
    Memory(DashMap<String, StateVariable>),
    Durable(Arc<Database>),
}

/// Variables that outlive the session when backed by a directory.
pub struct StateStore {
    backing: Backing,
}

impl StateStore {
    /// A store that forgets everything when dropped.
    pub fn memory() -> Self {
        Self {
            backing: Backing::Memory(DashMap::new()),
        }
    }

    /// Open or create a durable store in `dir`.
    pub fn open(dir: &Path) -> StateResult<Self> {
        std::fs::create_dir_all(dir).map_err(|e| StateError::Io { source: e })?;
        let db_path = dir.join(DB_FILE);
        let db = Database::create(&db_path).map_err(|e| StateError::Redb {
            message: format!("failed to open redb at {}: {e}", db_path.display()),
        })?;
        Ok(Self {
            backing: Backing::Durable(Arc::new(db)),
        })
    }

    /// Durable when `dir` is given, memory-only otherwise.
    pub fn from_dir(dir: Option<&Path>) -> StateResult<Self> {
        match dir {
            Some(dir) => Self::open(dir),
            None => Ok(Self::memory()),
        }
    }

    pub fn is_durable(&self) -> bool {
        matches!(self.backing, Backing::Durable(_))
    }

    /// Write a variable, replacing any previous value with the same name.
    pub fn put(&self, variable: &StateVariable) -> StateResult<()> {
        match &self.backing {
            Backing::Memory(map) => {
                map.insert(variable.name.clone(), variable.clone());
                Ok(())
            }
            Backing::Durable(db) => {
                let bytes = serde_json::to_vec(variable).map_err(|e| StateError::Serialization {
                    message: e.to_string(),
                })?;
                let txn = db.begin_write().map_err(|e| StateError::Redb {
                    message: format!("begin_write failed: {e}"),
                })?;
                {
                    let mut table = txn.open_table(VARIABLES_TABLE).map_err(|e| StateError::Redb {
                        message: format!("open_table failed: {e}"),
                    })?;
                    table
                        .insert(variable.name.as_str(), bytes.as_slice())
                        .map_err(|e| StateError::Redb {
                            message: format!("insert failed: {e}"),
                        })?;
                }
                txn.commit().map_err(|e| StateError::Redb {
                    message: format!("commit failed: {e}"),
                })
            }
        }
    }

    /// Read a variable. Returns `Ok(None)` if it was never written.
    pub fn get(&self, name: &str) -> StateResult<Option<StateVariable>> {
        match &self.backing {
            Backing::Memory(map) => Ok(map.get(name).map(|entry| entry.value().clone())),
            Backing::Durable(db) => {
                let txn = db.begin_read().map_err(|e| StateError::Redb {
                    message: format!("begin_read failed: {e}"),
                })?;
                let table = match txn.open_table(VARIABLES_TABLE) {
                    Ok(table) => table,
                    Err(TableError::TableDoesNotExist(_)) => return Ok(None),
                    Err(e) => {
                        return Err(StateError::Redb {
                            message: format!("open_table failed: {e}"),
                        });
                    }
                };
                let Some(guard) = table.get(name).map_err(|e| StateError::Redb {
                    message: format!("get failed: {e}"),
                })?
                else {
                    return Ok(None);
                };
                serde_json::from_slice(guard.value())
                    .map(Some)
                    .map_err(|e| StateError::Serialization {
                        message: e.to_string(),
                    })
            }
        }
    }

    /// Names of all stored variables, sorted.
    pub fn names(&self) -> StateResult<Vec<String>> {
        let mut names: Vec<String> = match &self.backing {
            Backing::Memory(map) => map.iter().map(|entry| entry.key().clone()).collect(),
            Backing::Durable(db) => {
                let txn = db.begin_read().map_err(|e| StateError::Redb {
                    message: format!("begin_read failed: {e}"),
                })?;
                let table = match txn.open_table(VARIABLES_TABLE) {
                    Ok(table) => table,
                    Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
                    Err(e) => {
                        return Err(StateError::Redb {
                            message: format!("open_table failed: {e}"),
                        });
                    }
                };
                let iter = table.iter().map_err(|e| StateError::Redb {
                    message: format!("iter failed: {e}"),
                })?;
                let mut names = Vec::new();
                for entry in iter {
                    let (key, _) = entry.map_err(|e| StateError::Redb {
                        message: format!("iter failed: {e}"),
                    })?;
                    names.push(key.value().to_string());
                }
                names
            }
        };
        names.sort();
        Ok(names)
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("durable", &self.is_durable())
            .finish()
    }
}
