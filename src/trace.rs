//! Declarative operation traces for conformance testing
//!
//! A trace document maps scenario names to a store configuration and an
//! ordered list of operations. Every operation carries the result it must
//! produce; running a scenario applies the operations to freshly built
//! stores and stops at the first result that differs.
//!
//! ```json
//! {
//!   "stm_lru_eviction": {
//!     "description": "LRU eviction when capacity is reached",
//!     "capacity": 2,
//!     "operations": [
//!       {"type": "add", "id": "1", "content": "first", "embedding": [1.0, 0.0, 0.0], "metadata": {}},
//!       {"type": "get", "id": "1", "expected": {"id": "1", "content": "first"}}
//!     ]
//!   }
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::item::{MemoryItem, Metadata, MetadataFilter, SearchHit};
use crate::ltm::LongTermMemory;
use crate::manager::MemoryManager;
use crate::stm::ShortTermMemory;

/// A set of named scenarios
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct Trace {
    pub scenarios: BTreeMap<String, Scenario>,
}

/// Store configuration plus the operations to apply to it
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub description: String,

    /// Short-term capacity for short-term-only scenarios
    #[serde(default)]
    pub capacity: Option<usize>,

    /// Embedding dimensionality for long-term and manager scenarios
    #[serde(default)]
    pub dimensionality: Option<usize>,

    /// Short-term capacity for manager scenarios
    #[serde(default)]
    pub stm_capacity: Option<usize>,

    pub operations: Vec<Operation>,
}

/// One step of a scenario, tagged by its `type` field
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    Add {
        id: String,
        content: String,
        embedding: Vec<f32>,
        #[serde(default, deserialize_with = "crate::item::null_as_empty")]
        metadata: Metadata,
    },
    Get {
        id: String,
        #[serde(default)]
        expected: Option<ExpectedItem>,
    },
    Search {
        query_embedding: Vec<f32>,
        k: usize,
        #[serde(default)]
        filter: Option<MetadataFilter>,
        /// Ids in the exact rank order required
        #[serde(default)]
        expected_order: Option<Vec<String>>,
        /// Ids that must be returned, order not asserted
        #[serde(default)]
        expected_ids: Option<Vec<String>>,
    },
    Delete {
        id: String,
        expected: bool,
    },
    Promote {
        id: String,
        embedding: Vec<f32>,
        expected: bool,
    },
    GetFromLtm {
        id: String,
        #[serde(default)]
        expected: Option<ExpectedItem>,
    },
}

impl Operation {
    fn name(&self) -> &'static str {
        match self {
            Operation::Add { .. } => "add",
            Operation::Get { .. } => "get",
            Operation::Search { .. } => "search",
            Operation::Delete { .. } => "delete",
            Operation::Promote { .. } => "promote",
            Operation::GetFromLtm { .. } => "get_from_ltm",
        }
    }

    fn needs_manager(&self) -> bool {
        matches!(self, Operation::Promote { .. } | Operation::GetFromLtm { .. })
    }
}

/// The fields of an item a `get` must observe; extra fields are ignored
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExpectedItem {
    pub id: String,
    pub content: String,
}

/// Outcome of a scenario that ran to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceReport {
    pub scenario: String,
    pub operations: usize,
}

/// The stores a scenario drives
enum Target {
    Stm(ShortTermMemory),
    Ltm(LongTermMemory),
    Manager(MemoryManager),
}

impl Trace {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn scenario(&self, name: &str) -> Option<&Scenario> {
        self.scenarios.get(name)
    }

    /// Run every scenario in name order, stopping at the first failure
    pub fn run_all(&self) -> Result<Vec<TraceReport>> {
        self.scenarios
            .iter()
            .map(|(name, scenario)| scenario.run(name))
            .collect()
    }
}

impl Scenario {
    /// Apply every operation to fresh stores and check each result
    pub fn run(&self, name: &str) -> Result<TraceReport> {
        info!(scenario = %name, description = %self.description, "Running trace scenario");

        let target = self.build_target()?;
        let runner = Runner {
            scenario: name,
            target,
        };

        for (step, op) in self.operations.iter().enumerate() {
            debug!(scenario = %name, step, op = op.name(), "Applying operation");
            runner.apply(step, op)?;
        }

        Ok(TraceReport {
            scenario: name.to_string(),
            operations: self.operations.len(),
        })
    }

    /// Manager scenarios give both a dimensionality and a short-term
    /// capacity, or use promotion; otherwise a dimensionality selects a
    /// long-term store and a bare capacity a short-term one.
    fn build_target(&self) -> Result<Target> {
        let wants_manager = self.operations.iter().any(Operation::needs_manager)
            || (self.dimensionality.is_some() && self.stm_capacity.is_some());

        match (self.dimensionality, self.stm_capacity.or(self.capacity)) {
            (Some(dimensionality), capacity) if wants_manager => {
                let capacity = capacity.unwrap_or_else(|| Config::default().stm_capacity);
                Ok(Target::Manager(MemoryManager::new(
                    ShortTermMemory::with_dimensionality(capacity, dimensionality)?,
                    LongTermMemory::new(dimensionality)?,
                )))
            }
            (Some(dimensionality), _) => Ok(Target::Ltm(LongTermMemory::new(dimensionality)?)),
            (None, Some(capacity)) if !wants_manager => Ok(Target::Stm(ShortTermMemory::new(capacity)?)),
            _ => Err(Error::config(
                "scenario needs `capacity`, `dimensionality`, or both",
            )),
        }
    }
}

struct Runner<'a> {
    scenario: &'a str,
    target: Target,
}

impl Runner<'_> {
    fn mismatch(&self, step: usize, detail: impl Into<String>) -> Error {
        Error::TraceMismatch {
            scenario: self.scenario.to_string(),
            step,
            detail: detail.into(),
        }
    }

    fn unsupported(&self, step: usize, op: &Operation) -> Error {
        Error::invalid_input(format!(
            "scenario '{}' step {}: `{}` is not supported by this store",
            self.scenario,
            step,
            op.name()
        ))
    }

    fn apply(&self, step: usize, op: &Operation) -> Result<()> {
        match op {
            Operation::Add {
                id,
                content,
                embedding,
                metadata,
            } => {
                let item = MemoryItem::new(id.as_str(), content.as_str(), embedding.clone())
                    .with_metadata(metadata.clone());
                match &self.target {
                    Target::Stm(stm) => stm.add(item).map(|_| ()),
                    Target::Ltm(ltm) => ltm.add(item),
                    Target::Manager(manager) => manager.add(item).map(|_| ()),
                }
            }

            Operation::Get { id, expected } => {
                let observed = match &self.target {
                    Target::Stm(stm) => stm.get(id)?,
                    Target::Ltm(ltm) => ltm.get(id)?,
                    Target::Manager(manager) => manager.stm().get(id)?,
                };
                self.check_item(step, id, observed.as_ref(), expected.as_ref())
            }

            Operation::Search {
                query_embedding,
                k,
                filter,
                expected_order,
                expected_ids,
            } => {
                let hits = match (&self.target, filter) {
                    (Target::Stm(_), Some(_)) => return Err(self.unsupported(step, op)),
                    (Target::Stm(stm), None) => stm.search(query_embedding, *k)?,
                    (Target::Ltm(ltm), filter) => ltm.search(query_embedding, *k, filter.as_ref())?,
                    (Target::Manager(manager), Some(filter)) => {
                        manager.search_ltm(query_embedding, *k, Some(filter))?
                    }
                    (Target::Manager(manager), None) => manager.search(query_embedding, *k)?,
                };
                self.check_search(step, &hits, expected_order.as_deref(), expected_ids.as_deref())
            }

            Operation::Delete { id, expected } => {
                let deleted = match &self.target {
                    Target::Ltm(ltm) => ltm.delete(id)?,
                    Target::Manager(manager) => manager.delete_from_ltm(id)?,
                    Target::Stm(_) => return Err(self.unsupported(step, op)),
                };
                self.check_bool(step, "delete", id, deleted, *expected)
            }

            Operation::Promote {
                id,
                embedding,
                expected,
            } => {
                let Target::Manager(manager) = &self.target else {
                    return Err(self.unsupported(step, op));
                };
                let promoted = manager.promote(id, embedding.clone())?;
                self.check_bool(step, "promote", id, promoted, *expected)
            }

            Operation::GetFromLtm { id, expected } => {
                let Target::Manager(manager) = &self.target else {
                    return Err(self.unsupported(step, op));
                };
                let observed = manager.get_from_ltm(id)?;
                self.check_item(step, id, observed.as_ref(), expected.as_ref())
            }
        }
    }

    fn check_item(
        &self,
        step: usize,
        id: &str,
        observed: Option<&MemoryItem>,
        expected: Option<&ExpectedItem>,
    ) -> Result<()> {
        match (observed, expected) {
            (None, None) => Ok(()),
            (Some(item), None) => Err(self.mismatch(step, format!("expected '{}' to be absent, found it", item.id))),
            (None, Some(_)) => Err(self.mismatch(step, format!("expected to find '{}'", id))),
            (Some(item), Some(want)) if item.id != want.id || item.content != want.content => {
                Err(self.mismatch(
                    step,
                    format!(
                        "expected ({:?}, {:?}), found ({:?}, {:?})",
                        want.id, want.content, item.id, item.content
                    ),
                ))
            }
            (Some(_), Some(_)) => Ok(()),
        }
    }

    fn check_search(
        &self,
        step: usize,
        hits: &[SearchHit],
        expected_order: Option<&[String]>,
        expected_ids: Option<&[String]>,
    ) -> Result<()> {
        if expected_order.is_none() && expected_ids.is_none() {
            return Err(Error::invalid_input(format!(
                "scenario '{}' step {}: search needs `expected_order` or `expected_ids`",
                self.scenario, step
            )));
        }

        let observed: Vec<&str> = hits.iter().map(SearchHit::id).collect();

        if let Some(order) = expected_order {
            if observed != order.iter().map(String::as_str).collect::<Vec<_>>() {
                return Err(self.mismatch(step, format!("expected order {:?}, found {:?}", order, observed)));
            }
        }

        if let Some(ids) = expected_ids {
            let want: BTreeSet<&str> = ids.iter().map(String::as_str).collect();
            let got: BTreeSet<&str> = observed.iter().copied().collect();
            if want != got || observed.len() != got.len() {
                return Err(self.mismatch(step, format!("expected ids {:?}, found {:?}", ids, observed)));
            }
        }

        Ok(())
    }

    fn check_bool(&self, step: usize, what: &str, id: &str, observed: bool, expected: bool) -> Result<()> {
        if observed != expected {
            return Err(self.mismatch(
                step,
                format!("{} '{}' returned {}, expected {}", what, id, observed, expected),
            ));
        }
        Ok(())
    }
}
