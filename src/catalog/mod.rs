//! Read-only catalog of knot and link invariants.
//!
//! The catalog is built once from pre-parsed records and never mutated.
//! Records are partitioned by component count: knots (`== 1`) and links
//! (`> 1`) keep separate name indexes, so the same name may exist in both.

pub mod error;
pub mod record;

use std::collections::{BTreeSet, HashMap, HashSet};

pub use error::{CatalogError, CatalogResult};
pub use record::{InvariantRecord, Partition, SymmetryClass, base_name};

/// Immutable snapshot of invariant records with O(1) name lookup.
#[derive(Debug, Clone, Default)]
pub struct InvariantCatalog {
    records: Vec<InvariantRecord>,
    knot_index: HashMap<String, usize>,
    link_index: HashMap<String, usize>,
}

impl InvariantCatalog {
    /// Build a catalog, indexing names per partition.
    ///
    /// Fails on an empty name, a zero component count, or a name that
    /// repeats within a partition.
    pub fn from_records(records: Vec<InvariantRecord>) -> CatalogResult<Self> {
        let mut knot_index = HashMap::new();
        let mut link_index = HashMap::new();

        for (i, record) in records.iter().enumerate() {
            if record.name.trim().is_empty() {
                return Err(CatalogError::InvalidRecord {
                    name: format!("#{i}"),
                    message: "empty name".into(),
                });
            }
            if record.component_count == 0 {
                return Err(CatalogError::InvalidRecord {
                    name: record.name.clone(),
                    message: "component_count must be >= 1".into(),
                });
            }
            let index = if record.is_knot() {
                &mut knot_index
            } else {
                &mut link_index
            };
            if index.insert(record.name.clone(), i).is_some() {
                return Err(CatalogError::DuplicateName {
                    name: record.name.clone(),
                    partition: record.partition().to_string(),
                });
            }
        }

        tracing::debug!(
            knots = knot_index.len(),
            links = link_index.len(),
            "invariant catalog indexed"
        );

        Ok(Self {
            records,
            knot_index,
            link_index,
        })
    }

    /// Parse a JSON array of already-normalized records.
    pub fn from_json_str(json: &str) -> CatalogResult<Self> {
        let records: Vec<InvariantRecord> =
            serde_json::from_str(json).map_err(|e| CatalogError::Parse {
                message: e.to_string(),
            })?;
        Self::from_records(records)
    }

    /// Look up a record by exact name, searching knots before links.
    pub fn lookup_exact(&self, name: &str) -> CatalogResult<&InvariantRecord> {
        self.knot_index
            .get(name)
            .or_else(|| self.link_index.get(name))
            .map(|&i| &self.records[i])
            .ok_or_else(|| CatalogError::NotFound { name: name.into() })
    }

    /// Look up a record by exact name within one partition.
    pub fn lookup_in(&self, partition: Partition, name: &str) -> CatalogResult<&InvariantRecord> {
        let hit = match partition {
            Partition::Knots => self.knot_index.get(name),
            Partition::Links => self.link_index.get(name),
            Partition::All => return self.lookup_exact(name),
        };
        hit.map(|&i| &self.records[i])
            .ok_or_else(|| CatalogError::NotFound { name: name.into() })
    }

    /// Linear scan returning every record the predicate accepts, in catalog order.
    pub fn filter<P>(&self, predicate: P) -> Vec<&InvariantRecord>
    where
        P: Fn(&InvariantRecord) -> bool,
    {
        self.records.iter().filter(|r| predicate(r)).collect()
    }

    /// Records of one partition paired with their catalog position.
    pub fn partition(
        &self,
        partition: Partition,
    ) -> impl Iterator<Item = (usize, &InvariantRecord)> + '_ {
        self.records
            .iter()
            .enumerate()
            .filter(move |(_, r)| partition.admits(r.component_count))
    }

    /// Number of records in a partition.
    pub fn partition_len(&self, partition: Partition) -> usize {
        match partition {
            Partition::Knots => self.knot_index.len(),
            Partition::Links => self.link_index.len(),
            Partition::All => self.records.len(),
        }
    }

    /// A new snapshot with the named records removed (from every partition).
    pub fn without(&self, names: &[&str]) -> Self {
        let drop: HashSet<&str> = names.iter().copied().collect();
        let kept: Vec<InvariantRecord> = self
            .records
            .iter()
            .filter(|r| !drop.contains(r.name.as_str()))
            .cloned()
            .collect();
        // Removing rows from a valid catalog cannot introduce duplicates.
        let mut knot_index = HashMap::new();
        let mut link_index = HashMap::new();
        for (i, r) in kept.iter().enumerate() {
            if r.is_knot() {
                knot_index.insert(r.name.clone(), i);
            } else {
                link_index.insert(r.name.clone(), i);
            }
        }
        Self {
            records: kept,
            knot_index,
            link_index,
        }
    }

    /// Names of every record whose base name is in `bases`.
    pub fn names_with_base(&self, bases: &HashSet<String>) -> BTreeSet<String> {
        self.records
            .iter()
            .filter(|r| bases.contains(r.base_name()))
            .map(|r| r.name.clone())
            .collect()
    }

    /// All records in catalog order.
    pub fn records(&self) -> &[InvariantRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
