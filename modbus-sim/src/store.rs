use std::collections::HashMap;

use log::debug;
use thiserror::Error;

use crate::point::{RegisterPoint, ValidationError};

/// Whether disabled points participate in address-overlap rejection.
///
/// Overlap between enabled points is always ambiguous for the serving
/// backend. The original tool never settled the question for disabled
/// points, so it is a store policy here instead of a hardcoded answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlapPolicy {
    /// Only enabled points are checked against each other.
    #[default]
    EnabledOnly,
    /// Every point participates, enabled or not.
    AllPoints,
}

#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("invalid point {id:?}: {source}")]
    Validation {
        id: String,
        #[source]
        source: ValidationError,
    },
    #[error("register span of {id:?} overlaps {other_id:?}")]
    AddressRangeOverlap { id: String, other_id: String },
    #[error("duplicate id {id:?}")]
    DuplicateId { id: String },
    #[error("no register point with id {id:?}")]
    UnknownId { id: String },
    #[error("import rejected at entry {index} ({id:?}): {source}")]
    Import {
        index: usize,
        id: String,
        #[source]
        source: Box<StoreError>,
    },
}

/// In-memory authoritative collection of register points plus the latest
/// polled raw values.
///
/// Points keep insertion order for stable table rendering. Every mutation
/// replaces whole entries; raw values are superseded wholesale by each poll
/// snapshot, never patched in place.
#[derive(Debug, Default)]
pub struct PointStore {
    points: Vec<RegisterPoint>,
    values: HashMap<String, Vec<u8>>,
    overlap_policy: OverlapPolicy,
}

impl PointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_overlap_policy(overlap_policy: OverlapPolicy) -> Self {
        Self {
            overlap_policy,
            ..Self::default()
        }
    }

    pub fn overlap_policy(&self) -> OverlapPolicy {
        self.overlap_policy
    }

    /// Points in insertion order.
    pub fn list(&self) -> &[RegisterPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&RegisterPoint> {
        self.points.iter().find(|p| p.id == id)
    }

    fn check_overlap(
        point: &RegisterPoint,
        against: &[RegisterPoint],
        policy: OverlapPolicy,
    ) -> Result<(), StoreError> {
        for other in against {
            if other.id == point.id {
                continue;
            }
            if policy == OverlapPolicy::EnabledOnly && !(point.enabled && other.enabled) {
                continue;
            }
            if point.overlaps(other) {
                return Err(StoreError::AddressRangeOverlap {
                    id: point.id.clone(),
                    other_id: other.id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Insert a new point or replace the existing entry with the same id
    /// whole, keeping its position. Nothing is mutated on failure.
    pub fn upsert(&mut self, point: RegisterPoint) -> Result<(), StoreError> {
        point.validate().map_err(|source| StoreError::Validation {
            id: point.id.clone(),
            source,
        })?;
        Self::check_overlap(&point, &self.points, self.overlap_policy)?;

        match self.points.iter_mut().find(|p| p.id == point.id) {
            Some(existing) => *existing = point,
            None => self.points.push(point),
        }
        Ok(())
    }

    /// Remove a point and its raw value entry.
    pub fn remove(&mut self, id: &str) -> Result<RegisterPoint, StoreError> {
        let index = self
            .points
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| StoreError::UnknownId { id: id.to_string() })?;
        self.values.remove(id);
        Ok(self.points.remove(index))
    }

    /// Replace the whole collection with an imported one, all-or-nothing.
    ///
    /// Every entry is checked (validity, duplicate ids, address overlap
    /// under the store policy) before anything is applied; the first
    /// offending entry is named in the error and the prior collection stays
    /// untouched. Raw values are cleared, the next poll repopulates them.
    pub fn import_all(&mut self, points: Vec<RegisterPoint>) -> Result<(), StoreError> {
        for (index, point) in points.iter().enumerate() {
            let fail = |source: StoreError| StoreError::Import {
                index,
                id: point.id.clone(),
                source: Box::new(source),
            };

            point
                .validate()
                .map_err(|source| {
                    fail(StoreError::Validation {
                        id: point.id.clone(),
                        source,
                    })
                })?;
            if points[..index].iter().any(|p| p.id == point.id) {
                return Err(fail(StoreError::DuplicateId {
                    id: point.id.clone(),
                }));
            }
            Self::check_overlap(point, &points[..index], self.overlap_policy).map_err(fail)?;
        }

        debug!("importing {} register points", points.len());
        self.points = points;
        self.values.clear();
        Ok(())
    }

    /// Immutable snapshot of the collection.
    pub fn export_all(&self) -> Vec<RegisterPoint> {
        self.points.clone()
    }

    /// Latest polled raw buffer for a point, falling back to its configured
    /// initial value before the first successful poll.
    pub fn raw_value(&self, id: &str) -> Option<&[u8]> {
        let point = self.get(id)?;
        Some(
            self.values
                .get(id)
                .map(Vec::as_slice)
                .unwrap_or(&point.init_value),
        )
    }

    /// Replace the raw value map with a fresh poll snapshot. Entries for
    /// ids no longer in the collection are dropped, never resurrected.
    pub fn apply_snapshot(&mut self, mut snapshot: HashMap<String, Vec<u8>>) {
        snapshot.retain(|id, _| self.points.iter().any(|p| p.id == *id));
        self.values = snapshot;
    }
}
