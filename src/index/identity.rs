//! Bidirectional mapping between document ids and store positions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::DocumentId;
use crate::error::{IndexError, IndexResult};
use crate::vector::Position;

/// `id2pos` and its exact inverse `pos2id`.
///
/// Only live documents are present; positions of deleted or replaced
/// documents (ghosts) appear in neither direction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(into = "Vec<(DocumentId, Position)>", try_from = "Vec<(DocumentId, Position)>")]
pub struct IdentityMap {
    id2pos: HashMap<DocumentId, Position>,
    pos2id: HashMap<Position, DocumentId>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `id` to `position`.
    ///
    /// Returns the position `id` occupied before, which is now a ghost.
    pub fn insert(&mut self, id: DocumentId, position: Position) -> Option<Position> {
        let previous = self.id2pos.insert(id.clone(), position);
        if let Some(old) = previous {
            self.pos2id.remove(&old);
        }
        self.pos2id.insert(position, id);
        previous
    }

    /// Removes `id` from `id2pos` only; call [`rebuild_inverse`](Self::rebuild_inverse)
    /// once a batch of removals is done.
    pub fn remove(&mut self, id: &DocumentId) -> Option<Position> {
        self.id2pos.remove(id)
    }

    /// Recomputes `pos2id` from `id2pos`.
    pub fn rebuild_inverse(&mut self) {
        self.pos2id = self
            .id2pos
            .iter()
            .map(|(id, pos)| (*pos, id.clone()))
            .collect();
    }

    /// Checks that both directions have the same cardinality.
    pub fn verify(&self) -> IndexResult<()> {
        if self.id2pos.len() != self.pos2id.len() {
            return Err(IndexError::ConsistencyViolation {
                id_count: self.id2pos.len(),
                position_count: self.pos2id.len(),
            });
        }
        Ok(())
    }

    pub fn position(&self, id: &DocumentId) -> Option<Position> {
        self.id2pos.get(id).copied()
    }

    pub fn id_at(&self, position: Position) -> Option<&DocumentId> {
        self.pos2id.get(&position)
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.id2pos.contains_key(id)
    }

    /// Number of live documents.
    pub fn len(&self) -> usize {
        self.id2pos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id2pos.is_empty()
    }

    /// Live ids in position order.
    pub fn ids_by_position(&self) -> Vec<(Position, &DocumentId)> {
        let mut entries: Vec<_> = self.pos2id.iter().map(|(p, id)| (*p, id)).collect();
        entries.sort_unstable_by_key(|(p, _)| *p);
        entries
    }
}

impl From<IdentityMap> for Vec<(DocumentId, Position)> {
    fn from(map: IdentityMap) -> Self {
        let mut entries: Vec<_> = map.id2pos.into_iter().collect();
        entries.sort_unstable_by_key(|(_, p)| *p);
        entries
    }
}

impl TryFrom<Vec<(DocumentId, Position)>> for IdentityMap {
    type Error = String;

    fn try_from(entries: Vec<(DocumentId, Position)>) -> Result<Self, Self::Error> {
        let mut map = IdentityMap::new();
        for (id, pos) in entries {
            if let Some(owner) = map.id_at(pos) {
                return Err(format!("position {pos} is claimed by both '{owner}' and '{id}'"));
            }
            if map.insert(id.clone(), pos).is_some() {
                return Err(format!("document '{id}' appears twice"));
            }
        }
        Ok(map)
    }
}
