//! In-memory conceptual memory — a directed labeled graph of entities.
//!
//! Entities live in an arena keyed by ID; edges live in a per-source
//! adjacency index keyed by `(target, relation_type)`, which makes
//! `add_relation` idempotent by construction. Traversal is an explicit
//! breadth-first walk with a visited set, so cycles terminate.

use async_trait::async_trait;
use chrono::Utc;
use mnemo_core::error::MemoryError;
use mnemo_core::memory::{ConceptualMemory, Entity, RelatedEntity, Relation, TraversalNode};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tokio::sync::RwLock;

#[derive(Default)]
struct Graph {
    entities: HashMap<String, Entity>,
    /// Lowercased name -> entity ID.
    by_name: HashMap<String, String>,
    /// source -> (target, relation_type) -> edge
    adjacency: HashMap<String, BTreeMap<(String, String), Relation>>,
}

impl Graph {
    /// Outgoing edges of `id`, heaviest first (ties broken by target ID).
    fn edges_by_weight(&self, id: &str) -> Vec<&Relation> {
        let mut edges: Vec<&Relation> = self
            .adjacency
            .get(id)
            .map(|m| m.values().collect())
            .unwrap_or_default();
        edges.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.target_id.cmp(&b.target_id))
        });
        edges
    }
}

pub struct InMemoryConceptualMemory {
    graph: RwLock<Graph>,
}

impl InMemoryConceptualMemory {
    pub fn new() -> Self {
        Self {
            graph: RwLock::new(Graph::default()),
        }
    }
}

impl Default for InMemoryConceptualMemory {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercase, collapse non-alphanumerics to single spaces, pad with spaces.
fn normalize_padded(text: &str) -> String {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect();
    format!(" {} ", words.join(" "))
}

#[async_trait]
impl ConceptualMemory for InMemoryConceptualMemory {
    async fn add_entity(&self, entity: Entity) -> Result<String, MemoryError> {
        let mut graph = self.graph.write().await;
        let key = entity.name.trim().to_lowercase();
        if let Some(existing) = graph.by_name.get(&key) {
            return Ok(existing.clone());
        }
        let id = entity.id.clone();
        graph.by_name.insert(key, id.clone());
        graph.entities.insert(id.clone(), entity);
        Ok(id)
    }

    async fn get_entity(&self, id: &str) -> Result<Option<Entity>, MemoryError> {
        Ok(self.graph.read().await.entities.get(id).cloned())
    }

    async fn find_entity(&self, name: &str) -> Result<Option<Entity>, MemoryError> {
        let graph = self.graph.read().await;
        Ok(graph
            .by_name
            .get(&name.trim().to_lowercase())
            .and_then(|id| graph.entities.get(id))
            .cloned())
    }

    async fn match_entities(&self, text: &str, limit: usize) -> Result<Vec<Entity>, MemoryError> {
        let haystack = normalize_padded(text);
        let graph = self.graph.read().await;
        let mut hits: Vec<Entity> = graph
            .entities
            .values()
            .filter(|e| {
                let needle = normalize_padded(&e.name);
                needle.trim().len() >= 2 && haystack.contains(&needle)
            })
            .cloned()
            .collect();
        hits.sort_by(|a, b| {
            b.mention_count
                .cmp(&a.mention_count)
                .then_with(|| a.name.cmp(&b.name))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn add_relation(&self, mut relation: Relation) -> Result<(), MemoryError> {
        let mut graph = self.graph.write().await;
        for id in [&relation.source_id, &relation.target_id] {
            if !graph.entities.contains_key(id) {
                return Err(MemoryError::NotFound(format!("entity {id}")));
            }
        }
        relation.updated_at = Utc::now();
        graph
            .adjacency
            .entry(relation.source_id.clone())
            .or_default()
            .insert(
                (relation.target_id.clone(), relation.relation_type.clone()),
                relation,
            );
        Ok(())
    }

    async fn get_related(&self, entity_id: &str) -> Result<Vec<RelatedEntity>, MemoryError> {
        let graph = self.graph.read().await;
        Ok(graph
            .edges_by_weight(entity_id)
            .into_iter()
            .filter_map(|rel| {
                graph.entities.get(&rel.target_id).map(|entity| RelatedEntity {
                    relation: rel.clone(),
                    entity: entity.clone(),
                })
            })
            .collect())
    }

    async fn traverse(
        &self,
        entity_id: &str,
        max_depth: usize,
    ) -> Result<Vec<TraversalNode>, MemoryError> {
        let graph = self.graph.read().await;
        if !graph.entities.contains_key(entity_id) {
            return Err(MemoryError::NotFound(format!("entity {entity_id}")));
        }

        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(entity_id);
        let mut frontier: VecDeque<(&str, usize)> = VecDeque::new();
        frontier.push_back((entity_id, 0));
        let mut out = Vec::new();

        while let Some((current, depth)) = frontier.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for rel in graph.edges_by_weight(current) {
                let target = rel.target_id.as_str();
                if !visited.insert(target) {
                    continue;
                }
                let Some(entity) = graph.entities.get(target) else {
                    continue;
                };
                out.push(TraversalNode {
                    entity: entity.clone(),
                    depth: depth + 1,
                    relation_type: rel.relation_type.clone(),
                    weight: rel.weight,
                    via: current.to_string(),
                });
                frontier.push_back((target, depth + 1));
            }
        }

        Ok(out)
    }

    async fn increment_mentions(&self, entity_id: &str) -> Result<u64, MemoryError> {
        let mut graph = self.graph.write().await;
        let entity = graph
            .entities
            .get_mut(entity_id)
            .ok_or_else(|| MemoryError::NotFound(format!("entity {entity_id}")))?;
        entity.mention_count += 1;
        Ok(entity.mention_count)
    }

    async fn degree(&self, entity_id: &str) -> Result<usize, MemoryError> {
        let graph = self.graph.read().await;
        if !graph.entities.contains_key(entity_id) {
            return Err(MemoryError::NotFound(format!("entity {entity_id}")));
        }
        Ok(graph
            .adjacency
            .iter()
            .flat_map(|(source, edges)| edges.keys().map(move |(target, _)| (source, target)))
            .filter(|(source, target)| *source == entity_id || *target == entity_id)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed(mem: &InMemoryConceptualMemory, names: &[&str]) -> Vec<String> {
        let mut ids = Vec::new();
        for n in names {
            ids.push(mem.add_entity(Entity::new(*n, "thing")).await.unwrap());
        }
        ids
    }

    #[tokio::test]
    async fn add_relation_is_idempotent_last_weight_wins() {
        let mem = InMemoryConceptualMemory::new();
        let ids = seed(&mem, &["alice", "rust"]).await;
        mem.add_relation(Relation::new(&ids[0], &ids[1], "uses", 0.3))
            .await
            .unwrap();
        mem.add_relation(Relation::new(&ids[0], &ids[1], "uses", 0.9))
            .await
            .unwrap();

        let related = mem.get_related(&ids[0]).await.unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].relation.weight, 0.9);

        // A different type is a different edge.
        mem.add_relation(Relation::new(&ids[0], &ids[1], "teaches", 0.1))
            .await
            .unwrap();
        assert_eq!(mem.get_related(&ids[0]).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn relation_requires_both_entities() {
        let mem = InMemoryConceptualMemory::new();
        let ids = seed(&mem, &["alice"]).await;
        let err = mem
            .add_relation(Relation::new(&ids[0], "ghost", "knows", 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn traverse_is_breadth_first_and_cycle_safe() {
        let mem = InMemoryConceptualMemory::new();
        let ids = seed(&mem, &["a", "b", "c", "d"]).await;
        // a -> b -> c -> a (cycle), a -> d
        mem.add_relation(Relation::new(&ids[0], &ids[1], "r", 0.5)).await.unwrap();
        mem.add_relation(Relation::new(&ids[1], &ids[2], "r", 0.5)).await.unwrap();
        mem.add_relation(Relation::new(&ids[2], &ids[0], "r", 0.5)).await.unwrap();
        mem.add_relation(Relation::new(&ids[0], &ids[3], "r", 0.9)).await.unwrap();

        let nodes = mem.traverse(&ids[0], 10).await.unwrap();
        let names: Vec<&str> = nodes.iter().map(|n| n.entity.name.as_str()).collect();
        assert_eq!(names, vec!["d", "b", "c"]);
        let depths: Vec<usize> = nodes.iter().map(|n| n.depth).collect();
        assert_eq!(depths, vec![1, 1, 2]);
        assert!(depths.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(nodes[2].via, ids[1]);
    }

    #[tokio::test]
    async fn traverse_respects_max_depth() {
        let mem = InMemoryConceptualMemory::new();
        let ids = seed(&mem, &["a", "b", "c"]).await;
        mem.add_relation(Relation::new(&ids[0], &ids[1], "r", 1.0)).await.unwrap();
        mem.add_relation(Relation::new(&ids[1], &ids[2], "r", 1.0)).await.unwrap();

        assert!(mem.traverse(&ids[0], 0).await.unwrap().is_empty());
        assert_eq!(mem.traverse(&ids[0], 1).await.unwrap().len(), 1);
        assert_eq!(mem.traverse(&ids[0], 2).await.unwrap().len(), 2);
        assert!(mem.traverse("missing", 2).await.is_err());
    }

    #[tokio::test]
    async fn find_and_match_entities() {
        let mem = InMemoryConceptualMemory::new();
        let ids = seed(&mem, &["New York", "AI", "Rust"]).await;
        mem.increment_mentions(&ids[2]).await.unwrap();

        let found = mem.find_entity("new york").await.unwrap().unwrap();
        assert_eq!(found.id, ids[0]);

        let matched = mem
            .match_entities("I moved to new-york and write Rust; she said hi", 10)
            .await
            .unwrap();
        let names: Vec<&str> = matched.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Rust", "New York"]);
    }

    #[tokio::test]
    async fn duplicate_entity_name_returns_existing_id() {
        let mem = InMemoryConceptualMemory::new();
        let first = mem.add_entity(Entity::new("Rust", "language")).await.unwrap();
        let second = mem.add_entity(Entity::new("rust", "language")).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn increment_mentions_counts() {
        let mem = InMemoryConceptualMemory::new();
        let ids = seed(&mem, &["x"]).await;
        assert_eq!(mem.increment_mentions(&ids[0]).await.unwrap(), 1);
        assert_eq!(mem.increment_mentions(&ids[0]).await.unwrap(), 2);
        assert!(mem.increment_mentions("nope").await.is_err());
    }

    #[tokio::test]
    async fn degree_counts_both_directions() {
        let mem = InMemoryConceptualMemory::new();
        let ids = seed(&mem, &["alice", "bob", "rust"]).await;
        mem.add_relation(Relation::new(&ids[0], &ids[1], "knows", 0.5))
            .await
            .unwrap();
        mem.add_relation(Relation::new(&ids[2], &ids[0], "used_by", 0.5))
            .await
            .unwrap();
        mem.add_relation(Relation::new(&ids[0], &ids[0], "reflects_on", 0.1))
            .await
            .unwrap();

        assert_eq!(mem.degree(&ids[0]).await.unwrap(), 3);
        assert_eq!(mem.degree(&ids[1]).await.unwrap(), 1);
        assert!(mem.degree("nope").await.is_err());
    }
}
