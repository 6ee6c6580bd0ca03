//! RocksDB-backed vertex/edge store for a single document.
//!
//! Column families:
//! - `vertices`: `id → seq` (8 bytes big-endian); the uniqueness index
//! - `log`: `seq → bincode(Vertex)`; rows in commit order
//! - `edges`: `u32 BE len(child) ‖ child ‖ parent → ∅`; child-side prefix scans
//!
//! An append is one `WriteBatch`, so a vertex and all of its edges become
//! visible together or not at all. Parents are not required to exist.

use rocksdb::{
    Cache, ColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    SingleThreaded, WriteBatch,
};
use std::collections::{HashSet, VecDeque};
use std::path::Path;

use super::rocks::{StoreConfig, StoreError};
use crate::protocol::Vertex;

const CF_VERTICES: &str = "vertices";
const CF_LOG: &str = "log";
const CF_EDGES: &str = "edges";

const COLUMN_FAMILIES: &[&str] = &[CF_VERTICES, CF_LOG, CF_EDGES];

/// Longest id accepted as a vertex or parent key, in bytes.
pub const MAX_ID_LEN: usize = 4096;

/// Persisted causal graph of one document.
pub struct GraphStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    /// Sequence number for the next appended vertex
    next_seq: u64,
    /// Fail `append` while staging the edge at this index
    #[cfg(test)]
    fail_edge_at: Option<usize>,
}

impl GraphStore {
    /// Open (or create) the graph store at `config.path`.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let db_opts = config.db_options();
        let cache = Cache::new_lru_cache(config.block_cache_size);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, config.cf_options(&cache)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        let next_seq = Self::recover_sequence(&db)?;
        log::debug!(
            "Opened graph store {} ({next_seq} vertices)",
            config.path.display()
        );

        Ok(Self {
            db,
            config,
            next_seq,
            #[cfg(test)]
            fail_edge_at: None,
        })
    }

    /// One past the highest sequence number in the log.
    ///
    /// An unreadable last row is an error: guessing would let the next append
    /// overwrite a committed row.
    fn recover_sequence(db: &DBWithThreadMode<SingleThreaded>) -> Result<u64, StoreError> {
        let cf = db
            .cf_handle(CF_LOG)
            .ok_or_else(|| StoreError::Database(format!("Column family '{CF_LOG}' not found")))?;
        match db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item?;
                let seq = decode_seq(&key).ok_or_else(|| {
                    StoreError::Deserialization(format!("malformed log key {key:02x?}"))
                })?;
                Ok(seq + 1)
            }
            None => Ok(0),
        }
    }

    /// Persist a vertex and one edge per declared parent, atomically.
    ///
    /// Returns the vertex's sequence number once the batch is written.
    /// Fails with [`StoreError::DuplicateVertex`] if the id is taken.
    pub fn append(&mut self, vertex: &Vertex) -> Result<u64, StoreError> {
        check_id(&vertex.id)?;

        let cf_vertices = self.cf(CF_VERTICES)?;
        let cf_log = self.cf(CF_LOG)?;
        let cf_edges = self.cf(CF_EDGES)?;

        if self.db.get_cf(cf_vertices, vertex.id.as_bytes())?.is_some() {
            return Err(StoreError::DuplicateVertex(vertex.id.clone()));
        }

        let seq = self.next_seq;
        let row = encode_vertex(vertex)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_vertices, vertex.id.as_bytes(), seq.to_be_bytes());
        batch.put_cf(cf_log, seq.to_be_bytes(), &row);
        for (index, parent) in vertex.parents.iter().enumerate() {
            // A failure here drops the whole batch; nothing has been written yet.
            self.check_edge_staging(index)?;
            batch.put_cf(cf_edges, edge_key(&vertex.id, parent), b"");
        }

        self.db.write_opt(batch, &self.config.write_options())?;
        self.next_seq += 1;

        Ok(seq)
    }

    /// Every stored vertex outside the ancestor-closure of `frontier`, in
    /// commit order.
    ///
    /// Frontier ids that are not stored are ignored, as are parents that are
    /// not stored. The walk keeps a visited set, so cyclic parent references
    /// terminate.
    pub fn closure_complement(&self, frontier: &[String]) -> Result<Vec<Vertex>, StoreError> {
        let closure = self.ancestor_closure(frontier)?;

        let cf_log = self.cf(CF_LOG)?;
        let mut result = Vec::new();
        for item in self.db.iterator_cf(cf_log, IteratorMode::Start) {
            let (_, value) = item?;
            let vertex = decode_vertex(&value)?;
            if !closure.contains(&vertex.id) {
                result.push(vertex);
            }
        }

        Ok(result)
    }

    /// Breadth-first walk over child → parent edges starting at `frontier`.
    fn ancestor_closure(&self, frontier: &[String]) -> Result<HashSet<String>, StoreError> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        for id in frontier {
            if !visited.contains(id) && self.contains(id)? {
                visited.insert(id.clone());
                queue.push_back(id.clone());
            }
        }

        while let Some(child) = queue.pop_front() {
            for parent in self.parents_of(&child)? {
                if !visited.contains(&parent) && self.contains(&parent)? {
                    visited.insert(parent.clone());
                    queue.push_back(parent);
                }
            }
        }

        Ok(visited)
    }

    /// Parent ids recorded in the edge table for `child`.
    pub fn parents_of(&self, child: &str) -> Result<Vec<String>, StoreError> {
        let cf = self.cf(CF_EDGES)?;
        let prefix = edge_prefix(child);

        let mut parents = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let parent = String::from_utf8(key[prefix.len()..].to_vec())
                .map_err(|e| StoreError::Deserialization(e.to_string()))?;
            parents.push(parent);
        }

        Ok(parents)
    }

    /// Whether a vertex with this id is stored.
    pub fn contains(&self, id: &str) -> Result<bool, StoreError> {
        let cf = self.cf(CF_VERTICES)?;
        Ok(self.db.get_cf(cf, id.as_bytes())?.is_some())
    }

    /// Number of stored vertices.
    pub fn len(&self) -> u64 {
        self.next_seq
    }

    pub fn is_empty(&self) -> bool {
        self.next_seq == 0
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    #[cfg(test)]
    fn check_edge_staging(&self, index: usize) -> Result<(), StoreError> {
        if self.fail_edge_at == Some(index) {
            return Err(StoreError::Serialization(format!("edge {index} rejected")));
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn check_edge_staging(&self, _index: usize) -> Result<(), StoreError> {
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }
}

fn check_id(id: &str) -> Result<(), StoreError> {
    if id.is_empty() {
        return Err(StoreError::InvalidKey("empty id".into()));
    }
    if id.len() > MAX_ID_LEN {
        return Err(StoreError::InvalidKey(format!(
            "id of {} bytes exceeds {MAX_ID_LEN}",
            id.len()
        )));
    }
    Ok(())
}

/// Length-prefixed child id, so that one child's prefix never matches another's.
fn edge_prefix(child: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + child.len());
    key.extend_from_slice(&(child.len() as u32).to_be_bytes());
    key.extend_from_slice(child.as_bytes());
    key
}

/// Parents are not validated: any string, including one naming no vertex.
fn edge_key(child: &str, parent: &str) -> Vec<u8> {
    let mut key = edge_prefix(child);
    key.extend_from_slice(parent.as_bytes());
    key
}

fn decode_seq(key: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = key.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

fn encode_vertex(vertex: &Vertex) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(vertex, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode_vertex(bytes: &[u8]) -> Result<Vertex, StoreError> {
    let (vertex, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::Deserialization(e.to_string()))?;
    Ok(vertex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, GraphStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = GraphStore::open(StoreConfig::for_testing(dir.path().join("doc.db"))).unwrap();
        (dir, store)
    }

    fn ids(vertices: &[Vertex]) -> Vec<&str> {
        vertices.iter().map(|v| v.id.as_str()).collect()
    }

    fn frontier(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_append_then_closure_roundtrip() {
        let (_dir, mut store) = open_temp();
        store.append(&Vertex::root("A", "a")).unwrap();

        let all = store.closure_complement(&[]).unwrap();
        assert_eq!(all, vec![Vertex::root("A", "a")]);

        assert!(store.closure_complement(&frontier(&["A"])).unwrap().is_empty());
    }

    #[test]
    fn test_chain() {
        let (_dir, mut store) = open_temp();
        store.append(&Vertex::root("A", "")).unwrap();
        store.append(&Vertex::new("B", "", ["A"])).unwrap();
        store.append(&Vertex::new("C", "", ["B"])).unwrap();

        assert_eq!(ids(&store.closure_complement(&frontier(&["A"])).unwrap()), ["B", "C"]);
        assert_eq!(ids(&store.closure_complement(&frontier(&["B"])).unwrap()), ["C"]);
        assert!(store.closure_complement(&frontier(&["C"])).unwrap().is_empty());
    }

    #[test]
    fn test_sibling_branch_is_new() {
        let (_dir, mut store) = open_temp();
        store.append(&Vertex::root("A", "")).unwrap();
        store.append(&Vertex::new("B", "", ["A"])).unwrap();
        store.append(&Vertex::new("D", "", ["A"])).unwrap();

        assert_eq!(ids(&store.closure_complement(&frontier(&["B"])).unwrap()), ["D"]);
        assert!(store.closure_complement(&frontier(&["B", "D"])).unwrap().is_empty());
    }

    #[test]
    fn test_merge_vertex_closes_both_branches() {
        let (_dir, mut store) = open_temp();
        store.append(&Vertex::root("A", "")).unwrap();
        store.append(&Vertex::new("B", "", ["A"])).unwrap();
        store.append(&Vertex::new("D", "", ["A"])).unwrap();
        store.append(&Vertex::new("M", "", ["B", "D"])).unwrap();
        store.append(&Vertex::new("E", "", ["D"])).unwrap();

        assert_eq!(ids(&store.closure_complement(&frontier(&["M"])).unwrap()), ["E"]);
    }

    #[test]
    fn test_results_in_commit_order() {
        let (_dir, mut store) = open_temp();
        for id in ["z", "m", "a", "q"] {
            store.append(&Vertex::root(id, id)).unwrap();
        }
        assert_eq!(ids(&store.closure_complement(&[]).unwrap()), ["z", "m", "a", "q"]);
    }

    #[test]
    fn test_unknown_frontier_and_missing_parents() {
        let (_dir, mut store) = open_temp();
        // Parent "ghost" is never stored
        store.append(&Vertex::new("A", "", ["ghost"])).unwrap();
        store.append(&Vertex::new("B", "", ["A"])).unwrap();

        assert_eq!(ids(&store.closure_complement(&frontier(&["nope"])).unwrap()), ["A", "B"]);
        assert!(store.closure_complement(&frontier(&["B"])).unwrap().is_empty());
        assert_eq!(store.parents_of("A").unwrap(), vec!["ghost".to_string()]);
    }

    #[test]
    fn test_cycle_terminates() {
        let (_dir, mut store) = open_temp();
        // Forward reference closes a cycle once B arrives
        store.append(&Vertex::new("A", "", ["B"])).unwrap();
        store.append(&Vertex::new("B", "", ["A"])).unwrap();
        store.append(&Vertex::new("S", "", ["S"])).unwrap();
        store.append(&Vertex::root("X", "")).unwrap();

        assert_eq!(ids(&store.closure_complement(&frontier(&["A"])).unwrap()), ["S", "X"]);
        assert_eq!(ids(&store.closure_complement(&frontier(&["S"])).unwrap()), ["A", "B", "X"]);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let (_dir, mut store) = open_temp();
        store.append(&Vertex::root("A", "first")).unwrap();
        let err = store.append(&Vertex::root("A", "second")).unwrap_err();
        assert_eq!(err, StoreError::DuplicateVertex("A".into()));

        let all = store.closure_complement(&[]).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].data, "first");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_failed_edge_leaves_no_rows() {
        let (_dir, mut store) = open_temp();
        store.append(&Vertex::root("A", "")).unwrap();

        // Vertex row, log row and first edge are staged before the second edge fails
        store.fail_edge_at = Some(1);
        let err = store.append(&Vertex::new("V", "", ["A", "B"])).unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));

        assert!(!store.contains("V").unwrap());
        assert!(store.parents_of("V").unwrap().is_empty());
        assert_eq!(ids(&store.closure_complement(&[]).unwrap()), ["A"]);
        assert_eq!(store.len(), 1);

        // The id and the sequence number are still free
        store.fail_edge_at = None;
        assert_eq!(store.append(&Vertex::new("V", "", ["A", "B"])).unwrap(), 1);
        assert_eq!(ids(&store.closure_complement(&frontier(&["A"])).unwrap()), ["V"]);
    }

    #[test]
    fn test_unusual_parent_ids_accepted() {
        let (_dir, mut store) = open_temp();
        let long = "p".repeat(MAX_ID_LEN + 1);
        store.append(&Vertex::root("A", "")).unwrap();
        store
            .append(&Vertex::new("V", "", ["A".to_string(), String::new(), long.clone()]))
            .unwrap();

        let mut parents = store.parents_of("V").unwrap();
        parents.sort();
        assert_eq!(parents, vec![String::new(), "A".to_string(), long]);
        assert!(store.closure_complement(&frontier(&["V"])).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_log_key_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::for_testing(dir.path().join("doc.db"));
        {
            let mut store = GraphStore::open(config.clone()).unwrap();
            store.append(&Vertex::root("A", "")).unwrap();
            // Sorts after every 8-byte sequence key
            let cf = store.cf(CF_LOG).unwrap();
            store.db.put_cf(cf, [0xffu8], b"junk").unwrap();
        }

        let err = GraphStore::open(config).err().unwrap();
        assert!(matches!(err, StoreError::Deserialization(_)));
    }

    #[test]
    fn test_oversized_id_rejected() {
        let (_dir, mut store) = open_temp();
        let long = "x".repeat(MAX_ID_LEN + 1);
        assert!(matches!(
            store.append(&Vertex::root(long, "")),
            Err(StoreError::InvalidKey(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_edge_prefix_does_not_leak_between_children() {
        let (_dir, mut store) = open_temp();
        store.append(&Vertex::root("p", "")).unwrap();
        store.append(&Vertex::root("q", "")).unwrap();
        store.append(&Vertex::new("a", "", ["p"])).unwrap();
        store.append(&Vertex::new("ab", "", ["q"])).unwrap();

        assert_eq!(store.parents_of("a").unwrap(), vec!["p".to_string()]);
        assert_eq!(store.parents_of("ab").unwrap(), vec!["q".to_string()]);
    }

    #[test]
    fn test_reopen_preserves_graph_and_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::for_testing(dir.path().join("doc.db"));
        {
            let mut store = GraphStore::open(config.clone()).unwrap();
            store.append(&Vertex::root("A", "")).unwrap();
            store.append(&Vertex::new("B", "", ["A"])).unwrap();
        }

        let mut store = GraphStore::open(config).unwrap();
        assert_eq!(store.len(), 2);
        let seq = store.append(&Vertex::new("C", "", ["B"])).unwrap();
        assert_eq!(seq, 2);
        assert_eq!(ids(&store.closure_complement(&frontier(&["A"])).unwrap()), ["B", "C"]);
    }
}
