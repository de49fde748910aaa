//! Append-only edge log, backed by `sqlite`.
//!
//! Ported from `illume/filter/graph.py`: the logger stage records every
//! `(source, target)` edge it observes, timestamped, with no dedup and no
//! delete path — it is a write-mostly audit trail, not a filter.

use std::path::Path;

use crate::error::Result;
use crate::record::GraphEdge;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS graph (\
    source TEXT NOT NULL, target TEXT NOT NULL, observed INTEGER NOT NULL)";
const CREATE_SOURCE_IDX: &str = "CREATE INDEX IF NOT EXISTS graph_source_idx ON graph (source)";
const INSERT: &str = "INSERT INTO graph (source, target, observed) VALUES (?, ?, ?)";
const COUNT: &str = "SELECT COUNT(*) FROM graph";

/// The logger stage's durable record of observed edges.
pub struct EntityGraph {
    conn: sqlite::Connection,
}

impl EntityGraph {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = sqlite::open(path)?;
        conn.execute(CREATE_TABLE)?;
        conn.execute(CREATE_SOURCE_IDX)?;
        Ok(Self { conn })
    }

    pub fn record(&self, source: &str, target: &str, observed: i64) -> Result<()> {
        let mut stmt = self.conn.prepare(INSERT)?;
        stmt.bind((1, source))?;
        stmt.bind((2, target))?;
        stmt.bind((3, observed))?;
        stmt.next()?;
        Ok(())
    }

    /// Record every edge discovered from a single fetched page inside one
    /// transaction, mirroring `illume/filter/graph.py`'s `record_many`.
    pub fn record_bulk(&self, edges: &[GraphEdge]) -> Result<()> {
        self.conn.execute("BEGIN")?;
        for edge in edges {
            if let Err(e) = self.record(&edge.source, &edge.target, edge.observed) {
                self.conn.execute("ROLLBACK")?;
                return Err(e);
            }
        }
        self.conn.execute("COMMIT")?;
        Ok(())
    }

    pub fn edge_count(&self) -> Result<i64> {
        let mut stmt = self.conn.prepare(COUNT)?;
        stmt.next()?;
        Ok(stmt.read::<i64, _>(0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn records_and_counts_edges() {
        let dir = tempdir().unwrap();
        let graph = EntityGraph::open(dir.path().join("graph.db")).unwrap();
        graph.record("a.test", "b.test", 1_700_000_000).unwrap();
        graph.record("a.test", "c.test", 1_700_000_001).unwrap();
        assert_eq!(graph.edge_count().unwrap(), 2);
    }

    #[test]
    fn bulk_record_is_transactional() {
        let dir = tempdir().unwrap();
        let graph = EntityGraph::open(dir.path().join("graph.db")).unwrap();
        let edges = vec![
            GraphEdge { source: "a.test".into(), target: "b.test".into(), observed: 1 },
            GraphEdge { source: "a.test".into(), target: "d.test".into(), observed: 2 },
        ];
        graph.record_bulk(&edges).unwrap();
        assert_eq!(graph.edge_count().unwrap(), 2);
    }
}
