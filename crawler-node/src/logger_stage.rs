//! Logger stage: the pipeline's terminal sink.
//!
//! Records every `(source, target)` edge an analyzed page produced into the
//! entity graph. Ported from `illume/crawler/basic.py`'s final pipeline
//! stage, which does the equivalent write-then-drop.

use crawler::config::Config;
use crawler::error::Result;
use crawler::filter::EntityGraph;
use crawler::record::{AnalyzedResult, GraphEdge};

use crate::stage::Stage;

pub struct LoggerStage {
    graph: EntityGraph,
}

impl LoggerStage {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            graph: EntityGraph::open(&config.graph_logger_path)?,
        })
    }
}

impl Stage for LoggerStage {
    type Input = AnalyzedResult;
    type Output = ();

    fn on_message(&mut self, analyzed: AnalyzedResult) -> Result<Option<()>> {
        let observed = chrono::Utc::now().timestamp();

        let edges: Vec<GraphEdge> = analyzed
            .urls
            .iter()
            .map(|url| GraphEdge {
                source: analyzed.fetch.record.domain.clone(),
                target: url.domain.clone(),
                observed,
            })
            .collect();

        if !edges.is_empty() {
            self.graph.record_bulk(&edges)?;
        }

        Ok(None)
    }
}
