//! Filter stage: wraps the composite frontier filter as a pipeline stage.
//!
//! Every url the analyzer discovers, plus whatever the seeder injects
//! directly, passes through here exactly once before it may re-enter the
//! fetcher queue (`spec.md` §3's pipeline cycle).

use crawler::config::Config;
use crawler::error::Result;
use crawler::filter::CompositeFilter;
use crawler::record::{PrioritizedUrl, UrlRecord};

use crate::stage::Stage;

pub struct FilterStage {
    filter: CompositeFilter,
}

impl FilterStage {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            filter: CompositeFilter::open(config)?,
        })
    }
}

impl Stage for FilterStage {
    type Input = UrlRecord;
    type Output = PrioritizedUrl;

    fn on_message(&mut self, record: UrlRecord) -> Result<Option<PrioritizedUrl>> {
        self.filter.process(&record)
    }
}
