//! In-memory endpoint cache
//!
//! Holds at most one payload per endpoint id. A cached payload is reused
//! until the caller asks for a refresh or releases it; the remote resource
//! changing in the meantime is not observed.

use std::collections::HashMap;
use tracing::{debug, info};

use crate::derive::TableDeriver;
use crate::error::{IngestError, Result};
use crate::fetch::{FetchArgs, FetcherRegistry};
use crate::table::{Payload, Table};

#[derive(Debug)]
pub struct EndpointCache {
    fetchers: FetcherRegistry,
    deriver: TableDeriver,
    payloads: HashMap<String, Payload>,
    fetches: usize,
}

impl EndpointCache {
    pub fn new(fetchers: FetcherRegistry, deriver: TableDeriver) -> Self {
        Self {
            fetchers,
            deriver,
            payloads: HashMap::new(),
            fetches: 0,
        }
    }

    /// Rows of `table`, fetching `endpoint` first when forced or not cached
    ///
    /// A failed fetch leaves any existing entry for `endpoint` in place.
    pub async fn get_table(
        &mut self,
        endpoint: &str,
        table: &str,
        force_refresh: bool,
        args: &FetchArgs,
    ) -> Result<Table> {
        if force_refresh || !self.payloads.contains_key(endpoint) {
            let fetcher = self.fetchers.get(endpoint)?;
            debug!(endpoint, force_refresh, "Fetching endpoint");
            let payload = fetcher.fetch(args).await?;
            self.fetches += 1;
            self.payloads.insert(endpoint.to_string(), payload);
        } else {
            debug!(endpoint, table, "Using cached endpoint");
        }

        let payload = self
            .payloads
            .get(endpoint)
            .ok_or_else(|| IngestError::NotCached(endpoint.to_string()))?;
        self.deriver.derive(endpoint, payload, table)
    }

    /// Drop the cached payload for `endpoint`
    pub fn release_endpoint(&mut self, endpoint: &str) -> Result<()> {
        match self.payloads.remove(endpoint) {
            Some(_) => {
                info!(endpoint, "Released endpoint from cache");
                Ok(())
            },
            None => Err(IngestError::NotCached(endpoint.to_string())),
        }
    }

    pub fn is_cached(&self, endpoint: &str) -> bool {
        self.payloads.contains_key(endpoint)
    }

    /// Number of fetches performed since construction
    pub fn fetch_count(&self) -> usize {
        self.fetches
    }
}
