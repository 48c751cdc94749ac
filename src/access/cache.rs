//! Read model cache
//!
//! Results are kept per data source and slice id. Each data source remembers the
//! modification counter its results were fetched with; a different counter drops every
//! result of that data source.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::{AccessError, DataSource, ReadModelProvider, Slice};

type CachedValue = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
struct CachedSource {
    modification_count: u64,
    results: HashMap<String, CachedValue>,
}

/// Wraps a provider and remembers its successful results.
pub struct CachedReadModelProvider<P> {
    inner: P,
    sources: RwLock<HashMap<String, CachedSource>>,
}

impl<P> CachedReadModelProvider<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            sources: RwLock::new(HashMap::new()),
        }
    }

    /// Drops every cached result.
    pub fn clear(&self) {
        self.sources.write().clear();
    }

    fn cached<D: DataSource + ?Sized, T: Slice>(&self, data_source: &D, slice: &T) -> Option<T::Output> {
        let sources = self.sources.read();
        let source = sources.get(&data_source.id())?;
        if source.modification_count != data_source.modification_count() {
            return None;
        }
        source
            .results
            .get(&slice.id())?
            .downcast_ref::<T::Output>()
            .cloned()
    }

    fn store<D: DataSource + ?Sized, T: Slice>(&self, data_source: &D, slice: &T, output: &T::Output) {
        let modification_count = data_source.modification_count();
        let mut sources = self.sources.write();
        let source = sources.entry(data_source.id()).or_default();
        if source.modification_count != modification_count {
            debug!(
                "Data source {} changed, dropping {} cached results",
                data_source.id(),
                source.results.len()
            );
            source.results.clear();
            source.modification_count = modification_count;
        }
        source.results.insert(slice.id(), Arc::new(output.clone()));
    }
}

impl<D, P> ReadModelProvider<D> for CachedReadModelProvider<P>
where
    D: DataSource + ?Sized,
    P: ReadModelProvider<D>,
{
    fn slice<T: Slice>(&self, data_source: &D, slice: &T) -> Result<T::Output, AccessError> {
        if let Some(output) = self.cached(data_source, slice) {
            debug!("Read model cache hit for {}", slice.id());
            return Ok(output);
        }

        debug!("Read model cache miss for {}", slice.id());
        let output = self.inner.slice(data_source, slice)?;
        self.store(data_source, slice, &output);
        Ok(output)
    }
}
