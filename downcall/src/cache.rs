//! Process-wide cache of prepared call descriptors.
//!
//! Descriptors are keyed by [`DescriptorKey`], argument tables by
//! [`ArgumentKey`]. Lookups take a shared read lock; building happens under a
//! single build lock so concurrent binders of the same shape agree on one
//! descriptor. Entries are never evicted, and nothing is inserted for a build
//! that failed.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, trace, warn};
use parking_lot::{Mutex, RwLock};

use crate::encoding::{ArgumentKey, DescriptorKey};
use crate::layout::Layout;
use crate::native::{ArgumentTable, CallDescriptor};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub descriptors_built: usize,
    pub argument_tables_built: usize,
    pub argument_tables_reused: usize,
}

#[derive(Default)]
struct Counters {
    hits: AtomicUsize,
    misses: AtomicUsize,
    descriptors_built: AtomicUsize,
    argument_tables_built: AtomicUsize,
    argument_tables_reused: AtomicUsize,
}

#[derive(Default)]
pub struct DescriptorCache {
    descriptors: RwLock<HashMap<DescriptorKey, Arc<CallDescriptor>>>,
    argument_tables: RwLock<HashMap<ArgumentKey, Arc<ArgumentTable>>>,
    build_lock: Mutex<()>,
    counters: Counters,
}

impl DescriptorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &DescriptorKey) -> Option<Arc<CallDescriptor>> {
        self.descriptors.read().get(key).cloned()
    }

    /// Returns the descriptor for `key`, building it from the layouts on a
    /// miss. The argument table is shared with every descriptor whose
    /// arguments encode to `arguments`.
    pub fn get_or_build(
        &self,
        key: &DescriptorKey,
        arguments: &ArgumentKey,
        argument_layouts: &[&Layout],
        return_layout: Option<&Layout>,
    ) -> Result<Arc<CallDescriptor>, String> {
        if let Some(descriptor) = self.get(key) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            trace!("descriptor cache hit: {key}");
            return Ok(descriptor);
        }

        let _guard = self.build_lock.lock();
        if let Some(descriptor) = self.get(key) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            trace!("descriptor cache hit after wait: {key}");
            return Ok(descriptor);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        let existing = self.argument_tables.read().get(arguments).cloned();
        let (table, table_is_new) = match existing {
            Some(table) => {
                trace!("reusing argument table {arguments}");
                (table, false)
            }
            None => {
                let table = ArgumentTable::build(
                    arguments.clone(),
                    argument_layouts,
                )
                .inspect_err(|reason| {
                    warn!("cannot build argument table {arguments}: {reason}")
                })?;
                (Arc::new(table), true)
            }
        };

        let descriptor =
            CallDescriptor::build(key.clone(), table.clone(), return_layout)
                .inspect_err(|reason| {
                    warn!("cannot build call descriptor {key}: {reason}")
                })?;
        let descriptor = Arc::new(descriptor);

        if table_is_new {
            self.counters
                .argument_tables_built
                .fetch_add(1, Ordering::Relaxed);
            self.argument_tables.write().insert(arguments.clone(), table);
        } else {
            self.counters
                .argument_tables_reused
                .fetch_add(1, Ordering::Relaxed);
        }
        self.counters
            .descriptors_built
            .fetch_add(1, Ordering::Relaxed);
        self.descriptors
            .write()
            .insert(key.clone(), descriptor.clone());
        debug!("built call descriptor {key}");
        Ok(descriptor)
    }

    pub fn len(&self) -> usize {
        self.descriptors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.read().is_empty()
    }

    pub fn argument_table_count(&self) -> usize {
        self.argument_tables.read().len()
    }

    pub fn stats(&self) -> CacheStats {
        let load = |counter: &AtomicUsize| counter.load(Ordering::Relaxed);
        CacheStats {
            hits: load(&self.counters.hits),
            misses: load(&self.counters.misses),
            descriptors_built: load(&self.counters.descriptors_built),
            argument_tables_built: load(&self.counters.argument_tables_built),
            argument_tables_reused: load(
                &self.counters.argument_tables_reused,
            ),
        }
    }
}

impl std::fmt::Debug for DescriptorCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorCache")
            .field("descriptors", &self.len())
            .field("argument_tables", &self.argument_table_count())
            .field("stats", &self.stats())
            .finish()
    }
}
