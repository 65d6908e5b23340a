//! Loop override registry.
//!
//! The registry pairs every signature the host table knows with an optional
//! optimized loop. Host loops are never mutated; both implementations stay
//! reachable so toggling the optimizations off restores the host behaviour.

use crate::catalog::LoopCatalog;
use crate::config::{DataType, LoopKey, LoopOp};
use crate::elementwise::DynLoopKernel;
use std::collections::HashMap;
use std::sync::Arc;

/// The host library's loop table, consulted as a black box.
pub trait HostLoopTable: Send + Sync {
    fn lookup(&self, key: &LoopKey) -> Option<DynLoopKernel>;
    fn signatures(&self) -> Vec<LoopKey>;
}

pub type DynHostLoopTable = Arc<dyn HostLoopTable>;

/// Host table backed by the built-in reference loops.
#[derive(Clone)]
pub struct ReferenceLoopTable {
    loops: HashMap<LoopKey, DynLoopKernel>,
}

impl ReferenceLoopTable {
    pub fn new() -> Self {
        Self::from_loops(LoopCatalog::builtin().into_parts().0)
    }

    pub fn from_loops(loops: HashMap<LoopKey, DynLoopKernel>) -> Self {
        Self { loops }
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }
}

impl Default for ReferenceLoopTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HostLoopTable for ReferenceLoopTable {
    fn lookup(&self, key: &LoopKey) -> Option<DynLoopKernel> {
        self.loops.get(key).map(Arc::clone)
    }

    fn signatures(&self) -> Vec<LoopKey> {
        let mut keys: Vec<_> = self.loops.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[derive(Clone)]
pub struct LoopEntry {
    pub key: LoopKey,
    pub original: DynLoopKernel,
    pub optimized: Option<DynLoopKernel>,
    pub threadable: bool,
}

impl LoopEntry {
    pub fn new(key: LoopKey, original: DynLoopKernel, optimized: Option<DynLoopKernel>) -> Self {
        let threadable = optimized
            .as_ref()
            .map_or_else(|| original.threadable(), |kernel| kernel.threadable());
        Self {
            key,
            original,
            optimized,
            threadable,
        }
    }
}

impl std::fmt::Debug for LoopEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopEntry")
            .field("key", &self.key.signature())
            .field("optimized", &self.optimized.is_some())
            .field("threadable", &self.threadable)
            .finish()
    }
}

#[derive(Clone)]
pub struct LoopRegistry {
    host: DynHostLoopTable,
    entries: HashMap<LoopKey, LoopEntry>,
}

impl LoopRegistry {
    /// Empty registry in front of `host`.
    pub fn new(host: DynHostLoopTable) -> Self {
        Self {
            host,
            entries: HashMap::new(),
        }
    }

    /// Registers one entry per host signature, attaching the override for
    /// that signature when one exists. Overrides for signatures the host does
    /// not know are ignored.
    pub fn install(host: DynHostLoopTable, overrides: &HashMap<LoopKey, DynLoopKernel>) -> Self {
        let mut registry = Self::new(Arc::clone(&host));
        for key in host.signatures() {
            let Some(original) = host.lookup(&key) else {
                continue;
            };
            let optimized = overrides.get(&key).map(Arc::clone);
            registry.register(LoopEntry::new(key, original, optimized));
        }
        registry
    }

    pub fn with_default_loops() -> Self {
        let (reference, atop) = LoopCatalog::builtin().into_parts();
        Self::install(Arc::new(ReferenceLoopTable::from_loops(reference)), &atop)
    }

    /// Adds an entry; the first registration of a signature wins. Returns
    /// whether the entry was inserted.
    pub fn register(&mut self, entry: LoopEntry) -> bool {
        if self.entries.contains_key(&entry.key) {
            return false;
        }
        self.entries.insert(entry.key.clone(), entry);
        true
    }

    pub fn get(&self, key: &LoopKey) -> Option<&LoopEntry> {
        self.entries.get(key)
    }

    /// Finds the entry for `op` over `inputs`, whatever its output type.
    pub fn resolve(&self, op: LoopOp, inputs: &[DataType]) -> Option<&LoopEntry> {
        DataType::ALL
            .into_iter()
            .find_map(|output| self.entries.get(&LoopKey::new(op, inputs, output)))
    }

    pub fn host(&self) -> &DynHostLoopTable {
        &self.host
    }

    pub fn host_lookup(&self, key: &LoopKey) -> Option<DynLoopKernel> {
        self.host.lookup(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<LoopKey> {
        let mut keys: Vec<_> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn entries(&self) -> impl Iterator<Item = &LoopEntry> {
        self.entries.values()
    }
}

impl Default for LoopRegistry {
    fn default() -> Self {
        Self::with_default_loops()
    }
}
