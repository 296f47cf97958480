//! ABOUTME: Contract a database access library must satisfy to be instrumented
//! ABOUTME: Per-operation scope, lifecycle hook chain, and database handle trait

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use qg_core::{Error, Result};
use tracing::warn;

/// Kind of operation a hook chain is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Create,
    Delete,
    Query,
    Update,
}

impl OperationKind {
    pub const ALL: [OperationKind; 4] = [
        OperationKind::Create,
        OperationKind::Delete,
        OperationKind::Query,
        OperationKind::Update,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Delete => "delete",
            OperationKind::Query => "query",
            OperationKind::Update => "update",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State for one in-flight operation, handed to each of its hooks in turn.
///
/// Values stored with [`Operation::set`] live until the operation is dropped,
/// so one operation's hooks never observe another's settings.
pub struct Operation {
    kind: OperationKind,
    settings: HashMap<String, Box<dyn Any + Send + Sync>>,
    connection_error: Option<String>,
}

impl Operation {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            settings: HashMap::new(),
            connection_error: None,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.settings.insert(key.into(), Box::new(value));
    }

    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.settings.get(key)?.downcast_ref::<T>()
    }

    /// Remove and return a setting. A value of another type is left in place.
    pub fn take<T: Any>(&mut self, key: &str) -> Option<T> {
        if !self.settings.get(key)?.is::<T>() {
            return None;
        }
        self.settings
            .remove(key)?
            .downcast::<T>()
            .ok()
            .map(|boxed| *boxed)
    }

    /// Record that the live connection for this operation could not be obtained
    pub fn fail_connection(&mut self, reason: impl Into<String>) {
        self.connection_error = Some(reason.into());
    }

    /// Live connection accessor
    pub fn connection(&self) -> Result<()> {
        match &self.connection_error {
            Some(reason) => Err(Error::Connection(reason.clone())),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("kind", &self.kind)
            .field("settings", &self.settings.keys().collect::<Vec<_>>())
            .field("connection_error", &self.connection_error)
            .finish()
    }
}

/// Callback invoked around an operation
pub type Hook = Arc<dyn Fn(&mut Operation) + Send + Sync>;

#[derive(Clone)]
struct NamedHook {
    name: String,
    hook: Hook,
}

/// Hooks are stored as shared slices so running a chain only clones an
/// `Arc`. Registration rebuilds the slice.
struct Chain {
    before: Arc<[NamedHook]>,
    after: Arc<[NamedHook]>,
}

impl Chain {
    fn new() -> Self {
        Self {
            before: Arc::from(Vec::new()),
            after: Arc::from(Vec::new()),
        }
    }

    fn phase(&self, phase: Phase) -> &Arc<[NamedHook]> {
        match phase {
            Phase::Before => &self.before,
            Phase::After => &self.after,
        }
    }

    fn phase_mut(&mut self, phase: Phase) -> &mut Arc<[NamedHook]> {
        match phase {
            Phase::Before => &mut self.before,
            Phase::After => &mut self.after,
        }
    }
}

#[derive(Clone, Copy)]
enum Phase {
    Before,
    After,
}

/// Ordered before/after hook chains per operation kind
#[derive(Default)]
pub struct Callbacks {
    chains: RwLock<HashMap<OperationKind, Chain>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_before<F>(&self, kind: OperationKind, name: impl Into<String>, hook: F)
    where
        F: Fn(&mut Operation) + Send + Sync + 'static,
    {
        self.register(kind, Phase::Before, name.into(), Arc::new(hook));
    }

    pub fn register_after<F>(&self, kind: OperationKind, name: impl Into<String>, hook: F)
    where
        F: Fn(&mut Operation) + Send + Sync + 'static,
    {
        self.register(kind, Phase::After, name.into(), Arc::new(hook));
    }

    fn register(&self, kind: OperationKind, phase: Phase, name: String, hook: Hook) {
        let mut chains = self.chains.write().unwrap_or_else(|e| e.into_inner());
        let slot = chains.entry(kind).or_insert_with(Chain::new).phase_mut(phase);

        let mut hooks = slot.to_vec();
        match hooks.iter_mut().find(|h| h.name == name) {
            Some(existing) => {
                warn!(callback = %name, kind = %kind, "Callback already registered, replacing");
                existing.hook = hook;
            }
            None => hooks.push(NamedHook { name, hook }),
        }
        *slot = Arc::from(hooks);
    }

    pub fn run_before(&self, op: &mut Operation) {
        self.run(Phase::Before, op);
    }

    pub fn run_after(&self, op: &mut Operation) {
        self.run(Phase::After, op);
    }

    fn run(&self, phase: Phase, op: &mut Operation) {
        // Snapshot so hooks run without holding the lock
        let hooks = {
            let chains = self.chains.read().unwrap_or_else(|e| e.into_inner());
            match chains.get(&op.kind()) {
                Some(chain) => Arc::clone(chain.phase(phase)),
                None => return,
            }
        };

        for named in hooks.iter() {
            (named.hook)(op);
        }
    }

    /// Registered hook names for `kind`, before-hooks first
    pub fn names(&self, kind: OperationKind) -> Vec<String> {
        let chains = self.chains.read().unwrap_or_else(|e| e.into_inner());
        chains
            .get(&kind)
            .map(|chain| {
                chain
                    .before
                    .iter()
                    .chain(chain.after.iter())
                    .map(|h| h.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chains = self.chains.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("Callbacks")
            .field("kinds", &chains.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Connection pool statistics at one point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub open: i64,
    pub idle: i64,
    pub in_use: i64,
}

/// A database handle that can be instrumented.
///
/// Implemented by adapters over a concrete access library.
pub trait Database: Send + Sync {
    /// Hook chain invoked around every operation on this handle
    fn callbacks(&self) -> &Callbacks;

    /// Human-readable driver identity, exported as the `driver` label
    fn driver_name(&self) -> &str;

    /// Current pool statistics
    fn pool_stats(&self) -> Result<PoolStats>;
}
