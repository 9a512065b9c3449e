//! Optimistic mutation coordinator
//!
//! Client-side reconciliation of latency-sensitive mutations. A
//! `MutationCommand` either applies its intended value to the local view at
//! once (optimistic) or waits for the server (synchronous). Outcomes arrive in
//! order on one channel:
//!
//! - `Applied` (optimistic only) as soon as the local view changed
//! - `Committed` with the authoritative value, which replaces the local one
//! - `Rejected` after the local view fell back to the last confirmed value
//!
//! Operations on the same key may overlap. A rejection never leaves another
//! operation's unconfirmed guess behind unless that operation is still in
//! flight, and a late commit never overwrites a newer one.
//!
//! The commit always runs to completion; there is no cancellation.

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::engine::ModuleEngine;
use crate::module::traits::ModuleError;
use crate::module::types::{ActorContext, BaseModule, TenantAssignment};
use crate::utils::Clock;

/// Caller-side copy of server state
///
/// Keys with unsettled mutations also carry the last value the server
/// confirmed, so overlapping operations on one key reconcile against that
/// value instead of against each other's guesses.
#[derive(Debug)]
pub struct LocalView<K, V> {
    state: Arc<RwLock<ViewState<K, V>>>,
}

#[derive(Debug)]
struct ViewState<K, V> {
    entries: HashMap<K, V>,
    inflight: HashMap<K, KeyOperations<V>>,
    next_seq: u64,
}

/// Unsettled operations on one key
#[derive(Debug)]
struct KeyOperations<V> {
    /// Last server-confirmed value; `None` means the key is absent
    confirmed: Option<V>,
    /// Submission order of the newest commit applied so far (0 = none)
    committed_seq: u64,
    /// Optimistic guesses still awaiting their commit, oldest first
    pending: Vec<(u64, V)>,
    /// Operations of either mode not yet settled
    open: usize,
}

impl<V: Clone> KeyOperations<V> {
    /// Newest guess submitted after the last applied commit, else the confirmed value
    fn visible(&self) -> Option<V> {
        self.pending
            .iter()
            .rev()
            .find(|(seq, _)| *seq > self.committed_seq)
            .map(|(_, value)| value.clone())
            .or_else(|| self.confirmed.clone())
    }
}

impl<K, V> Clone for LocalView<K, V> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<K, V> Default for LocalView<K, V> {
    fn default() -> Self {
        Self {
            state: Arc::new(RwLock::new(ViewState {
                entries: HashMap::new(),
                inflight: HashMap::new(),
                next_seq: 0,
            })),
        }
    }
}

impl<K, V> LocalView<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.state.read().ok()?.entries.get(key).cloned()
    }

    /// Store a value known to match the server
    pub fn insert(&self, key: K, value: V) {
        if let Ok(mut state) = self.state.write() {
            if let Some(ops) = state.inflight.get_mut(&key) {
                ops.confirmed = Some(value.clone());
            }
            state.entries.insert(key, value);
        }
    }

    pub fn remove(&self, key: &K) {
        if let Ok(mut state) = self.state.write() {
            if let Some(ops) = state.inflight.get_mut(key) {
                ops.confirmed = None;
            }
            state.entries.remove(key);
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register an operation on `key`, showing `intended` when optimistic.
    /// Returns the operation's submission sequence.
    fn begin(&self, key: &K, intended: Option<V>) -> u64 {
        let Ok(mut guard) = self.state.write() else {
            return 0;
        };
        let state = &mut *guard;
        state.next_seq += 1;
        let seq = state.next_seq;

        let confirmed = state.entries.get(key).cloned();
        let ops = state.inflight.entry(key.clone()).or_insert_with(|| KeyOperations {
            confirmed,
            committed_seq: 0,
            pending: Vec::new(),
            open: 0,
        });
        ops.open += 1;
        if let Some(value) = intended {
            ops.pending.push((seq, value.clone()));
            state.entries.insert(key.clone(), value);
        }
        seq
    }

    /// Settle operation `seq`: `Some` carries the committed server value,
    /// `None` a rejection. A commit older than one already applied is ignored.
    fn settle(&self, key: &K, seq: u64, committed: Option<V>) {
        let Ok(mut guard) = self.state.write() else {
            return;
        };
        let state = &mut *guard;
        let Some(ops) = state.inflight.get_mut(key) else {
            return;
        };

        ops.pending.retain(|(s, _)| *s != seq);
        ops.open = ops.open.saturating_sub(1);
        if let Some(value) = committed {
            if seq > ops.committed_seq {
                ops.confirmed = Some(value);
                ops.committed_seq = seq;
            }
        }

        match ops.visible() {
            Some(value) => {
                state.entries.insert(key.clone(), value);
            }
            None => {
                state.entries.remove(key);
            }
        }
        if ops.open == 0 {
            state.inflight.remove(key);
        }
    }
}

/// Outcome of a submitted mutation
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome<V> {
    Applied { operation_id: Uuid },
    Committed { operation_id: Uuid, value: V },
    Rejected { operation_id: Uuid, message: String },
}

impl<V> MutationOutcome<V> {
    pub fn operation_id(&self) -> Uuid {
        match self {
            MutationOutcome::Applied { operation_id }
            | MutationOutcome::Committed { operation_id, .. }
            | MutationOutcome::Rejected { operation_id, .. } => *operation_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, MutationOutcome::Applied { .. })
    }
}

/// A mutation to run against the server
pub struct MutationCommand<K, V> {
    key: K,
    /// Some = optimistic mode
    intended: Option<V>,
    commit: BoxFuture<'static, Result<V, ModuleError>>,
}

impl<K, V> MutationCommand<K, V> {
    /// Apply `intended` locally now, then reconcile with the commit's result
    pub fn optimistic<F>(key: K, intended: V, commit: F) -> Self
    where
        F: Future<Output = Result<V, ModuleError>> + Send + 'static,
    {
        Self {
            key,
            intended: Some(intended),
            commit: Box::pin(commit),
        }
    }

    /// Leave the local view alone until the commit resolves
    pub fn synchronous<F>(key: K, commit: F) -> Self
    where
        F: Future<Output = Result<V, ModuleError>> + Send + 'static,
    {
        Self {
            key,
            intended: None,
            commit: Box::pin(commit),
        }
    }

    pub fn is_optimistic(&self) -> bool {
        self.intended.is_some()
    }
}

/// Receives the outcomes of one submitted mutation
pub struct MutationHandle<V> {
    pub operation_id: Uuid,
    rx: mpsc::UnboundedReceiver<MutationOutcome<V>>,
}

impl<V> MutationHandle<V> {
    /// Next outcome, or None once the terminal outcome was consumed
    pub async fn next(&mut self) -> Option<MutationOutcome<V>> {
        self.rx.recv().await
    }

    /// Wait for the terminal outcome
    pub async fn settled(mut self) -> Result<V, ModuleError> {
        while let Some(outcome) = self.rx.recv().await {
            match outcome {
                MutationOutcome::Applied { .. } => continue,
                MutationOutcome::Committed { value, .. } => return Ok(value),
                MutationOutcome::Rejected {
                    operation_id,
                    message,
                } => return Err(ModuleError::MutationRejected { operation_id, message }),
            }
        }
        Err(ModuleError::MutationRejected {
            operation_id: self.operation_id,
            message: "mutation task ended without an outcome".to_string(),
        })
    }
}

/// Submits commands against a shared `LocalView`
pub struct MutationCoordinator<K, V> {
    view: LocalView<K, V>,
}

impl<K, V> MutationCoordinator<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(view: LocalView<K, V>) -> Self {
        Self { view }
    }

    pub fn view(&self) -> &LocalView<K, V> {
        &self.view
    }

    /// Submit a command. Must be called inside a Tokio runtime.
    pub fn submit(&self, command: MutationCommand<K, V>) -> MutationHandle<V> {
        let operation_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let MutationCommand {
            key,
            intended,
            commit,
        } = command;

        let optimistic = intended.is_some();
        let seq = self.view.begin(&key, intended);
        if optimistic {
            // Receiver is held by the handle we are about to return
            let _ = tx.send(MutationOutcome::Applied { operation_id });
        }

        let view = self.view.clone();
        tokio::spawn(async move {
            let outcome = match commit.await {
                Ok(value) => {
                    view.settle(&key, seq, Some(value.clone()));
                    debug!("Mutation {} on {:?} committed", operation_id, key);
                    MutationOutcome::Committed {
                        operation_id,
                        value,
                    }
                }
                Err(e) => {
                    view.settle(&key, seq, None);
                    warn!("Mutation {} on {:?} rejected: {}", operation_id, key, e);
                    MutationOutcome::Rejected {
                        operation_id,
                        message: e.to_string(),
                    }
                }
            };
            // The caller may have dropped the handle; the view is already reconciled
            let _ = tx.send(outcome);
        });

        MutationHandle { operation_id, rx }
    }
}

/// Archive a module, showing it archived locally right away
pub fn archive_module_command(
    engine: Arc<ModuleEngine>,
    module: BaseModule,
    actor: ActorContext,
) -> MutationCommand<String, BaseModule> {
    let mut intended = module.clone();
    intended.archived_at = Some(engine.clock().now());
    intended.is_active = false;
    let id = module.id;
    MutationCommand::optimistic(id.clone(), intended, async move {
        engine.archive_module(&id, &actor).await?;
        engine.get_module(&id)
    })
}

/// Restore a module, showing it active locally right away
pub fn restore_module_command(
    engine: Arc<ModuleEngine>,
    module: BaseModule,
    actor: ActorContext,
) -> MutationCommand<String, BaseModule> {
    let mut intended = module.clone();
    intended.archived_at = None;
    intended.is_active = true;
    let id = module.id;
    MutationCommand::optimistic(id.clone(), intended, async move {
        engine.restore_module(&id, &actor).await?;
        engine.get_module(&id)
    })
}

/// Replace an assignment's config, showing the new config locally right away
pub fn config_edit_command(
    engine: Arc<ModuleEngine>,
    assignment: TenantAssignment,
    config: Value,
    actor: ActorContext,
) -> MutationCommand<(String, String), TenantAssignment> {
    let key = (assignment.tenant_id.clone(), assignment.base_module_id.clone());
    let mut intended = assignment;
    intended.custom_config = config.clone();
    let (tenant_id, base_module_id) = key.clone();
    MutationCommand::optimistic(key, intended, async move {
        engine
            .update_assignment_config(&tenant_id, &base_module_id, config, &actor)
            .await
    })
}
