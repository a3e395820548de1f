//! Rules manager
//!
//! Owns the published rule snapshots. Requests are compiled on the blocking
//! pool, at most one at a time per rule list name; requests that arrive while
//! a list is compiling are folded into a single follow-up compile of the most
//! recent input. Every publish is broadcast as an `UpdateEvent`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error, info};
use tokio::sync::broadcast;

use tb_compiler::RuleListCompiler;
use tb_core::identifier::{Difference, RulesIdentifier};

use crate::config::ManagerConfig;
use crate::error::RulesError;
use crate::fallback::compile_with_fallback;
use crate::failure::{FailureMemory, SourceModel};
use crate::snapshot::{CompletionToken, RulesSnapshot, UpdateEvent};
use crate::source::{CompilationInput, RulesSource};

/// What `submit` did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// The published rules already match the request.
    UpToDate,
    /// A compile was started.
    Scheduled,
    /// A compile is in flight; the request replaces any queued one.
    Coalesced,
}

#[derive(Default)]
struct ListState {
    memory: FailureMemory,
    compiling: bool,
    pending: Option<CompilationInput>,
    pending_tokens: Vec<CompletionToken>,
}

#[derive(Default)]
struct State {
    lists: HashMap<String, ListState>,
    published: BTreeMap<String, RulesSnapshot>,
    last_update: Option<Arc<UpdateEvent>>,
    sequence: u64,
}

struct Inner {
    compiler: Arc<dyn RuleListCompiler>,
    state: Mutex<State>,
    updates: broadcast::Sender<Arc<UpdateEvent>>,
    errors: broadcast::Sender<RulesError>,
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RulesManager {
    inner: Arc<Inner>,
}

impl RulesManager {
    pub fn new(compiler: Arc<dyn RuleListCompiler>, config: ManagerConfig) -> Self {
        let (updates, _) = broadcast::channel(config.event_capacity.max(1));
        let (errors, _) = broadcast::channel(config.error_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                compiler,
                state: Mutex::new(State::default()),
                updates,
                errors,
            }),
        }
    }

    /// Request compilation of `input`.
    ///
    /// Must be called from within a Tokio runtime; the compile itself runs on
    /// the blocking pool and its result arrives as an `UpdateEvent`.
    pub fn submit(&self, input: CompilationInput, token: Option<CompletionToken>) -> ScheduleOutcome {
        let mut state = self.inner.lock();
        let State { lists, published, .. } = &mut *state;
        let list = lists.entry(input.name.clone()).or_default();

        if list.compiling {
            debug!("Queued compilation of {} behind the one in flight", input.name);
            list.pending = Some(input);
            list.pending_tokens.extend(token);
            return ScheduleOutcome::Coalesced;
        }

        let desired = desired_identifier(&input, &list.memory);
        if published.get(&input.name).map(|s| &s.identifier) == Some(&desired) {
            debug!("Rules {} are up to date", desired);
            return ScheduleOutcome::UpToDate;
        }

        list.compiling = true;
        drop(state);

        let tokens = token.into_iter().collect();
        tokio::spawn(run_compilation(self.inner.clone(), input, tokens));
        ScheduleOutcome::Scheduled
    }

    /// Submit one input per rule list the source knows about.
    pub fn schedule_compilation(
        &self,
        source: &dyn RulesSource,
        token: Option<CompletionToken>,
    ) -> Vec<(String, ScheduleOutcome)> {
        source
            .inputs()
            .into_iter()
            .map(|input| {
                let name = input.name.clone();
                (name, self.submit(input, token.clone()))
            })
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<UpdateEvent>> {
        self.inner.updates.subscribe()
    }

    /// Latest event together with a receiver for every later one.
    pub fn subscribe_with_current(&self) -> (Option<Arc<UpdateEvent>>, broadcast::Receiver<Arc<UpdateEvent>>) {
        let state = self.inner.lock();
        (state.last_update.clone(), self.inner.updates.subscribe())
    }

    /// Fatal compilation failures. The affected list keeps its previous rules.
    pub fn errors(&self) -> broadcast::Receiver<RulesError> {
        self.inner.errors.subscribe()
    }

    pub fn current_rules(&self) -> Vec<RulesSnapshot> {
        self.inner.lock().published.values().cloned().collect()
    }

    pub fn current_update(&self) -> Option<Arc<UpdateEvent>> {
        self.inner.lock().last_update.clone()
    }

    pub fn failure_memory(&self, name: &str) -> Option<FailureMemory> {
        self.inner
            .lock()
            .lists
            .get(name)
            .map(|list| list.memory.clone())
            .filter(|memory| !memory.is_empty())
    }
}

fn desired_identifier(input: &CompilationInput, memory: &FailureMemory) -> RulesIdentifier {
    let mut memory = memory.clone();
    memory.refresh(input);
    SourceModel::make(input, &memory).identifier()
}

async fn run_compilation(inner: Arc<Inner>, mut input: CompilationInput, mut tokens: Vec<CompletionToken>) {
    let name = input.name.clone();
    loop {
        let memory = inner.memory_for(&name);
        let compiler = inner.compiler.clone();
        let job = tokio::task::spawn_blocking(move || {
            let mut memory = memory;
            let result = compile_with_fallback(compiler.as_ref(), &input, &mut memory);
            (result, memory)
        });

        let outcome = job.await.map_err(|e| RulesError::TaskFailed {
            name: name.clone(),
            reason: e.to_string(),
        });

        match inner.settle(&name, outcome, tokens) {
            Some((next, next_tokens)) => {
                input = next;
                tokens = next_tokens;
            }
            None => break,
        }
    }
}

type JobOutcome = Result<(Result<RulesSnapshot, RulesError>, FailureMemory), RulesError>;

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn memory_for(&self, name: &str) -> FailureMemory {
        self.lock()
            .lists
            .get(name)
            .map(|list| list.memory.clone())
            .unwrap_or_default()
    }

    /// Record a finished compile and decide whether a queued request needs another one.
    fn settle(
        &self,
        name: &str,
        outcome: JobOutcome,
        mut tokens: Vec<CompletionToken>,
    ) -> Option<(CompilationInput, Vec<CompletionToken>)> {
        let mut state = self.lock();

        let result = match outcome {
            Ok((result, memory)) => {
                state.lists.entry(name.to_string()).or_default().memory = memory;
                result
            }
            Err(e) => Err(e),
        };

        let list = state.lists.entry(name.to_string()).or_default();
        let pending = list.pending.take();
        let pending_tokens = std::mem::take(&mut list.pending_tokens);
        let memory = list.memory.clone();

        let settled = match &result {
            Ok(snapshot) => Some(snapshot.identifier.clone()),
            Err(_) => state.published.get(name).map(|s| s.identifier.clone()),
        };

        // A queued request the new rules already satisfy needs no compile of its own.
        let follow_up = pending.filter(|next| Some(desired_identifier(next, &memory)) != settled);
        let carried = if follow_up.is_some() {
            pending_tokens
        } else {
            tokens.extend(pending_tokens);
            Vec::new()
        };

        match result {
            Ok(snapshot) => self.publish(&mut state, snapshot, tokens),
            Err(e) => {
                error!("{}", e);
                let _ = self.errors.send(e);
            }
        }

        match follow_up {
            Some(next) => Some((next, carried)),
            None => {
                if let Some(list) = state.lists.get_mut(name) {
                    list.compiling = false;
                }
                None
            }
        }
    }

    fn publish(&self, state: &mut State, snapshot: RulesSnapshot, tokens: Vec<CompletionToken>) {
        let changes = match state.published.get(&snapshot.name) {
            Some(previous) if previous.identifier == snapshot.identifier => {
                debug!("Compiled {} matches the published rules", snapshot.identifier);
                return;
            }
            Some(previous) => previous.identifier.compare(&snapshot.identifier),
            None => Difference::all(),
        };

        info!(
            "Publishing {} ({} rules, changed: {})",
            snapshot.identifier,
            snapshot.rules_list.rule_count(),
            changes
        );

        let name = snapshot.name.clone();
        state.published.insert(name.clone(), snapshot);
        state.sequence += 1;

        let event = Arc::new(UpdateEvent {
            sequence: state.sequence,
            rules: state.published.values().cloned().collect(),
            changes: BTreeMap::from([(name, changes)]),
            completion_tokens: tokens,
        });
        state.last_update = Some(event.clone());
        // No receivers is fine; late subscribers read `current_update`.
        let _ = self.updates.send(event);
    }
}
