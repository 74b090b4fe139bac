//! Transactional work units
//!
//! A [`WorkUnit`] runs a body inside a begin/commit/abort envelope.
//! `run()` is the fatal path: any failure aborts and re-raises, wrapped
//! with the unit's name. `run_retry*` masks the one transient engine
//! failure, lock conflicts, by aborting the attempt and re-running the
//! body in a fresh transaction, up to a bounded attempt budget. Every
//! other failure is assumed deterministic and aborts immediately.

use crate::env::Environment;
use crate::error::{Result, StoreError};
use burrow_engine::Transaction;
use tracing::{error, warn};

/// Attempt budget used by [`WorkUnit::run_retry`] and
/// [`PreparedPut::put_retry`](crate::PreparedPut::put_retry)
pub const DEFAULT_RETRY_ATTEMPTS: usize = 3;

/// A transaction-scoped unit of work over one environment.
///
/// The body must be re-runnable: under retry it executes once per
/// attempt, each time in a fresh transaction, and its effects commit
/// exactly once on the attempt that succeeds.
pub struct WorkUnit {
    env: Environment,
    name: String,
    body: Box<dyn Fn(&mut Transaction) -> Result<()> + Send + Sync>,
}

impl WorkUnit {
    /// Create a work unit. The name labels failures and log lines.
    pub fn new(
        env: &Environment,
        name: impl Into<String>,
        body: impl Fn(&mut Transaction) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            env: env.clone(),
            name: name.into(),
            body: Box::new(body),
        }
    }

    /// Unit name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the body once: begin, execute, commit.
    ///
    /// Any failure aborts the transaction and re-raises as
    /// [`StoreError::UnitAborted`] naming this unit. Never retried.
    pub fn run(&self) -> Result<()> {
        let mut txn = self.env.begin()?;
        match (self.body)(&mut txn) {
            Ok(()) => txn.commit().map_err(|e| StoreError::UnitAborted {
                unit: self.name.clone(),
                source: Box::new(StoreError::engine(format!("{}.commit", self.name), e)),
            }),
            Err(e) => {
                if let Err(abort_err) = txn.abort() {
                    error!(unit = %self.name, %abort_err, "failed to abort transaction");
                }
                Err(StoreError::UnitAborted {
                    unit: self.name.clone(),
                    source: Box::new(e),
                })
            }
        }
    }

    /// [`run_retry_with`](Self::run_retry_with) at the default budget
    pub fn run_retry(&self) -> Result<()> {
        self.run_retry_with(DEFAULT_RETRY_ATTEMPTS)
    }

    /// Run the body in up to `attempts` fresh transactions, retrying only
    /// on lock conflict.
    ///
    /// A non-conflict failure aborts the attempt and is immediately fatal.
    /// Exhausting the budget raises [`StoreError::RetriesExhausted`]
    /// carrying the terminal conflict. A budget of zero executes nothing
    /// and fails immediately; it never silently succeeds.
    pub fn run_retry_with(&self, attempts: usize) -> Result<()> {
        let mut last_conflict: Option<StoreError> = None;
        for attempt in 1..=attempts {
            let mut txn = self.env.begin()?;
            match (self.body)(&mut txn) {
                Ok(()) => match txn.commit() {
                    Ok(()) => return Ok(()),
                    Err(e) if e.is_lock_conflict() => {
                        warn!(unit = %self.name, attempt, "commit hit a lock conflict, will retry");
                        last_conflict =
                            Some(StoreError::engine(format!("{}.commit", self.name), e));
                    }
                    Err(e) => {
                        return Err(StoreError::UnitAborted {
                            unit: self.name.clone(),
                            source: Box::new(StoreError::engine(
                                format!("{}.commit", self.name),
                                e,
                            )),
                        })
                    }
                },
                Err(e) if e.is_lock_conflict() => {
                    warn!(unit = %self.name, attempt, "aborted on lock conflict, will retry");
                    if let Err(abort_err) = txn.abort() {
                        error!(unit = %self.name, %abort_err, "failed to abort transaction");
                    }
                    last_conflict = Some(e);
                }
                Err(e) => {
                    if let Err(abort_err) = txn.abort() {
                        error!(unit = %self.name, %abort_err, "failed to abort transaction");
                    }
                    return Err(StoreError::UnitAborted {
                        unit: self.name.clone(),
                        source: Box::new(e),
                    });
                }
            }
        }
        Err(StoreError::RetriesExhausted {
            attempts,
            source: last_conflict.map(Box::new),
        })
    }

    /// Compose two units over the same environment into one that runs
    /// `other`'s body, then this unit's, in a single transaction.
    pub fn merge(self, other: WorkUnit) -> Result<WorkUnit> {
        if !Environment::same(&self.env, &other.env) {
            return Err(StoreError::Config(format!(
                "cannot merge work units '{}' and '{}': different environments",
                other.name, self.name
            )));
        }
        let name = format!("{}+{}", other.name, self.name);
        let first = other.body;
        let second = self.body;
        Ok(WorkUnit {
            env: self.env,
            name,
            body: Box::new(move |txn| {
                first(txn)?;
                second(txn)
            }),
        })
    }
}
