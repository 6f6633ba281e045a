//! The synchronous session: execute verbs over a borrowed connection.
//!
//! A session serializes all operations on its connection and tracks the
//! transaction state machine:
//!
//! ```text
//! Idle --begin--> InTxn --commit--> Idle
//! InTxn --execute(err)--> Aborted --rollback--> Idle
//! any --close--> Closed
//! ```
//!
//! Executing while `Aborted` is an error; the explicit `rollback` is the
//! only way out, mirroring PostgreSQL's aborted-transaction semantics.
//! Compile-phase failures (parse, compile, parameter, unsupported) never
//! touch the connection and never change transaction state.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use arrow::record_batch::RecordBatch;

use crate::ast;
use crate::compile::CompiledStatement;
use crate::dialect::Dialect;
use crate::error::{Result, SqlSpecError};
use crate::params::{normalize, DriverParams, NormalizeMode, Parameters};
use crate::result::ResultSet;
use crate::stack::{
    finish_collect, skip_tail, PreparedOperation, StackMethod, StackOperation, StackOutcome,
    StackResult, StatementStack,
};
use crate::statement::Sql;

use super::observer::LifecycleEvent;
use super::sync_pool::{PooledConnection, PoolShared};
use super::{Driver, DriverCapabilities, ScriptResult};

/// Session transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    InTxn,
    Aborted,
    Closed,
}

/// A scoped handle exposing execute verbs against a borrowed connection.
pub struct Session<D: Driver> {
    shared: Arc<PoolShared<D>>,
    conn: PooledConnection<D>,
    state: TransactionState,
    dialect: Dialect,
    timeout: Option<Duration>,
}

impl<D: Driver> std::fmt::Debug for Session<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("dialect", &self.dialect)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl<D: Driver> Session<D> {
    pub(crate) fn new(shared: Arc<PoolShared<D>>, conn: PooledConnection<D>) -> Self {
        let dialect = shared
            .config
            .dialect
            .unwrap_or(shared.driver.capabilities().dialect);
        Self {
            shared,
            conn,
            state: TransactionState::Idle,
            dialect,
            timeout: None,
        }
    }

    pub fn capabilities(&self) -> &DriverCapabilities {
        self.shared.driver.capabilities()
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Deadline applied to every subsequent execute verb.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    // -----------------------------------------------------------------
    // Execute verbs
    // -----------------------------------------------------------------

    /// Run a single DML/DQL statement.
    pub fn execute(&mut self, statement: &Sql) -> Result<ResultSet> {
        self.ensure_ready()?;
        let compiled = self.compile_statement(statement)?;
        let params = self.driver_params(statement, &compiled)?;
        let started = Instant::now();
        let result = self.with_cancel(|session| {
            let shared = session.shared.clone();
            shared
                .driver
                .execute(session.conn.connection_mut(), &compiled.sql, &params)
        });
        match result {
            Ok(rs) => {
                let rs = if self.capabilities().rewindable_cursors {
                    rs
                } else {
                    rs.non_restartable()
                };
                self.shared.observers.emit(LifecycleEvent::StatementExecuted {
                    fingerprint: compiled.fingerprint.clone(),
                    rows_affected: rs.rows_affected(),
                    elapsed: started.elapsed(),
                });
                Ok(rs)
            }
            Err(err) => Err(self.note_failure(err, &compiled.fingerprint)),
        }
    }

    /// Run a batch DML statement, once per parameter set. With no explicit
    /// transaction open, the whole batch runs inside one implicit
    /// transaction.
    pub fn execute_many(&mut self, statement: &Sql, batches: &[Parameters]) -> Result<u64> {
        self.ensure_ready()?;
        let compiled = self.compile_statement(statement)?;
        let driver_batches = self.driver_batches(statement, &compiled, batches)?;

        let implicit = self.state == TransactionState::Idle;
        if implicit {
            self.begin()?;
        }
        let result = self.with_cancel(|session| {
            let shared = session.shared.clone();
            shared.driver.execute_many(
                session.conn.connection_mut(),
                &compiled.sql,
                &driver_batches,
            )
        });
        match result {
            Ok(n) => {
                if implicit {
                    self.commit()?;
                }
                Ok(n)
            }
            Err(err) => {
                let err = self.note_failure(err, &compiled.fingerprint);
                if implicit && matches!(self.state, TransactionState::InTxn | TransactionState::Aborted)
                {
                    let _ = self.rollback();
                }
                Err(err)
            }
        }
    }

    /// Run a multi-statement script. Scripts carry no parameters; named
    /// parameter validation does not apply.
    pub fn execute_script(&mut self, script: &str) -> Result<ScriptResult> {
        self.ensure_ready()?;
        let statements = ast::parse_script(script, self.dialect)?;
        let result = self.with_cancel(|session| {
            let shared = session.shared.clone();
            shared
                .driver
                .execute_script(session.conn.connection_mut(), script)
        });
        match result {
            Ok(rows_affected) => Ok(ScriptResult {
                statements: statements.len(),
                rows_affected,
            }),
            Err(err) => Err(self.note_failure(err, "script")),
        }
    }

    /// Run a statement and take the result as a columnar Arrow batch.
    pub fn execute_arrow(&mut self, statement: &Sql) -> Result<RecordBatch> {
        self.ensure_ready()?;
        let compiled = self.compile_statement(statement)?;
        let params = self.driver_params(statement, &compiled)?;
        let result = self.with_cancel(|session| {
            let shared = session.shared.clone();
            shared
                .driver
                .execute_arrow(session.conn.connection_mut(), &compiled.sql, &params)
        });
        result.map_err(|err| self.note_failure(err, &compiled.fingerprint))
    }

    // -----------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------

    pub fn begin(&mut self) -> Result<()> {
        match self.state {
            TransactionState::Idle => {
                let shared = self.shared.clone();
                shared.driver.begin(self.conn.connection_mut())?;
                self.state = TransactionState::InTxn;
                self.shared.observers.emit(LifecycleEvent::TransactionBegun);
                Ok(())
            }
            TransactionState::InTxn => Err(SqlSpecError::Transaction(
                "a transaction is already open".into(),
            )),
            TransactionState::Aborted => Err(SqlSpecError::Transaction(
                "transaction aborted; roll back first".into(),
            )),
            TransactionState::Closed => Err(SqlSpecError::Transaction("session is closed".into())),
        }
    }

    pub fn commit(&mut self) -> Result<()> {
        match self.state {
            TransactionState::InTxn => {
                let shared = self.shared.clone();
                shared.driver.commit(self.conn.connection_mut())?;
                self.state = TransactionState::Idle;
                self.shared
                    .observers
                    .emit(LifecycleEvent::TransactionCommitted);
                Ok(())
            }
            TransactionState::Aborted => Err(SqlSpecError::Transaction(
                "cannot commit an aborted transaction".into(),
            )),
            _ => Err(SqlSpecError::Transaction("no open transaction".into())),
        }
    }

    pub fn rollback(&mut self) -> Result<()> {
        match self.state {
            TransactionState::InTxn | TransactionState::Aborted => {
                let shared = self.shared.clone();
                shared.driver.rollback(self.conn.connection_mut())?;
                self.state = TransactionState::Idle;
                self.shared
                    .observers
                    .emit(LifecycleEvent::TransactionRolledBack);
                Ok(())
            }
            _ => Err(SqlSpecError::Transaction("no transaction to roll back".into())),
        }
    }

    /// Close the session. An open transaction is rolled back; the
    /// connection is destroyed if that fails. Every later verb errors.
    pub fn close(&mut self) {
        if matches!(
            self.state,
            TransactionState::InTxn | TransactionState::Aborted
        ) {
            let shared = self.shared.clone();
            if shared.driver.rollback(self.conn.connection_mut()).is_err() {
                self.conn.poison();
            }
        }
        self.state = TransactionState::Closed;
    }

    /// Scoped transaction: commit on success, rollback on any other exit.
    pub fn transaction<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.begin()?;
        match f(self) {
            Ok(value) => match self.state {
                TransactionState::InTxn => {
                    self.commit()?;
                    Ok(value)
                }
                TransactionState::Aborted => {
                    self.rollback()?;
                    Err(SqlSpecError::Transaction(
                        "transaction aborted inside scope".into(),
                    ))
                }
                _ => Ok(value),
            },
            Err(err) => {
                if matches!(
                    self.state,
                    TransactionState::InTxn | TransactionState::Aborted
                ) {
                    let _ = self.rollback();
                }
                Err(err)
            }
        }
    }

    // -----------------------------------------------------------------
    // Stack execution
    // -----------------------------------------------------------------

    /// Run a statement stack. Fail-fast mode returns the per-operation
    /// results (with skipped placeholders) after rolling back; collect
    /// mode runs everything and raises the aggregate error after rollback
    /// when anything failed.
    pub fn execute_stack(
        &mut self,
        stack: &StatementStack,
        continue_on_error: bool,
    ) -> Result<Vec<StackResult>> {
        if stack.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_ready()?;

        if self.capabilities().supports_pipeline {
            if let Some(results) = self.try_pipeline(stack)? {
                return self.finish_stack(results, continue_on_error, false);
            }
        }

        let implicit = self.state == TransactionState::Idle;
        if implicit {
            self.begin()?;
        }

        let total = stack.len();
        let mut results: Vec<StackResult> = Vec::with_capacity(total);
        let mut failed_at: Option<usize> = None;

        for (index, op) in stack.operations().iter().enumerate() {
            match self.run_operation(op) {
                Ok(outcome) => results.push(StackResult::success(index, outcome)),
                Err(err) => {
                    let fatal = err.poisons_connection();
                    if failed_at.is_none() {
                        failed_at = Some(index);
                    }
                    results.push(StackResult::failure(index, err));
                    if fatal {
                        self.conn.poison();
                        self.state = TransactionState::Closed;
                        skip_tail(&mut results, total, index);
                        break;
                    }
                    if !continue_on_error {
                        skip_tail(&mut results, total, index);
                        break;
                    }
                }
            }
        }

        self.finish_stack(results, continue_on_error, implicit)
    }

    /// Shared tail: roll back on any failure, commit an implicit
    /// transaction on full success, then shape the return per mode.
    fn finish_stack(
        &mut self,
        results: Vec<StackResult>,
        continue_on_error: bool,
        implicit: bool,
    ) -> Result<Vec<StackResult>> {
        let any_failed = results.iter().any(|r| r.error.is_some());
        if any_failed {
            if matches!(
                self.state,
                TransactionState::InTxn | TransactionState::Aborted
            ) {
                let _ = self.rollback();
            }
            if continue_on_error {
                finish_collect(results)
            } else {
                Ok(results)
            }
        } else {
            if implicit && self.state == TransactionState::InTxn {
                self.commit()?;
            }
            Ok(results)
        }
    }

    /// Native pipeline attempt. `Ok(None)` means fall back to sequential.
    fn try_pipeline(&mut self, stack: &StatementStack) -> Result<Option<Vec<StackResult>>> {
        let prepared = match self.prepare_operations(stack) {
            Ok(prepared) => prepared,
            // Compile failures fall back so the sequential path can report
            // them per operation.
            Err(_) => return Ok(None),
        };
        let shared = self.shared.clone();
        match shared
            .driver
            .execute_pipeline(self.conn.connection_mut(), &prepared)
        {
            Ok(outcomes) => {
                let results = outcomes
                    .into_iter()
                    .enumerate()
                    .map(|(index, outcome)| match outcome {
                        Ok(outcome) => StackResult::success(index, outcome),
                        Err(err) => StackResult::failure(index, err),
                    })
                    .collect();
                Ok(Some(results))
            }
            Err(SqlSpecError::Unsupported(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn prepare_operations(&self, stack: &StatementStack) -> Result<Vec<PreparedOperation>> {
        stack
            .operations()
            .iter()
            .map(|op| {
                let statement = op.statement();
                match op.method() {
                    StackMethod::Execute | StackMethod::ExecuteArrow => {
                        let compiled = self.compile_statement(statement)?;
                        let params = self.driver_params(statement, &compiled)?;
                        Ok(PreparedOperation {
                            method: op.method(),
                            sql: compiled.sql.clone(),
                            params: vec![params],
                            fingerprint: compiled.fingerprint.clone(),
                        })
                    }
                    StackMethod::ExecuteMany => {
                        let compiled = self.compile_statement(statement)?;
                        let params = self.driver_batches(statement, &compiled, op.batches())?;
                        Ok(PreparedOperation {
                            method: op.method(),
                            sql: compiled.sql.clone(),
                            params,
                            fingerprint: compiled.fingerprint.clone(),
                        })
                    }
                    StackMethod::ExecuteScript => Ok(PreparedOperation {
                        method: op.method(),
                        sql: statement.raw().to_string(),
                        params: Vec::new(),
                        fingerprint: statement.fingerprint(),
                    }),
                }
            })
            .collect()
    }

    /// One stack operation through the driver, without touching the
    /// session state machine; the stack loop owns transaction disposition.
    fn run_operation(&mut self, op: &StackOperation) -> Result<StackOutcome> {
        let statement = op.statement();
        let shared = self.shared.clone();
        match op.method() {
            StackMethod::Execute => {
                let compiled = self.compile_statement(statement)?;
                let params = self.driver_params(statement, &compiled)?;
                let rs = shared
                    .driver
                    .execute(self.conn.connection_mut(), &compiled.sql, &params)
                    .map_err(|e| e.with_fingerprint(&compiled.fingerprint))?;
                Ok(StackOutcome::Rows(rs))
            }
            StackMethod::ExecuteMany => {
                let compiled = self.compile_statement(statement)?;
                let batches = self.driver_batches(statement, &compiled, op.batches())?;
                let n = shared
                    .driver
                    .execute_many(self.conn.connection_mut(), &compiled.sql, &batches)
                    .map_err(|e| e.with_fingerprint(&compiled.fingerprint))?;
                Ok(StackOutcome::Affected(n))
            }
            StackMethod::ExecuteScript => {
                if statement.params().has_positional()
                    && !self.capabilities().supports_script_parameters
                {
                    return Err(SqlSpecError::Parameter(
                        "this driver does not support parameters in scripts".into(),
                    ));
                }
                let parsed = ast::parse_script(statement.raw(), self.dialect)?;
                let rows_affected = shared
                    .driver
                    .execute_script(self.conn.connection_mut(), statement.raw())?;
                Ok(StackOutcome::Script {
                    statements: parsed.len(),
                    rows_affected,
                })
            }
            StackMethod::ExecuteArrow => {
                let compiled = self.compile_statement(statement)?;
                let params = self.driver_params(statement, &compiled)?;
                let batch = shared
                    .driver
                    .execute_arrow(self.conn.connection_mut(), &compiled.sql, &params)
                    .map_err(|e| e.with_fingerprint(&compiled.fingerprint))?;
                Ok(StackOutcome::Arrow(batch))
            }
        }
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            TransactionState::Closed => {
                Err(SqlSpecError::Transaction("session is closed".into()))
            }
            TransactionState::Aborted => Err(SqlSpecError::Transaction(
                "transaction aborted; roll back before executing".into(),
            )),
            _ => Ok(()),
        }
    }

    fn compile_statement(&self, statement: &Sql) -> Result<Arc<CompiledStatement>> {
        let target = self
            .capabilities()
            .compile_target(statement.dialect().or(self.shared.config.dialect));
        statement.compile_cached(&target, &self.shared.cache)
    }

    fn driver_params(
        &self,
        statement: &Sql,
        compiled: &CompiledStatement,
    ) -> Result<DriverParams> {
        let mode = if statement.config().strict_parameters {
            NormalizeMode::Strict
        } else {
            NormalizeMode::Lenient
        };
        let params = normalize(
            &statement.effective_params(),
            &compiled.bindings,
            compiled.style,
            mode,
        )?;
        self.shared.driver.normalize_execute_parameters(params)
    }

    fn driver_batches(
        &self,
        statement: &Sql,
        compiled: &CompiledStatement,
        batches: &[Parameters],
    ) -> Result<Vec<DriverParams>> {
        let mode = if statement.config().strict_parameters {
            NormalizeMode::Strict
        } else {
            NormalizeMode::Lenient
        };
        let filter_params = statement.filter_params();
        let normalized = batches
            .iter()
            .map(|batch| {
                let effective = batch.merged(&filter_params);
                normalize(&effective, &compiled.bindings, compiled.style, mode)
                    .map_err(Into::into)
            })
            .collect::<Result<Vec<_>>>()?;
        self.shared
            .driver
            .normalize_execute_many_parameters(normalized)
    }

    /// Record a driver-phase failure: poison connectivity casualties, mark
    /// an open transaction aborted, and attach the statement fingerprint.
    fn note_failure(&mut self, err: SqlSpecError, fingerprint: &str) -> SqlSpecError {
        if err.poisons_connection() {
            self.conn.poison();
            self.state = TransactionState::Closed;
        } else if self.state == TransactionState::InTxn {
            self.state = TransactionState::Aborted;
        }
        err.with_fingerprint(fingerprint)
    }

    /// Run a driver call under the session deadline. A watchdog thread
    /// fires the driver's cancel primitive at expiry; an error returned
    /// after the deadline surfaces as `Timeout`.
    fn with_cancel<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let Some(timeout) = self.timeout else {
            return f(self);
        };
        let Some(cancel) = self.shared.driver.cancel_handle(self.conn.connection()) else {
            return f(self);
        };

        let done = Arc::new((Mutex::new(false), Condvar::new()));
        let watchdog_done = done.clone();
        let watchdog = std::thread::spawn(move || {
            let (lock, cvar) = &*watchdog_done;
            let deadline = Instant::now() + timeout;
            let mut finished = lock.lock().expect("watchdog lock");
            while !*finished {
                let now = Instant::now();
                if now >= deadline {
                    cancel();
                    return;
                }
                let (guard, _) = cvar
                    .wait_timeout(finished, deadline - now)
                    .expect("watchdog wait");
                finished = guard;
            }
        });

        let started = Instant::now();
        let result = f(self);
        {
            let (lock, cvar) = &*done;
            *lock.lock().expect("watchdog lock") = true;
            cvar.notify_all();
        }
        let _ = watchdog.join();

        match result {
            Err(_) if started.elapsed() >= timeout => Err(SqlSpecError::Timeout {
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
            other => other,
        }
    }
}

impl<D: Driver> Drop for Session<D> {
    fn drop(&mut self) {
        // A connection never returns to the pool inside a transaction.
        if matches!(
            self.state,
            TransactionState::InTxn | TransactionState::Aborted
        ) {
            let shared = self.shared.clone();
            if shared.driver.rollback(self.conn.connection_mut()).is_err() {
                self.conn.poison();
            }
        }
    }
}
