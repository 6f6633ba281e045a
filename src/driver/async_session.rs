//! The asynchronous session.
//!
//! Same verbs and the same transaction state machine as the sync
//! [`super::Session`], with suspension at every I/O boundary: pool
//! acquisition, driver calls, and each step of the sequential stack path.
//! Parsing, compiling, and caching never suspend.
//!
//! Deadlines race the driver future against a timer. On expiry the
//! pending future is dropped, the driver's cancel primitive (when it has
//! one) is fired, and the connection is destroyed rather than returned,
//! since a dropped future can leave the wire in an unknown state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arrow::record_batch::RecordBatch;
use futures::future::BoxFuture;

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
use super::pool::{AsyncPoolShared, AsyncPooledConnection};
use super::session::TransactionState;
use super::{AsyncDriver, DriverCapabilities, ScriptResult};

/// A scoped async handle exposing execute verbs against a borrowed
/// connection.
pub struct AsyncSession<D: AsyncDriver> {
    shared: Arc<AsyncPoolShared<D>>,
    conn: AsyncPooledConnection<D>,
    state: TransactionState,
    dialect: Dialect,
    timeout: Option<Duration>,
}

macro_rules! driver_call {
    ($session:expr, $compiled_fp:expr, |$driver:ident, $conn:ident| $call:expr) => {{
        let timeout = $session.timeout;
        let $driver = $session.shared.driver.clone();
        let started = Instant::now();
        let outcome = match timeout {
            None => {
                let $conn = $session.conn.connection_mut();
                $call.await
            }
            Some(budget) => {
                let raced = {
                    let $conn = $session.conn.connection_mut();
                    tokio::time::timeout(budget, $call).await
                };
                match raced {
                    Ok(result) => result,
                    Err(_elapsed) => {
                        $session.cancel_after_timeout();
                        return Err(SqlSpecError::Timeout {
                            elapsed_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                }
            }
        };
        outcome.map_err(|err| $session.note_failure(err, $compiled_fp))
    }};
}

impl<D: AsyncDriver> AsyncSession<D> {
    pub(crate) fn new(shared: Arc<AsyncPoolShared<D>>, conn: AsyncPooledConnection<D>) -> Self {
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

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    // -----------------------------------------------------------------
    // Execute verbs
    // -----------------------------------------------------------------

    pub async fn execute(&mut self, statement: &Sql) -> Result<ResultSet> {
        self.ensure_ready()?;
        let compiled = self.compile_statement(statement)?;
        let params = self.driver_params(statement, &compiled)?;
        let started = Instant::now();
        let rs = driver_call!(self, &compiled.fingerprint, |driver, conn| driver
            .execute(conn, &compiled.sql, &params))?;
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

    /// Batch DML. With no explicit transaction open, the whole batch runs
    /// inside one implicit transaction.
    pub async fn execute_many(&mut self, statement: &Sql, batches: &[Parameters]) -> Result<u64> {
        self.ensure_ready()?;
        let compiled = self.compile_statement(statement)?;
        let driver_batches = self.driver_batches(statement, &compiled, batches)?;

        let implicit = self.state == TransactionState::Idle;
        if implicit {
            self.begin().await?;
        }
        let result = driver_call!(self, &compiled.fingerprint, |driver, conn| driver
            .execute_many(conn, &compiled.sql, &driver_batches));
        match result {
            Ok(n) => {
                if implicit {
                    self.commit().await?;
                }
                Ok(n)
            }
            Err(err) => {
                if implicit
                    && matches!(
                        self.state,
                        TransactionState::InTxn | TransactionState::Aborted
                    )
                {
                    let _ = self.rollback().await;
                }
                Err(err)
            }
        }
    }

    pub async fn execute_script(&mut self, script: &str) -> Result<ScriptResult> {
        self.ensure_ready()?;
        let statements = ast::parse_script(script, self.dialect)?;
        let rows_affected =
            driver_call!(self, "script", |driver, conn| driver.execute_script(conn, script))?;
        Ok(ScriptResult {
            statements: statements.len(),
            rows_affected,
        })
    }

    pub async fn execute_arrow(&mut self, statement: &Sql) -> Result<RecordBatch> {
        self.ensure_ready()?;
        let compiled = self.compile_statement(statement)?;
        let params = self.driver_params(statement, &compiled)?;
        driver_call!(self, &compiled.fingerprint, |driver, conn| driver
            .execute_arrow(conn, &compiled.sql, &params))
    }

    // -----------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------

    pub async fn begin(&mut self) -> Result<()> {
        match self.state {
            TransactionState::Idle => {
                let driver = self.shared.driver.clone();
                driver.begin(self.conn.connection_mut()).await?;
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

    pub async fn commit(&mut self) -> Result<()> {
        match self.state {
            TransactionState::InTxn => {
                let driver = self.shared.driver.clone();
                driver.commit(self.conn.connection_mut()).await?;
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

    pub async fn rollback(&mut self) -> Result<()> {
        match self.state {
            TransactionState::InTxn | TransactionState::Aborted => {
                let driver = self.shared.driver.clone();
                driver.rollback(self.conn.connection_mut()).await?;
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
    pub async fn close(&mut self) {
        if matches!(
            self.state,
            TransactionState::InTxn | TransactionState::Aborted
        ) {
            let driver = self.shared.driver.clone();
            if driver.rollback(self.conn.connection_mut()).await.is_err() {
                self.conn.poison();
            }
        }
        self.state = TransactionState::Closed;
    }

    /// Scoped transaction: commit on success, rollback on any other exit.
    pub async fn transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(&'a mut Self) -> BoxFuture<'a, Result<T>>,
    {
        self.begin().await?;
        match f(self).await {
            Ok(value) => match self.state {
                TransactionState::InTxn => {
                    self.commit().await?;
                    Ok(value)
                }
                TransactionState::Aborted => {
                    self.rollback().await?;
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
                    let _ = self.rollback().await;
                }
                Err(err)
            }
        }
    }

    // -----------------------------------------------------------------
    // Stack execution
    // -----------------------------------------------------------------

    /// Run a statement stack; semantics identical to the sync session's
    /// `execute_stack`, with suspension between operations.
    pub async fn execute_stack(
        &mut self,
        stack: &StatementStack,
        continue_on_error: bool,
    ) -> Result<Vec<StackResult>> {
        if stack.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_ready()?;

        if self.capabilities().supports_pipeline {
            if let Some(results) = self.try_pipeline(stack).await? {
                return self.finish_stack(results, continue_on_error, false).await;
            }
        }

        let implicit = self.state == TransactionState::Idle;
        if implicit {
            self.begin().await?;
        }

        let total = stack.len();
        let mut results: Vec<StackResult> = Vec::with_capacity(total);
        let mut failed_at: Option<usize> = None;

        for (index, op) in stack.operations().iter().enumerate() {
            match self.run_operation(op).await {
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

        self.finish_stack(results, continue_on_error, implicit).await
    }

    async fn finish_stack(
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
                let _ = self.rollback().await;
            }
            if continue_on_error {
                finish_collect(results)
            } else {
                Ok(results)
            }
        } else {
            if implicit && self.state == TransactionState::InTxn {
                self.commit().await?;
            }
            Ok(results)
        }
    }

    async fn try_pipeline(&mut self, stack: &StatementStack) -> Result<Option<Vec<StackResult>>> {
        let prepared = match self.prepare_operations(stack) {
            Ok(prepared) => prepared,
            Err(_) => return Ok(None),
        };
        let driver = self.shared.driver.clone();
        match driver
            .execute_pipeline(self.conn.connection_mut(), &prepared)
            .await
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

    async fn run_operation(&mut self, op: &StackOperation) -> Result<StackOutcome> {
        let statement = op.statement();
        let driver = self.shared.driver.clone();
        match op.method() {
            StackMethod::Execute => {
                let compiled = self.compile_statement(statement)?;
                let params = self.driver_params(statement, &compiled)?;
                let rs = driver
                    .execute(self.conn.connection_mut(), &compiled.sql, &params)
                    .await
                    .map_err(|e| e.with_fingerprint(&compiled.fingerprint))?;
                Ok(StackOutcome::Rows(rs))
            }
            StackMethod::ExecuteMany => {
                let compiled = self.compile_statement(statement)?;
                let batches = self.driver_batches(statement, &compiled, op.batches())?;
                let n = driver
                    .execute_many(self.conn.connection_mut(), &compiled.sql, &batches)
                    .await
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
                let rows_affected = driver
                    .execute_script(self.conn.connection_mut(), statement.raw())
                    .await?;
                Ok(StackOutcome::Script {
                    statements: parsed.len(),
                    rows_affected,
                })
            }
            StackMethod::ExecuteArrow => {
                let compiled = self.compile_statement(statement)?;
                let params = self.driver_params(statement, &compiled)?;
                let batch = driver
                    .execute_arrow(self.conn.connection_mut(), &compiled.sql, &params)
                    .await
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

    /// Timeout aftermath: fire the cancel primitive if the driver has one,
    /// then destroy the connection. A dropped driver future may have left
    /// a request half-sent.
    fn cancel_after_timeout(&mut self) {
        if let Some(cancel) = self.shared.driver.cancel_handle(self.conn.connection()) {
            cancel();
        }
        self.conn.poison();
        self.state = TransactionState::Closed;
    }

    /// Record a driver-phase failure; mirrors the sync session.
    fn note_failure(&mut self, err: SqlSpecError, fingerprint: &str) -> SqlSpecError {
        if err.poisons_connection() {
            self.conn.poison();
            self.state = TransactionState::Closed;
        } else if self.state == TransactionState::InTxn {
            self.state = TransactionState::Aborted;
        }
        err.with_fingerprint(fingerprint)
    }
}

impl<D: AsyncDriver> Drop for AsyncSession<D> {
    fn drop(&mut self) {
        // No awaiting in drop; a connection abandoned mid-transaction is
        // destroyed rather than returned dirty.
        if matches!(
            self.state,
            TransactionState::InTxn | TransactionState::Aborted
        ) {
            self.conn.poison();
        }
    }
}
