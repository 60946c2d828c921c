use std::time::Instant;

use tracing::debug;

use crate::engine::{DatabaseHandle, NativeOutcome, SqlEngine};
use crate::envelope::{Request, Response, Value};
use crate::error::{ErrorKind, ExecutionError};
use crate::marshal;

/// Forwards SQL to the engine behind a borrowed handle.
///
/// The gateway owns nothing; the `&mut` borrow on the handle is what keeps
/// calls against one engine from overlapping.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExecutionGateway;

impl ExecutionGateway {
    pub fn new() -> Self {
        Self
    }

    pub fn execute<E: SqlEngine>(
        &self,
        handle: &mut DatabaseHandle<E>,
        sql: &str,
        params: &[Value],
    ) -> Result<NativeOutcome, ExecutionError> {
        if sql.trim().is_empty() {
            return Err(ExecutionError::new(ErrorKind::Parse, "empty SQL statement"));
        }
        let started = Instant::now();
        let outcome = handle.execute(sql, params).map_err(marshal::execution_error);
        debug!(
            handle = %handle.id(),
            params = params.len(),
            elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
            ok = outcome.is_ok(),
            "executed statement"
        );
        outcome
    }

    /// Execute a request and marshal the outcome into its response.
    pub fn respond<E: SqlEngine>(
        &self,
        handle: &mut DatabaseHandle<E>,
        request: &Request,
    ) -> Response {
        if let Some(target) = request.handle {
            if target != handle.id() {
                return Response::err(ExecutionError::new(
                    ErrorKind::HandleClosed,
                    format!("database handle {target} is not open on this boundary"),
                ));
            }
        }
        marshal::to_response(self.execute(handle, &request.sql, &request.params))
    }
}
