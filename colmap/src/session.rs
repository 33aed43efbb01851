//! Connection-side collaborators: the session, its schema inspector and the worker pool.

use crate::error::MappingError;
use crate::registry::CodecRegistry;
use crate::schema::TableMetadata;
use crate::statement::{PreparedStatement, ResultSet, Statement, StatementTemplate};
use crate::wire::{ProtocolVersion, UserType};
use crate::{debug, info};
use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

/// Live schema lookup. `Ok(None)` means the object does not exist.
#[async_trait]
pub trait SchemaInspector: Send + Sync {
    async fn describe_table(&self, keyspace: Option<&str>, table: &str) -> Result<Option<TableMetadata>, MappingError>;
    async fn describe_type(&self, keyspace: Option<&str>, name: &str) -> Result<Option<UserType>, MappingError>;
}

#[async_trait]
pub trait Session: SchemaInspector {
    fn protocol_version(&self) -> ProtocolVersion;
    /// Shared with the wire layer; bootstrap registers the native codecs into it.
    fn codec_registry(&self) -> Arc<CodecRegistry>;
    async fn prepare(&self, template: StatementTemplate) -> Result<PreparedStatement, MappingError>;
    async fn execute(&self, statement: Statement) -> Result<ResultSet, MappingError>;
    async fn close(&self) -> Result<(), MappingError>;
    fn is_closed(&self) -> bool;
}

/// Worker pool owned by or lent to a manager factory.
pub struct Executor {
    name: String,
    handle: Handle,
    runtime: Mutex<Option<Runtime>>,
}

impl Executor {
    pub fn new(name: &str, worker_threads: usize) -> Result<Self, MappingError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name(format!("{}-worker", name))
            .enable_all()
            .build()?;
        debug!("Executor {} started with {} workers", name, worker_threads.max(1));
        Ok(Executor { name: name.to_string(), handle: runtime.handle().clone(), runtime: Mutex::new(Some(runtime)) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn spawn<F>(&self, future: F) -> Result<JoinHandle<F::Output>, MappingError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if self.is_shut_down() {
            return Err(MappingError::Session(format!("executor {} is shut down", self.name)));
        }
        Ok(self.handle.spawn(future))
    }

    pub fn is_shut_down(&self) -> bool {
        self.runtime.lock().map(|rt| rt.is_none()).unwrap_or(true)
    }

    /// Stops the workers without blocking, safe to call from async code. Idempotent.
    pub fn shutdown(&self) {
        let runtime = match self.runtime.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(runtime) = runtime {
            runtime.shutdown_background();
            info!("Executor {} shut down", self.name);
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn executor_runs_tasks_until_shut_down() {
        let executor = Executor::new("test", 2).unwrap();
        let handle = executor.spawn(async { 21 * 2 }).unwrap();
        assert_eq!(handle.await.unwrap(), 42);

        executor.shutdown();
        assert!(executor.is_shut_down());
        assert!(executor.spawn(async {}).is_err());
        executor.shutdown();
    }

    #[test]
    fn dropping_an_executor_stops_it() {
        let executor = Executor::new("dropped", 1).unwrap();
        assert_eq!(executor.name(), "dropped");
        assert!(!executor.is_shut_down());
        drop(executor);
    }
}
