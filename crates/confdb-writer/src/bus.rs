//! In-process message bus
//!
//! [`LocalBus`] delivers write messages straight to a [`Writer`] in the
//! same process. Async calls run the writer on the blocking pool so file
//! I/O never stalls the runtime.

use crate::writer::Writer;
use async_trait::async_trait;
use confdb_client::{Connection, Transport};
use confdb_common::{Error, Result, Value};
use confdb_engine::{BusType, WriteMessage};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Transport routing every bus to one local writer
#[derive(Debug)]
pub struct LocalBus {
    writer: Arc<Writer>,
    down: RwLock<HashSet<BusType>>,
}

impl LocalBus {
    #[must_use]
    pub fn new(writer: Arc<Writer>) -> Self {
        Self {
            writer,
            down: RwLock::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn writer(&self) -> &Arc<Writer> {
        &self.writer
    }

    /// Make `bus` refuse or accept new connections
    pub fn set_available(&self, bus: BusType, available: bool) {
        let mut down = self.down.write();
        if available {
            down.remove(&bus);
        } else {
            down.insert(bus);
        }
    }

    fn open(&self, bus: BusType) -> Result<Arc<dyn Connection>> {
        if self.down.read().contains(&bus) {
            return Err(Error::transport(format!("{bus} bus is not available")));
        }
        debug!("Connected to local {} bus", bus);
        Ok(Arc::new(LocalConnection {
            bus,
            writer: Arc::clone(&self.writer),
        }))
    }
}

#[async_trait]
impl Transport for LocalBus {
    async fn connect(&self, bus: BusType) -> Result<Arc<dyn Connection>> {
        self.open(bus)
    }

    fn connect_blocking(&self, bus: BusType, _cancel: &CancellationToken) -> Result<Arc<dyn Connection>> {
        self.open(bus)
    }
}

struct LocalConnection {
    bus: BusType,
    writer: Arc<Writer>,
}

impl LocalConnection {
    fn check_bus(&self, message: &WriteMessage) -> Result<()> {
        if message.bus == self.bus {
            Ok(())
        } else {
            Err(Error::transport(format!(
                "message for the {} bus sent on the {} bus",
                message.bus, self.bus
            )))
        }
    }
}

#[async_trait]
impl Connection for LocalConnection {
    async fn call(&self, message: &WriteMessage, cancel: &CancellationToken) -> Result<Value> {
        self.check_bus(message)?;
        let writer = Arc::clone(&self.writer);
        let message = message.clone();
        let task = tokio::task::spawn_blocking(move || writer.handle(&message));

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled),
            joined = task => joined.map_err(|e| Error::transport(format!("writer task failed: {e}")))?,
        }
    }

    fn call_blocking(&self, message: &WriteMessage, cancel: &CancellationToken) -> Result<Value> {
        self.check_bus(message)?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.writer.handle(message)
    }
}
