//! The write arbiter
//!
//! All changes to a profile's databases go through a [`Writer`]. Each
//! change runs under the exclusive lock of its database dir, so writers in
//! several processes never interleave a read-modify-write. Under that lock
//! the writer rechecks locks against the current system databases, applies
//! the change atomically and numbers it.

use crate::database::Database;
use crate::error::{WriterError, WriterResult};
use crate::lock::DirLock;
use confdb_common::config::Config;
use confdb_common::{Result, Value};
use confdb_engine::message::{self, method};
use confdb_engine::{BusType, Engine, LayerKind, Reply, ReplyType, WriteMessage};
use std::path::Path;
use tracing::{debug, info, warn};

/// Arbiter for the databases of one configuration
#[derive(Debug)]
pub struct Writer {
    config: Config,
    engine: Engine,
}

impl Writer {
    /// Create a writer serving the databases named by `config`
    pub fn new(config: Config) -> Result<Self> {
        let engine = Engine::from_config(&config)?;
        info!(
            "Writer {} serving {} and {}",
            config.writer.destination,
            config.user_dir.display(),
            config.system_dir.display()
        );
        Ok(Self { config, engine })
    }

    /// Sequence number of the last change applied to the user databases
    pub fn sequence(&self) -> Result<u64> {
        Ok(DirLock::acquire(&self.config.user_dir)?.sequence()?)
    }

    /// Serve one method call, returning the reply body
    ///
    /// Every failure is reported as a remote failure.
    pub fn handle(&self, call: &WriteMessage) -> Result<Value> {
        self.dispatch(call).map(ReplyType::encode).map_err(|e| {
            warn!("{} on {} failed: {}", call.method, call.object_path, e);
            e.into()
        })
    }

    fn dispatch(&self, call: &WriteMessage) -> WriterResult<Reply> {
        if call.destination != self.config.writer.destination {
            return Err(WriterError::UnknownDestination(call.destination.clone()));
        }
        if call.interface != self.config.writer.interface {
            return Err(WriterError::UnknownMethod {
                interface: call.interface.clone(),
                method: call.method.clone(),
            });
        }
        let db = self.database(call.bus, &call.object_path)?;
        let body = call
            .body
            .as_ref()
            .ok_or_else(|| WriterError::Rejected(format!("{} without arguments", call.method)))?;

        match call.method.as_str() {
            method::CHANGE => self.change(&db, body),
            method::SET_LOCKED => {
                let (target, locked) = message::decode_set_locked_body(body)?;
                let _lock = DirLock::acquire(self.dir(db.kind()))?;
                if db.set_locked(&target, locked)? {
                    info!("{} {} in '{}'", if locked { "Locked" } else { "Unlocked" }, target, db.name());
                }
                Ok(Reply::Unit)
            }
            method::IS_WRITABLE => {
                let target = message::decode_is_writable_body(body)?;
                Ok(Reply::Boolean(self.engine.is_writable(&target)?))
            }
            _ => Err(WriterError::UnknownMethod {
                interface: call.interface.clone(),
                method: call.method.clone(),
            }),
        }
    }

    fn change(&self, db: &Database, body: &Value) -> WriterResult<Reply> {
        if !db.kind().is_writable() {
            return Err(WriterError::Rejected(format!(
                "{} '{}' is read-only",
                db.kind(),
                db.name()
            )));
        }
        let changes = message::decode_change_body(body)?;

        let mut lock = DirLock::acquire(self.dir(db.kind()))?;
        let stack = self.engine.stack();
        stack.refresh();
        let view = stack.view();
        for (target, _) in &changes {
            if let Some(source) = view.locked_by(target) {
                return Err(WriterError::Rejected(format!(
                    "{target} is locked by {} '{}'",
                    source.kind(),
                    source.name()
                )));
            }
        }

        let sequence = lock.sequence()? + 1;
        db.apply(&changes)?;
        lock.store_sequence(sequence)?;
        debug!("Change {} applied to '{}'", sequence, db.name());
        Ok(Reply::Sequence(sequence))
    }

    fn dir(&self, kind: LayerKind) -> &Path {
        match kind {
            LayerKind::User => &self.config.user_dir,
            LayerKind::System => &self.config.system_dir,
        }
    }

    /// Database addressed by `object_path` on `bus`
    fn database(&self, bus: BusType, object_path: &str) -> WriterResult<Database> {
        let base = &self.config.writer.object_path_base;
        let name = object_path
            .strip_prefix(base.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|name| !name.is_empty() && !name.contains('/'))
            .ok_or_else(|| WriterError::UnknownObject(object_path.to_string()))?;

        let kind = match bus {
            BusType::Session => LayerKind::User,
            BusType::System => LayerKind::System,
        };
        Ok(Database::new(kind, name, self.dir(kind).join(name)))
    }
}
