//! Connections which are borrowed from the connection pool.

use crate::backend::{Backend, Connection};

use debug_ignore::DebugIgnore;
use derive_where::derive_where;
use std::sync::{Arc, Mutex};

// Connections which are open, but not claimed by anyone.
#[derive_where(Debug)]
pub(crate) struct Idle<Conn: Connection> {
    max: usize,
    conns: Mutex<Vec<(Backend, DebugIgnore<Conn>)>>,
}

impl<Conn: Connection> Idle<Conn> {
    pub(crate) fn new(max: usize) -> Self {
        Self {
            max,
            conns: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn take(&self) -> Option<(Backend, Conn)> {
        self.conns
            .lock()
            .unwrap()
            .pop()
            .map(|(backend, DebugIgnore(conn))| (backend, conn))
    }

    fn put_back(&self, backend: Backend, conn: Conn) {
        let mut conns = self.conns.lock().unwrap();
        if conns.len() < self.max {
            conns.push((backend, DebugIgnore(conn)));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.conns.lock().unwrap().len()
    }

    pub(crate) fn clear(&self) {
        self.conns.lock().unwrap().clear();
    }
}

/// A [Connection] claimed from the pool.
///
/// Note that this method implements [std::ops::Deref] for the
/// generic `Conn` type, and generally, clients should transparently
/// use a handle as a connection.
///
/// Dropping a handle closes the connection. A connection only goes back to
/// the pool through [Handle::release], once the caller knows that no reply
/// is still in flight on it. A command future dropped halfway through
/// therefore never leaves an unread reply behind for the next claim.
#[derive_where(Debug)]
pub struct Handle<Conn: Connection> {
    inner: DebugIgnore<Conn>,
    backend: Backend,
    idle: Arc<Idle<Conn>>,
}

impl<Conn: Connection> Handle<Conn> {
    pub(crate) fn new(conn: Conn, backend: Backend, idle: Arc<Idle<Conn>>) -> Self {
        Self {
            inner: DebugIgnore(conn),
            backend,
            idle,
        }
    }

    /// The backend this connection is connected to.
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Returns the connection to the pool, for a later claim to reuse.
    pub fn release(self) {
        let Self {
            inner: DebugIgnore(conn),
            backend,
            idle,
        } = self;
        idle.put_back(backend, conn);
    }

    /// Closes the connection.
    ///
    /// Equivalent to dropping the handle.
    pub fn discard(self) {}
}

impl<Conn: Connection> std::ops::Deref for Handle<Conn> {
    type Target = Conn;
    fn deref(&self) -> &Self::Target {
        &self.inner.0
    }
}

impl<Conn: Connection> std::ops::DerefMut for Handle<Conn> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner.0
    }
}
