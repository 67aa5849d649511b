//! Fixed-capacity connection registry
//!
//! Live entries always occupy the prefix `0..len`. Removal moves the last
//! entry into the freed slot, so the table stays dense and order among
//! the survivors is not preserved.

use std::slice;

use mio::Token;

use crate::connection::Connection;

/// Densely packed table of live connections
pub struct ConnectionTable<S> {
    slots: Vec<Connection<S>>,
    capacity: usize,
}

impl<S> ConnectionTable<S> {
    /// Create an empty table holding at most `capacity` connections
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Admit a connection into the next free slot
    ///
    /// Returns the slot index, or hands the connection back when the
    /// table is full.
    pub fn push(&mut self, conn: Connection<S>) -> Result<usize, Connection<S>> {
        if self.is_full() {
            return Err(conn);
        }
        self.slots.push(conn);
        Ok(self.slots.len() - 1)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Connection<S>> {
        self.slots.get_mut(index)
    }

    /// Remove the connection at `index`, filling the hole with the last entry
    pub fn swap_remove(&mut self, index: usize) -> Connection<S> {
        self.slots.swap_remove(index)
    }

    /// Slot currently holding the connection registered under `token`
    pub fn position(&self, token: Token) -> Option<usize> {
        self.slots.iter().position(|conn| conn.token() == token)
    }

    pub fn iter(&self) -> slice::Iter<'_, Connection<S>> {
        self.slots.iter()
    }

    /// Remove every connection
    pub fn drain(&mut self) -> impl Iterator<Item = Connection<S>> + '_ {
        self.slots.drain(..)
    }
}
