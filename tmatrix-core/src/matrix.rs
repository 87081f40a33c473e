//! The traffic matrices of the fabric.
//!
//! Three `N x N` matrices are kept together, indexed by `(src, dst)` and
//! flattened as `src * N + dst`:
//!
//! * `enqueue`: bytes entering the queue `src -> dst`;
//! * `dequeue`: bytes leaving the queue `src -> dst`;
//! * `traffic`: the published estimate of the bytes in flight.
//!
//! The three of them are only accessed through a [`MatrixGuard`] so that
//! a reader never sees a `traffic` value derived from an `enqueue` newer
//! than the `dequeue` it was paired with.

use crate::host::HostIndex;
use std::{
    fmt::Write as _,
    sync::{Mutex, MutexGuard, PoisonError},
};

/// The values of the three matrices for one pair of hosts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cell {
    pub enqueue: i64,
    pub dequeue: i64,
    pub traffic: u64,
}

#[derive(Debug)]
struct Matrices {
    enqueue: Vec<i64>,
    dequeue: Vec<i64>,
    traffic: Vec<u64>,
}

/// Shared store of the traffic matrices.
///
/// The store is [`Sync`] and is meant to be shared behind an
/// [`Arc`](std::sync::Arc) between the estimator and the readers.
#[derive(Debug)]
pub struct MatrixStore {
    num_hosts: usize,
    matrices: Mutex<Matrices>,
}

/// Exclusive access to the matrices, released on drop.
pub struct MatrixGuard<'a> {
    num_hosts: usize,
    matrices: MutexGuard<'a, Matrices>,
}

/// `max(0, value)`, negative values come from counters that are not
/// sampled at the exact same time.
#[inline]
pub fn clamp(value: i64) -> u64 {
    value.max(0) as u64
}

impl Matrices {
    fn zeroed(len: usize) -> Self {
        Self {
            enqueue: vec![0; len],
            dequeue: vec![0; len],
            traffic: vec![0; len],
        }
    }
}

impl MatrixStore {
    /// create a store of `num_hosts * num_hosts` zeroed cells
    pub fn new(num_hosts: usize) -> Self {
        Self {
            num_hosts,
            matrices: Mutex::new(Matrices::zeroed(num_hosts * num_hosts)),
        }
    }

    #[inline]
    pub fn num_hosts(&self) -> usize {
        self.num_hosts
    }

    /// acquire the exclusive access to the matrices
    ///
    /// The matrices are plain counters, a panic while holding the lock
    /// does not leave them in a state that needs to be discarded so the
    /// poisoning is ignored.
    pub fn lock(&self) -> MatrixGuard<'_> {
        MatrixGuard {
            num_hosts: self.num_hosts,
            matrices: self.matrices.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// copy of the traffic matrix, row-major
    pub fn snapshot(&self) -> Vec<u64> {
        self.lock().traffic().to_vec()
    }

    /// the traffic matrix as space separated decimal values, row-major
    ///
    /// ```
    /// # use tmatrix_core::{matrix::MatrixStore, HostIndex};
    /// let store = MatrixStore::new(2);
    /// store.lock().set_traffic(HostIndex::ZERO, HostIndex::new(1), 42);
    ///
    /// assert_eq!(store.traffic_text(), "0 42 0 0");
    /// ```
    pub fn traffic_text(&self) -> String {
        self.lock().traffic_text()
    }
}

impl MatrixGuard<'_> {
    #[inline]
    pub fn num_hosts(&self) -> usize {
        self.num_hosts
    }

    #[inline]
    fn index(&self, src: HostIndex, dst: HostIndex) -> usize {
        debug_assert!(src.get() < self.num_hosts && dst.get() < self.num_hosts);
        src.get() * self.num_hosts + dst.get()
    }

    pub fn get(&self, src: HostIndex, dst: HostIndex) -> Cell {
        let i = self.index(src, dst);
        Cell {
            enqueue: self.matrices.enqueue[i],
            dequeue: self.matrices.dequeue[i],
            traffic: self.matrices.traffic[i],
        }
    }

    pub fn add_enqueue(&mut self, src: HostIndex, dst: HostIndex, size: u64) {
        let i = self.index(src, dst);
        let enqueue = &mut self.matrices.enqueue[i];
        *enqueue = enqueue.saturating_add_unsigned(size);
    }

    pub fn set_enqueue(&mut self, src: HostIndex, dst: HostIndex, value: i64) {
        let i = self.index(src, dst);
        self.matrices.enqueue[i] = value;
    }

    pub fn set_dequeue(&mut self, src: HostIndex, dst: HostIndex, value: i64) {
        let i = self.index(src, dst);
        self.matrices.dequeue[i] = value;
    }

    pub fn set_traffic(&mut self, src: HostIndex, dst: HostIndex, value: u64) {
        let i = self.index(src, dst);
        self.matrices.traffic[i] = value;
    }

    /// flattened `enqueue` matrix
    pub fn enqueue(&self) -> &[i64] {
        &self.matrices.enqueue
    }

    /// flattened `dequeue` matrix
    pub fn dequeue(&self) -> &[i64] {
        &self.matrices.dequeue
    }

    /// flattened `traffic` matrix
    pub fn traffic(&self) -> &[u64] {
        &self.matrices.traffic
    }

    /// reset the three matrices to `0`
    pub fn clear(&mut self) {
        self.matrices.enqueue.fill(0);
        self.matrices.dequeue.fill(0);
        self.matrices.traffic.fill(0);
    }

    /// see [`MatrixStore::traffic_text`]
    pub fn traffic_text(&self) -> String {
        let mut out = String::with_capacity(self.matrices.traffic.len() * 4);
        for (i, value) in self.matrices.traffic.iter().enumerate() {
            if i != 0 {
                out.push(' ');
            }
            // writing to a `String` does not fail
            let _ = write!(out, "{value}");
        }
        out
    }
}
