//! Named counters of the queueing subsystem.
//!
//! Every queue `src -> dst` of the switch exposes its byte counters as
//! read handlers named `"{prefix}/q{src}{dst}.{counter}"`. A read returns
//! the value as decimal text.

use crate::host::HostIndex;
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, PoisonError},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("Counter {name:?} is not available")]
    Unavailable {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Counter {name:?} returned {value:?}, expecting a decimal integer")]
    Malformed { name: String, value: String },
}

/// Access to the named counters of the queueing subsystem.
///
/// A read may block the caller for as long as the subsystem takes
/// to answer.
pub trait CounterSource: Send + Sync {
    fn read_counter(&self, name: &str) -> Result<i64, CounterError>;
}

/// parse the text answer of a read handler
pub fn parse_counter(name: &str, value: &str) -> Result<i64, CounterError> {
    value
        .trim()
        .parse()
        .map_err(|_| CounterError::Malformed {
            name: name.to_owned(),
            value: value.to_owned(),
        })
}

/// The counters each queue exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterKind {
    EnqueueBytes,
    DequeueBytes,
    DequeueBytesNoHeaders,
    Bytes,
}

impl CounterKind {
    pub const ALL: [Self; 4] = [
        Self::EnqueueBytes,
        Self::DequeueBytes,
        Self::DequeueBytesNoHeaders,
        Self::Bytes,
    ];

    pub fn handler(self) -> &'static str {
        match self {
            Self::EnqueueBytes => "enqueue_bytes",
            Self::DequeueBytes => "dequeue_bytes",
            Self::DequeueBytesNoHeaders => "dequeue_bytes_no_headers",
            Self::Bytes => "bytes",
        }
    }
}

impl fmt::Display for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.handler())
    }
}

/// name of the queue `src -> dst`
///
/// The host numbers are concatenated without separator, with 10 hosts
/// or more the names are ambiguous (`q110` is both `(1, 10)` and `(11, 0)`).
///
/// ```
/// # use tmatrix_core::{counter::queue_name, HostIndex};
/// assert_eq!(queue_name("hybrid_switch", HostIndex::new(0), HostIndex::new(1)), "hybrid_switch/q01");
/// ```
pub fn queue_name(prefix: &str, src: HostIndex, dst: HostIndex) -> String {
    format!("{prefix}/q{src}{dst}")
}

/// A read only handle to one named counter.
#[derive(Clone)]
pub struct HandlerChannel {
    name: Arc<str>,
    source: Arc<dyn CounterSource>,
}

impl HandlerChannel {
    pub fn new(name: impl Into<Arc<str>>, source: Arc<dyn CounterSource>) -> Self {
        Self {
            name: name.into(),
            source,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn read(&self) -> Result<i64, CounterError> {
        self.source.read_counter(&self.name)
    }
}

impl fmt::Debug for HandlerChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandlerChannel").field(&self.name).finish()
    }
}

/// One [`HandlerChannel`] per pair of hosts and per [`CounterKind`].
///
/// The table is built once and the handles are reused for the lifetime
/// of the estimator.
pub struct HandlerTable {
    num_hosts: usize,
    prefix: String,
    source: Arc<dyn CounterSource>,
    enqueue_bytes: Vec<HandlerChannel>,
    dequeue_bytes: Vec<HandlerChannel>,
    dequeue_bytes_no_headers: Vec<HandlerChannel>,
    bytes: Vec<HandlerChannel>,
}

impl HandlerTable {
    pub fn new(num_hosts: usize, prefix: impl Into<String>, source: Arc<dyn CounterSource>) -> Self {
        let prefix = prefix.into();
        let build = |kind: CounterKind| -> Vec<HandlerChannel> {
            let mut table = Vec::with_capacity(num_hosts * num_hosts);
            for src in (0..num_hosts).map(HostIndex::new) {
                for dst in (0..num_hosts).map(HostIndex::new) {
                    let name = format!("{}.{kind}", queue_name(&prefix, src, dst));
                    table.push(HandlerChannel::new(name, Arc::clone(&source)));
                }
            }
            table
        };

        Self {
            enqueue_bytes: build(CounterKind::EnqueueBytes),
            dequeue_bytes: build(CounterKind::DequeueBytes),
            dequeue_bytes_no_headers: build(CounterKind::DequeueBytesNoHeaders),
            bytes: build(CounterKind::Bytes),
            num_hosts,
            prefix,
            source,
        }
    }

    pub fn num_hosts(&self) -> usize {
        self.num_hosts
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn channel(&self, kind: CounterKind, src: HostIndex, dst: HostIndex) -> &HandlerChannel {
        let table = match kind {
            CounterKind::EnqueueBytes => &self.enqueue_bytes,
            CounterKind::DequeueBytes => &self.dequeue_bytes,
            CounterKind::DequeueBytesNoHeaders => &self.dequeue_bytes_no_headers,
            CounterKind::Bytes => &self.bytes,
        };
        &table[src.get() * self.num_hosts + dst.get()]
    }

    pub fn read(&self, kind: CounterKind, src: HostIndex, dst: HostIndex) -> Result<i64, CounterError> {
        self.channel(kind, src, dst).read()
    }

    /// read a counter that is not part of the table, such as the
    /// queue lengths
    pub fn read_named(&self, name: &str) -> Result<i64, CounterError> {
        self.source.read_counter(name)
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTable")
            .field("num_hosts", &self.num_hosts)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

/// In memory [`CounterSource`].
///
/// Values are set by name, reading a name that was never set is
/// an [`CounterError::Unavailable`] error.
///
/// ```
/// # use tmatrix_core::counter::{CounterSource, StaticCounters};
/// let counters = StaticCounters::new();
/// counters.set("hybrid_switch/q01.bytes", 300);
///
/// assert_eq!(counters.read_counter("hybrid_switch/q01.bytes").unwrap(), 300);
/// assert!(counters.read_counter("hybrid_switch/q10.bytes").is_err());
/// ```
#[derive(Debug, Default)]
pub struct StaticCounters {
    values: Mutex<HashMap<String, i64>>,
}

impl StaticCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// create a source where every counter of every queue is `0`
    pub fn zeroed(num_hosts: usize, prefix: &str) -> Self {
        let counters = Self::new();
        for src in (0..num_hosts).map(HostIndex::new) {
            for dst in (0..num_hosts).map(HostIndex::new) {
                for kind in CounterKind::ALL {
                    counters.set_queue(prefix, src, dst, kind, 0);
                }
            }
        }
        counters
    }

    pub fn set(&self, name: impl Into<String>, value: i64) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), value);
    }

    pub fn set_queue(&self, prefix: &str, src: HostIndex, dst: HostIndex, kind: CounterKind, value: i64) {
        self.set(format!("{}.{kind}", queue_name(prefix, src, dst)), value);
    }
}

impl CounterSource for StaticCounters {
    fn read_counter(&self, name: &str) -> Result<i64, CounterError> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
            .ok_or_else(|| CounterError::Unavailable {
                name: name.to_owned(),
                source: anyhow::anyhow!("no such handler"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_names() {
        let source: Arc<dyn CounterSource> = Arc::new(StaticCounters::new());
        let table = HandlerTable::new(4, "hybrid_switch", source);

        assert_eq!(
            table
                .channel(CounterKind::EnqueueBytes, HostIndex::new(0), HostIndex::new(1))
                .name(),
            "hybrid_switch/q01.enqueue_bytes"
        );
        assert_eq!(
            table
                .channel(CounterKind::DequeueBytesNoHeaders, HostIndex::new(3), HostIndex::new(2))
                .name(),
            "hybrid_switch/q32.dequeue_bytes_no_headers"
        );
        assert_eq!(
            table
                .channel(CounterKind::Bytes, HostIndex::new(2), HostIndex::new(3))
                .name(),
            "hybrid_switch/q23.bytes"
        );
    }

    #[test]
    fn read_through_table() {
        let counters = Arc::new(StaticCounters::zeroed(2, "sw"));
        counters.set("sw/q10.dequeue_bytes", 77);
        let table = HandlerTable::new(2, "sw", counters);

        assert_eq!(
            table
                .read(CounterKind::DequeueBytes, HostIndex::new(1), HostIndex::new(0))
                .unwrap(),
            77
        );
        assert_eq!(
            table
                .read(CounterKind::Bytes, HostIndex::new(1), HostIndex::new(0))
                .unwrap(),
            0
        );
    }

    #[test]
    fn unavailable() {
        let table = HandlerTable::new(2, "sw", Arc::new(StaticCounters::new()));

        assert!(matches!(
            table.read(CounterKind::Bytes, HostIndex::ZERO, HostIndex::ZERO),
            Err(CounterError::Unavailable { .. })
        ));
    }

    #[test]
    fn parse() {
        assert_eq!(parse_counter("c", "42").unwrap(), 42);
        assert_eq!(parse_counter("c", " 42\r\n").unwrap(), 42);
        assert_eq!(parse_counter("c", "-3").unwrap(), -3);
        assert!(matches!(
            parse_counter("c", "forty two"),
            Err(CounterError::Malformed { .. })
        ));
        assert!(parse_counter("c", "").is_err());
    }
}
