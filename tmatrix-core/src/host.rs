use std::fmt;
use thiserror::Error;

/// The identifier of a host of the fabric.
///
/// A [`HostIndex`] is always in the range `[0, num_hosts)` of the
/// matrix it was checked against (see [`HostIndex::checked`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostIndex(usize);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("Address {address:?} does not have a host suffix (expecting 3 dots)")]
    MissingSuffix { address: String },
    #[error("Address {address:?} has an invalid host suffix")]
    InvalidSuffix { address: String },
    #[error("Address {address:?} resolves to host {index}, out of range [0, {num_hosts})")]
    OutOfRange {
        address: String,
        index: i64,
        num_hosts: usize,
    },
}

impl HostIndex {
    pub const ZERO: Self = Self::new(0);

    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// check the `raw` value returned by [`resolve_host`] is a valid
    /// host of a fabric of `num_hosts` hosts.
    ///
    /// ```
    /// # use tmatrix_core::host::{resolve_host, HostIndex};
    /// let raw = resolve_host("10.0.0.12").unwrap();
    /// assert_eq!(HostIndex::checked("10.0.0.12", raw, 16).unwrap().get(), 11);
    /// assert!(HostIndex::checked("10.0.0.12", raw, 4).is_err());
    /// ```
    pub fn checked(address: &str, raw: i64, num_hosts: usize) -> Result<Self, AddressError> {
        match usize::try_from(raw) {
            Ok(index) if index < num_hosts => Ok(Self(index)),
            _ => Err(AddressError::OutOfRange {
                address: address.to_owned(),
                index: raw,
                num_hosts,
            }),
        }
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

/// resolve the host number carried by the last component of a
/// dotted address.
///
/// Suffixes are 1-based, so `10.0.0.12` is host `11`. A suffix of a
/// single digit denotes a _physical_ host, those are numbered with an
/// additional offset of one: `10.0.0.2` is host `0`.
///
/// The single digit rule is a numbering convention of the fabric and is
/// kept as is. A fabric that numbers its virtual hosts from 1 to 9 will
/// see them resolved as physical hosts.
///
/// No bound check is done, the returned value may be negative or larger
/// than the number of hosts. Use [`HostIndex::checked`].
///
/// ```
/// # use tmatrix_core::host::resolve_host;
/// assert_eq!(resolve_host("10.0.0.12").unwrap(), 11);
/// assert_eq!(resolve_host("10.0.0.2").unwrap(), 0);
/// ```
pub fn resolve_host(address: &str) -> Result<i64, AddressError> {
    let suffix = host_suffix(address).ok_or_else(|| AddressError::MissingSuffix {
        address: address.to_owned(),
    })?;

    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AddressError::InvalidSuffix {
            address: address.to_owned(),
        });
    }

    let value: i64 = suffix.parse().map_err(|_| AddressError::InvalidSuffix {
        address: address.to_owned(),
    })?;

    let mut index = value - 1;
    // physical hosts
    if suffix.len() == 1 {
        index -= 1;
    }

    Ok(index)
}

/// everything after the third `.`
fn host_suffix(address: &str) -> Option<&str> {
    let (position, _) = address.match_indices('.').nth(2)?;
    Some(&address[position + 1..])
}

impl fmt::Display for HostIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
