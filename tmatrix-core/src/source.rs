use std::{
    fmt,
    str::FromStr,
    sync::atomic::{AtomicU8, Ordering},
};

/// Where the estimator gets the enqueued bytes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    /// the hosts push the size of every flow they send (`"ADU"`), only
    /// the dequeued bytes are read from the queues
    Telemetry,
    /// every counter is read from the queues
    Direct,
}

impl Source {
    /// the text selecting [`Source::Telemetry`], anything else
    /// selects [`Source::Direct`]
    pub const TELEMETRY: &'static str = "ADU";

    /// the text [`Source::Direct`] is displayed with
    pub const DIRECT: &'static str = "QUEUE";

    /// select the source from its text, see [`Source::TELEMETRY`]
    pub fn select(text: &str) -> Self {
        if text.trim() == Self::TELEMETRY {
            Self::Telemetry
        } else {
            Self::Direct
        }
    }

    const fn to_u8(self) -> u8 {
        match self {
            Self::Telemetry => 0,
            Self::Direct => 1,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Telemetry,
            _ => Self::Direct,
        }
    }
}

impl FromStr for Source {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::select(s))
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Telemetry => f.write_str(Self::TELEMETRY),
            Self::Direct => f.write_str(Self::DIRECT),
        }
    }
}

/// total ordering for every operation on the switch
const ORDERING: Ordering = Ordering::SeqCst;

/// The [`Source`] shared between the estimator, which reads it at the
/// beginning of every cycle, and the control surface, which may change
/// it at any time.
#[derive(Debug)]
pub struct SourceSwitch(AtomicU8);

impl SourceSwitch {
    pub fn new(source: Source) -> Self {
        Self(AtomicU8::new(source.to_u8()))
    }

    #[inline]
    pub fn get(&self) -> Source {
        Source::from_u8(self.0.load(ORDERING))
    }

    #[inline]
    pub fn set(&self, source: Source) {
        self.0.store(source.to_u8(), ORDERING)
    }
}
