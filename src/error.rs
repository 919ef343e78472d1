use std::fmt;
use std::io;

/// Errors raised while building, attaching or using a table.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A creation parameter is out of range.
    #[error("invalid table configuration: {0}")]
    InvalidConfig(&'static str),

    /// The arena could not provide memory for the named structure.
    #[error("shared arena exhausted while allocating {0}")]
    AllocationFailure(&'static str),

    /// An existing region does not hold a table of the expected shape.
    #[error("shared region layout mismatch: {0}")]
    LayoutMismatch(&'static str),

    /// Creating or mapping the backing file failed.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// A key does not fit in the fixed-size payload field reserved for it.
    #[error("key of {len} bytes exceeds the {max} byte limit")]
    KeyTooLong { len: usize, max: usize },

    /// A Call-ID already tracks the maximum number of forked dialogs.
    #[error("call-id already tracks {0} dialogs")]
    DialogLimit(usize),
}

/// Returned by [`Table::insert`](crate::Table::insert) when the arena has no
/// free item slot. The table is left untouched and the payload is handed back.
#[derive(thiserror::Error)]
#[error("shared arena has no free item slot")]
pub struct InsertError<P> {
    payload: P,
}

impl<P> InsertError<P> {
    pub(crate) fn new(payload: P) -> Self {
        Self { payload }
    }

    /// Take back the payload that could not be stored.
    pub fn into_payload(self) -> P {
        self.payload
    }
}

impl<P> fmt::Debug for InsertError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InsertError").finish_non_exhaustive()
    }
}

impl<P> From<InsertError<P>> for Error {
    fn from(_: InsertError<P>) -> Self {
        Error::AllocationFailure("item")
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
