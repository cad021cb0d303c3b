pub mod constants;

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Every condition in this crate that is surfaced to a caller (as opposed to
/// the internal present/absent and end-of-scan control values described in
/// the design notes) is one of these variants.
#[derive(Debug)]
pub enum Error {
    /// `allocBuf` swept the whole pool and found no victim frame.
    BufferExceeded,
    /// `unpin_page` was called on a page whose pin count was already zero.
    PageNotPinned,
    /// `flush_file` found a frame belonging to the file still pinned.
    PagePinned,
    /// `flush_file` found a lookup-index entry pointing at an invalid frame.
    BadBuffer,
    /// An index file exists but its meta page disagrees with the caller's
    /// relation name, attribute offset, or attribute type.
    BadIndexInfo(String),
    /// `start_scan` was given operators outside `{Gt, Gte}`/`{Lt, Lte}`.
    BadOpcodes,
    /// `start_scan` was given `low > high`.
    BadScanrange,
    /// `start_scan` found no key in range.
    NoSuchKeyFound,
    /// `scan_next`/`end_scan` called without an active scan.
    ScanNotInitialized,
    /// `scan_next` called after the scan has already produced every match.
    IndexScanCompleted,
    /// Byte layout was malformed, or a byte slice was the wrong length.
    InvalidData(String),
    /// An input outside the crate's supported range (e.g. a zero-size pool).
    InvalidInput(String),
    /// A file or page could not be created/allocated.
    CreationError,
    /// Propagated unchanged from the paged-file layer.
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BufferExceeded => write!(f, "buffer pool exceeded: no frame to evict"),
            Error::PageNotPinned => write!(f, "page is not pinned"),
            Error::PagePinned => write!(f, "page is still pinned"),
            Error::BadBuffer => write!(f, "buffer descriptor in an inconsistent state"),
            Error::BadIndexInfo(msg) => write!(f, "index file metadata mismatch: {msg}"),
            Error::BadOpcodes => write!(f, "unsupported scan operator combination"),
            Error::BadScanrange => write!(f, "scan low bound exceeds high bound"),
            Error::NoSuchKeyFound => write!(f, "no key in the index satisfies the scan range"),
            Error::ScanNotInitialized => write!(f, "no scan is currently active"),
            Error::IndexScanCompleted => write!(f, "scan has already been exhausted"),
            Error::InvalidData(msg) => write!(f, "invalid data: {msg}"),
            Error::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Error::CreationError => write!(f, "could not create page or file"),
            Error::Io(e) => write!(f, "i/o error: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// Asserts that evaluating `expr` panics. Several of this crate's structural
/// invariants (pin count underflow, an out-of-range frame id) are programmer
/// errors rather than caller-visible `Error`s, per the design notes, so tests
/// assert on the panic directly instead of matching an `Err` variant.
#[macro_export]
macro_rules! assert_errors {
    ($expr:expr) => {
        assert!(std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| $expr)).is_err())
    };
}
