/// All errors that can occur within the Taper core.
///
/// This enum captures every failure mode: invalid operation inputs, shape and
/// broadcast mismatches, malformed indexing keys, and invariant violations
/// surfaced by the backward engine. Using a single error type across the
/// library simplifies error propagation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An operation received an input value it cannot work with
    /// (ragged nested data, a non-0/1 mask, `repeats == 0`, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Shape mismatch between two tensors (e.g., concatenating [2,3] with [4,5]).
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// Two shapes cannot be broadcast together under NumPy-style rules.
    #[error("shapes {lhs:?} and {rhs:?} are not broadcast-compatible")]
    BroadcastMismatch { lhs: Vec<usize>, rhs: Vec<usize> },

    /// Element count mismatch when building a tensor from flat data.
    #[error("element count mismatch: shape {shape:?} requires {expected} elements, got {got}")]
    ElementCount {
        shape: Vec<usize>,
        expected: usize,
        got: usize,
    },

    /// Axis index out of range for the tensor's rank.
    #[error("axis {axis} out of range for tensor of rank {rank}")]
    AxisOutOfRange { axis: isize, rank: usize },

    /// Integer index out of bounds along an axis.
    #[error("index {index} out of bounds for axis {axis} with size {size}")]
    IndexOutOfBounds {
        index: isize,
        axis: usize,
        size: usize,
    },

    /// Malformed slice / set-slice key, reported before any numeric work.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// `backward()` called on a non-scalar tensor without an explicit seed.
    #[error(
        "backward() requires a rank-0 tensor, got shape {shape:?}; \
         reduce to a scalar first or supply a seed gradient"
    )]
    NonScalarBackward { shape: Vec<usize> },

    /// An explicit seed gradient does not match the root tensor's shape.
    #[error("seed gradient shaped {got:?} does not match root shape {expected:?}")]
    SeedShape {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// An operation's backward returned the wrong number of gradients.
    /// This is an internal invariant violation, never a user error.
    #[error("{op}: backward returned {got} gradients for {expected} inputs")]
    GradientCount {
        op: &'static str,
        expected: usize,
        got: usize,
    },

    /// An operation's backward returned a gradient whose shape does not match
    /// the corresponding input. Indicates a wrong gradient rule.
    #[error("{op}: backward gradient for input {index} shaped {got:?}, input is {expected:?}")]
    GradientShape {
        op: &'static str,
        index: usize,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// A cycle was found while traversing the computation graph.
    #[error("cycle detected in computation graph")]
    CycleDetected,

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }
}

/// Convenience Result type used throughout Taper.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
