use ndarray::ArrayD;

// Indexing keys for slice / set-slice
//
// A key is an ordered list of components applied to consecutive axes.
// Basic components (integer, span, new-axis) may appear anywhere; the
// advanced components — a boolean mask or an integer list — are supported
// only as the leading component, which covers the practically useful cases
// while keeping the gradient scatter rules tractable.
//
// Span semantics follow the buffer's native `ndarray::Slice`: negative
// bounds count from the end, the `start..stop` range is selected first, and
// a negative step walks it in reverse.

/// One component of an indexing key.
#[derive(Debug, Clone)]
pub enum Indexer {
    /// Insert a new axis of size 1 at this position.
    NewAxis,
    /// A single integer index (negative counts from the end); removes the axis.
    At(isize),
    /// A contiguous-with-step range over one axis.
    Span {
        start: Option<isize>,
        stop: Option<isize>,
        step: isize,
    },
    /// Boolean mask over the leading `mask.ndim()` axes; selected positions
    /// become one output axis, in row-major scan order. Leading-only.
    Mask(ArrayD<bool>),
    /// 1-D integer list over the leading axis; may repeat positions.
    /// Leading-only.
    Take(Vec<isize>),
    /// 2-D integer list over the leading axis; each row selects like `Take`
    /// and the rows become a new leading output axis. Leading-only.
    TakeGrid(Vec<Vec<isize>>),
}

/// A full indexing key: one `Indexer` per consumed axis.
#[derive(Debug, Clone)]
pub struct Key(pub(crate) Vec<Indexer>);

impl Key {
    pub fn new(components: Vec<Indexer>) -> Self {
        Key(components)
    }

    pub fn components(&self) -> &[Indexer] {
        &self.0
    }
}

impl From<Vec<Indexer>> for Key {
    fn from(components: Vec<Indexer>) -> Self {
        Key(components)
    }
}

impl From<Indexer> for Key {
    fn from(component: Indexer) -> Self {
        Key(vec![component])
    }
}

// Short constructors, so call sites read close to the slicing they express.

/// Integer index along one axis.
pub fn at(index: isize) -> Indexer {
    Indexer::At(index)
}

/// `start..stop` with step 1. `None` means "from the beginning" / "to the end".
pub fn span(start: impl Into<Option<isize>>, stop: impl Into<Option<isize>>) -> Indexer {
    Indexer::Span {
        start: start.into(),
        stop: stop.into(),
        step: 1,
    }
}

/// `start..stop` with an explicit step (negative walks in reverse).
pub fn span_step(
    start: impl Into<Option<isize>>,
    stop: impl Into<Option<isize>>,
    step: isize,
) -> Indexer {
    Indexer::Span {
        start: start.into(),
        stop: stop.into(),
        step,
    }
}

/// The whole axis, unchanged.
pub fn full() -> Indexer {
    Indexer::Span {
        start: None,
        stop: None,
        step: 1,
    }
}

/// Insert a new axis of size 1.
pub fn newaxis() -> Indexer {
    Indexer::NewAxis
}

/// Boolean mask over the leading axes.
pub fn mask(m: ArrayD<bool>) -> Indexer {
    Indexer::Mask(m)
}

/// 1-D integer list over the leading axis.
pub fn take(indices: Vec<isize>) -> Indexer {
    Indexer::Take(indices)
}

/// 2-D integer list over the leading axis.
pub fn take_grid(rows: Vec<Vec<isize>>) -> Indexer {
    Indexer::TakeGrid(rows)
}
