/// Represents the ways constructing or running an operator can fail.
///
/// Every variant is non-retriable by contract: an error here reflects a
/// mistake in the graph definition or the execution environment, not a
/// transient condition. Callers should treat any of these as terminal for
/// the node that produced it; the adapter never retries, falls back, or
/// returns a partial result.
#[non_exhaustive]
#[derive(Debug)]
pub enum Error {
    /// The operator definition is invalid: unrecognized operator type,
    /// unsupported dilation, padding not smaller than the kernel, or a
    /// malformed attribute value.
    InvalidConfig(String),
    /// A hard precondition of the execution contract was violated, e.g.
    /// the input is not rank 4 or the slot counts are wrong.
    Precondition(String),
    /// The requested memory layout has no execution path.
    UnsupportedLayout(crate::shapes::Order),
    /// The primitives backend reported a failure from plan creation or
    /// execution.
    Backend(String),
    /// Device is out of memory.
    OutOfMemory,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for Error {}
