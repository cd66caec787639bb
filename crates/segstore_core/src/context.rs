//! Per-caller execution context.

/// Reusable scratch state for index operations.
///
/// Every mutating or searching index call takes an `OpContext` so that key
/// encoding reuses one buffer instead of allocating per call. A context is
/// caller-owned and must not be shared across concurrent calls; the `&mut`
/// receiver on every use site enforces this.
#[derive(Debug, Default)]
pub struct OpContext {
    /// Scratch buffer for storage-key encoding.
    pub(crate) key_buf: Vec<u8>,
}

impl OpContext {
    /// Creates a fresh context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
