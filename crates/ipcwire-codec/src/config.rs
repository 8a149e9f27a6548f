/// Default ceiling on any decoded element count: 16 Mi.
pub const DEFAULT_MAX_LENGTH: usize = 1 << 24;

/// Default ceiling on the bytes one length prefix may reserve: 256 MiB.
pub const DEFAULT_MAX_ALLOCATION: usize = 256 * 1024 * 1024;

/// Limits applied by the bounds guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Largest element count a length prefix may declare.
    pub max_length: usize,
    /// Largest `count * size_of::<Element>()` a length prefix may imply.
    pub max_allocation: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_LENGTH,
            max_allocation: DEFAULT_MAX_ALLOCATION,
        }
    }
}
