//! Length-prefix validation.
//!
//! Every variable-length codec passes its peer-supplied count through here
//! before reserving anything. A rejected count never reaches an allocator.

use tracing::warn;

use crate::config::DecoderConfig;
use crate::error::{DecodeError, DecodeResult};

/// Largest count accepted for elements of `element_size` bytes.
///
/// The tighter of `max_length` and the number of elements that fit in
/// `max_allocation` (itself capped at `isize::MAX`, the most any Rust
/// allocation can hold).
pub fn max_elements(element_size: usize, config: &DecoderConfig) -> u64 {
    let by_count = config.max_length as u64;
    if element_size == 0 {
        return by_count;
    }
    let byte_budget = config.max_allocation.min(isize::MAX as usize);
    by_count.min((byte_budget / element_size) as u64)
}

/// Validate a raw length for elements of `element_size` bytes.
pub fn check_length_for_size(
    raw: u64,
    element_size: usize,
    config: &DecoderConfig,
) -> DecodeResult<usize> {
    let limit = max_elements(element_size, config);
    if raw > limit {
        warn!(length = raw, limit, element_size, "rejected length prefix");
        return Err(DecodeError::SizeLimitExceeded { length: raw, limit });
    }
    usize::try_from(raw).map_err(|_| DecodeError::SizeLimitExceeded { length: raw, limit })
}

/// Validate a raw length for a sequence of `E`.
pub fn check_length<E>(raw: u64, config: &DecoderConfig) -> DecodeResult<usize> {
    check_length_for_size(raw, std::mem::size_of::<E>(), config)
}
