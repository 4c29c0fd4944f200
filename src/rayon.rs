//! Parallel segment counting.
//!
//! Segment files are independent, so each one is opened and decoded on its
//! own rayon thread with no shared state. The public entry point is
//! [`count_segments`](crate::count_segments); this module only holds the
//! parallel implementation it switches to when the `rayon` feature is on.

use std::path::PathBuf;

use ::rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::error::DivienError;
use crate::repair::{SegmentCounts, count_segment};

/// Count every segment in parallel. Results keep the order of `paths`.
pub(crate) fn count_segments_parallel(
    paths: &[PathBuf],
) -> Result<Vec<SegmentCounts>, DivienError> {
    log::debug!("Counting {} segments on the rayon pool", paths.len());
    paths.par_iter().map(count_segment).collect()
}
