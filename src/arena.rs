//! Fixed-capacity frame storage shared by the worker pool.
//!
//! A [`FrameArena`] holds `workers × chunk_size` frame slots allocated once at
//! startup. Worker `i` owns slots `[i·chunk_size, (i+1)·chunk_size)`; the
//! arena hands those regions out as disjoint `&mut` slices, so the borrow
//! checker enforces that regions never overlap and that no worker touches
//! another worker's frames. Slots are reused in place for every chunk.

use std::ops::Range;

use ffmpeg_next::frame::Video as VideoFrame;

use crate::error::DivienError;

/// Pre-allocated, region-partitioned frame slots.
#[derive(Debug)]
pub struct FrameArena<F> {
    slots: Vec<F>,
    chunk_size: usize,
    workers: usize,
}

impl<F> FrameArena<F> {
    /// Build an arena of `workers × chunk_size` slots using `make` for each.
    ///
    /// # Errors
    ///
    /// - [`DivienError::InvalidConfiguration`] if either dimension is zero or
    ///   the capacity overflows.
    /// - [`DivienError::AllocationFailure`] if slot storage cannot be
    ///   reserved, or any error `make` returns.
    pub fn with_slots<M>(workers: usize, chunk_size: usize, mut make: M) -> Result<Self, DivienError>
    where
        M: FnMut() -> Result<F, DivienError>,
    {
        if workers == 0 || chunk_size == 0 {
            return Err(DivienError::InvalidConfiguration(format!(
                "arena needs at least one worker and one frame per chunk (got {workers}x{chunk_size})"
            )));
        }
        let capacity = workers.checked_mul(chunk_size).ok_or_else(|| {
            DivienError::InvalidConfiguration(format!(
                "{workers} workers x {chunk_size} frames overflows the frame arena"
            ))
        })?;

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| DivienError::AllocationFailure)?;
        for _ in 0..capacity {
            slots.push(make()?);
        }

        Ok(Self {
            slots,
            chunk_size,
            workers,
        })
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots per region.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of regions.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Slot indices owned by `worker`.
    ///
    /// # Errors
    ///
    /// Returns [`DivienError::RegionOutOfBounds`] if `worker` has no region.
    pub fn region_range(&self, worker: usize) -> Result<Range<usize>, DivienError> {
        let out_of_bounds = || DivienError::RegionOutOfBounds {
            offset: worker.saturating_mul(self.chunk_size),
            len: self.chunk_size,
            capacity: self.slots.len(),
        };
        if worker >= self.workers {
            return Err(out_of_bounds());
        }
        let start = worker.checked_mul(self.chunk_size).ok_or_else(out_of_bounds)?;
        Ok(start..start + self.chunk_size)
    }

    /// Borrow `len` slots starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`DivienError::RegionOutOfBounds`] when
    /// `offset + len > capacity`; no slot is touched in that case.
    pub fn region_mut(&mut self, offset: usize, len: usize) -> Result<&mut [F], DivienError> {
        let capacity = self.slots.len();
        match offset.checked_add(len) {
            Some(end) if end <= capacity => Ok(&mut self.slots[offset..end]),
            _ => Err(DivienError::RegionOutOfBounds {
                offset,
                len,
                capacity,
            }),
        }
    }

    /// Borrow the region owned by `worker`.
    pub fn worker_region_mut(&mut self, worker: usize) -> Result<&mut [F], DivienError> {
        let range = self.region_range(worker)?;
        Ok(&mut self.slots[range])
    }

    /// Split the arena into one exclusive region per worker, in worker order.
    pub fn regions_mut(&mut self) -> impl Iterator<Item = &mut [F]> {
        self.slots.chunks_exact_mut(self.chunk_size)
    }

    /// Read-only view of every slot, in index order.
    pub fn slots(&self) -> &[F] {
        &self.slots
    }
}

impl FrameArena<VideoFrame> {
    /// Allocate `workers × chunk_size` empty native frames.
    ///
    /// # Errors
    ///
    /// Returns [`DivienError::AllocationFailure`] if FFmpeg cannot allocate a
    /// frame.
    pub fn allocate(workers: usize, chunk_size: usize) -> Result<Self, DivienError> {
        log::debug!("Allocating frame arena: {workers} regions x {chunk_size} frames");
        Self::with_slots(workers, chunk_size, || {
            let frame = VideoFrame::empty();
            // SAFETY: only the pointer value is inspected.
            if unsafe { frame.as_ptr() }.is_null() {
                Err(DivienError::AllocationFailure)
            } else {
                Ok(frame)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(workers: usize, chunk_size: usize) -> FrameArena<usize> {
        let mut next = 0;
        FrameArena::with_slots(workers, chunk_size, || {
            next += 1;
            Ok(next - 1)
        })
        .unwrap()
    }

    #[test]
    fn regions_are_disjoint_and_ordered() {
        let mut arena = numbered(3, 4);
        assert_eq!(arena.capacity(), 12);

        let regions: Vec<Vec<usize>> = arena.regions_mut().map(|r| r.to_vec()).collect();
        assert_eq!(regions.len(), 3);
        assert_eq!(regions[0], vec![0, 1, 2, 3]);
        assert_eq!(regions[2], vec![8, 9, 10, 11]);
        assert_eq!(arena.region_range(1).unwrap(), 4..8);
    }

    #[test]
    fn out_of_bounds_region_is_rejected_untouched() {
        let mut arena = numbered(2, 5);
        let error = arena.region_mut(8, 5).unwrap_err();
        assert!(matches!(
            error,
            DivienError::RegionOutOfBounds { offset: 8, len: 5, capacity: 10 }
        ));
        assert_eq!(arena.slots(), &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);

        assert!(arena.region_mut(usize::MAX, 2).is_err());
        assert_eq!(arena.region_mut(5, 5).unwrap().len(), 5);
    }

    #[test]
    fn writes_stay_inside_the_worker_region() {
        let mut arena = numbered(2, 3);
        for slot in arena.worker_region_mut(1).unwrap() {
            *slot = 99;
        }
        assert_eq!(arena.slots(), &[0, 1, 2, 99, 99, 99]);
    }

    #[test]
    fn unknown_worker_has_no_region() {
        let mut arena = numbered(2, 3);
        assert!(matches!(
            arena.region_range(2),
            Err(DivienError::RegionOutOfBounds { offset: 6, len: 3, capacity: 6 })
        ));
        assert!(matches!(
            arena.worker_region_mut(usize::MAX),
            Err(DivienError::RegionOutOfBounds { offset: usize::MAX, len: 3, capacity: 6 })
        ));
        assert_eq!(arena.slots(), &[0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn zero_dimensions_are_invalid() {
        assert!(FrameArena::<u8>::with_slots(0, 4, || Ok(0)).is_err());
        assert!(FrameArena::<u8>::with_slots(4, 0, || Ok(0)).is_err());
    }
}
