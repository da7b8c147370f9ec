//! Sub-region views over flat row-major buffers.
//!
//! Every kernel addresses its inputs and outputs through a `View`: a
//! logical `height × width` rectangle embedded in a larger physical
//! buffer at a column offset, with a distinct row stride ("total width").
//! Multiple logical regions can share one physical buffer this way, and
//! the index arithmetic lives here instead of being re-derived per kernel.

use crate::error::StrandError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct View {
    /// Column offset of the region's first column within a row.
    pub offset: usize,
    /// Physical row stride of the backing buffer.
    pub row_stride: usize,
    /// Logical column extent of the region.
    pub width: usize,
    /// Row count. Sub-region operations never change it.
    pub height: usize,
}

impl View {
    pub fn new(offset: usize, row_stride: usize, width: usize, height: usize) -> Self {
        debug_assert!(offset + width <= row_stride, "region exceeds its row stride");
        Self { offset, row_stride, width, height }
    }

    /// View covering a whole `height × width` buffer.
    pub fn contiguous(width: usize, height: usize) -> Self {
        Self::new(0, width, width, height)
    }

    /// Flat index of logical element `(row, col)`.
    ///
    /// `col` may exceed `width` for layouts that interleave filter planes
    /// along the column axis; callers bound it against `width * n_filters`.
    pub fn idx(&self, row: usize, col: usize) -> usize {
        row * self.row_stride + self.offset + col
    }

    /// Number of physical elements a backing buffer must hold for this
    /// view when each row carries `planes` filter planes of `width`.
    pub fn min_len(&self, planes: usize) -> usize {
        if self.height == 0 {
            return 0;
        }
        (self.height - 1) * self.row_stride + self.offset + self.width * planes
    }

    /// Check that a buffer of `len` elements can back this view with
    /// `planes` interleaved filter planes per row.
    pub fn check_fits(&self, len: usize, planes: usize) -> Result<(), StrandError> {
        if self.offset + self.width * planes > self.row_stride {
            return Err(StrandError::ViewOutOfBounds {
                msg: format!(
                    "offset {} + {} plane(s) of width {} exceed row stride {}",
                    self.offset, planes, self.width, self.row_stride
                ),
            });
        }
        let need = self.min_len(planes);
        if need > len {
            return Err(StrandError::ViewOutOfBounds {
                msg: format!("view needs {} elements, buffer holds {}", need, len),
            });
        }
        Ok(())
    }

    /// A second region in the same physical buffer, starting right after
    /// this one's columns.
    pub fn adjacent(&self, width: usize) -> Self {
        Self { offset: self.offset + self.width, row_stride: self.row_stride, width, height: self.height }
    }
}
