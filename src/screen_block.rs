use std::iter::FusedIterator;

use itertools::iproduct;

use crate::geometry::AABB;

/// Pixel coordinates, `y` grows upwards from the bottom row of the image.
pub type ScreenPoint = nalgebra::Point2<u32>;
pub type ScreenSize = nalgebra::Vector2<u32>;
/// Half open block of pixels, `max` is exclusive.
pub type ScreenBlock = AABB<ScreenPoint>;

impl ScreenBlock {
    pub fn from_size(size: ScreenSize) -> ScreenBlock {
        AABB::new(ScreenPoint::origin(), ScreenPoint::from(size))
    }

    pub fn width(&self) -> u32 {
        self.max.x.saturating_sub(self.min.x)
    }

    pub fn height(&self) -> u32 {
        self.max.y.saturating_sub(self.min.y)
    }

    pub fn area(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn contains_point(&self, point: &ScreenPoint) -> bool {
        point.x >= self.min.x && point.x < self.max.x && point.y >= self.min.y && point.y < self.max.y
    }

    /// Create an iterator over coordinates (x, y) pairs inside the block,
    /// in C order (x changes first, then y)
    pub fn internal_points(&self) -> InternalPoints {
        if self.is_empty() {
            InternalPoints::empty()
        } else {
            InternalPoints {
                min_x: self.min.x,
                max: self.max,
                cursor: self.min,
            }
        }
    }

    /// Splits the block into `tile_size` squares in row-major order, starting at `min`.
    /// Tiles on the top and right edges are clipped to the block.
    pub fn tile_ordering(&self, tile_size: u32) -> Vec<ScreenBlock> {
        assert!(tile_size > 0);
        if self.is_empty() {
            return Vec::new();
        }

        iproduct!(
            (self.min.y..self.max.y).step_by(tile_size as usize),
            (self.min.x..self.max.x).step_by(tile_size as usize)
        )
        .map(|(y, x)| {
            AABB::new(
                ScreenPoint::new(x, y),
                ScreenPoint::new((x + tile_size).min(self.max.x), (y + tile_size).min(self.max.y)),
            )
        })
        .collect()
    }
}

#[derive(Copy, Clone, Debug)]
pub struct InternalPoints {
    min_x: u32,
    max: ScreenPoint,

    cursor: ScreenPoint,
}

impl InternalPoints {
    // Construct an iterator over internal points that returns no points
    fn empty() -> Self {
        InternalPoints {
            min_x: 1,
            max: ScreenPoint::origin(),
            cursor: ScreenPoint::origin(),
        }
    }
}

impl Iterator for InternalPoints {
    type Item = ScreenPoint;

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.len();
        (len, Some(len))
    }

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.y >= self.max.y {
            return None;
        }

        let ret = self.cursor;

        debug_assert!(self.cursor.x < self.max.x);
        self.cursor.x += 1;
        if self.cursor.x >= self.max.x {
            self.cursor.x = self.min_x;
            self.cursor.y += 1;
        }

        Some(ret)
    }
}

impl ExactSizeIterator for InternalPoints {
    fn len(&self) -> usize {
        if self.cursor.y >= self.max.y {
            0
        } else {
            let row = (self.max.x - self.min_x) as usize;
            let whole_rows = (self.max.y - self.cursor.y - 1) as usize * row;
            let current_row = (self.max.x - self.cursor.x) as usize;
            whole_rows + current_row
        }
    }
}

impl FusedIterator for InternalPoints {}
