//! Size-bounded accumulation of points

use crate::errors::EncodingError;
use crate::point::Point;

/// Default payload capacity accepted by the ingestion endpoint
pub const DEFAULT_MAX_BATCH_BYTES: usize = 2 * 1024 * 1024;

/// Ordered points awaiting a single send
///
/// Capacity is measured in encoded bytes. [`Batch::can_add`] only reports
/// whether another point fits; [`Batch::add`] never rejects, so a point
/// larger than the capacity still lands in an otherwise empty batch.
#[derive(Debug, Clone)]
pub struct Batch {
    points: Vec<Point>,
    size: usize,
    max_bytes: usize,
}

impl Batch {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            points: Vec::new(),
            size: 0,
            max_bytes,
        }
    }

    /// Whether `point` fits without exceeding the capacity
    pub fn can_add(&self, point: &Point) -> bool {
        self.size + point.encoded_len() <= self.max_bytes
    }

    pub fn add(&mut self, point: Point) {
        self.size += point.encoded_len();
        self.points.push(point);
    }

    /// Accumulated encoded size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Encode all points, in insertion order, into one payload
    pub fn serialize(&self) -> Result<Vec<u8>, EncodingError> {
        let mut payload = Vec::with_capacity(self.size);
        for point in &self.points {
            point.encode_into(&mut payload)?;
        }
        Ok(payload)
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.size = 0;
    }

    /// Hand the accumulated points out, leaving an empty batch of the same capacity
    pub fn take(&mut self) -> Batch {
        let max_bytes = self.max_bytes;
        std::mem::replace(self, Batch::new(max_bytes))
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BATCH_BYTES)
    }
}
