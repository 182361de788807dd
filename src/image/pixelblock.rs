//! Rectangular pixel buffers addressed in absolute pixel coordinates.
//!
//! A `PixelBlock` covers `[xmin, xmin+nx) × [ymin, ymin+ny)`. Stamps, kernels
//! (centered on 0), galaxy templates and whole exposures all use it, so the
//! convolution and accumulation code never juggles offsets by hand.

use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::domain::{Frame, IntPoint};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelBlock {
    xmin: i64,
    ymin: i64,
    nx: usize,
    ny: usize,
    /// Row-major (y outer, x inner).
    data: Vec<f64>,
}

impl PixelBlock {
    /// Zero-filled block.
    pub fn new(xmin: i64, ymin: i64, nx: usize, ny: usize) -> Self {
        Self {
            xmin,
            ymin,
            nx,
            ny,
            data: vec![0.0; nx * ny],
        }
    }

    /// Zero-filled `(2*half+1)²` block centered on `center`.
    pub fn centered(center: IntPoint, half: i64) -> Self {
        let half = half.max(0);
        let n = (2 * half + 1) as usize;
        Self::new(center.x - half, center.y - half, n, n)
    }

    /// Wrap existing row-major data.
    pub fn from_data(
        xmin: i64,
        ymin: i64,
        nx: usize,
        ny: usize,
        data: Vec<f64>,
    ) -> Result<Self, String> {
        if data.len() != nx * ny {
            return Err(format!(
                "pixel buffer has {} values, expected {}x{}={}",
                data.len(),
                nx,
                ny,
                nx * ny
            ));
        }
        Ok(Self {
            xmin,
            ymin,
            nx,
            ny,
            data,
        })
    }

    /// Same extent as `other`, zero-filled.
    pub fn like(other: &PixelBlock) -> Self {
        Self::new(other.xmin, other.ymin, other.nx, other.ny)
    }

    pub fn xmin(&self) -> i64 {
        self.xmin
    }

    pub fn ymin(&self) -> i64 {
        self.ymin
    }

    /// Last column (inclusive).
    pub fn xmax(&self) -> i64 {
        self.xmin + self.nx as i64 - 1
    }

    /// Last row (inclusive).
    pub fn ymax(&self) -> i64 {
        self.ymin + self.ny as i64 - 1
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Internal buffer length matches the declared extent.
    pub fn is_consistent(&self) -> bool {
        self.data.len() == self.nx * self.ny
    }

    pub fn same_extent(&self, other: &PixelBlock) -> bool {
        self.xmin == other.xmin
            && self.ymin == other.ymin
            && self.nx == other.nx
            && self.ny == other.ny
    }

    pub fn contains(&self, i: i64, j: i64) -> bool {
        i >= self.xmin && j >= self.ymin && i <= self.xmax() && j <= self.ymax()
    }

    /// Linear index of pixel `(i, j)`, used as a parameter offset for galaxy pixels.
    pub fn index_of(&self, i: i64, j: i64) -> Option<usize> {
        if !self.contains(i, j) {
            return None;
        }
        let dx = (i - self.xmin) as usize;
        let dy = (j - self.ymin) as usize;
        Some(dy * self.nx + dx)
    }

    /// Pixel coordinates of a linear index.
    pub fn coords_of(&self, index: usize) -> (i64, i64) {
        let dy = index / self.nx.max(1);
        let dx = index % self.nx.max(1);
        (self.xmin + dx as i64, self.ymin + dy as i64)
    }

    pub fn get(&self, i: i64, j: i64) -> Option<f64> {
        self.index_of(i, j).map(|k| self.data[k])
    }

    /// Value at `(i, j)`, zero outside the block.
    pub fn value_or_zero(&self, i: i64, j: i64) -> f64 {
        self.get(i, j).unwrap_or(0.0)
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn fill(&mut self, value: f64) {
        self.data.iter_mut().for_each(|v| *v = value);
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// `(i, j, value)` in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, i64, f64)> + '_ {
        self.data.iter().enumerate().map(move |(k, &v)| {
            let (i, j) = self.coords_of(k);
            (i, j, v)
        })
    }

    /// Pixel-center frame.
    pub fn frame(&self) -> Frame {
        Frame::new(
            self.xmin as f64,
            self.ymin as f64,
            self.xmax() as f64,
            self.ymax() as f64,
        )
    }

    /// Fill `out` with `self ⊛ kernel`: `out(p) = Σ_k kernel(k) · self(p − k)`.
    ///
    /// The kernel is indexed by offsets (centered on 0). Source pixels outside
    /// `self` count as zero.
    pub fn convolve_into(&self, kernel: &PixelBlock, out: &mut PixelBlock) {
        let (xmin, ymin, nx, ny) = (out.xmin, out.ymin, out.nx, out.ny);
        for dy in 0..ny {
            let j = ymin + dy as i64;
            for dx in 0..nx {
                let i = xmin + dx as i64;
                let mut sum = 0.0;
                for (ki, kj, kv) in kernel.iter() {
                    if kv != 0.0 {
                        sum += kv * self.value_or_zero(i - ki, j - kj);
                    }
                }
                out.data[dy * nx + dx] = sum;
            }
        }
    }
}

impl Index<(i64, i64)> for PixelBlock {
    type Output = f64;

    /// # Panics
    /// Panics if `(i, j)` lies outside the block.
    fn index(&self, (i, j): (i64, i64)) -> &f64 {
        match self.index_of(i, j) {
            Some(k) => &self.data[k],
            None => panic!(
                "pixel ({i}, {j}) outside block [{}..={}]x[{}..={}]",
                self.xmin,
                self.xmax(),
                self.ymin,
                self.ymax()
            ),
        }
    }
}

impl IndexMut<(i64, i64)> for PixelBlock {
    fn index_mut(&mut self, (i, j): (i64, i64)) -> &mut f64 {
        match self.index_of(i, j) {
            Some(k) => &mut self.data[k],
            None => panic!(
                "pixel ({i}, {j}) outside block [{}..={}]x[{}..={}]",
                self.xmin,
                self.xmax(),
                self.ymin,
                self.ymax()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexing_uses_absolute_coordinates() {
        let mut block = PixelBlock::centered(IntPoint::new(10, 20), 2);
        assert_eq!(block.xmin(), 8);
        assert_eq!(block.ymax(), 22);
        block[(10, 20)] = 3.0;
        assert_eq!(block.get(10, 20), Some(3.0));
        assert_eq!(block.get(7, 20), None);
        let k = block.index_of(10, 20).unwrap();
        assert_eq!(block.coords_of(k), (10, 20));
    }

    #[test]
    fn convolution_with_shifted_delta_translates() {
        let mut src = PixelBlock::centered(IntPoint::new(0, 0), 3);
        src[(0, 0)] = 1.0;
        src[(1, 0)] = 2.0;

        let mut kernel = PixelBlock::centered(IntPoint::new(0, 0), 1);
        kernel[(1, 1)] = 1.0;

        let mut out = PixelBlock::centered(IntPoint::new(0, 0), 3);
        src.convolve_into(&kernel, &mut out);
        assert_eq!(out[(1, 1)], 1.0);
        assert_eq!(out[(2, 1)], 2.0);
        assert_eq!(out[(0, 0)], 0.0);
        assert!((out.sum() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn from_data_checks_length() {
        assert!(PixelBlock::from_data(0, 0, 2, 2, vec![0.0; 3]).is_err());
        assert!(PixelBlock::from_data(0, 0, 2, 2, vec![0.0; 4]).is_ok());
    }
}
