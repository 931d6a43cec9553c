//! Dense row storage for embeddings and AdaGrad accumulators.
//!
//! Training threads share these matrices without locks. Every element is a
//! [`Real`], an `f32` stored in an `AtomicU32` and accessed with relaxed
//! ordering. Two threads updating the same row at the same time can lose
//! each other's updates (the usual Hogwild trade-off), but every load sees
//! some value that was actually stored.

use std::fmt;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU32, Ordering};

use aligned_box::AlignedBox;

use crate::checkpoint::{read_i32, write_i32};
use crate::reduce::Compaction;
use crate::{real, Error, Result};

/// Rows start on 128-byte boundaries when `cols` is a multiple of 32.
const ALIGNMENT: usize = 128;

#[derive(Default)]
#[repr(transparent)]
pub struct Real {
    bits: AtomicU32,
}

impl Real {
    pub fn get(&self) -> real {
        real::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: real) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Not atomic as a whole: a concurrent `add` to the same cell may be lost.
    pub fn add(&self, x: real) {
        let a = self.get();
        self.set(a + x);
    }
}

impl fmt::Debug for Real {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.get().fmt(f)
    }
}

/// A `rows x cols` row-major matrix. Row `i` belongs to vocabulary index `i`.
pub struct DenseMatrix {
    rows: usize,
    cols: usize,
    data: AlignedBox<[Real]>,
}

impl DenseMatrix {
    pub fn new(rows: usize, cols: usize, value: real) -> Self {
        let data: AlignedBox<[Real]> = AlignedBox::slice_from_default(ALIGNMENT, rows * cols)
            .expect("Memory allocation failed");
        if value != 0.0 {
            for e in data.iter() {
                e.set(value);
            }
        }
        DenseMatrix { rows, cols, data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Panics if `i` is out of range.
    pub fn row(&self, i: usize) -> &[Real] {
        &self.data[i * self.cols..][..self.cols]
    }

    pub fn row_values(&self, i: usize) -> Vec<real> {
        self.row(i).iter().map(Real::get).collect()
    }

    pub fn set_row(&self, i: usize, values: &[real]) {
        assert_eq!(values.len(), self.cols);
        for (e, &v) in self.row(i).iter().zip(values) {
            e.set(v);
        }
    }

    pub fn fill_row_with(&self, i: usize, mut f: impl FnMut() -> real) {
        for e in self.row(i) {
            e.set(f());
        }
    }

    /// Move every surviving row to its new index. Rows past
    /// `compaction.kept()` keep stale data; the caller re-initializes them.
    pub fn compact(&mut self, compaction: &Compaction) {
        for (old, new) in compaction.survivors() {
            if old != new {
                // new < old, so the destination row was either evicted or
                // already moved.
                for c in 0..self.cols {
                    let v = self.data[old * self.cols + c].get();
                    self.data[new * self.cols + c].set(v);
                }
            }
        }
    }

    /// Writes `rows:i32, cols:i32`, then the row-major data.
    pub fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        write_i32(w, self.rows as i32)?;
        write_i32(w, self.cols as i32)?;
        let mut buf = vec![0.0 as real; self.cols];
        for i in 0..self.rows {
            for (b, e) in buf.iter_mut().zip(self.row(i)) {
                *b = e.get();
            }
            w.write_all(bytemuck::cast_slice::<real, u8>(&buf))?;
        }
        Ok(())
    }

    /// Reads a matrix written by [`DenseMatrix::write_to`]. The stored shape
    /// must be exactly `rows x cols`; it is checked before anything is
    /// allocated.
    pub fn read_from<R: Read + ?Sized>(r: &mut R, rows: usize, cols: usize) -> Result<Self> {
        let stored_rows = read_i32(r, "matrix row count")?;
        let stored_cols = read_i32(r, "matrix column count")?;
        if usize::try_from(stored_rows) != Ok(rows) || usize::try_from(stored_cols) != Ok(cols) {
            return Err(Error::malformed(format!(
                "matrix is {stored_rows}x{stored_cols}, expected {rows}x{cols}"
            )));
        }
        let m = DenseMatrix::new(rows, cols, 0.0);
        let mut buf = vec![0.0 as real; cols];
        for i in 0..rows {
            r.read_exact(bytemuck::cast_slice_mut::<real, u8>(&mut buf))
                .map_err(|err| crate::checkpoint::truncated(err, "matrix data"))?;
            m.set_row(i, &buf);
        }
        Ok(m)
    }
}

impl fmt::Debug for DenseMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DenseMatrix")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .finish_non_exhaustive()
    }
}

/// A pair of matrices indexed by vocabulary index: input (target) vectors
/// and output (context) vectors. Used both for the embeddings themselves and
/// for their squared-gradient sums.
#[derive(Debug)]
pub struct Parameter {
    pub input: DenseMatrix,
    pub output: DenseMatrix,
}

impl Parameter {
    pub fn new(rows: usize, cols: usize, value: real) -> Self {
        Parameter {
            input: DenseMatrix::new(rows, cols, value),
            output: DenseMatrix::new(rows, cols, value),
        }
    }

    pub fn compact(&mut self, compaction: &Compaction) {
        self.input.compact(compaction);
        self.output.compact(compaction);
    }
}
