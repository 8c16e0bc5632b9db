//! Dense row-major matrices for activations and outputs

use crate::dtype::{DType, Element};
use crate::error::{Error, Result};

/// Dense row-major `[rows, cols]` matrix
///
/// Activations are `[M, K]`, outputs `[M, N]`. The element type fixes the dtype.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix<T> {
    data: Vec<T>,
    rows: usize,
    cols: usize,
}

impl<T: Element> Matrix<T> {
    /// Wrap row-major data.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `data.len() != rows * cols`.
    pub fn from_vec(data: Vec<T>, rows: usize, cols: usize) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::InvalidArgument {
                arg: "data",
                reason: format!(
                    "expected {} elements for [{rows}, {cols}], got {}",
                    rows * cols,
                    data.len()
                ),
            });
        }
        Ok(Self { data, rows, cols })
    }

    /// Convert f32 data into this element type (round to nearest).
    pub fn from_f32(data: &[f32], rows: usize, cols: usize) -> Result<Self> {
        Self::from_vec(data.iter().map(|&v| T::from_f32(v)).collect(), rows, cols)
    }

    /// All-zero matrix
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            data: vec![T::default(); rows * cols],
            rows,
            cols,
        }
    }

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Element dtype
    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    /// Row-major data
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Mutable row-major data
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// One row
    pub fn row(&self, i: usize) -> &[T] {
        &self.data[i * self.cols..][..self.cols]
    }

    /// Consume into the backing vector
    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Widen every element to f32
    pub fn to_f32_vec(&self) -> Vec<f32> {
        self.data.iter().map(|v| v.to_f32()).collect()
    }

    /// Convert to another element type through f32
    pub fn cast<U: Element>(&self) -> Matrix<U> {
        Matrix {
            data: self.data.iter().map(|v| U::from_f32(v.to_f32())).collect(),
            rows: self.rows,
            cols: self.cols,
        }
    }
}
