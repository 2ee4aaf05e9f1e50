use crate::device::DeviceKind;
use crate::error::BoxingError;
use bytemuck::Pod;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    F32,
    F64,
    I32,
    I64,
}

impl DType {
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F64 | DType::I64 => 8,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::I32 => "i32",
            DType::I64 => "i64",
        };
        write!(f, "{name}")
    }
}

/// Scalar types a [`LocalBuffer`] can carry.
pub trait Element: Pod {
    const DTYPE: DType;
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;
}
impl Element for f64 {
    const DTYPE: DType = DType::F64;
}
impl Element for i32 {
    const DTYPE: DType = DType::I32;
}
impl Element for i64 {
    const DTYPE: DType = DType::I64;
}

/// A contiguous, row-major, typed buffer tagged with the device it lives
/// on. This is the only storage form the engine moves around; non-contiguous
/// inputs must be materialized before they get here.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalBuffer {
    shape: Vec<usize>,
    dtype: DType,
    device: DeviceKind,
    data: Vec<u8>,
}

impl LocalBuffer {
    pub fn zeros(shape: &[usize], dtype: DType, device: DeviceKind) -> Self {
        let numel: usize = shape.iter().product();
        LocalBuffer {
            shape: shape.to_vec(),
            dtype,
            device,
            data: vec![0u8; numel * dtype.size_in_bytes()],
        }
    }

    pub fn from_slice<T: Element>(
        values: &[T],
        shape: &[usize],
        device: DeviceKind,
    ) -> Result<Self, BoxingError> {
        let numel: usize = shape.iter().product();
        if numel != values.len() {
            return Err(BoxingError::shape_mismatch(format!(
                "{} values do not fill shape {shape:?}",
                values.len()
            )));
        }
        Ok(LocalBuffer {
            shape: shape.to_vec(),
            dtype: T::DTYPE,
            device,
            data: bytemuck::cast_slice(values).to_vec(),
        })
    }

    pub fn from_parts(
        shape: Vec<usize>,
        dtype: DType,
        device: DeviceKind,
        data: Vec<u8>,
    ) -> Result<Self, BoxingError> {
        let numel: usize = shape.iter().product();
        if data.len() != numel * dtype.size_in_bytes() {
            return Err(BoxingError::shape_mismatch(format!(
                "{} bytes do not fill shape {shape:?} of {dtype}",
                data.len()
            )));
        }
        Ok(LocalBuffer {
            shape,
            dtype,
            device,
            data,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> DeviceKind {
        self.device
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Copies the contents out as typed values.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>, BoxingError> {
        if T::DTYPE != self.dtype {
            return Err(BoxingError::shape_mismatch(format!(
                "buffer holds {} but {} was requested",
                self.dtype,
                T::DTYPE
            )));
        }
        Ok(bytemuck::pod_collect_to_vec(&self.data))
    }

    /// Copy of this buffer tagged as living on `device`. The in-process
    /// transport treats this as the host staging point for accelerator
    /// buffers.
    pub fn to_device(&self, device: DeviceKind) -> LocalBuffer {
        let mut out = self.clone();
        out.device = device;
        out
    }

    /// The sub-buffer `[begin, end)` along one dimension.
    pub fn slice_dim(&self, dim: usize, begin: usize, end: usize) -> LocalBuffer {
        debug_assert!(dim < self.shape.len());
        debug_assert!(begin <= end && end <= self.shape[dim]);
        let mut origin = vec![0; self.shape.len()];
        origin[dim] = begin;
        let mut region_shape = self.shape.clone();
        region_shape[dim] = end - begin;
        let mut out = LocalBuffer::zeros(&region_shape, self.dtype, self.device);
        for_each_region_row(
            &self.shape,
            &origin,
            &region_shape,
            self.dtype.size_in_bytes(),
            |big, packed, len| out.data[packed..packed + len].copy_from_slice(&self.data[big..big + len]),
        );
        out
    }

    /// Splits along `dim` into the given consecutive ranges.
    pub fn split_dim(&self, dim: usize, ranges: &[(usize, usize)]) -> Vec<LocalBuffer> {
        ranges
            .iter()
            .map(|&(begin, end)| self.slice_dim(dim, begin, end))
            .collect()
    }

    /// Concatenates buffers along `dim`. All parts must agree on every other
    /// dimension, on dtype, and on device.
    pub fn concat(parts: &[LocalBuffer], dim: usize) -> Result<LocalBuffer, BoxingError> {
        let first = parts
            .first()
            .ok_or_else(|| BoxingError::shape_mismatch("cannot concatenate zero buffers"))?;
        let mut out_shape = first.shape.clone();
        out_shape[dim] = 0;
        for part in parts {
            if part.dtype != first.dtype || part.device != first.device {
                return Err(BoxingError::shape_mismatch(
                    "concatenated buffers disagree on dtype or device",
                ));
            }
            if part.shape.len() != first.shape.len()
                || part
                    .shape
                    .iter()
                    .enumerate()
                    .any(|(d, &l)| d != dim && l != first.shape[d])
            {
                return Err(BoxingError::shape_mismatch(format!(
                    "cannot concatenate {:?} with {:?} along dim {dim}",
                    part.shape, first.shape
                )));
            }
            out_shape[dim] += part.shape[dim];
        }
        let mut out = LocalBuffer::zeros(&out_shape, first.dtype, first.device);
        let mut offset = 0;
        for part in parts {
            let mut origin = vec![0; out_shape.len()];
            origin[dim] = offset;
            for_each_region_row(
                &out_shape,
                &origin,
                &part.shape,
                first.dtype.size_in_bytes(),
                |big, packed, len| {
                    out.data[big..big + len].copy_from_slice(&part.data[packed..packed + len])
                },
            );
            offset += part.shape[dim];
        }
        Ok(out)
    }

    /// Zero buffer of `outer_shape` with this buffer written at `origin`.
    pub fn embedded(&self, outer_shape: &[usize], origin: &[usize]) -> Result<LocalBuffer, BoxingError> {
        if origin.len() != self.shape.len() || outer_shape.len() != self.shape.len() {
            return Err(BoxingError::shape_mismatch(format!(
                "cannot embed {:?} into {outer_shape:?} at {origin:?}",
                self.shape
            )));
        }
        for d in 0..self.shape.len() {
            if origin[d] + self.shape[d] > outer_shape[d] {
                return Err(BoxingError::shape_mismatch(format!(
                    "embedding {:?} at {origin:?} overflows {outer_shape:?}",
                    self.shape
                )));
            }
        }
        let mut out = LocalBuffer::zeros(outer_shape, self.dtype, self.device);
        for_each_region_row(
            outer_shape,
            origin,
            &self.shape,
            self.dtype.size_in_bytes(),
            |big, packed, len| out.data[big..big + len].copy_from_slice(&self.data[packed..packed + len]),
        );
        Ok(out)
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

fn elem_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    strides
}

/// Walks the rows (innermost contiguous runs) of a region of `big_shape`
/// starting at `origin` with extents `region_shape`, handing the callback
/// the byte offset into the big buffer, the byte offset into a packed
/// buffer of the region, and the row length in bytes.
fn for_each_region_row(
    big_shape: &[usize],
    origin: &[usize],
    region_shape: &[usize],
    elt: usize,
    mut row: impl FnMut(usize, usize, usize),
) {
    let ndim = region_shape.len();
    let numel: usize = region_shape.iter().product();
    if numel == 0 {
        return;
    }
    let row_elems = region_shape[ndim - 1];
    let row_bytes = row_elems * elt;
    let big_strides = elem_strides(big_shape);
    let blocks = numel / row_elems;
    let mut idx = vec![0usize; ndim - 1];
    for block in 0..blocks {
        let mut big_elem = origin[ndim - 1];
        for d in 0..ndim - 1 {
            big_elem += (origin[d] + idx[d]) * big_strides[d];
        }
        row(big_elem * elt, block * row_bytes, row_bytes);
        for d in (0..ndim - 1).rev() {
            idx[d] += 1;
            if idx[d] < region_shape[d] {
                break;
            }
            idx[d] = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn host_buffer(values: &[i32], shape: &[usize]) -> LocalBuffer {
        LocalBuffer::from_slice(values, shape, DeviceKind::Host).unwrap()
    }

    #[test]
    fn test_from_slice_roundtrip() {
        let buf = host_buffer(&[1, 2, 3, 4, 5, 6], &[2, 3]);
        assert_eq!(buf.numel(), 6);
        assert_eq!(buf.to_vec::<i32>().unwrap(), vec![1, 2, 3, 4, 5, 6]);
        assert!(buf.to_vec::<f32>().is_err());
        assert!(LocalBuffer::from_slice(&[1i32, 2], &[3], DeviceKind::Host).is_err());
    }

    #[test]
    fn test_slice_dim_rows_and_cols() {
        let buf = host_buffer(&[1, 2, 3, 4, 5, 6, 7, 8, 9], &[3, 3]);
        assert_eq!(buf.slice_dim(0, 1, 3).to_vec::<i32>().unwrap(), vec![4, 5, 6, 7, 8, 9]);
        assert_eq!(buf.slice_dim(1, 0, 2).to_vec::<i32>().unwrap(), vec![1, 2, 4, 5, 7, 8]);
        assert_eq!(buf.slice_dim(1, 2, 2).numel(), 0);
    }

    #[test]
    fn test_concat_inverts_split() {
        let buf = host_buffer(&[1, 2, 3, 4, 5, 6, 7, 8], &[2, 4]);
        for dim in 0..2 {
            let ranges = [(0, 1), (1, buf.shape()[dim])];
            let parts = buf.split_dim(dim, &ranges);
            let back = LocalBuffer::concat(&parts, dim).unwrap();
            assert_eq!(back, buf);
        }
    }

    #[test]
    fn test_concat_rejects_mismatched_parts() {
        let a = host_buffer(&[1, 2], &[1, 2]);
        let b = host_buffer(&[1, 2, 3], &[1, 3]);
        assert!(LocalBuffer::concat(&[a.clone(), b], 0).is_err());
        assert!(LocalBuffer::concat(&[], 0).is_err());
        let c = LocalBuffer::from_slice(&[1.0f32, 2.0], &[1, 2], DeviceKind::Host).unwrap();
        assert!(LocalBuffer::concat(&[a, c], 0).is_err());
    }

    #[test]
    fn test_embedded_places_region() {
        let buf = host_buffer(&[1, 2, 3, 4], &[2, 2]);
        let out = buf.embedded(&[3, 4], &[1, 2]).unwrap();
        assert_eq!(
            out.to_vec::<i32>().unwrap(),
            vec![0, 0, 0, 0, 0, 0, 1, 2, 0, 0, 3, 4]
        );
        assert!(buf.embedded(&[3, 3], &[1, 2]).is_err());
    }

    #[test]
    fn test_zero_sized_buffers() {
        let buf = LocalBuffer::zeros(&[0, 5], DType::F32, DeviceKind::Host);
        assert_eq!(buf.numel(), 0);
        assert_eq!(buf.bytes().len(), 0);
        let out = buf.embedded(&[4, 5], &[0, 0]).unwrap();
        assert_eq!(out.numel(), 20);
    }

    #[test]
    fn test_to_device_retags() {
        let buf = host_buffer(&[1], &[1]);
        let moved = buf.to_device(DeviceKind::Accelerator);
        assert_eq!(moved.device(), DeviceKind::Accelerator);
        assert_eq!(moved.bytes(), buf.bytes());
    }
}
