use crate::buffer::{DType, Element, LocalBuffer};
use crate::error::BoxingError;
use std::ops::AddAssign;

/// The compute seam the engine depends on. Kernel libraries are external
/// collaborators; the only operation boxing itself needs is the element-wise
/// accumulation backing partial-sum reductions.
pub trait LocalKernel: Send + Sync {
    /// Element-wise `acc += contribution`.
    fn accumulate(&self, acc: &mut LocalBuffer, contribution: &LocalBuffer)
        -> Result<(), BoxingError>;
}

/// Plain scalar-loop kernel for host buffers.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostKernel;

impl LocalKernel for HostKernel {
    fn accumulate(
        &self,
        acc: &mut LocalBuffer,
        contribution: &LocalBuffer,
    ) -> Result<(), BoxingError> {
        if acc.shape() != contribution.shape() || acc.dtype() != contribution.dtype() {
            return Err(BoxingError::shape_mismatch(format!(
                "cannot accumulate {:?} {} into {:?} {}",
                contribution.shape(),
                contribution.dtype(),
                acc.shape(),
                acc.dtype()
            )));
        }
        match acc.dtype() {
            DType::F32 => accumulate_elems::<f32>(acc, contribution),
            DType::F64 => accumulate_elems::<f64>(acc, contribution),
            DType::I32 => accumulate_elems::<i32>(acc, contribution),
            DType::I64 => accumulate_elems::<i64>(acc, contribution),
        }
        Ok(())
    }
}

fn accumulate_elems<T: Element + AddAssign>(acc: &mut LocalBuffer, contribution: &LocalBuffer) {
    let size = std::mem::size_of::<T>();
    let rhs = contribution.bytes();
    for (a, b) in acc
        .bytes_mut()
        .chunks_exact_mut(size)
        .zip(rhs.chunks_exact(size))
    {
        let mut value: T = bytemuck::pod_read_unaligned(a);
        value += bytemuck::pod_read_unaligned(b);
        a.copy_from_slice(bytemuck::bytes_of(&value));
    }
}
