//! Host-backed tensors carrying shape, strides, dtype and placement as data.
//!
//! The dispatch layer never looks at a tensor through a raw pointer. The only
//! place bytes are reinterpreted as another element type is [`Tensor::typed`]
//! (and its `_mut` twin), which checks the dtype and then casts with
//! `bytemuck`.
//!
//! Device tensors are simulated: storage always lives in host memory and the
//! [`Device`] tag records where the runtime considers it to be placed.

pub mod device;
pub mod dtype;

pub use device::Device;
pub use dtype::{DType, Element};

use std::fmt;

use crate::backend::arch::SmVersion;
use crate::error::{ForgeError, ForgeResult};

/// Byte storage aligned to 8 bytes so every [`Element`] view is aligned.
#[derive(Clone)]
struct Storage {
    words: Vec<u64>,
    len: usize,
}

impl Storage {
    fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0u64; len.div_ceil(8)],
            len,
        }
    }

    fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..self.len]
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..self.len]
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Storage({} bytes)", self.len)
    }
}

fn row_major_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = Vec::with_capacity(shape.len());
    let mut stride: usize = 1;
    for dim in shape.iter().rev() {
        strides.push(stride);
        stride = stride.saturating_mul(*dim);
    }
    strides.reverse();
    strides
}

#[derive(Debug, Clone)]
pub struct Tensor {
    storage: Storage,
    shape: Vec<usize>,
    strides: Vec<usize>,
    dtype: DType,
    device: Device,
    layout_tag: Option<SmVersion>,
}

impl Tensor {
    /// Zero-filled contiguous tensor
    pub fn zeros(shape: &[usize], dtype: DType, device: Device) -> Self {
        let numel: usize = shape.iter().product();
        Self {
            storage: Storage::zeroed(numel * dtype.size_in_bytes()),
            shape: shape.to_vec(),
            strides: row_major_strides(shape),
            dtype,
            device,
            layout_tag: None,
        }
    }

    /// Contiguous tensor holding a copy of `data`
    pub fn from_slice<T: Element>(
        data: &[T],
        shape: &[usize],
        device: Device,
    ) -> ForgeResult<Self> {
        let numel: usize = shape.iter().product();
        if numel != data.len() {
            return Err(ForgeError::ShapeError(format!(
                "{} elements cannot fill shape {:?} ({} elements)",
                data.len(),
                shape,
                numel
            )));
        }
        let mut tensor = Self::zeros(shape, T::DTYPE, device);
        tensor.typed_mut::<T>()?.copy_from_slice(data);
        Ok(tensor)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Extent of dimension `dim`
    pub fn size(&self, dim: usize) -> ForgeResult<usize> {
        self.shape.get(dim).copied().ok_or_else(|| {
            ForgeError::ShapeError(format!(
                "dimension {} out of range for rank-{} tensor",
                dim,
                self.rank()
            ))
        })
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn byte_len(&self) -> usize {
        self.storage.len
    }

    /// True when strides are exactly the row-major strides of `shape`
    pub fn is_contiguous(&self) -> bool {
        self.strides == row_major_strides(&self.shape)
    }

    /// Architecture this tensor's bytes were laid out for, if it is a preprocessed weight
    pub fn layout_tag(&self) -> Option<SmVersion> {
        self.layout_tag
    }

    pub fn with_layout_tag(mut self, tag: SmVersion) -> Self {
        self.layout_tag = Some(tag);
        self
    }

    /// Same storage, placed on `device`
    pub fn to_device(&self, device: Device) -> Self {
        let mut moved = self.clone();
        moved.device = device;
        moved
    }

    /// Swap the two dimensions of a 2-D tensor without moving data.
    ///
    /// The result is a strided view and reports `is_contiguous() == false`
    /// unless one of the dimensions is 1.
    pub fn transpose(&self) -> ForgeResult<Self> {
        if self.rank() != 2 {
            return Err(ForgeError::ShapeError(format!(
                "transpose needs a 2-D tensor, got shape {:?}",
                self.shape
            )));
        }
        let mut view = self.clone();
        view.shape.swap(0, 1);
        view.strides.swap(0, 1);
        Ok(view)
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.storage.as_bytes()
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.storage.as_bytes_mut()
    }

    /// View the storage as elements of type `T`.
    ///
    /// Fails with `DtypeError` when `T` does not match the tensor's dtype.
    /// Elements are returned in storage order.
    pub fn typed<T: Element>(&self) -> ForgeResult<&[T]> {
        self.check_dtype::<T>()?;
        let dtype = self.dtype;
        bytemuck::try_cast_slice(self.storage.as_bytes()).map_err(|e| cast_error(dtype, e))
    }

    /// Mutable counterpart of [`Tensor::typed`]
    pub fn typed_mut<T: Element>(&mut self) -> ForgeResult<&mut [T]> {
        self.check_dtype::<T>()?;
        let dtype = self.dtype;
        bytemuck::try_cast_slice_mut(self.storage.as_bytes_mut())
            .map_err(|e| cast_error(dtype, e))
    }

    /// Copy the storage out as `T`
    pub fn to_vec<T: Element>(&self) -> ForgeResult<Vec<T>> {
        Ok(self.typed::<T>()?.to_vec())
    }

    fn check_dtype<T: Element>(&self) -> ForgeResult<()> {
        if T::DTYPE != self.dtype {
            return Err(ForgeError::DtypeError(format!(
                "cannot view {} tensor as {}",
                self.dtype,
                T::DTYPE
            )));
        }
        Ok(())
    }
}

fn cast_error(dtype: DType, e: bytemuck::PodCastError) -> ForgeError {
    ForgeError::InternalError(format!("storage is not a valid {} buffer: {:?}", dtype, e))
}
