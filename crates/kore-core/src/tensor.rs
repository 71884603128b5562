use crate::dtype::DType;
use crate::error::KoreError;
use crate::shape::Shape;
use crate::storage::Storage;
use crate::Result;

/// A named weight tensor: shape, per-tensor scale and packed storage.
///
/// The scale is not folded into the stored values; reductions multiply by
/// it once after accumulating.
///
/// # Examples
///
/// ```
/// use kore_core::{DType, Tensor};
///
/// let t = Tensor::from_f32("w", &[1.0, 2.0, 3.0, 4.0], &[2, 2], DType::BF16);
/// assert_eq!(t.shape().dims(), &[2, 2]);
/// assert_eq!(t.numel(), 4);
/// assert_eq!(t.dtype(), DType::BF16);
/// ```
#[derive(Debug, Clone)]
pub struct Tensor {
    name: String,
    shape: Shape,
    scale: f32,
    storage: Storage,
}

impl Tensor {
    /// Wrap existing storage. Fails if the shape and storage disagree on the
    /// element count.
    pub fn new(name: impl Into<String>, shape: impl Into<Shape>, storage: Storage) -> Result<Self> {
        let name = name.into();
        let shape = shape.into();
        if shape.numel() != storage.numel() {
            return Err(KoreError::ShapeMismatch {
                name,
                expected: shape.dims().to_vec(),
                got: vec![storage.numel()],
            });
        }
        Ok(Self {
            name,
            shape,
            scale: 1.0,
            storage,
        })
    }

    /// Zero-filled tensor.
    pub fn zeros(name: impl Into<String>, shape: &[usize], dtype: DType) -> Self {
        let s = Shape::new(shape);
        let storage = Storage::zeros(dtype, s.numel());
        Self {
            name: name.into(),
            shape: s,
            scale: 1.0,
            storage,
        }
    }

    /// Encode f32 data into a tensor of the given dtype.
    pub fn from_f32(name: impl Into<String>, data: &[f32], shape: &[usize], dtype: DType) -> Self {
        let s = Shape::new(shape);
        assert_eq!(
            s.numel(),
            data.len(),
            "Shape {:?} requires {} elements, got {}",
            shape,
            s.numel(),
            data.len()
        );
        Self {
            name: name.into(),
            shape: s,
            scale: 1.0,
            storage: Storage::from_f32(dtype, data),
        }
    }

    /// Builder: set the per-tensor scale.
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    /// Zero tensor with the same name and shape in another dtype.
    pub fn zeros_like(&self, dtype: DType) -> Self {
        Self::zeros(self.name.clone(), self.shape.dims(), dtype)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    pub fn numel(&self) -> usize {
        self.storage.numel()
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: f32) {
        self.scale = scale;
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut Storage {
        &mut self.storage
    }

    /// Element offset of row `r` (rows run along the last dimension).
    pub fn row_offset(&self, r: usize) -> usize {
        r * self.shape.row_len()
    }

    /// Decoded values, without the scale applied.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        self.storage.to_f32_vec()
    }

    /// Decoded values with the scale applied.
    pub fn dequantize(&self) -> Vec<f32> {
        let mut v = self.to_f32_vec();
        if self.scale != 1.0 {
            v.iter_mut().for_each(|x| *x *= self.scale);
        }
        v
    }
}
