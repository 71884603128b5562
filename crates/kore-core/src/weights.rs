//! Ordered, named collection of weight tensors.

use crate::dtype::DType;
use crate::error::KoreError;
use crate::tensor::Tensor;
use crate::Result;

/// The weights of a model (or a parallel collection such as gradients or
/// optimizer moments), in a fixed order.
///
/// Collections that are updated together must agree tensor by tensor on
/// name and shape; element types may differ.
#[derive(Debug, Clone, Default)]
pub struct ModelWeights {
    tensors: Vec<Tensor>,
}

impl ModelWeights {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from tensors, rejecting duplicate names.
    pub fn from_tensors(tensors: Vec<Tensor>) -> Result<Self> {
        let mut weights = Self::new();
        for t in tensors {
            weights.push(t)?;
        }
        Ok(weights)
    }

    /// Append a tensor. Names must be unique.
    pub fn push(&mut self, tensor: Tensor) -> Result<()> {
        if self.get(tensor.name()).is_some() {
            return Err(KoreError::StorageError(format!(
                "duplicate tensor name '{}'",
                tensor.name()
            )));
        }
        self.tensors.push(tensor);
        Ok(())
    }

    /// A collection with the same names and shapes, zero-filled in `dtype`.
    pub fn zeros_like(&self, dtype: DType) -> Self {
        Self {
            tensors: self.tensors.iter().map(|t| t.zeros_like(dtype)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.iter().find(|t| t.name() == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Tensor> {
        self.tensors.iter_mut().find(|t| t.name() == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tensor> {
        self.tensors.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Tensor> {
        self.tensors.iter_mut()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.iter().map(Tensor::name)
    }

    /// Total logical elements across all tensors.
    pub fn total_elements(&self) -> usize {
        self.tensors.iter().map(Tensor::numel).sum()
    }

    /// Call `f` on every tensor in order.
    pub fn visit(&self, mut f: impl FnMut(&Tensor)) {
        self.tensors.iter().for_each(|t| f(t));
    }

    /// Call `f` on every tensor in order, mutably.
    pub fn visit_mut(&mut self, mut f: impl FnMut(&mut Tensor)) {
        self.tensors.iter_mut().for_each(|t| f(t));
    }

    /// Check that `other` has the same tensor count, names and shapes.
    pub fn check_parallel(&self, other: &ModelWeights, what: &'static str) -> Result<()> {
        if self.len() != other.len() {
            return Err(KoreError::TensorCountMismatch {
                what,
                expected: self.len(),
                got: other.len(),
            });
        }
        for (index, (a, b)) in self.iter().zip(other.iter()).enumerate() {
            if a.name() != b.name() {
                return Err(KoreError::NameMismatch {
                    index,
                    expected: a.name().to_string(),
                    got: b.name().to_string(),
                });
            }
            if a.shape() != b.shape() {
                return Err(KoreError::ShapeMismatch {
                    name: format!("{what}/{}", b.name()),
                    expected: a.shape().dims().to_vec(),
                    got: b.shape().dims().to_vec(),
                });
            }
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a ModelWeights {
    type Item = &'a Tensor;
    type IntoIter = std::slice::Iter<'a, Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.tensors.iter()
    }
}
