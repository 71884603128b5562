use std::sync::Arc;

use half::{bf16, f16};

use crate::packed::{Packed, PackedSpan};
use crate::quant::{BlockQ4_0, BlockQ8_0};
use crate::{DType, KoreError, Result};

/// Typed backing buffer, one variant per [`DType`].
#[derive(Debug, Clone, PartialEq)]
pub enum StorageData {
    F32(Vec<f32>),
    F64(Vec<f64>),
    F16(Vec<f16>),
    BF16(Vec<bf16>),
    Q8_0(Vec<BlockQ8_0>),
    Q4_0(Vec<BlockQ4_0>),
}

/// Borrowed units of one [`Run`].
#[derive(Debug, Clone, Copy)]
pub enum RunUnits<'a> {
    F32(&'a [f32]),
    F64(&'a [f64]),
    F16(&'a [f16]),
    BF16(&'a [bf16]),
    Q8_0(&'a [BlockQ8_0]),
    Q4_0(&'a [BlockQ4_0]),
}

/// Mutably borrowed units of one [`RunMut`].
#[derive(Debug)]
pub enum RunUnitsMut<'a> {
    F32(&'a mut [f32]),
    F64(&'a mut [f64]),
    F16(&'a mut [f16]),
    BF16(&'a mut [bf16]),
    Q8_0(&'a mut [BlockQ8_0]),
    Q4_0(&'a mut [BlockQ4_0]),
}

/// Expands `$body` once per variant with `$u` bound to that variant's payload,
/// so generic code over `Packed` is monomorphized per element type.
macro_rules! dispatch {
    ($enum:ident, $value:expr, $u:ident => $body:expr) => {
        match $value {
            $enum::F32($u) => $body,
            $enum::F64($u) => $body,
            $enum::F16($u) => $body,
            $enum::BF16($u) => $body,
            $enum::Q8_0($u) => $body,
            $enum::Q4_0($u) => $body,
        }
    };
}

/// A packed unit type that can back a [`Storage`].
pub trait StorageUnit: Packed + bytemuck::Pod {
    fn into_data(units: Vec<Self>) -> StorageData;
    fn units_of(data: &StorageData) -> Option<&[Self]>;
    fn run(units: &[Self]) -> RunUnits<'_>;
    fn run_mut(units: &mut [Self]) -> RunUnitsMut<'_>;
}

macro_rules! impl_storage_unit {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl StorageUnit for $ty {
                fn into_data(units: Vec<Self>) -> StorageData {
                    StorageData::$variant(units)
                }

                fn units_of(data: &StorageData) -> Option<&[Self]> {
                    match data {
                        StorageData::$variant(v) => Some(v),
                        _ => None,
                    }
                }

                fn run(units: &[Self]) -> RunUnits<'_> {
                    RunUnits::$variant(units)
                }

                fn run_mut(units: &mut [Self]) -> RunUnitsMut<'_> {
                    RunUnitsMut::$variant(units)
                }
            }
        )*
    };
}

impl_storage_unit!(
    f32 => F32,
    f64 => F64,
    f16 => F16,
    bf16 => BF16,
    BlockQ8_0 => Q8_0,
    BlockQ4_0 => Q4_0,
);

/// Generic operation over the span of a storage, whatever its element type.
pub trait SpanVisitor {
    type Output;

    fn visit<T: Packed>(self, span: PackedSpan<'_, T>) -> Self::Output;
}

/// Shared, reference-counted tensor storage.
///
/// Cloning is cheap; the first mutation of a shared buffer copies it
/// (copy-on-write).
#[derive(Debug, Clone)]
pub struct Storage {
    data: Arc<StorageData>,
    /// Number of logical elements (not units).
    numel: usize,
}

impl Storage {
    /// Allocate zeroed storage for `numel` elements of the given dtype.
    pub fn zeros(dtype: DType, numel: usize) -> Self {
        fn zeroed<T: StorageUnit>(numel: usize) -> StorageData {
            T::into_data(vec![T::default(); T::DTYPE.units_for(numel)])
        }

        let data = match dtype {
            DType::F32 => zeroed::<f32>(numel),
            DType::F64 => zeroed::<f64>(numel),
            DType::F16 => zeroed::<f16>(numel),
            DType::BF16 => zeroed::<bf16>(numel),
            DType::Q8_0 => zeroed::<BlockQ8_0>(numel),
            DType::Q4_0 => zeroed::<BlockQ4_0>(numel),
        };
        Self {
            data: Arc::new(data),
            numel,
        }
    }

    /// Encode f32 values into a new storage of the given dtype.
    pub fn from_f32(dtype: DType, values: &[f32]) -> Self {
        let mut storage = Self::zeros(dtype, values.len());
        storage.compress(0, values);
        storage
    }

    /// Wrap already packed units.
    pub fn from_units<T: StorageUnit>(units: Vec<T>, numel: usize) -> Result<Self> {
        let expected = T::DTYPE.units_for(numel);
        if units.len() != expected {
            return Err(KoreError::StorageError(format!(
                "Expected {} units for {} elements of {}, got {}",
                expected,
                numel,
                T::DTYPE,
                units.len()
            )));
        }
        Ok(Self {
            data: Arc::new(T::into_data(units)),
            numel,
        })
    }

    /// Create storage from raw little-endian bytes in the dtype's packed layout.
    pub fn from_bytes(dtype: DType, numel: usize, bytes: &[u8]) -> Result<Self> {
        fn collect<T: StorageUnit>(numel: usize, bytes: &[u8]) -> Result<Storage> {
            let expected = T::DTYPE.storage_bytes(numel);
            if bytes.len() != expected {
                return Err(KoreError::StorageError(format!(
                    "Expected {} bytes for {} elements of {}, got {}",
                    expected,
                    numel,
                    T::DTYPE,
                    bytes.len()
                )));
            }
            Storage::from_units(bytemuck::pod_collect_to_vec::<u8, T>(bytes), numel)
        }

        match dtype {
            DType::F32 => collect::<f32>(numel, bytes),
            DType::F64 => collect::<f64>(numel, bytes),
            DType::F16 => collect::<f16>(numel, bytes),
            DType::BF16 => collect::<bf16>(numel, bytes),
            DType::Q8_0 => collect::<BlockQ8_0>(numel, bytes),
            DType::Q4_0 => collect::<BlockQ4_0>(numel, bytes),
        }
    }

    /// Get the dtype of this storage.
    pub fn dtype(&self) -> DType {
        dispatch!(StorageData, self.data.as_ref(), u => element_dtype(u.as_slice()))
    }

    /// Number of logical elements.
    pub fn numel(&self) -> usize {
        self.numel
    }

    /// Size in bytes.
    pub fn nbytes(&self) -> usize {
        self.as_bytes().len()
    }

    /// Raw bytes of the packed units.
    pub fn as_bytes(&self) -> &[u8] {
        dispatch!(StorageData, self.data.as_ref(), u => bytemuck::cast_slice(u.as_slice()))
    }

    /// Get the raw StorageData reference.
    pub fn data(&self) -> &StorageData {
        self.data.as_ref()
    }

    /// Typed view of the packed units, if `T` matches the dtype.
    pub fn as_units<T: StorageUnit>(&self) -> Option<&[T]> {
        T::units_of(self.data.as_ref())
    }

    /// Interpret storage as a slice of f32 values.
    /// Returns None if dtype is not F32.
    pub fn as_f32_slice(&self) -> Option<&[f32]> {
        self.as_units::<f32>()
    }

    /// Interpret storage as a mutable slice of f32 values (copy-on-write).
    pub fn as_f32_slice_mut(&mut self) -> Option<&mut [f32]> {
        match Arc::make_mut(&mut self.data) {
            StorageData::F32(v) => Some(v),
            _ => None,
        }
    }

    /// Whether this storage is uniquely owned (no other Arc references).
    pub fn is_unique(&self) -> bool {
        Arc::strong_count(&self.data) == 1
    }

    /// Run `visitor` on a span over all elements of this storage.
    pub fn visit_span<V: SpanVisitor>(&self, visitor: V) -> V::Output {
        let numel = self.numel;
        dispatch!(StorageData, self.data.as_ref(), u => visitor.visit(PackedSpan::new(u.as_slice(), numel)))
    }

    /// Decode `out.len()` elements starting at `ofs`.
    pub fn decompress(&self, ofs: usize, out: &mut [f32]) {
        assert!(
            ofs + out.len() <= self.numel,
            "decompress {}..{} out of range for {} elements",
            ofs,
            ofs + out.len(),
            self.numel
        );
        dispatch!(StorageData, self.data.as_ref(), u => Packed::decompress(u.as_slice(), ofs, out))
    }

    /// Encode `src` at element offset `ofs` (copy-on-write).
    ///
    /// Block formats require a block-aligned `ofs`.
    pub fn compress(&mut self, ofs: usize, src: &[f32]) {
        assert!(
            ofs + src.len() <= self.numel,
            "compress {}..{} out of range for {} elements",
            ofs,
            ofs + src.len(),
            self.numel
        );
        dispatch!(StorageData, Arc::make_mut(&mut self.data), u => Packed::compress(src, u.as_mut_slice(), ofs))
    }

    /// Decode all elements into a new vector.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        let mut out = vec![0.0f32; self.numel];
        self.decompress(0, &mut out);
        out
    }

    /// Split into read-only runs of `chunk` elements (the last may be shorter).
    ///
    /// `chunk` must be a positive multiple of the dtype's block size.
    pub fn runs(&self, chunk: usize) -> Vec<Run<'_>> {
        let numel = self.numel;
        dispatch!(StorageData, self.data.as_ref(), u => split_runs(u.as_slice(), numel, chunk))
    }

    /// Split into disjoint mutable runs of `chunk` elements (copy-on-write).
    pub fn runs_mut(&mut self, chunk: usize) -> Vec<RunMut<'_>> {
        let numel = self.numel;
        dispatch!(StorageData, Arc::make_mut(&mut self.data), u => split_runs_mut(u.as_mut_slice(), numel, chunk))
    }
}

fn element_dtype<T: Packed>(_: &[T]) -> DType {
    T::DTYPE
}

fn units_per_chunk<T: Packed>(chunk: usize) -> usize {
    assert!(
        chunk > 0 && chunk % T::UNIT == 0,
        "run size {chunk} is not a positive multiple of the {} block size {}",
        T::DTYPE,
        T::UNIT
    );
    chunk / T::UNIT
}

fn split_runs<T: StorageUnit>(units: &[T], numel: usize, chunk: usize) -> Vec<Run<'_>> {
    let per = units_per_chunk::<T>(chunk);
    units
        .chunks(per)
        .enumerate()
        .map(|(i, c)| Run {
            units: T::run(c),
            offset: i * chunk,
            len: chunk.min(numel - i * chunk),
        })
        .collect()
}

fn split_runs_mut<T: StorageUnit>(units: &mut [T], numel: usize, chunk: usize) -> Vec<RunMut<'_>> {
    let per = units_per_chunk::<T>(chunk);
    units
        .chunks_mut(per)
        .enumerate()
        .map(|(i, c)| RunMut {
            units: T::run_mut(c),
            offset: i * chunk,
            len: chunk.min(numel - i * chunk),
        })
        .collect()
}

/// Read-only, block-aligned chunk of a storage buffer.
#[derive(Debug, Clone, Copy)]
pub struct Run<'a> {
    units: RunUnits<'a>,
    offset: usize,
    len: usize,
}

impl Run<'_> {
    /// Element offset of this run within its storage.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn dtype(&self) -> DType {
        dispatch!(RunUnits, self.units, u => element_dtype(u))
    }

    /// Decode the whole run into `out[..len]`.
    pub fn decompress(&self, out: &mut [f32]) {
        let out = &mut out[..self.len];
        dispatch!(RunUnits, self.units, u => Packed::decompress(u, 0, out))
    }
}

/// Mutable, block-aligned chunk of a storage buffer. Runs from one storage
/// never overlap, so they can be updated from different threads.
#[derive(Debug)]
pub struct RunMut<'a> {
    units: RunUnitsMut<'a>,
    offset: usize,
    len: usize,
}

impl RunMut<'_> {
    /// Element offset of this run within its storage.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn dtype(&self) -> DType {
        dispatch!(RunUnitsMut, &self.units, u => element_dtype(&**u))
    }

    /// Decode the whole run into `out[..len]`.
    pub fn decompress(&self, out: &mut [f32]) {
        let out = &mut out[..self.len];
        dispatch!(RunUnitsMut, &self.units, u => Packed::decompress(&**u, 0, out))
    }

    /// Encode `src[..len]` back into the run.
    pub fn compress(&mut self, src: &[f32]) {
        let src = &src[..self.len];
        dispatch!(RunUnitsMut, &mut self.units, u => Packed::compress(src, &mut **u, 0))
    }
}
