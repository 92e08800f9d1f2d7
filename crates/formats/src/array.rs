// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/formats/src/array.rs
//
// Dynamically typed n-dimensional arrays with an explicit memory layout.

use anyhow::{bail, ensure, Context, Result};
use ndarray::{ArrayD, ArrayViewD, Dimension, IxDyn, ShapeBuilder};
use serde_yaml::Value;
use std::fmt;
use std::str::FromStr;

/// Element types understood by the array codecs, named as ASDF names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Bool8,
}

impl DataType {
    pub const ALL: [DataType; 11] = [
        DataType::Int8,
        DataType::Int16,
        DataType::Int32,
        DataType::Int64,
        DataType::UInt8,
        DataType::UInt16,
        DataType::UInt32,
        DataType::UInt64,
        DataType::Float32,
        DataType::Float64,
        DataType::Bool8,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::UInt8 => "uint8",
            DataType::UInt16 => "uint16",
            DataType::UInt32 => "uint32",
            DataType::UInt64 => "uint64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::Bool8 => "bool8",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        DataType::ALL
            .into_iter()
            .find(|d| d.name() == name)
            .with_context(|| format!("Unsupported array datatype '{}'", name))
    }

    /// Size of one element in bytes.
    pub fn item_size(self) -> usize {
        match self {
            DataType::Int8 | DataType::UInt8 | DataType::Bool8 => 1,
            DataType::Int16 | DataType::UInt16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::UInt64 | DataType::Float64 => 8,
        }
    }
}

impl FromStr for DataType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        DataType::from_name(s)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Byte order of the elements inside a binary buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

impl ByteOrder {
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ByteOrder::Big => "big",
            ByteOrder::Little => "little",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "big" => Ok(ByteOrder::Big),
            "little" => Ok(ByteOrder::Little),
            other => bail!("Unknown byteorder '{}'", other),
        }
    }
}

/// Physical element ordering of a contiguous array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryOrder {
    /// Row-major: the last axis varies fastest.
    C,
    /// Column-major (Fortran): the first axis varies fastest.
    F,
}

impl FromStr for MemoryOrder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "c" | "row-major" => Ok(MemoryOrder::C),
            "f" | "fortran" | "column-major" => Ok(MemoryOrder::F),
            _ => bail!("Unknown memory order '{}', expected C or F", s),
        }
    }
}

impl fmt::Display for MemoryOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryOrder::C => f.write_str("C"),
            MemoryOrder::F => f.write_str("F"),
        }
    }
}

/// Number of elements in `shape`; an error instead of an overflow.
pub fn element_count(shape: &[usize]) -> Result<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &len| acc.checked_mul(len))
        .with_context(|| format!("shape {:?} has too many elements", shape))
}

/// Byte strides of a contiguous array of `shape` laid out in `order`.
pub fn contiguous_strides(shape: &[usize], item_size: usize, order: MemoryOrder) -> Vec<i64> {
    let mut strides = vec![0i64; shape.len()];
    let mut step = item_size as i64;
    let axes: Vec<usize> = match order {
        MemoryOrder::C => (0..shape.len()).rev().collect(),
        MemoryOrder::F => (0..shape.len()).collect(),
    };
    for axis in axes {
        strides[axis] = step;
        // Saturates on absurd shapes; the strided reader then rejects them.
        step = step.saturating_mul(i64::try_from(shape[axis].max(1)).unwrap_or(i64::MAX));
    }
    strides
}

/// A primitive that can live inside an [`NdArray`].
pub trait Element: Copy + PartialEq + fmt::Debug + fmt::Display + 'static {
    const DATATYPE: DataType;

    fn encode(self, order: ByteOrder, out: &mut Vec<u8>);
    /// `bytes` is exactly `DATATYPE.item_size()` long.
    fn decode(bytes: &[u8], order: ByteOrder) -> Self;
    fn to_yaml(self) -> Value;
    fn from_yaml(value: &Value) -> Option<Self>;

    fn wrap(array: ArrayD<Self>) -> NdArray;
    fn unwrap_ref(array: &NdArray) -> Option<&ArrayD<Self>>;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident, $from_yaml:expr) => {
        impl Element for $ty {
            const DATATYPE: DataType = DataType::$variant;

            fn encode(self, order: ByteOrder, out: &mut Vec<u8>) {
                match order {
                    ByteOrder::Big => out.extend_from_slice(&self.to_be_bytes()),
                    ByteOrder::Little => out.extend_from_slice(&self.to_le_bytes()),
                }
            }

            fn decode(bytes: &[u8], order: ByteOrder) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                buf.copy_from_slice(bytes);
                match order {
                    ByteOrder::Big => <$ty>::from_be_bytes(buf),
                    ByteOrder::Little => <$ty>::from_le_bytes(buf),
                }
            }

            fn to_yaml(self) -> Value {
                Value::from(self)
            }

            fn from_yaml(value: &Value) -> Option<Self> {
                $from_yaml(value)
            }

            fn wrap(array: ArrayD<Self>) -> NdArray {
                NdArray::$variant(array)
            }

            fn unwrap_ref(array: &NdArray) -> Option<&ArrayD<Self>> {
                match array {
                    NdArray::$variant(a) => Some(a),
                    _ => None,
                }
            }
        }
    };
}

fn signed<T: TryFrom<i64>>(value: &Value) -> Option<T> {
    value.as_i64().and_then(|v| T::try_from(v).ok())
}

fn unsigned<T: TryFrom<u64>>(value: &Value) -> Option<T> {
    value.as_u64().and_then(|v| T::try_from(v).ok())
}

impl_element!(i8, Int8, signed::<i8>);
impl_element!(i16, Int16, signed::<i16>);
impl_element!(i32, Int32, signed::<i32>);
impl_element!(i64, Int64, signed::<i64>);
impl_element!(u8, UInt8, unsigned::<u8>);
impl_element!(u16, UInt16, unsigned::<u16>);
impl_element!(u32, UInt32, unsigned::<u32>);
impl_element!(u64, UInt64, unsigned::<u64>);
impl_element!(f32, Float32, |v: &Value| v.as_f64().map(|x| x as f32));
impl_element!(f64, Float64, |v: &Value| v.as_f64());

impl Element for bool {
    const DATATYPE: DataType = DataType::Bool8;

    fn encode(self, _order: ByteOrder, out: &mut Vec<u8>) {
        out.push(self as u8);
    }

    fn decode(bytes: &[u8], _order: ByteOrder) -> Self {
        bytes[0] != 0
    }

    fn to_yaml(self) -> Value {
        Value::Bool(self)
    }

    fn from_yaml(value: &Value) -> Option<Self> {
        value.as_bool()
    }

    fn wrap(array: ArrayD<Self>) -> NdArray {
        NdArray::Bool8(array)
    }

    fn unwrap_ref(array: &NdArray) -> Option<&ArrayD<Self>> {
        match array {
            NdArray::Bool8(a) => Some(a),
            _ => None,
        }
    }
}

/// An n-dimensional array whose element type is only known at runtime.
///
/// Equality is logical: two arrays compare equal when they have the same
/// datatype, shape and elements, whatever their memory layouts.
#[derive(Debug, Clone, PartialEq)]
pub enum NdArray {
    Int8(ArrayD<i8>),
    Int16(ArrayD<i16>),
    Int32(ArrayD<i32>),
    Int64(ArrayD<i64>),
    UInt8(ArrayD<u8>),
    UInt16(ArrayD<u16>),
    UInt32(ArrayD<u32>),
    UInt64(ArrayD<u64>),
    Float32(ArrayD<f32>),
    Float64(ArrayD<f64>),
    Bool8(ArrayD<bool>),
}

macro_rules! each_array {
    ($value:expr, $array:ident => $body:expr) => {
        match $value {
            $crate::array::NdArray::Int8($array) => $body,
            $crate::array::NdArray::Int16($array) => $body,
            $crate::array::NdArray::Int32($array) => $body,
            $crate::array::NdArray::Int64($array) => $body,
            $crate::array::NdArray::UInt8($array) => $body,
            $crate::array::NdArray::UInt16($array) => $body,
            $crate::array::NdArray::UInt32($array) => $body,
            $crate::array::NdArray::UInt64($array) => $body,
            $crate::array::NdArray::Float32($array) => $body,
            $crate::array::NdArray::Float64($array) => $body,
            $crate::array::NdArray::Bool8($array) => $body,
        }
    };
}

macro_rules! each_dtype {
    ($dtype:expr, $func:ident ( $($arg:expr),* )) => {
        match $dtype {
            $crate::array::DataType::Int8 => $func::<i8>($($arg),*).map(<i8 as $crate::array::Element>::wrap),
            $crate::array::DataType::Int16 => $func::<i16>($($arg),*).map(<i16 as $crate::array::Element>::wrap),
            $crate::array::DataType::Int32 => $func::<i32>($($arg),*).map(<i32 as $crate::array::Element>::wrap),
            $crate::array::DataType::Int64 => $func::<i64>($($arg),*).map(<i64 as $crate::array::Element>::wrap),
            $crate::array::DataType::UInt8 => $func::<u8>($($arg),*).map(<u8 as $crate::array::Element>::wrap),
            $crate::array::DataType::UInt16 => $func::<u16>($($arg),*).map(<u16 as $crate::array::Element>::wrap),
            $crate::array::DataType::UInt32 => $func::<u32>($($arg),*).map(<u32 as $crate::array::Element>::wrap),
            $crate::array::DataType::UInt64 => $func::<u64>($($arg),*).map(<u64 as $crate::array::Element>::wrap),
            $crate::array::DataType::Float32 => $func::<f32>($($arg),*).map(<f32 as $crate::array::Element>::wrap),
            $crate::array::DataType::Float64 => $func::<f64>($($arg),*).map(<f64 as $crate::array::Element>::wrap),
            $crate::array::DataType::Bool8 => $func::<bool>($($arg),*).map(<bool as $crate::array::Element>::wrap),
        }
    };
}

pub(crate) use {each_array, each_dtype};

impl<T: Element> From<ArrayD<T>> for NdArray {
    fn from(array: ArrayD<T>) -> Self {
        T::wrap(array)
    }
}

impl NdArray {
    /// Build an array from `values` listed in logical row-major order,
    /// stored in memory according to `order`.
    pub fn from_shape_vec<T: Element>(
        shape: &[usize],
        values: Vec<T>,
        order: MemoryOrder,
    ) -> Result<Self> {
        let logical = ArrayD::from_shape_vec(IxDyn(shape), values)
            .with_context(|| format!("{} values do not fill shape {:?}", T::DATATYPE, shape))?;
        Ok(T::wrap(relayout(&logical, order)?))
    }

    /// Rebuild an array from a raw buffer addressed through byte `strides`
    /// starting at byte `offset`. Strides may be negative.
    pub fn from_strided_bytes(
        dtype: DataType,
        byte_order: ByteOrder,
        shape: &[usize],
        strides: &[i64],
        offset: usize,
        bytes: &[u8],
    ) -> Result<Self> {
        each_dtype!(dtype, decode_strided(byte_order, shape, strides, offset, bytes))
    }

    /// Build an array of `dtype` from YAML scalars listed in logical
    /// row-major order.
    pub fn from_yaml_values(
        dtype: DataType,
        shape: &[usize],
        values: &[Value],
        order: MemoryOrder,
    ) -> Result<Self> {
        each_dtype!(dtype, typed_values(values)).and_then(|flat| flat.reshape(shape, order))
    }

    /// Rebuild an array from nested YAML sequences (inline storage).
    pub fn from_yaml_data(dtype: DataType, data: &Value) -> Result<Self> {
        each_dtype!(dtype, decode_nested(data))
    }

    pub fn dtype(&self) -> DataType {
        each_array!(self, _a => element_dtype(_a))
    }

    pub fn shape(&self) -> &[usize] {
        each_array!(self, a => a.shape())
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    pub fn len(&self) -> usize {
        each_array!(self, a => a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Typed access to the underlying `ndarray` array.
    pub fn as_array<T: Element>(&self) -> Option<&ArrayD<T>> {
        T::unwrap_ref(self)
    }

    /// Physical layout, or `None` when the elements are not contiguous.
    /// Arrays that are both C and F contiguous (1-D, single rows) report C.
    pub fn memory_order(&self) -> Option<MemoryOrder> {
        each_array!(self, a => layout_of(a))
    }

    /// The layout [`raw_bytes`](Self::raw_bytes) writes in.
    pub fn storage_order(&self) -> MemoryOrder {
        self.memory_order().unwrap_or(MemoryOrder::C)
    }

    /// Byte strides describing the buffer produced by [`raw_bytes`](Self::raw_bytes).
    pub fn storage_strides(&self) -> Vec<i64> {
        contiguous_strides(self.shape(), self.dtype().item_size(), self.storage_order())
    }

    /// Byte strides of the array as it currently sits in memory.
    pub fn byte_strides(&self) -> Vec<i64> {
        let item = self.dtype().item_size() as i64;
        each_array!(self, a => a.strides().iter().map(|&s| s as i64 * item).collect())
    }

    /// Copy into the requested layout.
    pub fn to_memory_order(&self, order: MemoryOrder) -> Result<Self> {
        each_array!(self, a => relayout(a, order).map(NdArray::from))
    }

    /// Element buffer in physical memory order; non-contiguous arrays are
    /// flattened in C order.
    pub fn raw_bytes(&self, byte_order: ByteOrder) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len() * self.dtype().item_size());
        each_array!(self, a => {
            for value in memory_order_iter(a) {
                value.encode(byte_order, &mut out);
            }
        });
        out
    }

    /// Nested YAML sequences in logical order.
    pub fn to_yaml_data(&self) -> Value {
        each_array!(self, a => nested_yaml(a.view()))
    }

    /// Same elements in logical row-major order, new `shape`, stored per `order`.
    pub fn reshape(&self, shape: &[usize], order: MemoryOrder) -> Result<Self> {
        each_array!(self, a => NdArray::from_shape_vec(shape, a.iter().copied().collect(), order))
    }

    /// True when every logical element matches, ignoring memory layout.
    pub fn logically_eq(&self, other: &NdArray) -> bool {
        self == other
    }
}

impl fmt::Display for NdArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        each_array!(self, a => fmt::Display::fmt(a, f))
    }
}

fn element_dtype<T: Element>(_array: &ArrayD<T>) -> DataType {
    T::DATATYPE
}

fn layout_of<T>(array: &ArrayD<T>) -> Option<MemoryOrder> {
    if array.is_standard_layout() {
        Some(MemoryOrder::C)
    } else if array.view().reversed_axes().is_standard_layout() {
        Some(MemoryOrder::F)
    } else {
        None
    }
}

fn memory_order_iter<'a, T: Copy + 'a>(array: &'a ArrayD<T>) -> Box<dyn Iterator<Item = T> + 'a> {
    match layout_of(array) {
        Some(MemoryOrder::F) => Box::new(array.view().reversed_axes().into_iter().copied()),
        _ => Box::new(array.iter().copied()),
    }
}

fn relayout<T: Copy>(array: &ArrayD<T>, order: MemoryOrder) -> Result<ArrayD<T>> {
    let shape = array.shape().to_vec();
    let values: Vec<T> = match order {
        MemoryOrder::C => array.iter().copied().collect(),
        MemoryOrder::F => array.view().reversed_axes().iter().copied().collect(),
    };
    ArrayD::from_shape_vec(IxDyn(&shape).set_f(order == MemoryOrder::F), values)
        .with_context(|| format!("Failed to relayout array of shape {:?}", shape))
}

fn decode_strided<T: Element>(
    byte_order: ByteOrder,
    shape: &[usize],
    strides: &[i64],
    offset: usize,
    bytes: &[u8],
) -> Result<ArrayD<T>> {
    let item = T::DATATYPE.item_size();
    ensure!(
        strides.len() == shape.len(),
        "strides {:?} do not match shape {:?}",
        strides,
        shape
    );

    let count = element_count(shape)?;
    if count == 0 {
        return ArrayD::from_shape_vec(IxDyn(shape), Vec::new())
            .with_context(|| format!("Invalid empty shape {:?}", shape));
    }
    // Distinct elements need distinct bytes; zero strides are not expanded.
    ensure!(
        count <= bytes.len(),
        "array of shape {:?} has more elements than its {} byte buffer",
        shape,
        bytes.len()
    );

    let start = i64::try_from(offset).with_context(|| format!("offset {} is out of range", offset))?;
    let (mut lowest, mut highest) = (start, start);
    for (&len, &stride) in shape.iter().zip(strides) {
        let span = i64::try_from(len - 1)
            .ok()
            .and_then(|steps| steps.checked_mul(stride))
            .with_context(|| format!("axis of length {} with stride {} overflows", len, stride))?;
        let bound = if span < 0 { &mut lowest } else { &mut highest };
        *bound = bound
            .checked_add(span)
            .with_context(|| format!("strides {:?} overflow at offset {}", strides, offset))?;
    }
    let end = usize::try_from(highest).ok().and_then(|h| h.checked_add(item));
    ensure!(
        lowest >= 0 && end.is_some_and(|end| end <= bytes.len()),
        "array of shape {:?} with strides {:?} at offset {} does not fit in a {} byte buffer",
        shape,
        strides,
        offset,
        bytes.len()
    );

    // Every position lies in [lowest, highest], so the sums below cannot overflow.
    let mut values = Vec::with_capacity(count);
    for index in ndarray::indices(shape) {
        let position = index
            .slice()
            .iter()
            .zip(strides)
            .fold(start, |acc, (&i, &s)| acc + i as i64 * s) as usize;
        values.push(T::decode(&bytes[position..position + item], byte_order));
    }

    let fortran = shape.len() > 1
        && strides == contiguous_strides(shape, item, MemoryOrder::F).as_slice()
        && strides != contiguous_strides(shape, item, MemoryOrder::C).as_slice();
    let order = if fortran { MemoryOrder::F } else { MemoryOrder::C };
    let logical = ArrayD::from_shape_vec(IxDyn(shape), values)
        .with_context(|| format!("Failed to assemble array of shape {:?}", shape))?;
    match order {
        MemoryOrder::C => Ok(logical),
        MemoryOrder::F => relayout(&logical, order),
    }
}

fn typed_values<T: Element>(values: &[Value]) -> Result<ArrayD<T>> {
    let typed = values
        .iter()
        .map(|v| T::from_yaml(v).with_context(|| format!("{:?} is not a valid {}", v, T::DATATYPE)))
        .collect::<Result<Vec<T>>>()?;
    let len = typed.len();
    ArrayD::from_shape_vec(IxDyn(&[len]), typed).with_context(|| "Failed to collect values")
}

fn nested_yaml<T: Element>(view: ArrayViewD<'_, T>) -> Value {
    if view.ndim() == 0 {
        return view.iter().next().map(|v| v.to_yaml()).unwrap_or(Value::Null);
    }
    Value::Sequence(view.outer_iter().map(nested_yaml).collect())
}

struct Flattener<T> {
    shape: Vec<usize>,
    leaf_depth: Option<usize>,
    values: Vec<T>,
}

impl<T: Element> Flattener<T> {
    fn visit(&mut self, value: &Value, depth: usize) -> Result<()> {
        match value {
            Value::Sequence(items) => {
                if let Some(leaf) = self.leaf_depth {
                    ensure!(depth < leaf, "inline array data nests deeper than its other rows");
                }
                match self.shape.get(depth) {
                    Some(&len) => ensure!(len == items.len(), "inline array data is ragged at depth {}", depth),
                    None => self.shape.push(items.len()),
                }
                for item in items {
                    self.visit(item, depth + 1)?;
                }
            }
            scalar => {
                match self.leaf_depth {
                    Some(leaf) => ensure!(leaf == depth, "inline array data is ragged at depth {}", depth),
                    None => {
                        ensure!(depth == self.shape.len(), "inline array data is ragged at depth {}", depth);
                        self.leaf_depth = Some(depth);
                    }
                }
                let element = T::from_yaml(scalar)
                    .with_context(|| format!("{:?} is not a valid {}", scalar, T::DATATYPE))?;
                self.values.push(element);
            }
        }
        Ok(())
    }
}

fn decode_nested<T: Element>(data: &Value) -> Result<ArrayD<T>> {
    let mut flattener = Flattener::<T> {
        shape: Vec::new(),
        leaf_depth: None,
        values: Vec::new(),
    };
    flattener.visit(data, 0)?;
    let shape = flattener.shape;
    ArrayD::from_shape_vec(IxDyn(&shape), flattener.values)
        .with_context(|| format!("inline array data does not fill shape {:?}", shape))
}
