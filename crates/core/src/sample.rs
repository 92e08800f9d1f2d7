// crates/core/src/sample.rs
//
// Builds the array a round trip starts from.

use anyhow::{Context, Result};
use strides_formats::NdArray;

use crate::config::ArraySpec;

/// Build the array described by `spec`, laid out in its requested order.
pub fn build_array(spec: &ArraySpec) -> Result<NdArray> {
    spec.validate()?;
    NdArray::from_yaml_values(spec.dtype()?, &spec.shape, &spec.values, spec.order()?)
        .with_context(|| format!("Failed to build {} array of shape {:?}", spec.dtype, spec.shape))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;
    use strides_formats::MemoryOrder;

    #[test]
    fn default_sample_is_column_major() {
        let array = build_array(&ArraySpec::default()).unwrap();
        assert_eq!(array.shape(), &[2, 3]);
        assert_eq!(array.memory_order(), Some(MemoryOrder::F));

        let typed = array.as_array::<i64>().unwrap();
        assert_eq!(typed[IxDyn(&[0, 1])], 12);
        assert_eq!(typed[IxDyn(&[1, 2])], 23);
        // Column-major memory: 11 is followed by 21.
        assert_eq!(typed.as_slice_memory_order().unwrap()[..2], [11, 21]);
    }
}
