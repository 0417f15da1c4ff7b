use taskrt::DType;

/// Dtype tag stored in [`crate::TaskrtTensor::dtype`].
pub fn dtype_tag(dtype: DType) -> u32 {
    match dtype {
        DType::F32 => 0,
        DType::F16 => 1,
        DType::BF16 => 2,
        DType::I32 => 3,
        DType::Bool => 4,
        DType::F64 => 5,
        DType::I8 => 6,
        DType::I16 => 7,
        DType::I64 => 8,
        DType::U8 => 9,
        DType::U16 => 10,
        DType::U32 => 11,
        DType::U64 => 12,
    }
}
