use crate::{Endianness, WireDeError, WireDeserialize, WireSerError, WireSerialize};

macro_rules! impl_serialize_deserialize {
    ($($t:ty),*) => {
        $(
            impl WireSerialize for $t {
                fn serialize(&self, endianness: Endianness, target: &mut [u8]) -> Result<usize, WireSerError> {
                    const SIZE: usize = core::mem::size_of::<$t>();
                    if target.len() < SIZE {
                        return Err(WireSerError::BufferTooSmall);
                    }
                    let bytes = match endianness {
                        Endianness::Native | Endianness::Little => self.to_le_bytes(),
                        Endianness::Big => self.to_be_bytes(),
                    };
                    target[..SIZE].copy_from_slice(&bytes);
                    Ok(SIZE)
                }
            }
            impl WireDeserialize for $t {
                fn deserialize(endianness: Endianness, input: &[u8]) -> Result<(Self, usize), WireDeError> {
                    const SIZE: usize = core::mem::size_of::<$t>();
                    if input.len() < SIZE {
                        return Err(WireDeError::BufferTooSmall);
                    }
                    let mut bytes = [0u8; SIZE];
                    bytes.copy_from_slice(&input[..SIZE]);
                    let number = match endianness {
                        Endianness::Native | Endianness::Little => <$t>::from_le_bytes(bytes),
                        Endianness::Big => <$t>::from_be_bytes(bytes),
                    };
                    Ok((number, SIZE))
                }
            }
        )*
    };
}

macro_rules! impl_serialize_deserialize_array {
    ($($t:ty),*) => {
        $(
            impl<const N: usize> WireSerialize for [$t; N] {
                fn serialize(&self, endianness: Endianness, target: &mut [u8]) -> Result<usize, WireSerError> {
                    const ELEM_SIZE: usize = core::mem::size_of::<$t>();
                    let total_size = ELEM_SIZE * N;

                    if target.len() < total_size {
                        return Err(WireSerError::BufferTooSmall);
                    }

                    for (i, elem) in self.iter().enumerate() {
                        let offset = i * ELEM_SIZE;
                        elem.serialize(endianness, &mut target[offset..offset + ELEM_SIZE])?;
                    }

                    Ok(total_size)
                }
            }

            impl<const N: usize> WireDeserialize for [$t; N] {
                fn deserialize(endianness: Endianness, input: &[u8]) -> Result<(Self, usize), WireDeError> {
                    const ELEM_SIZE: usize = core::mem::size_of::<$t>();
                    let total_size = ELEM_SIZE * N;

                    if input.len() < total_size {
                        return Err(WireDeError::BufferTooSmall);
                    }

                    let mut result = [<$t>::default(); N];

                    for (i, slot) in result.iter_mut().enumerate() {
                        let offset = i * ELEM_SIZE;
                        let (elem, _) = <$t>::deserialize(endianness, &input[offset..offset + ELEM_SIZE])?;
                        *slot = elem;
                    }

                    Ok((result, total_size))
                }
            }
        )*
    };
}

impl_serialize_deserialize!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128);
impl_serialize_deserialize_array!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128);
