use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

use zenoh::Result;

pub trait ZSerializer {
    type Input<'a>
    where
        Self: 'a;
    fn serialize(input: Self::Input<'_>) -> Result<Vec<u8>>;
}

pub trait ZDeserializer {
    type Input<'a>;
    type Output;
    fn deserialize(input: Self::Input<'_>) -> Result<Self::Output>;
}

// Core Z-Message trait
pub trait ZMessage: Sized {
    type Serdes: for<'a> ZSerializer<Input<'a> = &'a Self>
        + for<'a> ZDeserializer<Input<'a> = &'a [u8], Output = Self>;

    fn serialize(&self) -> Result<Vec<u8>> {
        Self::Serdes::serialize(self)
    }

    fn deserialize(input: &[u8]) -> Result<Self> {
        Self::Serdes::deserialize(input)
    }
}

// Blanket implementation for serde-compatible types using CDR
impl<T> ZMessage for T
where
    T: Serialize + for<'a> Deserialize<'a> + 'static,
{
    type Serdes = CdrSerdes<T>;
}

// CDR, little endian with the standard encapsulation header

pub struct CdrSerdes<T>(PhantomData<T>);

impl<T> ZSerializer for CdrSerdes<T>
where
    T: Serialize,
{
    type Input<'a>
        = &'a T
    where
        T: 'a;

    fn serialize(input: &T) -> Result<Vec<u8>> {
        cdr::serialize::<_, _, cdr::CdrLe>(input, cdr::Infinite)
            .map_err(|e| zenoh::Error::from(format!("CDR serialization failed: {}", e)))
    }
}

impl<T> ZDeserializer for CdrSerdes<T>
where
    for<'a> T: Deserialize<'a>,
{
    type Input<'b> = &'b [u8];
    type Output = T;

    fn deserialize(input: Self::Input<'_>) -> Result<T> {
        cdr::deserialize::<T>(input)
            .map_err(|e| zenoh::Error::from(format!("CDR deserialization failed: {}", e)))
    }
}
