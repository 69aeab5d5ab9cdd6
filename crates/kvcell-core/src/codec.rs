#![forbid(unsafe_code)]

//! Conversion between typed values and raw backend strings.
//!
//! [`JsonCodec`] is the default for any serde type. [`FnCodec`] wraps a pair
//! of closures for formats serde does not describe well (timestamps stored
//! as plain text, legacy encodings).

use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CodecError;

/// Parse/stringify pair for values of type `T`.
pub trait Codec<T> {
    /// Turn a raw stored string into a value.
    fn parse(&self, raw: &str) -> Result<T, CodecError>;

    /// Turn a value into the raw string to store.
    fn stringify(&self, value: &T) -> Result<String, CodecError>;
}

/// Shared codec handle, as held by cells and namespaces.
pub type SharedCodec<T> = Rc<dyn Codec<T>>;

/// serde_json codec.
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<T: Serialize + DeserializeOwned> Codec<T> for JsonCodec<T> {
    fn parse(&self, raw: &str) -> Result<T, CodecError> {
        serde_json::from_str(raw).map_err(|err| CodecError::parse(err.to_string()))
    }

    fn stringify(&self, value: &T) -> Result<String, CodecError> {
        serde_json::to_string(value).map_err(|err| CodecError::serialize(err.to_string()))
    }
}

/// Shared JSON codec for `T`.
#[must_use]
pub fn json<T: Serialize + DeserializeOwned + 'static>() -> SharedCodec<T> {
    Rc::new(JsonCodec::<T>::new())
}

type ParseFn<T> = Box<dyn Fn(&str) -> Result<T, CodecError>>;
type StringifyFn<T> = Box<dyn Fn(&T) -> Result<String, CodecError>>;

/// Codec built from two closures.
pub struct FnCodec<T> {
    parse: ParseFn<T>,
    stringify: StringifyFn<T>,
}

impl<T> FnCodec<T> {
    /// Build a codec whose conversions may fail.
    pub fn new(
        parse: impl Fn(&str) -> Result<T, CodecError> + 'static,
        stringify: impl Fn(&T) -> Result<String, CodecError> + 'static,
    ) -> Self {
        Self {
            parse: Box::new(parse),
            stringify: Box::new(stringify),
        }
    }

    /// Build a codec whose serialization cannot fail.
    pub fn infallible_stringify(
        parse: impl Fn(&str) -> Result<T, CodecError> + 'static,
        stringify: impl Fn(&T) -> String + 'static,
    ) -> Self {
        Self::new(parse, move |value| Ok(stringify(value)))
    }
}

impl<T> fmt::Debug for FnCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCodec").finish_non_exhaustive()
    }
}

impl<T> Codec<T> for FnCodec<T> {
    fn parse(&self, raw: &str) -> Result<T, CodecError> {
        (self.parse)(raw)
    }

    fn stringify(&self, value: &T) -> Result<String, CodecError> {
        (self.stringify)(value)
    }
}
