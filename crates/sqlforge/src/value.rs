//! Dialect-neutral scalar parameter carrier.
//!
//! Every scalar comparison value reaching the compiler is either pushed
//! into the parameter list as a [`Value`] and replaced with `?`, or wrapped
//! in a [`crate::raw::Raw`] marker and interpolated literally. There is no
//! third path (see the Query AST invariants).

use std::fmt;

/// A single bound parameter value. Kept dialect-neutral rather than tied to
/// any one driver's trait object so the compiler and AST have no compile-time
/// dependency on `sqlx`; the `pool` feature's executor is the only place
/// that converts `Value` into the driver's argument type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::I64(n) => write!(f, "{n}"),
            Value::U64(n) => write!(f, "{n}"),
            Value::F64(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// Converts a Rust scalar into a [`Value`]. Implemented for the handful of
/// types a caller is expected to bind directly; anything else must be
/// converted by the caller first.
pub trait IntoValue {
    fn into_value(self) -> Value;
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

macro_rules! impl_into_value {
    ($ty:ty, $variant:ident) => {
        impl IntoValue for $ty {
            fn into_value(self) -> Value {
                Value::$variant(self.into())
            }
        }
    };
}

impl_into_value!(bool, Bool);
impl_into_value!(i8, I64);
impl_into_value!(i16, I64);
impl_into_value!(i32, I64);
impl_into_value!(i64, I64);
impl_into_value!(u8, U64);
impl_into_value!(u16, U64);
impl_into_value!(u32, U64);
impl_into_value!(u64, U64);
impl_into_value!(f32, F64);
impl_into_value!(f64, F64);
impl_into_value!(String, Str);
impl_into_value!(Vec<u8>, Bytes);

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::Str(self.to_string())
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Value {
        match self {
            Some(v) => v.into_value(),
            None => Value::Null,
        }
    }
}

#[cfg(feature = "pool")]
impl Value {
    /// Binds this value into a set of `sqlx` MySQL arguments, in call order.
    pub(crate) fn bind(self, args: &mut sqlx::mysql::MySqlArguments) -> Result<(), sqlx::error::BoxDynError> {
        use sqlx::Arguments;
        match self {
            Value::Null => args.add(Option::<i64>::None),
            Value::Bool(b) => args.add(b),
            Value::I64(n) => args.add(n),
            Value::U64(n) => args.add(n),
            Value::F64(n) => args.add(n),
            Value::Str(s) => args.add(s),
            Value::Bytes(b) => args.add(b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_convert() {
        assert_eq!(5i32.into_value(), Value::I64(5));
        assert_eq!("hi".into_value(), Value::Str("hi".to_string()));
        assert_eq!(None::<i32>.into_value(), Value::Null);
        assert_eq!(Some(3u32).into_value(), Value::U64(3));
    }
}
