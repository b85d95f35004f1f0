use super::{MetadataError, Value};
use crate::document::Document;
use std::path::PathBuf;

/// Best-effort conversion out of a resolved [`Value`].
///
/// - integers widen and convert to floats
/// - floats convert to integers only when integral and in range
/// - strings parse into numbers and booleans
/// - every scalar converts to `String`
/// - lists convert element-wise, a scalar converts to a one-element list
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, MetadataError>;
}

fn conversion_error<T>(value: &Value, target: &'static str) -> Result<T, MetadataError> {
    Err(MetadataError::Conversion {
        value: format!("{} value {:?}", value.kind(), value),
        target,
    })
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, MetadataError> {
        Ok(value.clone())
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, MetadataError> {
        match value {
            Value::Map(_) | Value::Deferred(_) => conversion_error(value, "String"),
            other => Ok(other.to_string()),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, MetadataError> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" => Ok(false),
                _ => conversion_error(value, "bool"),
            },
            _ => conversion_error(value, "bool"),
        }
    }
}

fn to_i64(value: &Value, target: &'static str) -> Result<i64, MetadataError> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Float(f) if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 => {
            Ok(*f as i64)
        }
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(i) => Ok(i),
            Err(_) => conversion_error(value, target),
        },
        _ => conversion_error(value, target),
    }
}

macro_rules! int_from_value {
    ($($t:ty),*) => {
        $(impl FromValue for $t {
            fn from_value(value: &Value) -> Result<Self, MetadataError> {
                let wide = to_i64(value, stringify!($t))?;
                <$t>::try_from(wide).or_else(|_| conversion_error(value, stringify!($t)))
            }
        })*
    };
}

int_from_value!(i32, i64, u32, u64, usize);

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, MetadataError> {
        match value {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .or_else(|_| conversion_error(value, "f64")),
            _ => conversion_error(value, "f64"),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self, MetadataError> {
        f64::from_value(value).map(|f| f as f32)
    }
}

impl FromValue for PathBuf {
    fn from_value(value: &Value) -> Result<Self, MetadataError> {
        match value {
            Value::String(s) => Ok(PathBuf::from(s)),
            _ => conversion_error(value, "PathBuf"),
        }
    }
}

impl FromValue for Document {
    fn from_value(value: &Value) -> Result<Self, MetadataError> {
        match value {
            Value::Document(doc) => Ok(doc.clone()),
            _ => conversion_error(value, "Document"),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Result<Self, MetadataError> {
        match value {
            Value::List(items) => items.iter().map(T::from_value).collect(),
            Value::Null => Ok(Vec::new()),
            scalar => Ok(vec![T::from_value(scalar)?]),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, MetadataError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_widen() {
        assert_eq!(i64::from_value(&Value::Int(7)).unwrap(), 7);
        assert_eq!(f64::from_value(&Value::Int(7)).unwrap(), 7.0);
        assert_eq!(u32::from_value(&Value::Int(7)).unwrap(), 7);
    }

    #[test]
    fn negative_to_unsigned_fails() {
        let err = u32::from_value(&Value::Int(-1)).unwrap_err();
        assert!(matches!(err, MetadataError::Conversion { target: "u32", .. }));
    }

    #[test]
    fn integral_float_narrows() {
        assert_eq!(i32::from_value(&Value::Float(3.0)).unwrap(), 3);
        assert!(i32::from_value(&Value::Float(3.5)).is_err());
    }

    #[test]
    fn float_beyond_i64_range_fails() {
        // 2^63 rounds i64::MAX up; it must not saturate.
        assert!(i64::from_value(&Value::Float(i64::MAX as f64)).is_err());
        assert_eq!(i64::from_value(&Value::Float(i64::MIN as f64)).unwrap(), i64::MIN);
    }

    #[test]
    fn strings_parse() {
        assert_eq!(i64::from_value(&Value::from(" 42 ")).unwrap(), 42);
        assert_eq!(f64::from_value(&Value::from("2.5")).unwrap(), 2.5);
        assert!(bool::from_value(&Value::from("yes")).unwrap());
        assert!(i64::from_value(&Value::from("forty-two")).is_err());
    }

    #[test]
    fn scalars_render_as_strings() {
        assert_eq!(String::from_value(&Value::Int(5)).unwrap(), "5");
        assert_eq!(String::from_value(&Value::Bool(false)).unwrap(), "false");
    }

    #[test]
    fn lists_convert_element_wise() {
        let v = Value::List(vec![Value::Int(1), Value::from("2"), Value::Float(3.0)]);
        assert_eq!(Vec::<i64>::from_value(&v).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn list_with_bad_element_fails() {
        let v = Value::List(vec![Value::Int(1), Value::from("x")]);
        assert!(Vec::<i64>::from_value(&v).is_err());
    }

    #[test]
    fn scalar_becomes_single_element_list() {
        assert_eq!(
            Vec::<String>::from_value(&Value::from("tag")).unwrap(),
            vec!["tag".to_string()]
        );
    }

    #[test]
    fn map_to_number_fails() {
        let v = Value::Map(Default::default());
        assert!(i64::from_value(&v).is_err());
        assert!(String::from_value(&v).is_err());
    }
}
