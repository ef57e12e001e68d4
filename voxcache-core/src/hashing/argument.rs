//! Dynamically-typed call arguments.

use crate::nifti::array::VoxelArray;
use crate::nifti::image::ImageHandle;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

const SHORT_REPR_LEN: usize = 20;

/// A value passed to a memoized function.
///
/// Images are held behind `Arc` since they are immutable and often shared
/// between many calls.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Path(PathBuf),
    Bytes(Vec<u8>),
    List(Vec<Argument>),
    Map(BTreeMap<String, Argument>),
    Array(VoxelArray),
    Image(Arc<ImageHandle>),
}

impl Argument {
    pub fn kind(&self) -> &'static str {
        match self {
            Argument::None => "none",
            Argument::Bool(_) => "bool",
            Argument::Int(_) => "int",
            Argument::Float(_) => "float",
            Argument::Str(_) => "str",
            Argument::Path(_) => "path",
            Argument::Bytes(_) => "bytes",
            Argument::List(_) => "list",
            Argument::Map(_) => "map",
            Argument::Array(_) => "array",
            Argument::Image(_) => "image",
        }
    }

    pub fn as_image(&self) -> Option<&Arc<ImageHandle>> {
        match self {
            Argument::Image(img) => Some(img),
            _ => None,
        }
    }

    /// Representation truncated to 20 characters, for error messages.
    pub fn short_repr(&self) -> String {
        let full = self.to_string();
        if full.chars().count() > SHORT_REPR_LEN {
            let head: String = full.chars().take(SHORT_REPR_LEN - 2).collect();
            format!("{head}...")
        } else {
            full
        }
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::None => f.write_str("None"),
            Argument::Bool(b) => write!(f, "{b}"),
            Argument::Int(i) => write!(f, "{i}"),
            Argument::Float(x) => write!(f, "{x:?}"),
            Argument::Str(s) => write!(f, "{s:?}"),
            Argument::Path(p) => write!(f, "Path({:?})", p.display().to_string()),
            Argument::Bytes(b) => write!(f, "Bytes(len={})", b.len()),
            Argument::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Argument::Map(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k:?}: {v}")?;
                }
                f.write_str("}")
            }
            Argument::Array(a) => write!(f, "VoxelArray(shape={:?}, dtype={})", a.shape(), a.dtype()),
            Argument::Image(img) => f.write_str(&img.short_repr()),
        }
    }
}

macro_rules! impl_from {
    ($t:ty, $variant:ident) => {
        impl From<$t> for Argument {
            fn from(value: $t) -> Self {
                Argument::$variant(value.into())
            }
        }
    };
}

impl_from!(bool, Bool);
impl_from!(i64, Int);
impl_from!(i32, Int);
impl_from!(f64, Float);
impl_from!(f32, Float);
impl_from!(String, Str);
impl_from!(&str, Str);
impl_from!(PathBuf, Path);
impl_from!(Vec<u8>, Bytes);
impl_from!(Vec<Argument>, List);
impl_from!(BTreeMap<String, Argument>, Map);
impl_from!(VoxelArray, Array);
impl_from!(Arc<ImageHandle>, Image);

impl From<ImageHandle> for Argument {
    fn from(value: ImageHandle) -> Self {
        Argument::Image(Arc::new(value))
    }
}

impl<T: Into<Argument>> From<Option<T>> for Argument {
    fn from(value: Option<T>) -> Self {
        value.map_or(Argument::None, Into::into)
    }
}

impl From<serde_json::Value> for Argument {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Argument::None,
            Value::Bool(b) => Argument::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Argument::Int(i),
                None => Argument::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Argument::Str(s),
            Value::Array(items) => Argument::List(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                Argument::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_nested() {
        let mut map = BTreeMap::new();
        map.insert("fwhm".to_string(), Argument::Float(6.0));
        let arg = Argument::List(vec![Argument::Int(1), Argument::Map(map), Argument::None]);
        assert_eq!(arg.to_string(), r#"[1, {"fwhm": 6.0}, None]"#);
    }

    #[test]
    fn test_short_repr_truncates() {
        assert_eq!(Argument::Int(5).short_repr(), "5");
        let long = Argument::Str("a".repeat(40));
        let repr = long.short_repr();
        assert_eq!(repr.chars().count(), 21);
        assert!(repr.ends_with("..."));
    }

    #[test]
    fn test_from_json() {
        let arg: Argument = serde_json::json!({"k": [1, 2.5, "x", null, true]}).into();
        let mut expected = BTreeMap::new();
        expected.insert(
            "k".to_string(),
            Argument::List(vec![
                Argument::Int(1),
                Argument::Float(2.5),
                Argument::Str("x".into()),
                Argument::None,
                Argument::Bool(true),
            ]),
        );
        assert_eq!(arg, Argument::Map(expected));
    }

    #[test]
    fn test_from_option() {
        assert_eq!(Argument::from(None::<i64>), Argument::None);
        assert_eq!(Argument::from(Some(3i64)), Argument::Int(3));
    }
}
