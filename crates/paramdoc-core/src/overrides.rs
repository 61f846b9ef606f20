//! Command-line style `key=value` overrides
//!
//! ```text
//! train.lr=1e-3
//! task.side=left
//! train.stages[0].epochs=4
//! model.width=${..base}
//! ```
//!
//! Values are typed like YAML scalars; interpolations are kept as text and
//! resolved together with the rest of the document.

use crate::error::{Error, Result};
use crate::value::{parse_path, Value};

/// A parsed `key=value` override
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    /// Dotted path of the node to replace
    pub path: String,
    /// The new raw value
    pub value: Value,
}

impl Override {
    /// Parse `path=value`
    pub fn parse(text: &str) -> Result<Self> {
        let Some((path, raw)) = text.split_once('=') else {
            return Err(Error::parse("Override must have the form path=value", 0, text)
                .with_help("Write overrides as key=value, e.g. train.lr=1e-3"));
        };

        let path = path.trim();
        if path.is_empty() {
            return Err(Error::parse("Override has an empty path", 0, text));
        }
        parse_path(path)?;

        Ok(Self {
            path: path.to_string(),
            value: parse_override_value(raw.trim()),
        })
    }

    /// Write the value into `document`, creating intermediate mappings
    pub fn apply(&self, document: &mut Value) -> Result<()> {
        log::trace!("Applying override {}={}", self.path, self.value);
        document
            .set_path(&self.path, self.value.clone())
            .map_err(|e| e.with_path(self.path.clone()))
    }
}

fn parse_override_value(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::String(String::new());
    }
    serde_yaml::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Parse and apply every override in order; later overrides win
pub fn apply_overrides<S: AsRef<str>>(document: &mut Value, overrides: &[S]) -> Result<()> {
    for text in overrides {
        Override::parse(text.as_ref())?.apply(document)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn doc(yaml: &str) -> Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_parse_typed_values() {
        let o = Override::parse("train.lr=1e-3").unwrap();
        assert_eq!(o.path, "train.lr");
        assert_eq!(o.value, Value::Float(1e-3));

        assert_eq!(Override::parse("a=4").unwrap().value, Value::Integer(4));
        assert_eq!(Override::parse("a=true").unwrap().value, Value::Bool(true));
        assert_eq!(Override::parse("a=null").unwrap().value, Value::Null);
        assert_eq!(Override::parse("a=left").unwrap().value, Value::from("left"));
        assert_eq!(Override::parse("a=").unwrap().value, Value::from(""));
        assert_eq!(
            Override::parse("a=[1, 2]").unwrap().value,
            Value::from(vec![1, 2])
        );
    }

    #[test]
    fn test_parse_keeps_interpolation_text() {
        let o = Override::parse("model.width=${..base}").unwrap();
        assert_eq!(o.value, Value::from("${..base}"));
        let o = Override::parse("x=a=b").unwrap();
        assert_eq!(o.value, Value::from("a=b"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Override::parse("no_equals").is_err());
        assert!(Override::parse("=1").is_err());
        assert!(Override::parse("a[x]=1").is_err());
    }

    #[test]
    fn test_apply_overrides() {
        let mut value = doc(
            r#"
train:
  lr: 0.0003
  stages:
    - epochs: 2
"#,
        );
        apply_overrides(
            &mut value,
            &["train.lr=0.001", "train.stages[0].epochs=4", "task.side=left"],
        )
        .unwrap();

        assert_eq!(
            value,
            doc(
                r#"
train:
  lr: 0.001
  stages:
    - epochs: 4
task:
  side: left
"#
            )
        );
    }

    #[test]
    fn test_later_override_wins() {
        let mut value = doc("a: 1");
        apply_overrides(&mut value, &["a=2", "a=3"]).unwrap();
        assert_eq!(value, doc("a: 3"));
    }

    #[test]
    fn test_apply_into_scalar_fails() {
        let mut value = doc("a: 1");
        let err = apply_overrides(&mut value, &["a.b=2"]).unwrap_err();
        assert_eq!(err.path.as_deref(), Some("a.b"));
    }
}
