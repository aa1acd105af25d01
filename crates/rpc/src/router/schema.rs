//! Input schemas for routes.
//!
//! A schema turns the raw request body (absent, or any dynamic value) into the
//! typed input a handler receives, or rejects it with a human-readable reason.

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Validates and converts a raw request body.
pub trait Validator: Send + Sync + 'static {
    /// The validated input handed to the handler.
    type Output: Send + 'static;

    /// Validate `raw`. `None` means the request carried no body.
    ///
    /// # Errors
    ///
    /// Returns the reason the body was rejected.
    fn validate(&self, raw: Option<Value>) -> Result<Self::Output, String>;
}

const NOT_DEFINED: &str = "this must be defined";

fn type_error(expected: &str) -> String {
    format!("this must be a `{expected}` type")
}

/// Schema accepting a string body.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringSchema {
    defined: bool,
    min_len: Option<usize>,
}

/// Start a string schema.
#[must_use]
pub const fn string() -> StringSchema {
    StringSchema {
        defined: false,
        min_len: None,
    }
}

impl StringSchema {
    /// Reject requests without a body.
    #[must_use]
    pub const fn defined(mut self) -> Self {
        self.defined = true;
        self
    }

    /// Require at least `len` characters.
    #[must_use]
    pub const fn min_len(mut self, len: usize) -> Self {
        self.min_len = Some(len);
        self
    }
}

impl Validator for StringSchema {
    type Output = Option<String>;

    fn validate(&self, raw: Option<Value>) -> Result<Self::Output, String> {
        let value = match raw {
            None if self.defined => return Err(NOT_DEFINED.to_string()),
            None => return Ok(None),
            Some(Value::String(value)) => value,
            Some(_) => return Err(type_error("string")),
        };

        if let Some(min) = self.min_len {
            if value.chars().count() < min {
                return Err(format!("this must be at least {min} characters"));
            }
        }

        Ok(Some(value))
    }
}

/// Schema accepting an object body.
#[derive(Debug, Clone, Default)]
pub struct ObjectSchema {
    required: Vec<String>,
}

/// Start an object schema.
#[must_use]
pub const fn object() -> ObjectSchema {
    ObjectSchema {
        required: Vec::new(),
    }
}

impl ObjectSchema {
    /// Require `name` to be present and non-null.
    #[must_use]
    pub fn required_field(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }
}

impl Validator for ObjectSchema {
    type Output = Map<String, Value>;

    fn validate(&self, raw: Option<Value>) -> Result<Self::Output, String> {
        let fields = match raw {
            None => Map::new(),
            Some(Value::Object(fields)) => fields,
            Some(_) => return Err(type_error("object")),
        };

        for name in &self.required {
            if fields.get(name).is_none_or(Value::is_null) {
                return Err(format!("{name} is a required field"));
            }
        }

        Ok(fields)
    }
}

/// Schema accepting anything, including no body.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnySchema;

impl Validator for AnySchema {
    type Output = Option<Value>;

    fn validate(&self, raw: Option<Value>) -> Result<Self::Output, String> {
        Ok(raw)
    }
}

/// Schema deserializing the body into `T`.
pub struct Typed<T>(PhantomData<fn() -> T>);

impl<T> Typed<T> {
    /// Create the schema.
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for Typed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Typed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Typed<{}>", std::any::type_name::<T>())
    }
}

/// Shorthand for [`Typed::new`].
#[must_use]
pub const fn typed<T>() -> Typed<T> {
    Typed::new()
}

impl<T> Validator for Typed<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = T;

    fn validate(&self, raw: Option<Value>) -> Result<Self::Output, String> {
        let value = raw.ok_or_else(|| NOT_DEFINED.to_string())?;
        serde_json::from_value(value).map_err(|e| e.to_string())
    }
}

/// Schema backed by a closure.
pub struct FnValidator<F>(F);

/// Wrap a closure as a schema.
pub const fn from_fn<F, O>(validate: F) -> FnValidator<F>
where
    F: Fn(Option<Value>) -> Result<O, String> + Send + Sync + 'static,
    O: Send + 'static,
{
    FnValidator(validate)
}

impl<F, O> Validator for FnValidator<F>
where
    F: Fn(Option<Value>) -> Result<O, String> + Send + Sync + 'static,
    O: Send + 'static,
{
    type Output = O;

    fn validate(&self, raw: Option<Value>) -> Result<Self::Output, String> {
        (self.0)(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_string_schema() {
        let schema = string().defined();

        assert_eq!(schema.validate(Some(json!("hi"))), Ok(Some("hi".to_string())));
        assert_eq!(schema.validate(None), Err("this must be defined".to_string()));
        assert_eq!(
            schema.validate(Some(json!(5))),
            Err("this must be a `string` type".to_string())
        );

        assert_eq!(string().validate(None), Ok(None));
        assert!(string().min_len(3).validate(Some(json!("ab"))).is_err());
    }

    #[test]
    fn test_object_schema() {
        let schema = object().required_field("account");

        let fields = schema.validate(Some(json!({ "account": "default" }))).unwrap();
        assert_eq!(fields["account"], json!("default"));

        assert_eq!(
            schema.validate(Some(json!({}))),
            Err("account is a required field".to_string())
        );
        assert_eq!(
            schema.validate(Some(json!({ "account": null }))),
            Err("account is a required field".to_string())
        );
        assert_eq!(
            object().validate(Some(json!([1]))),
            Err("this must be a `object` type".to_string())
        );
        assert!(object().validate(None).unwrap().is_empty());
    }

    #[test]
    fn test_typed_schema() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct GetBlock {
            sequence: u32,
        }

        let schema = typed::<GetBlock>();
        assert_eq!(
            schema.validate(Some(json!({ "sequence": 3 }))),
            Ok(GetBlock { sequence: 3 })
        );
        assert_eq!(schema.validate(None), Err("this must be defined".to_string()));
        assert!(schema.validate(Some(json!({ "sequence": "three" }))).is_err());
    }

    #[test]
    fn test_fn_schema() {
        let schema = from_fn(|raw| match raw {
            Some(Value::Number(n)) if n.as_u64().is_some_and(|n| n > 0) => Ok(n.as_u64()),
            _ => Err("this must be a positive number".to_string()),
        });

        assert_eq!(schema.validate(Some(json!(4))), Ok(Some(4)));
        assert!(schema.validate(Some(json!(0))).is_err());
        assert_eq!(AnySchema.validate(None), Ok(None));
    }
}
