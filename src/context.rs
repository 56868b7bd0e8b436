use std::str::FromStr;
use std::sync::Arc;

use async_graphql_value::ConstValue;

use crate::auth::Principal;
use crate::error::{Error, Result};
use crate::request::Arguments;

/// Everything a DIRECT or STREAM resolver sees for one field invocation.
#[derive(Debug)]
pub struct Ctx<C> {
    data: Arc<C>,
    principal: Arc<Principal>,
    parent: Option<ConstValue>,
    args: Arguments,
}

impl<C> Clone for Ctx<C> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            principal: self.principal.clone(),
            parent: self.parent.clone(),
            args: self.args.clone(),
        }
    }
}

impl<C> Ctx<C> {
    pub fn new(
        data: Arc<C>,
        principal: Arc<Principal>,
        parent: Option<ConstValue>,
        args: Arguments,
    ) -> Self {
        Self {
            data,
            principal,
            parent,
            args,
        }
    }

    pub fn data(&self) -> &C {
        &self.data
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn args(&self) -> &Arguments {
        &self.args
    }

    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args.get(name)
    }

    pub fn arg_as<T: FromStr>(&self, name: &str) -> Option<T> {
        self.arg(name).and_then(|v| v.parse().ok())
    }

    /// Like [`Ctx::arg_as`], but a missing or malformed argument is a
    /// validation error for the field.
    pub fn require_arg<T: FromStr>(&self, name: &str) -> Result<T> {
        let raw = self
            .arg(name)
            .ok_or_else(|| Error::validation(format!("missing argument '{}'", name)))?;
        raw.parse()
            .map_err(|_| Error::validation(format!("invalid value '{}' for argument '{}'", raw, name)))
    }

    pub fn parent(&self) -> Option<&ConstValue> {
        self.parent.as_ref()
    }

    pub fn parent_as<T: FromConstValue>(&self) -> Result<T> {
        let parent = self
            .parent
            .as_ref()
            .ok_or_else(|| Error::Internal(anyhow::anyhow!("field has no parent value")))?;
        T::from_const_value(parent).map_err(|message| Error::Internal(anyhow::anyhow!(message)))
    }

    pub fn parent_field(&self, name: &str) -> Option<&ConstValue> {
        match self.parent.as_ref()? {
            ConstValue::Object(obj) => obj.get(name),
            _ => None,
        }
    }
}

/// Context handed to a BATCH resolver once per field per tree level.
#[derive(Debug)]
pub struct BatchCtx<C> {
    data: Arc<C>,
    principal: Arc<Principal>,
    args: Arguments,
}

impl<C> BatchCtx<C> {
    pub fn new(data: Arc<C>, principal: Arc<Principal>, args: Arguments) -> Self {
        Self {
            data,
            principal,
            args,
        }
    }

    pub fn data(&self) -> &C {
        &self.data
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args.get(name)
    }
}

pub trait ToConstValue {
    fn to_const_value(&self) -> ConstValue;
}

pub trait FromConstValue: Sized {
    fn from_const_value(value: &ConstValue) -> Result<Self, String>;
}

/// Reads `key` out of an object value.
pub fn object_field<T: FromConstValue>(value: &ConstValue, key: &str) -> Result<T, String> {
    match value {
        ConstValue::Object(obj) => obj
            .get(key)
            .ok_or_else(|| format!("Missing field '{}'", key))
            .and_then(T::from_const_value),
        _ => Err("Expected object".to_string()),
    }
}

impl ToConstValue for i64 {
    fn to_const_value(&self) -> ConstValue {
        ConstValue::Number((*self).into())
    }
}

impl FromConstValue for i64 {
    fn from_const_value(value: &ConstValue) -> Result<Self, String> {
        match value {
            ConstValue::Number(n) => n.as_i64().ok_or_else(|| "Expected i64".to_string()),
            _ => Err("Expected number".to_string()),
        }
    }
}

impl ToConstValue for bool {
    fn to_const_value(&self) -> ConstValue {
        ConstValue::Boolean(*self)
    }
}

impl FromConstValue for bool {
    fn from_const_value(value: &ConstValue) -> Result<Self, String> {
        match value {
            ConstValue::Boolean(b) => Ok(*b),
            _ => Err("Expected boolean".to_string()),
        }
    }
}

impl ToConstValue for String {
    fn to_const_value(&self) -> ConstValue {
        ConstValue::String(self.clone())
    }
}

impl FromConstValue for String {
    fn from_const_value(value: &ConstValue) -> Result<Self, String> {
        match value {
            ConstValue::String(s) => Ok(s.clone()),
            _ => Err("Expected string".to_string()),
        }
    }
}

impl<T: ToConstValue> ToConstValue for Option<T> {
    fn to_const_value(&self) -> ConstValue {
        match self {
            Some(v) => v.to_const_value(),
            None => ConstValue::Null,
        }
    }
}

impl<T: FromConstValue> FromConstValue for Option<T> {
    fn from_const_value(value: &ConstValue) -> Result<Self, String> {
        match value {
            ConstValue::Null => Ok(None),
            v => T::from_const_value(v).map(Some),
        }
    }
}

impl<T: ToConstValue> ToConstValue for Vec<T> {
    fn to_const_value(&self) -> ConstValue {
        ConstValue::List(self.iter().map(|v| v.to_const_value()).collect())
    }
}

impl<T: FromConstValue> FromConstValue for Vec<T> {
    fn from_const_value(value: &ConstValue) -> Result<Self, String> {
        match value {
            ConstValue::List(items) => items.iter().map(T::from_const_value).collect(),
            _ => Err("Expected list".to_string()),
        }
    }
}

/// Static type information used when a resolver is registered.
pub trait GraphQLType {
    const TYPE_NAME: &'static str;
    const IS_SCALAR: bool = false;
    const IS_LIST: bool = false;
}

impl GraphQLType for i64 {
    const TYPE_NAME: &'static str = "Int";
    const IS_SCALAR: bool = true;
}

impl GraphQLType for bool {
    const TYPE_NAME: &'static str = "Boolean";
    const IS_SCALAR: bool = true;
}

impl GraphQLType for String {
    const TYPE_NAME: &'static str = "String";
    const IS_SCALAR: bool = true;
}

impl<T: GraphQLType> GraphQLType for Option<T> {
    const TYPE_NAME: &'static str = T::TYPE_NAME;
    const IS_SCALAR: bool = T::IS_SCALAR;
    const IS_LIST: bool = T::IS_LIST;
}

impl<T: GraphQLType> GraphQLType for Vec<T> {
    const TYPE_NAME: &'static str = T::TYPE_NAME;
    const IS_SCALAR: bool = T::IS_SCALAR;
    const IS_LIST: bool = true;
}
