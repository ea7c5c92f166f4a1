//! Value converters
//!
//! Every setting carries a `(stringify, parse)` pair used to move values
//! between their typed form and the persisted string form. Built-ins cover
//! everything implementing `FromStr + Display` (the standard scalars, and
//! any user enumeration with those impls); explicit converters may be
//! attached per setting or per group and take precedence.

use crate::error::{Error, Result};
use std::fmt::Display;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;

/// A `(stringify, parse)` pair for one value type.
pub trait SettingConverter<V>: Send + Sync {
    /// Render a value into its persisted string form.
    fn stringify(&self, value: &V) -> String;

    /// Parse the persisted string form back into a value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conversion`] when the string is not a valid
    /// rendering of `V`.
    fn parse(&self, raw: &str) -> Result<V>;
}

/// Types with a built-in default converter.
///
/// Blanket-implemented for everything that is `FromStr + Display`, which is
/// the per-type default-converter map: fixed at compile time, never replaced
/// at runtime.
pub trait ConvertibleValue: Send + Sync + Sized + 'static {
    /// The converter used when neither the setting nor an enclosing group
    /// declares one.
    fn default_converter() -> Arc<dyn SettingConverter<Self>>;
}

impl<V> ConvertibleValue for V
where
    V: FromStr + Display + Send + Sync + 'static,
    V::Err: Display,
{
    fn default_converter() -> Arc<dyn SettingConverter<Self>> {
        Arc::new(FromStrConverter::default())
    }
}

/// Converter backed by a type's `FromStr` and `Display` impls.
pub struct FromStrConverter<V> {
    _marker: PhantomData<fn() -> V>,
}

impl<V> Default for FromStrConverter<V> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<V> SettingConverter<V> for FromStrConverter<V>
where
    V: FromStr + Display + Send + Sync,
    V::Err: Display,
{
    fn stringify(&self, value: &V) -> String {
        value.to_string()
    }

    fn parse(&self, raw: &str) -> Result<V> {
        raw.parse().map_err(|e: V::Err| Error::Conversion {
            type_name: std::any::type_name::<V>(),
            reason: e.to_string(),
        })
    }
}

/// Adapter turning a converter for `V` into one for `Option<V>`.
///
/// The empty string stands for `None`; any other string is parsed as `V`.
/// `stringify` of `None` is the empty string, so values of `V` whose own
/// rendering is empty cannot be used with this adapter.
pub struct NullableConverter<V> {
    inner: Arc<dyn SettingConverter<V>>,
}

impl<V: ConvertibleValue> Default for NullableConverter<V> {
    fn default() -> Self {
        Self {
            inner: V::default_converter(),
        }
    }
}

impl<V> NullableConverter<V> {
    /// Wrap an explicit inner converter.
    pub fn new(inner: Arc<dyn SettingConverter<V>>) -> Self {
        Self { inner }
    }
}

impl<V: Send + Sync> SettingConverter<Option<V>> for NullableConverter<V> {
    fn stringify(&self, value: &Option<V>) -> String {
        match value {
            Some(v) => self.inner.stringify(v),
            None => String::new(),
        }
    }

    fn parse(&self, raw: &str) -> Result<Option<V>> {
        if raw.is_empty() {
            Ok(None)
        } else {
            self.inner.parse(raw).map(Some)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
