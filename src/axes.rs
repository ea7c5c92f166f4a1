//! Tier and data-center axis traits
//!
//! Settings values are scoped along three axes: sub-app, deployment tier,
//! and data center. Tier and data center are user-supplied enumerations;
//! the library only needs equality, a total `Any` wildcard at ordinal 0,
//! and stable ordinals for the persisted hash layout.

use crate::error::{Error, Result};

/// Common contract for tier and data-center enumerations.
///
/// Implemented by the [`axis_enum!`](crate::axis_enum) macro; the first
/// variant must be the `Any` wildcard at ordinal 0.
pub trait SettingsAxis:
    Copy
    + Eq
    + std::hash::Hash
    + std::fmt::Debug
    + Send
    + Sync
    + serde::Serialize
    + serde::de::DeserializeOwned
    + 'static
{
    /// The wildcard sentinel matching every context value.
    const ANY: Self;

    /// All variants in declaration order, `Any` first.
    fn values() -> &'static [Self];

    /// Stable ordinal used in the persisted field layout.
    fn ordinal(self) -> u32;

    /// Inverse of [`ordinal`](SettingsAxis::ordinal).
    fn from_ordinal(ordinal: u32) -> Option<Self>;

    /// Variant name as declared.
    fn name(self) -> &'static str;

    /// Inverse of [`name`](SettingsAxis::name).
    fn from_name(name: &str) -> Option<Self>;

    /// Whether this value is the `Any` wildcard.
    fn is_any(self) -> bool {
        self == Self::ANY
    }
}

/// Marker for the deployment-tier axis.
pub trait TierAxis: SettingsAxis {}

/// The data-center axis, with optional per-tier visibility metadata.
pub trait DataCenterAxis: SettingsAxis {
    /// Whether this data center appears in enumeration metadata on `tier`.
    ///
    /// Defaults to visible everywhere. Implement manually (instead of using
    /// the `data_center` flavor of `axis_enum!`) to hide values from tiers
    /// where they do not exist.
    fn visible_on<T: TierAxis>(self, _tier: T) -> bool {
        true
    }
}

/// Enumerate the data centers visible on `tier`, excluding the `Any` sentinel.
#[must_use]
pub fn visible_data_centers<T: TierAxis, D: DataCenterAxis>(tier: T) -> Vec<D> {
    D::values()
        .iter()
        .copied()
        .filter(|d| !d.is_any() && d.visible_on(tier))
        .collect()
}

/// The `(sub-app, tier, data-center)` point a settings instance is resolved at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationContext<T: TierAxis, D: DataCenterAxis> {
    /// Secondary identity within the app, or `None` for the root app.
    pub sub_app_id: Option<i32>,
    /// Current deployment tier.
    pub tier: T,
    /// Current data center.
    pub data_center: D,
}

impl<T: TierAxis, D: DataCenterAxis> EvaluationContext<T, D> {
    /// Create a context for the root app.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WildcardContext`] if either axis is the `Any`
    /// wildcard: a wildcard current context would make every scoped value
    /// ambiguous.
    pub fn new(tier: T, data_center: D) -> Result<Self> {
        if tier.is_any() {
            return Err(Error::WildcardContext { axis: "tier" });
        }
        if data_center.is_any() {
            return Err(Error::WildcardContext { axis: "data center" });
        }
        Ok(Self {
            sub_app_id: None,
            tier,
            data_center,
        })
    }

    /// Narrow the context to a sub-app.
    #[must_use]
    pub fn with_sub_app(mut self, sub_app_id: i32) -> Self {
        self.sub_app_id = Some(sub_app_id);
        self
    }
}

/// Define a tier or data-center enumeration.
///
/// The first variant must be `Any`; it becomes the wildcard sentinel at
/// ordinal 0. Flavors:
///
/// - `tier enum` additionally implements [`TierAxis`];
/// - `data_center enum` additionally implements [`DataCenterAxis`] with
///   every value visible on every tier;
/// - `axis enum` implements only [`SettingsAxis`], for types that need a
///   hand-written marker impl (e.g. custom `visible_on`).
///
/// # Example
///
/// ```rust
/// nfig::axis_enum! {
///     pub tier enum Tier { Any, Local, Dev, Prod }
/// }
/// nfig::axis_enum! {
///     pub data_center enum DataCenter { Any, East, West }
/// }
/// ```
#[macro_export]
macro_rules! axis_enum {
    ($(#[$meta:meta])* $vis:vis tier enum $name:ident { Any $(, $variant:ident)* $(,)? }) => {
        $crate::axis_enum!(@base $(#[$meta])* $vis enum $name { Any $(, $variant)* });
        impl $crate::axes::TierAxis for $name {}
    };
    ($(#[$meta:meta])* $vis:vis data_center enum $name:ident { Any $(, $variant:ident)* $(,)? }) => {
        $crate::axis_enum!(@base $(#[$meta])* $vis enum $name { Any $(, $variant)* });
        impl $crate::axes::DataCenterAxis for $name {}
    };
    ($(#[$meta:meta])* $vis:vis axis enum $name:ident { Any $(, $variant:ident)* $(,)? }) => {
        $crate::axis_enum!(@base $(#[$meta])* $vis enum $name { Any $(, $variant)* });
    };
    (@base $(#[$meta:meta])* $vis:vis enum $name:ident { Any $(, $variant:ident)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        $vis enum $name {
            Any $(, $variant)*
        }

        impl $crate::axes::SettingsAxis for $name {
            const ANY: Self = $name::Any;

            fn values() -> &'static [Self] {
                &[$name::Any $(, $name::$variant)*]
            }

            fn ordinal(self) -> u32 {
                self as u32
            }

            fn from_ordinal(ordinal: u32) -> Option<Self> {
                Self::values().iter().copied().find(|v| v.ordinal() == ordinal)
            }

            fn name(self) -> &'static str {
                match self {
                    $name::Any => "Any",
                    $($name::$variant => stringify!($variant),)*
                }
            }

            fn from_name(name: &str) -> Option<Self> {
                Self::values()
                    .iter()
                    .copied()
                    .find(|v| $crate::axes::SettingsAxis::name(*v) == name)
            }
        }

        impl $crate::__serde::Serialize for $name {
            fn serialize<S: $crate::__serde::Serializer>(
                &self,
                serializer: S,
            ) -> ::std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str($crate::axes::SettingsAxis::name(*self))
            }
        }

        impl<'de> $crate::__serde::Deserialize<'de> for $name {
            fn deserialize<D: $crate::__serde::Deserializer<'de>>(
                deserializer: D,
            ) -> ::std::result::Result<Self, D::Error> {
                let raw = <::std::string::String as $crate::__serde::Deserialize>::deserialize(deserializer)?;
                <$name as $crate::axes::SettingsAxis>::from_name(&raw).ok_or_else(|| {
                    <D::Error as $crate::__serde::de::Error>::custom(::std::format!(
                        "unknown {} value: {raw}",
                        stringify!($name)
                    ))
                })
            }
        }
    };
}

// =============================================================================
// Tests
// =============================================================================
