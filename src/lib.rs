//! # nfig - Typed Layered Configuration
//!
//! nfig resolves a strongly-typed settings struct from layered values:
//! compile-time defaults declared on the struct, plus persisted runtime
//! overrides, scoped along three orthogonal axes — *sub-app*, *deployment
//! tier*, and *data center*.
//!
//! ## Features
//!
//! - **Schema binding**: a registration DSL (or `#[derive(SettingsGroup)]`)
//!   walks your settings struct once and produces typed setters, converter
//!   resolution, and the collected default declarations
//! - **Deterministic resolution**: per setting, the most specific applicable
//!   value wins — override beats default, then sub-app, tier, data center
//! - **Pluggable store**: atomic compare-and-set mutations, change
//!   notifications, snapshot capture/restore; in-memory and Redis-flavored
//!   hash reference backends included
//! - **Subscriptions**: one cached materialized instance per subscriber,
//!   refreshed in commit order on every committed mutation
//! - **Encrypted settings**: ciphertext at rest and in snapshots, plaintext
//!   only inside materialized instances (AES-256-GCM reference encryptor
//!   behind the `encryption` feature)
//! - **Audit log**: every mutation yields an immutable event; the reference
//!   logger answers filtered range queries and by-commit snapshot lookups
//!
//! ## Quick Start
//!
//! ```rust
//! use nfig::{Schema, SchemaBinder, SettingsStore, SetOverrideOptions};
//! use std::sync::Arc;
//!
//! nfig::axis_enum! {
//!     pub tier enum Tier { Any, Local, Prod }
//! }
//! nfig::axis_enum! {
//!     pub data_center enum DataCenter { Any, East, West }
//! }
//!
//! #[derive(Default)]
//! struct AppSettings {
//!     connection_limit: i32,
//! }
//!
//! # fn main() -> nfig::Result<()> {
//! let schema: Arc<Schema<AppSettings, Tier, DataCenter>> = Arc::new(
//!     SchemaBinder::new()
//!         .bind(|root| {
//!             root.setting("ConnectionLimit", |s: &mut AppSettings, v: i32| {
//!                 s.connection_limit = v;
//!             })
//!             .description("Maximum concurrent connections")
//!             .default(10)
//!             .tier_default(Tier::Prod, 200);
//!         })
//!         .finish()?,
//! );
//!
//! let store = SettingsStore::in_memory(schema, Tier::Prod, DataCenter::East)?;
//! assert_eq!(store.get_settings("my-app")?.settings.connection_limit, 200);
//!
//! store.set_override(
//!     "my-app",
//!     "ConnectionLimit",
//!     "500",
//!     DataCenter::Any,
//!     "alice",
//!     SetOverrideOptions::new(),
//! )?;
//! assert_eq!(store.get_settings("my-app")?.settings.connection_limit, 500);
//! # Ok(())
//! # }
//! ```
//!
//! ## Subscribing
//!
//! ```rust,no_run
//! # use nfig::*; use std::sync::Arc;
//! # nfig::axis_enum! { pub tier enum Tier { Any, Prod } }
//! # nfig::axis_enum! { pub data_center enum Dc { Any, East } }
//! # #[derive(Default)] struct AppSettings { limit: i32 }
//! # fn main() -> nfig::Result<()> {
//! # let schema: Arc<Schema<AppSettings, Tier, Dc>> = Arc::new(
//! #     SchemaBinder::new()
//! #         .bind(|root| { root.setting("Limit", |s: &mut AppSettings, v: i32| s.limit = v).default(1); })
//! #         .finish()?);
//! let store = SettingsStore::in_memory(schema, Tier::Prod, Dc::East)?;
//! let subscription = store.subscribe("my-app", |update| match update {
//!     Ok(resolved) => println!("limit is now {}", resolved.settings.limit),
//!     Err(e) => eprintln!("refresh failed: {e}"),
//! });
//! // ... later:
//! subscription.cancel();
//! # Ok(())
//! # }
//! ```

// Core modules
mod by_setting;
mod error;
mod resolve;
mod snapshot;

// Grouped modules
pub mod axes;
pub mod convert;
pub mod crypto;
pub mod logging;
pub mod schema;
pub mod store;

// Re-exports from core
pub use by_setting::{BySetting, BySettingItem, ListBySetting};
pub use error::{Error, Result};
pub use resolve::{InvalidOverride, Resolved, resolve};
pub use snapshot::{Commit, Event, EventType, OverrideValue, Snapshot};

// Re-exports from grouped modules
pub use axes::{
    DataCenterAxis, EvaluationContext, SettingsAxis, TierAxis, visible_data_centers,
};
pub use convert::{ConvertibleValue, FromStrConverter, NullableConverter, SettingConverter};
pub use crypto::{SettingsEncryptor, validate_encryptor};
pub use logging::{ErrorSink, EventLogger, LogQuery, MemoryEventLog};
pub use schema::{
    CipherDefault, DefaultSpec, DefaultValue, GroupDefault, Schema, SchemaBinder, Scope, Setting,
    SettingsGroup,
};
pub use store::{
    CancellationToken, ClearOverrideOptions, HashBackend, HashTransport, MemoryBackend,
    MemoryHashTransport, RestoreOptions, SetOverrideOptions, SettingsStore, StoreBackend,
    Subscription,
};

#[cfg(feature = "encryption")]
pub use crypto::AesGcmEncryptor;

// =============================================================================
// Convenient Type Aliases
// =============================================================================

/// Store over the in-memory reference backend.
pub type MemoryStore<S, T, D> = SettingsStore<S, T, D, MemoryBackend<D>>;

/// Store over the Redis-flavored hash layout, generic in the transport.
pub type HashStore<S, T, D, Tr> = SettingsStore<S, T, D, HashBackend<T, D, Tr>>;

// Derive macro re-export (requires `derive` feature)
/// Derive macro generating [`SettingsGroup`] implementations.
///
/// # Example
///
/// ```rust,ignore
/// use nfig::SettingsGroup;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Default, SettingsGroup)]
/// #[nfig(tier = Tier, data_center = DataCenter)]
/// struct AppSettings {
///     #[setting(default = 10, description = "Maximum concurrent connections")]
///     connection_limit: i32,
///
///     #[setting(group)]
///     timeouts: Timeouts,
/// }
/// ```
#[cfg(feature = "derive")]
pub use nfig_derive::SettingsGroup as DeriveSettingsGroup;

// Macro support: axis_enum!-generated code refers to serde through the
// crate so downstream users do not need a direct serde dependency.
#[doc(hidden)]
pub use serde as __serde;
