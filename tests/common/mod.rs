//! Shared fixtures for integration tests

#![allow(dead_code)]

use nfig::{MemoryStore, Schema, SchemaBinder, SettingsStore};
use std::sync::Arc;

nfig::axis_enum! {
    pub tier enum Tier { Any, Local, Dev, Prod }
}

nfig::axis_enum! {
    pub data_center enum DataCenter { Any, East, NewYork, Oregon }
}

#[derive(Debug, Default)]
pub struct NestedSettings {
    pub integer: i32,
}

#[derive(Debug, Default)]
pub struct ConnectionStrings {
    pub ad_server: String,
}

#[derive(Debug, Default)]
pub struct TestSettings {
    pub top_integer: i32,
    pub a: i32,
    pub b: i32,
    pub c: i32,
    pub nested: NestedSettings,
    pub connection_strings: ConnectionStrings,
}

pub fn test_schema() -> Arc<Schema<TestSettings, Tier, DataCenter>> {
    let schema = SchemaBinder::new()
        .bind(|root| {
            root.setting("TopInteger", |s: &mut TestSettings, v: i32| s.top_integer = v)
                .description("An integer at the root of the settings class")
                .default(23);
            root.setting("A", |s: &mut TestSettings, v: i32| s.a = v).default(0);
            root.setting("B", |s: &mut TestSettings, v: i32| s.b = v).default(1);
            root.setting("C", |s: &mut TestSettings, v: i32| s.c = v).default(2);

            root.group(
                "Nested",
                |s: &mut TestSettings| &mut s.nested,
                |g| {
                    g.setting("Integer", |n: &mut NestedSettings, v: i32| n.integer = v)
                        .default(17)
                        .tier_default(Tier::Prod, 7);
                },
            );

            root.group(
                "ConnectionStrings",
                |s: &mut TestSettings| &mut s.connection_strings,
                |g| {
                    g.setting("AdServer", |c: &mut ConnectionStrings, v: String| {
                        c.ad_server = v;
                    })
                    .default(String::new())
                    .tier_default(Tier::Local, "LOCAL!!!".to_string())
                    .tier_default(Tier::Dev, "DEV!!!".to_string())
                    .tier_default(Tier::Prod, "PROD!!!".to_string())
                    .with_default(
                        nfig::DefaultSpec::new("PROD-OREGON!!!".to_string())
                            .tier(Tier::Prod)
                            .data_center(DataCenter::Oregon),
                    );
                },
            );
        })
        .finish()
        .unwrap();
    Arc::new(schema)
}

pub fn memory_store(
    tier: Tier,
    data_center: DataCenter,
) -> Arc<MemoryStore<TestSettings, Tier, DataCenter>> {
    SettingsStore::in_memory(test_schema(), tier, data_center).unwrap()
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
