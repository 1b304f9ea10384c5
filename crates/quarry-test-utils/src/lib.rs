//! Fixture entities shared by integration tests across the workspace, so
//! each crate's test suite isn't left re-declaring the same sample schema.

use std::sync::Arc;

use quarry_core::common::{PkKind, PkValue, Record};
use quarry_core::metadata::relation::{Cascade, RelationKind, RelationMeta};
use quarry_core::metadata::{Entity, EntityMeta, EntityMetaBuilder};
use quarry_memory::MemoryAdapter;
use quarry_repo::Repository;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub active: bool,
}

impl Entity for Account {
    fn table() -> &'static str {
        "accounts"
    }

    fn register() -> EntityMeta {
        EntityMetaBuilder::new(Self::table(), "id", PkKind::Uuid)
            .column("id", "id")
            .column("name", "name")
            .column("active", "active")
            .relation(RelationMeta {
                field: "orders".to_string(),
                kind: RelationKind::OneToMany,
                target_table: Order::table().to_string(),
                on_update: Cascade::None,
                on_delete: Cascade::Cascade,
                populate: false,
                owning: true,
            })
            .with_timestamps_and_version()
            .build()
    }

    fn prepare(&self) -> Record {
        let mut r = Record::new();
        r.insert("id".to_string(), json!(self.id));
        r.insert("name".to_string(), json!(self.name));
        r.insert("active".to_string(), json!(self.active));
        r
    }

    fn revert(record: Record) -> anyhow::Result<Self> {
        Ok(Self {
            id: record["id"].as_str().and_then(|s| Uuid::parse_str(s).ok()).unwrap_or_default(),
            name: record["name"].as_str().unwrap_or_default().to_string(),
            active: record["active"].as_bool().unwrap_or(false),
        })
    }

    fn primary_key(&self) -> PkValue {
        PkValue::Uuid(self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub accounts_id: Uuid,
    pub total_cents: i64,
}

impl Entity for Order {
    fn table() -> &'static str {
        "orders"
    }

    fn register() -> EntityMeta {
        EntityMetaBuilder::new(Self::table(), "id", PkKind::Uuid)
            .column("id", "id")
            .column("accounts_id", "accounts_id")
            .column("total_cents", "total_cents")
            .build()
    }

    fn prepare(&self) -> Record {
        let mut r = Record::new();
        r.insert("id".to_string(), json!(self.id));
        r.insert("accounts_id".to_string(), json!(self.accounts_id));
        r.insert("total_cents".to_string(), json!(self.total_cents));
        r
    }

    fn revert(record: Record) -> anyhow::Result<Self> {
        Ok(Self {
            id: record["id"].as_str().and_then(|s| Uuid::parse_str(s).ok()).unwrap_or_default(),
            accounts_id: record["accounts_id"]
                .as_str()
                .and_then(|s| Uuid::parse_str(s).ok())
                .unwrap_or_default(),
            total_cents: record["total_cents"].as_i64().unwrap_or_default(),
        })
    }

    fn primary_key(&self) -> PkValue {
        PkValue::Uuid(self.id)
    }
}

/// A ready-to-use in-memory repository pair for the fixture entities above.
pub fn memory_repos() -> (Repository<Account>, Repository<Order>) {
    let adapter: Arc<dyn quarry_core::adapter::Adapter> = Arc::new(MemoryAdapter::new());
    (Repository::new(adapter.clone()), Repository::new(adapter))
}

pub fn sample_account(name: &str) -> Account {
    Account {
        id: Uuid::new_v4(),
        name: name.to_string(),
        active: true,
    }
}

pub fn sample_order(account_id: Uuid, total_cents: i64) -> Order {
    Order {
        id: Uuid::new_v4(),
        accounts_id: account_id,
        total_cents,
    }
}
