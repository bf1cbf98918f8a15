//! In-memory listing and account catalog.
//!
//! Stands in for the listing and auth subsystems: the server loads it once
//! from a JSON file, tests populate it directly.

use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;

use crate::engine::EngineError;
use crate::model::{Requester, Resource};
use crate::store::{RequesterStore, ResourceStore};

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    resources: DashMap<String, Resource>,
    requesters: DashMap<String, Requester>,
}

/// On-disk catalog layout: `{"resources": [...], "requesters": [...]}`.
#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    resources: Vec<Resource>,
    #[serde(default)]
    requesters: Vec<Requester>,
}

#[derive(Debug)]
pub enum CatalogError {
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::Io(e) => write!(f, "cannot read catalog: {e}"),
            CatalogError::Parse(e) => write!(f, "invalid catalog JSON: {e}"),
        }
    }
}

impl std::error::Error for CatalogError {}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(json).map_err(CatalogError::Parse)?;
        let catalog = Self::new();
        for r in file.resources {
            catalog.upsert_resource(r);
        }
        for r in file.requesters {
            catalog.upsert_requester(r);
        }
        Ok(catalog)
    }

    pub fn load_json(path: &Path) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path).map_err(CatalogError::Io)?;
        Self::from_json(&json)
    }

    pub fn upsert_resource(&self, resource: Resource) {
        self.resources.insert(resource.id.clone(), resource);
    }

    pub fn upsert_requester(&self, requester: Requester) {
        self.requesters.insert(requester.id.clone(), requester);
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn requester_count(&self) -> usize {
        self.requesters.len()
    }
}

#[async_trait]
impl ResourceStore for InMemoryCatalog {
    async fn get(&self, resource_id: &str) -> Result<Option<Resource>, EngineError> {
        Ok(self.resources.get(resource_id).map(|r| r.value().clone()))
    }

    async fn is_approved(&self, resource_id: &str) -> Result<bool, EngineError> {
        Ok(self
            .resources
            .get(resource_id)
            .is_some_and(|r| r.approval.is_bookable()))
    }
}

#[async_trait]
impl RequesterStore for InMemoryCatalog {
    async fn get(&self, requester_id: &str) -> Result<Option<Requester>, EngineError> {
        Ok(self.requesters.get(requester_id).map(|r| r.value().clone()))
    }

    async fn is_blocked(&self, requester_id: &str) -> Result<bool, EngineError> {
        Ok(self.requesters.get(requester_id).is_some_and(|r| r.blocked))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ApprovalStatus, ResourceKind};

    const SAMPLE: &str = r#"{
        "resources": [
            {"id": "H1", "kind": "hotel", "name": "Deluxe", "total_quantity": 2,
             "rate": 5000.0, "max_guests_per_unit": 3, "approval": "approved"},
            {"id": "G1", "kind": "guide", "name": "Pemba", "contact": "+977 1 555",
             "rate": 2500.0, "approval": "pending"}
        ],
        "requesters": [
            {"id": "alice@example.com"},
            {"id": "mallory@example.com", "blocked": true}
        ]
    }"#;

    #[tokio::test]
    async fn loads_resources_and_requesters() {
        let catalog = InMemoryCatalog::from_json(SAMPLE).unwrap();
        assert_eq!(catalog.resource_count(), 2);
        assert_eq!(catalog.requester_count(), 2);

        let h1 = ResourceStore::get(&catalog, "H1").await.unwrap().unwrap();
        assert_eq!(h1.kind, ResourceKind::Hotel);
        assert_eq!(h1.capacity(), 2);
        assert_eq!(h1.max_guests_per_unit, Some(3));

        let g1 = ResourceStore::get(&catalog, "G1").await.unwrap().unwrap();
        assert_eq!(g1.total_quantity, 1);
        assert_eq!(g1.approval, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn approval_and_blocking() {
        let catalog = InMemoryCatalog::from_json(SAMPLE).unwrap();
        assert!(catalog.is_approved("H1").await.unwrap());
        assert!(!catalog.is_approved("G1").await.unwrap());
        assert!(!catalog.is_approved("missing").await.unwrap());

        assert!(!catalog.is_blocked("alice@example.com").await.unwrap());
        assert!(catalog.is_blocked("mallory@example.com").await.unwrap());
    }

    #[test]
    fn rejects_malformed_json() {
        let err = InMemoryCatalog::from_json("{\"resources\": [{\"id\": 1}]}").unwrap_err();
        assert!(matches!(err, CatalogError::Parse(_)));
    }

    #[tokio::test]
    async fn upsert_replaces() {
        let catalog = InMemoryCatalog::new();
        catalog.upsert_resource(Resource::room_category("H1", "Deluxe", 2, 5000.0));
        catalog.upsert_resource(Resource::room_category("H1", "Deluxe", 5, 5000.0));
        let r = ResourceStore::get(&catalog, "H1").await.unwrap().unwrap();
        assert_eq!(r.total_quantity, 5);
    }
}
