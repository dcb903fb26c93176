/// Hot-reload workflow registry using ArcSwap
///
/// Lock-free, atomic updates to the in-memory registry of saved workflows.
/// Each save or delete swaps the entire registry pointer, so readers on the
/// execution path never block and always see a consistent map.

use crate::workflow::{storage::WorkflowStorage, types::Workflow};
use anyhow::Result;
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

/// A registry entry: the definition plus a precomputed summary
///
/// Structural validation happens at run time; the summary exists so listing
/// and logging don't have to walk the node array.
#[derive(Debug, Clone)]
pub struct RegisteredWorkflow {
    pub workflow: Workflow,
    pub node_count: usize,
    pub edge_count: usize,
}

impl RegisteredWorkflow {
    fn new(workflow: Workflow) -> Self {
        let node_count = workflow.nodes.len();
        let edge_count = workflow.edges.len();
        Self {
            workflow,
            node_count,
            edge_count,
        }
    }
}

/// Lock-free registry of saved workflows
#[derive(Debug)]
pub struct WorkflowRegistry {
    /// Atomic pointer to the workflow map, keyed by workflow id
    workflows: ArcSwap<HashMap<String, RegisteredWorkflow>>,
    /// Persistent storage used for reload operations
    storage: WorkflowStorage,
}

impl WorkflowRegistry {
    pub fn new(storage: WorkflowStorage) -> Self {
        Self {
            workflows: ArcSwap::new(Arc::new(HashMap::new())),
            storage,
        }
    }

    /// Populate the registry from storage
    ///
    /// Called during startup before the HTTP surface comes up.
    pub async fn init_from_storage(&self) -> Result<()> {
        let stored = self.storage.load_all_workflows().await?;
        let entries: HashMap<String, RegisteredWorkflow> = stored
            .into_iter()
            .map(|(id, workflow)| (id, RegisteredWorkflow::new(workflow)))
            .collect();

        self.workflows.store(Arc::new(entries));

        tracing::info!(
            "Initialized workflow registry with {} workflows",
            self.workflows.load().len()
        );

        Ok(())
    }

    /// Reload one workflow from storage into the registry
    ///
    /// Clone-and-swap keeps the update atomic without blocking readers.
    pub async fn reload_workflow(&self, workflow_id: &str) -> Result<()> {
        let workflow = self
            .storage
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Workflow not found: {}", workflow_id))?;

        let current = self.workflows.load();
        let mut next = (**current).clone();
        next.insert(workflow_id.to_string(), RegisteredWorkflow::new(workflow));
        self.workflows.store(Arc::new(next));

        tracing::info!("Hot-reloaded workflow: {}", workflow_id);
        Ok(())
    }

    /// Get a workflow by ID (lock-free read)
    pub fn get_workflow(&self, workflow_id: &str) -> Option<RegisteredWorkflow> {
        self.workflows.load().get(workflow_id).cloned()
    }

    /// List all registered workflow IDs
    pub fn list_workflow_ids(&self) -> Vec<String> {
        self.workflows.load().keys().cloned().collect()
    }

    /// Remove a workflow from the registry
    pub fn remove_workflow(&self, workflow_id: &str) {
        let current = self.workflows.load();
        let mut next = (**current).clone();

        if next.remove(workflow_id).is_some() {
            self.workflows.store(Arc::new(next));
            tracing::info!("Removed workflow from registry: {}", workflow_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn storage_with_schema() -> WorkflowStorage {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let storage = WorkflowStorage::new(pool);
        storage.init_schema().await.unwrap();
        storage
    }

    fn sample_workflow(id: &str) -> Workflow {
        Workflow {
            id: id.to_string(),
            name: "Crawl".to_string(),
            description: None,
            nodes: Vec::new(),
            edges: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn reload_makes_saved_workflow_visible() {
        let storage = storage_with_schema().await;
        let registry = WorkflowRegistry::new(storage.clone());
        registry.init_from_storage().await.unwrap();
        assert!(registry.get_workflow("wf_1").is_none());

        storage.save_workflow(&sample_workflow("wf_1")).await.unwrap();
        registry.reload_workflow("wf_1").await.unwrap();

        let entry = registry.get_workflow("wf_1").unwrap();
        assert_eq!(entry.workflow.id, "wf_1");
        assert_eq!(entry.node_count, 0);
    }

    #[tokio::test]
    async fn remove_drops_the_entry() {
        let storage = storage_with_schema().await;
        let registry = WorkflowRegistry::new(storage.clone());
        storage.save_workflow(&sample_workflow("wf_1")).await.unwrap();
        registry.init_from_storage().await.unwrap();

        registry.remove_workflow("wf_1");
        assert!(registry.get_workflow("wf_1").is_none());
        assert!(registry.list_workflow_ids().is_empty());
    }
}
