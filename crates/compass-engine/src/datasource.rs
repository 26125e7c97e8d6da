//! Data source management
//!
//! Connection configurations are sealed on create and only opened by
//! [`DataSourceService::find_decrypted`]. Deletion is soft: the record stays
//! in storage but disappears from every read.

use chrono::Utc;
use compass_core::{
    CompassError, DataSource, DecryptedDataSource, Health, NewDataSource, Result,
};
use compass_storage::{CredentialCipher, Store};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

const ENTITY: &str = "Data source";

#[derive(Clone)]
pub struct DataSourceService {
    store: Arc<dyn Store>,
    cipher: CredentialCipher,
}

impl DataSourceService {
    pub fn new(store: Arc<dyn Store>, cipher: CredentialCipher) -> Self {
        Self { store, cipher }
    }

    /// Validate, seal and store a new data source with UNKNOWN health
    #[instrument(skip(self, input), fields(name = %input.name, plugin = %input.plugin_src))]
    pub async fn create(&self, input: NewDataSource) -> Result<DataSource> {
        input.validate().into_result()?;

        let source = DataSource {
            id: Uuid::new_v4(),
            sealed_data: self.cipher.seal(&input.data)?,
            name: input.name,
            workspace_id: input.workspace_id,
            plugin_src: input.plugin_src,
            health: Health::Unknown,
            created_at: Utc::now(),
            deleted_at: None,
        };

        self.store.insert_data_source(&source).await?;
        info!("Created data source {}", source.id);
        Ok(source)
    }

    pub async fn list_by_workspace(&self, workspace_id: Uuid) -> Result<Vec<DataSource>> {
        self.store.list_data_sources(workspace_id, None).await
    }

    pub async fn list_by_workspace_and_health(
        &self,
        workspace_id: Uuid,
        health: Health,
    ) -> Result<Vec<DataSource>> {
        self.store.list_data_sources(workspace_id, Some(health)).await
    }

    /// Data source with its configuration still sealed
    pub async fn find_by_id(&self, id: Uuid) -> Result<DataSource> {
        self.store
            .find_data_source(id)
            .await?
            .ok_or_else(|| CompassError::not_found(ENTITY, id))
    }

    pub async fn find_decrypted(&self, id: Uuid) -> Result<DecryptedDataSource> {
        let source = self.find_by_id(id).await?;
        self.decrypt(source)
    }

    /// Open the sealed configuration of an already loaded data source
    pub fn decrypt(&self, source: DataSource) -> Result<DecryptedDataSource> {
        let config = self.cipher.open(&source.sealed_data)?;
        Ok(DecryptedDataSource { source, config })
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        if !self.store.soft_delete_data_source(id, Utc::now()).await? {
            return Err(CompassError::not_found(ENTITY, id));
        }
        info!("Deleted data source {}", id);
        Ok(())
    }

    /// Record the outcome of an external health check
    pub async fn set_health(&self, id: Uuid, health: Health) -> Result<()> {
        if !self.store.set_data_source_health(id, health).await? {
            return Err(CompassError::not_found(ENTITY, id));
        }
        Ok(())
    }
}
