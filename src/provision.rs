//! One-time creation of the remote ingestion resources
//!
//! Every step is idempotent: a `409 Conflict` means the resource already
//! exists and counts as success. The engine treats any failure here as
//! non-fatal.

use crate::config::Config;
use crate::errors::{ProvisioningError, TransportError};
use crate::point::{record_to_point, FIELD_NAMES};
use crate::record::{LogLevel, LogRecord};
use crate::transport::{build_client, check_response, Credentials};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

/// Names of the resources a workflow needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowSpec {
    pub workflow_name: String,
    pub region: String,
    pub pipeline_repo: String,
    pub logdb_repo: String,
    pub logdb_retention: String,
}

impl From<&Config> for WorkflowSpec {
    fn from(config: &Config) -> Self {
        Self {
            workflow_name: config.workflow_name.clone(),
            region: config.workflow_region.clone(),
            pipeline_repo: config.pipeline_repo.clone(),
            logdb_repo: config.logdb_repo.clone(),
            logdb_retention: config.logdb_retention.clone(),
        }
    }
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn ensure(&self, spec: &WorkflowSpec) -> Result<(), ProvisioningError>;
}

/// Provisioner for deployments whose resources are managed elsewhere
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProvisioner;

#[async_trait]
impl Provisioner for NoopProvisioner {
    async fn ensure(&self, _spec: &WorkflowSpec) -> Result<(), ProvisioningError> {
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct SchemaEntry {
    key: &'static str,
    valtype: &'static str,
}

/// Schema matching the nine point fields
fn point_schema() -> Vec<SchemaEntry> {
    let sample = record_to_point(&LogRecord::new(LogLevel::Info, "", ""));
    FIELD_NAMES
        .iter()
        .zip(sample.fields())
        .map(|(key, (_, value))| SchemaEntry {
            key: *key,
            valtype: value.schema_type(),
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct HttpProvisioner {
    client: Client,
    pipeline_host: String,
    logdb_host: String,
    credentials: Credentials,
}

impl HttpProvisioner {
    pub fn new(
        pipeline_host: &str,
        logdb_host: &str,
        credentials: Credentials,
        client: Client,
    ) -> Self {
        Self {
            client,
            pipeline_host: pipeline_host.trim_end_matches('/').to_string(),
            logdb_host: logdb_host.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        Ok(Self::new(
            &config.pipeline_host,
            &config.logdb_host,
            Credentials::new(&config.access_key, &config.secret_key),
            build_client(config.http_timeout())?,
        ))
    }

    /// POST `body` to `url`, accepting `409 Conflict` as already done
    async fn create(
        &self,
        step: &'static str,
        url: String,
        body: serde_json::Value,
    ) -> Result<(), ProvisioningError> {
        let fail = |source: TransportError| ProvisioningError { step, source };

        let response = self
            .credentials
            .apply(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| fail(TransportError::Http(e)))?;

        if response.status() == StatusCode::CONFLICT {
            debug!("{}: {} already exists", step, url);
            return Ok(());
        }

        check_response(response).await.map_err(fail)?;
        debug!("{}: created {}", step, url);
        Ok(())
    }
}

#[async_trait]
impl Provisioner for HttpProvisioner {
    async fn ensure(&self, spec: &WorkflowSpec) -> Result<(), ProvisioningError> {
        let schema = point_schema();

        self.create(
            "create_workflow",
            format!("{}/v2/workflows/{}", self.pipeline_host, spec.workflow_name),
            json!({ "region": spec.region }),
        )
        .await?;

        self.create(
            "create_pipeline_repo",
            format!("{}/v2/repos/{}", self.pipeline_host, spec.pipeline_repo),
            json!({
                "region": spec.region,
                "workflow": spec.workflow_name,
                "schema": schema,
            }),
        )
        .await?;

        if !spec.logdb_repo.is_empty() {
            self.create(
                "create_logdb_repo",
                format!("{}/v5/repos/{}", self.logdb_host, spec.logdb_repo),
                json!({
                    "region": spec.region,
                    "retention": spec.logdb_retention,
                    "schema": schema,
                }),
            )
            .await?;

            let fields: serde_json::Map<String, serde_json::Value> = FIELD_NAMES
                .iter()
                .map(|name| (name.to_string(), json!(format!("#{}", name))))
                .collect();

            self.create(
                "create_logdb_export",
                format!(
                    "{}/v2/repos/{}/exports/{}_logdb",
                    self.pipeline_host, spec.pipeline_repo, spec.pipeline_repo
                ),
                json!({
                    "type": "logdb",
                    "whence": "oldest",
                    "spec": {
                        "destRepoName": spec.logdb_repo,
                        "doc": fields,
                    },
                }),
            )
            .await?;
        }

        self.create(
            "start_workflow",
            format!("{}/v2/workflows/{}/start", self.pipeline_host, spec.workflow_name),
            json!({}),
        )
        .await?;

        info!(
            "Workflow {} ready in region {} (pipeline repo {})",
            spec.workflow_name, spec.region, spec.pipeline_repo
        );
        Ok(())
    }
}
