//! Kubernetes job client.
//!
//! Each triggered job becomes one `TriggeredJob` custom resource; the
//! controller that runs it lives elsewhere.

use async_trait::async_trait;
use jobgate_core::backend::JobClient;
use jobgate_core::record::JobRecord;
use jobgate_core::{Error, Result};
use kube::Client;
use kube::api::{Api, PostParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use tracing::{debug, info};

pub const GROUP: &str = "jobgate.dev";
pub const VERSION: &str = "v1";
pub const KIND: &str = "TriggeredJob";

/// Creates `TriggeredJob` resources.
pub struct KubernetesJobClient {
    client: Client,
    /// Namespace for records whose spec does not name one.
    namespace: String,
    resource: ApiResource,
}

impl KubernetesJobClient {
    pub async fn new(namespace: impl Into<String>) -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self::with_client(client, namespace))
    }

    pub fn with_client(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            resource: api_resource(),
        }
    }
}

pub fn api_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(GROUP, VERSION, KIND))
}

/// Render a record as a namespaced custom resource named after its id.
pub fn to_resource(
    record: &JobRecord,
    resource: &ApiResource,
    namespace: &str,
) -> Result<DynamicObject> {
    let mut object = DynamicObject::new(&record.id.to_string(), resource).within(namespace);
    object.metadata.labels = Some(record.labels.clone());
    object.metadata.annotations = Some(record.annotations.clone());
    object.data = serde_json::json!({
        "spec": serde_json::to_value(&record.spec).map_err(|e| Error::Internal(e.to_string()))?,
        "status": serde_json::to_value(&record.status).map_err(|e| Error::Internal(e.to_string()))?,
    });
    Ok(object)
}

fn from_kube_error(err: kube::Error) -> Error {
    match err {
        kube::Error::Api(response) if response.code == 409 => Error::Conflict(response.message),
        kube::Error::Api(response) if response.code == 403 => Error::Forbidden(response.message),
        other => Error::Backend(other.to_string()),
    }
}

#[async_trait]
impl JobClient for KubernetesJobClient {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    async fn create(&self, record: &JobRecord) -> Result<JobRecord> {
        let namespace = record
            .spec
            .namespace
            .as_deref()
            .unwrap_or(&self.namespace);
        let object = to_resource(record, &self.resource, namespace)?;
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &self.resource);

        debug!(job = %record.spec.job, namespace, "Creating job resource");
        api.create(&PostParams::default(), &object)
            .await
            .map_err(from_kube_error)?;
        info!(
            job = %record.spec.job,
            id = %record.id,
            namespace,
            cluster = %record.spec.cluster,
            "Job resource created"
        );
        Ok(record.clone())
    }
}
