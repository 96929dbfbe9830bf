/// Kubernetes-backed `SecretStore`: reads/writes `core/v1` `Secret`
/// objects, server-side-applied so repeated reconciles are idempotent.
use super::{CertificateSecret, SecretStore, CERTIFICATE_REQUEST_LABEL};
use crate::error::{AcmeError, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use std::collections::BTreeMap;

const FIELD_MANAGER: &str = "certman-operator";

#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<CertificateSecret>> {
        match self.api(namespace).get(name).await {
            Ok(secret) => {
                let strings: BTreeMap<String, String> = secret
                    .data
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(k, ByteString(bytes))| (k, String::from_utf8_lossy(&bytes).into_owned()))
                    .collect();
                Ok(Some(CertificateSecret::from_string_map(&strings)))
            }
            Err(kube::Error::Api(err)) if err.code == 404 => Ok(None),
            Err(e) => Err(AcmeError::Kube(e)),
        }
    }

    async fn put(
        &self,
        namespace: &str,
        name: &str,
        owner_certificate_request: &str,
        secret: &CertificateSecret,
    ) -> Result<()> {
        let data: BTreeMap<String, ByteString> = secret
            .to_string_map()
            .into_iter()
            .map(|(k, v)| (k, ByteString(v.into_bytes())))
            .collect();

        let body = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {
                "name": name,
                "namespace": namespace,
                "labels": {
                    CERTIFICATE_REQUEST_LABEL: owner_certificate_request,
                },
            },
            "type": "kubernetes.io/tls",
            "data": data,
        });

        self.api(namespace)
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(body),
            )
            .await
            .map_err(AcmeError::Kube)?;

        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        match self.api(namespace).delete(name, &Default::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(err)) if err.code == 404 => Ok(()),
            Err(e) => Err(AcmeError::Kube(e)),
        }
    }
}
