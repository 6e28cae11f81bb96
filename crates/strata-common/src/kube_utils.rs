//! Shared Kubernetes utilities using kube-rs
//!
//! Client construction, server-side apply of dynamic manifests and the few
//! read-only checks the lifecycle needs (CRDs, nodes, secrets).

use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Namespace, Node, Secret};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::{Error, FIELD_MANAGER};

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Known plural forms for the kinds Strata touches
const KIND_PLURALS: &[(&str, &str)] = &[
    ("cluster", "clusters"),
    ("dockercluster", "dockerclusters"),
    ("dockermachine", "dockermachines"),
    ("dockermachinetemplate", "dockermachinetemplates"),
    ("kubeadmcontrolplane", "kubeadmcontrolplanes"),
    ("kubeadmconfigtemplate", "kubeadmconfigtemplates"),
    ("kubeadmconfig", "kubeadmconfigs"),
    ("machinedeployment", "machinedeployments"),
    ("machineset", "machinesets"),
    ("machine", "machines"),
    ("namespace", "namespaces"),
];

/// Create a kube client from a kubeconfig path, or infer one when absent
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use strata_common::kube_utils::parse_api_version;
///
/// assert_eq!(parse_api_version("cluster.x-k8s.io/v1beta1"), ("cluster.x-k8s.io".to_string(), "v1beta1".to_string()));
/// assert_eq!(parse_api_version("v1"), (String::new(), "v1".to_string()));
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Pluralize a Kubernetes resource kind
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if let Some((_, plural)) = KIND_PLURALS.iter().find(|(singular, _)| *singular == lower) {
        return (*plural).to_string();
    }
    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Build an ApiResource for an apiVersion/kind pair
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Split a multi-document YAML stream into JSON values, skipping empty documents
pub fn split_documents(content: &[u8]) -> Result<Vec<Value>, Error> {
    let text = std::str::from_utf8(content)
        .map_err(|e| Error::serialization(format!("manifest is not valid UTF-8: {}", e)))?;
    let mut docs = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(text) {
        let value = Value::deserialize(doc)
            .map_err(|e| Error::serialization(format!("failed to parse manifest: {}", e)))?;
        if !value.is_null() {
            docs.push(value);
        }
    }
    Ok(docs)
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(|v| v.as_str())
}

/// Apply a single manifest with server-side apply
pub async fn apply_manifest(client: &Client, manifest: &Value) -> Result<(), Error> {
    let api_version = str_at(manifest, "/apiVersion")
        .ok_or_else(|| Error::serialization("manifest missing apiVersion"))?;
    let kind =
        str_at(manifest, "/kind").ok_or_else(|| Error::serialization("manifest missing kind"))?;
    let name = str_at(manifest, "/metadata/name")
        .ok_or_else(|| Error::serialization_for_kind(kind, "manifest missing metadata.name"))?;

    let ar = build_api_resource(api_version, kind);
    let api: Api<DynamicObject> = match str_at(manifest, "/metadata/namespace") {
        Some(ns) => Api::namespaced_with(client.clone(), ns, &ar),
        None => Api::all_with(client.clone(), &ar),
    };

    api.patch(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(manifest))
        .await?;
    debug!(kind = %kind, name = %name, "applied manifest");
    Ok(())
}

/// Create a namespace if it does not exist
pub async fn ensure_namespace(client: &Client, name: &str) -> Result<(), Error> {
    let api: Api<Namespace> = Api::all(client.clone());
    let ns = Namespace {
        metadata: kube::api::ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    match api.create(&PostParams::default(), &ns).await {
        Ok(_) => {
            info!(namespace = %name, "created namespace");
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Check if a CRD exists
pub async fn crd_exists(client: &Client, crd_name: &str) -> Result<bool, Error> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    match crds.get(crd_name).await {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// True when every node reports Ready=True
pub async fn all_nodes_ready(client: &Client) -> Result<bool, Error> {
    let nodes: Api<Node> = Api::all(client.clone());
    let list = nodes.list(&ListParams::default()).await?;
    if list.items.is_empty() {
        return Ok(false);
    }
    Ok(list.items.iter().all(|node| {
        node.status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|conds| {
                conds
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            })
    }))
}

/// Read one key from a secret, `None` if the secret or key is missing
pub async fn get_secret_data(
    client: &Client,
    name: &str,
    namespace: &str,
    key: &str,
) -> Result<Option<Vec<u8>>, Error> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    match secrets.get(name).await {
        Ok(secret) => Ok(secret
            .data
            .and_then(|mut data| data.remove(key))
            .map(|bytes| bytes.0)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}
