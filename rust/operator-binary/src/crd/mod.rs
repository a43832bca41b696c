use serde::{Deserialize, Serialize};
use stackable_operator::{
    kube::{CustomResource, ResourceExt},
    schemars::{self, JsonSchema},
};

use crate::crd::tls::ArgoCdTls;

pub mod tls;

pub const APP_NAME: &str = "argocd";
pub const OPERATOR_NAME: &str = "argocd.stackable.tech";

// labels
pub const LABEL_APP_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_APP_PART_OF: &str = "app.kubernetes.io/part-of";
pub const LABEL_APP_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_SECRET_TYPE: &str = "argocd.argoproj.io/secret-type";
pub const LABEL_MANAGED_BY_NAMESPACE: &str = "argocd.argoproj.io/managed-by";
pub const SECRET_TYPE_CLUSTER: &str = "cluster";

// annotation prefix used to force pod template rollouts
pub const ROLLOUT_ANNOTATION_PREFIX: &str = "argocd.argoproj.io";

/////////////////////////////
//       SECRET KEYS       //
/////////////////////////////
// cluster admin secret and composite credential bundle
pub const KEY_ADMIN_PASSWORD: &str = "admin.password";
pub const KEY_ADMIN_PASSWORD_MTIME: &str = "admin.passwordMtime";
pub const KEY_SERVER_SECRET_KEY: &str = "server.secretkey";
pub const KEY_DEX_CLIENT_SECRET: &str = "oidc.dex.clientSecret";
// dashboard
pub const KEY_GRAFANA_ADMIN_USERNAME: &str = "admin.username";
pub const KEY_GRAFANA_ADMIN_PASSWORD: &str = "admin.password";
pub const KEY_GRAFANA_SECRET_KEY: &str = "secret.key";
pub const DEFAULT_GRAFANA_ADMIN_USERNAME: &str = "admin";
// cluster permissions descriptor
pub const KEY_CLUSTER_CONFIG: &str = "config";
pub const KEY_CLUSTER_NAME: &str = "name";
pub const KEY_CLUSTER_SERVER: &str = "server";
pub const KEY_CLUSTER_NAMESPACES: &str = "namespaces";
pub const IN_CLUSTER_NAME: &str = "in-cluster";
pub const IN_CLUSTER_SERVER: &str = "https://kubernetes.default.svc";
// service account token secrets
pub const KEY_SERVICE_ACCOUNT_TOKEN: &str = "token";

/// Name of the composite credential bundle that Argo CD itself reads.
pub const ARGOCD_SECRET_NAME: &str = "argocd-secret";

#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "argoproj.io",
    version = "v1beta1",
    kind = "ArgoCD",
    struct = "ArgoCd",
    plural = "argocds",
    status = "ArgoCdStatus",
    namespaced,
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCdSpec {
    /// Single sign-on settings. Only the Dex provider contributes a client secret to
    /// the `argocd-secret`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sso: Option<ArgoCdSso>,

    #[serde(default)]
    pub grafana: ArgoCdGrafana,

    #[serde(default)]
    pub prometheus: ArgoCdPrometheus,

    #[serde(default)]
    pub ha: ArgoCdHa,

    #[serde(default)]
    pub repo: ArgoCdTls,

    #[serde(default)]
    pub redis: ArgoCdTls,
}

#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCdSso {
    pub provider: SsoProvider,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SsoProvider {
    #[serde(alias = "Dex", alias = "DEX")]
    Dex,
    #[serde(alias = "Keycloak", alias = "KEYCLOAK")]
    Keycloak,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCdGrafana {
    #[serde(default)]
    pub enabled: bool,
    /// Host name the dashboard is reachable under. Added to the leaf certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCdPrometheus {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCdHa {
    #[serde(default)]
    pub enabled: bool,
}

/// Durable memory of the drift detector. Each field is the fingerprint of the
/// externally managed TLS secret as of the last pass that saw it change.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCdStatus {
    #[serde(
        default,
        rename = "repoTLSChecksum",
        skip_serializing_if = "Option::is_none"
    )]
    pub repo_tls_checksum: Option<String>,

    #[serde(
        default,
        rename = "redisTLSChecksum",
        skip_serializing_if = "Option::is_none"
    )]
    pub redis_tls_checksum: Option<String>,
}

impl ArgoCd {
    pub fn name_with_suffix(&self, suffix: &str) -> String {
        format!("{}-{suffix}", self.name_any())
    }

    pub fn cluster_secret_name(&self) -> String {
        self.name_with_suffix("cluster")
    }

    pub fn ca_secret_name(&self) -> String {
        self.name_with_suffix("ca")
    }

    pub fn tls_secret_name(&self) -> String {
        self.name_with_suffix("tls")
    }

    pub fn grafana_secret_name(&self) -> String {
        self.name_with_suffix("grafana")
    }

    pub fn grafana_config_map_name(&self) -> String {
        self.name_with_suffix("grafana-config")
    }

    pub fn cluster_permissions_secret_name(&self) -> String {
        self.name_with_suffix("default-cluster-config")
    }

    pub fn dex_service_account_name(&self) -> String {
        self.name_with_suffix("argocd-dex-server")
    }

    /// The host the dashboard is served under, defaulting to its Service name.
    pub fn grafana_host(&self) -> String {
        self.spec
            .grafana
            .host
            .clone()
            .unwrap_or_else(|| self.name_with_suffix("grafana"))
    }

    pub fn prometheus_host(&self) -> String {
        self.spec
            .prometheus
            .host
            .clone()
            .unwrap_or_else(|| self.name_with_suffix("prometheus"))
    }

    pub fn sso_uses_dex(&self) -> bool {
        matches!(
            self.spec.sso,
            Some(ArgoCdSso {
                provider: SsoProvider::Dex
            })
        )
    }

    pub fn status(&self) -> ArgoCdStatus {
        self.status.clone().unwrap_or_default()
    }
}
