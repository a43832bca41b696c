use serde::{Deserialize, Serialize};
use stackable_operator::schemars::{self, JsonSchema};

/// TLS secret mounted by the repo-server. Managed outside of this operator
/// (by an administrator, cert-manager or the OpenShift service CA).
pub const REPO_SERVER_TLS_SECRET_NAME: &str = "argocd-repo-server-tls";
/// TLS secret mounted by redis. Managed outside of this operator.
pub const REDIS_TLS_SECRET_NAME: &str = "argocd-operator-redis-tls";

/// Annotation which makes the OpenShift service CA issue a serving certificate
/// into the named secret.
pub const OPENSHIFT_SERVING_CERT_ANNOTATION: &str =
    "service.beta.openshift.io/serving-cert-secret-name";

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCdTls {
    /// Provider that issues the TLS secret of this component automatically.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autotls: Option<AutoTlsProvider>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoTlsProvider {
    Openshift,
}

impl ArgoCdTls {
    pub fn openshift_auto_tls(&self) -> bool {
        self.autotls == Some(AutoTlsProvider::Openshift)
    }
}
