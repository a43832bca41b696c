//! Settings handed to the reconciler when it is constructed.

/// bcrypt cost of the admin password hash, matching what Argo CD itself uses.
pub const DEFAULT_PASSWORD_HASH_COST: u32 = 10;

/// Optional platform features the operator may use.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// The OpenShift route API (and with it the service CA) is available.
    pub route_api_available: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Namespaces allowed to host a "cluster-config" scoped Argo CD instance.
    /// A single `*` entry allows every namespace.
    pub cluster_config_namespaces: Vec<String>,
    pub capabilities: Capabilities,
    /// bcrypt cost used when hashing the admin password.
    pub password_hash_cost: u32,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            cluster_config_namespaces: Vec::new(),
            capabilities: Capabilities::default(),
            password_hash_cost: DEFAULT_PASSWORD_HASH_COST,
        }
    }
}

impl OperatorConfig {
    pub fn is_cluster_config_namespace(&self, namespace: &str) -> bool {
        self.cluster_config_namespaces
            .iter()
            .map(|allowed| allowed.trim())
            .any(|allowed| allowed == "*" || allowed == namespace)
    }
}

/// Splits a comma separated namespace allow-list, dropping empty entries.
pub fn parse_namespace_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|namespace| !namespace.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}
