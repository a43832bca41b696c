use crate::{config::OperatorConfig, crd::ArgoCd};

/// Everything a single reconciliation pass of one Argo CD instance works with.
pub struct ReconcileContext<'a, S, R> {
    pub argocd: &'a ArgoCd,
    pub namespace: &'a str,
    pub store: &'a S,
    pub rollout: &'a R,
    pub config: &'a OperatorConfig,
}
