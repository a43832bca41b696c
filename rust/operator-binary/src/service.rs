//! Lets the OpenShift service CA issue the repo-server and redis TLS secrets by
//! annotating their Services.

use snafu::{ResultExt, Snafu};
use stackable_operator::{k8s_openapi::api::core::v1::Service, kube::ResourceExt};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    config::Capabilities,
    context::ReconcileContext,
    crd::tls::{
        OPENSHIFT_SERVING_CERT_ANNOTATION, REDIS_TLS_SECRET_NAME, REPO_SERVER_TLS_SECRET_NAME,
    },
    rollout::RolloutTrigger,
    store::{self, ObjectStore},
};

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to retrieve service {service_name:?}"))]
    RetrieveService {
        source: store::Error,
        service_name: String,
    },

    #[snafu(display("failed to update service {service_name:?}"))]
    UpdateService {
        source: store::Error,
        service_name: String,
    },
}

/// Sets or removes the serving-cert annotation. Returns whether `service` changed.
/// Without the route API nothing is touched.
pub fn ensure_auto_tls_annotation(
    service: &mut Service,
    secret_name: &str,
    enabled: bool,
    capabilities: &Capabilities,
) -> bool {
    if !capabilities.route_api_available {
        return false;
    }

    if enabled {
        if service
            .annotations()
            .get(OPENSHIFT_SERVING_CERT_ANNOTATION)
            .map(String::as_str)
            == Some(secret_name)
        {
            return false;
        }
        tracing::info!(
            service_name = service.name_any(),
            secret_name,
            "Requesting serving certificate from the OpenShift service CA"
        );
        service
            .annotations_mut()
            .insert(OPENSHIFT_SERVING_CERT_ANNOTATION.to_owned(), secret_name.to_owned());
        true
    } else {
        let removed = service
            .metadata
            .annotations
            .as_mut()
            .and_then(|annotations| annotations.remove(OPENSHIFT_SERVING_CERT_ANNOTATION))
            .is_some();
        if removed {
            tracing::info!(
                service_name = service.name_any(),
                "Removing OpenShift serving certificate request"
            );
        }
        removed
    }
}

pub async fn reconcile_auto_tls_annotations<S: ObjectStore, R: RolloutTrigger>(
    ctx: &ReconcileContext<'_, S, R>,
) -> Result<(), Error> {
    let spec = &ctx.argocd.spec;
    let services = [
        (
            ctx.argocd.name_with_suffix("repo-server"),
            REPO_SERVER_TLS_SECRET_NAME,
            spec.repo.openshift_auto_tls(),
        ),
        (
            ctx.argocd.name_with_suffix("redis"),
            REDIS_TLS_SECRET_NAME,
            spec.redis.openshift_auto_tls(),
        ),
    ];

    for (service_name, secret_name, enabled) in services {
        let Some(mut service) = ctx
            .store
            .get::<Service>(ctx.namespace, &service_name)
            .await
            .context(RetrieveServiceSnafu {
                service_name: &service_name,
            })?
        else {
            continue;
        };
        let capabilities = &ctx.config.capabilities;
        if ensure_auto_tls_annotation(&mut service, secret_name, enabled, capabilities) {
            ctx.store
                .update(&service)
                .await
                .context(UpdateServiceSnafu { service_name })?;
        }
    }
    Ok(())
}
