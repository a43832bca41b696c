// TODO: Look into how to properly resolve `clippy::large_enum_variant`.
// This will need changes in our and upstream error types.
#![allow(clippy::result_large_err)]

use std::sync::Arc;

use argocd_controller::FULL_CONTROLLER_NAME;
use clap::Parser;
use futures::{FutureExt, StreamExt};
use stackable_operator::{
    YamlSchema,
    cli::{Command, RunArguments},
    eos::EndOfSupportChecker,
    k8s_openapi::api::core::v1::Secret,
    kube::{
        CustomResourceExt, ResourceExt,
        core::DeserializeGuard,
        runtime::{
            Controller,
            events::{Recorder, Reporter},
            reflector::ObjectRef,
            watcher,
        },
    },
    logging::controller::report_controller_reconciled,
    shared::yaml::SerializeOptions,
    telemetry::Tracing,
    utils::signal::SignalWatcher,
};

use crate::{
    config::{Capabilities, OperatorConfig},
    crd::{
        ArgoCd, OPERATOR_NAME,
        tls::{REDIS_TLS_SECRET_NAME, REPO_SERVER_TLS_SECRET_NAME},
    },
};

mod argocd_controller;
mod config;
mod context;
mod crd;
mod credentials;
mod drift;
mod rollout;
mod secrets;
mod service;
mod store;
#[cfg(test)]
mod testability_helpers;

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

#[derive(Parser)]
#[clap(about, author)]
struct Opts {
    #[clap(subcommand)]
    cmd: Command<ArgoCdRun>,
}

#[derive(Parser)]
struct ArgoCdRun {
    /// Comma separated namespaces that may host a cluster-config scoped Argo CD
    /// instance. `*` allows every namespace.
    #[clap(long, env = "ARGOCD_CLUSTER_CONFIG_NAMESPACES", default_value = "")]
    cluster_config_namespaces: String,

    /// The OpenShift route API is available, so the service CA can issue serving certificates.
    #[clap(long, env = "ARGOCD_OPENSHIFT_ROUTES")]
    openshift_routes: bool,

    #[clap(flatten)]
    common: RunArguments,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    match opts.cmd {
        Command::Crd => {
            ArgoCd::crd().print_yaml_schema(built_info::PKG_VERSION, SerializeOptions::default())?
        }
        Command::Run(ArgoCdRun {
            cluster_config_namespaces,
            openshift_routes,
            common:
                RunArguments {
                    operator_environment: _,
                    watch_namespace,
                    product_config: _,
                    maintenance,
                    common,
                },
        }) => {
            let _tracing_guard =
                Tracing::pre_configured(built_info::PKG_NAME, common.telemetry).init()?;

            tracing::info!(
                built_info.pkg_version = built_info::PKG_VERSION,
                built_info.git_version = built_info::GIT_VERSION,
                built_info.target = built_info::TARGET,
                built_info.built_time_utc = built_info::BUILT_TIME_UTC,
                built_info.rustc_version = built_info::RUSTC_VERSION,
                "Starting {description}",
                description = built_info::PKG_DESCRIPTION
            );

            // Watches for the SIGTERM signal and sends a signal to all receivers, which gracefully
            // shuts down all concurrent tasks below (EoS checker, controller).
            let sigterm_watcher = SignalWatcher::sigterm()?;

            let eos_checker =
                EndOfSupportChecker::new(built_info::BUILT_TIME_UTC, maintenance.end_of_support)?
                    .run(sigterm_watcher.handle())
                    .map(anyhow::Ok);

            let operator_config = OperatorConfig {
                cluster_config_namespaces: config::parse_namespace_list(
                    &cluster_config_namespaces,
                ),
                capabilities: Capabilities {
                    route_api_available: openshift_routes,
                },
                ..OperatorConfig::default()
            };
            tracing::info!(?operator_config, "Loaded operator configuration");

            let client = stackable_operator::client::initialize_operator(
                Some(OPERATOR_NAME.to_string()),
                &common.cluster_info,
            )
            .await?;

            let event_recorder = Arc::new(Recorder::new(
                client.as_kube_client(),
                Reporter {
                    controller: FULL_CONTROLLER_NAME.to_string(),
                    instance: None,
                },
            ));

            let argocd_controller = Controller::new(
                watch_namespace.get_api::<DeserializeGuard<ArgoCd>>(&client),
                watcher::Config::default(),
            );
            let argocd_store = argocd_controller.store();
            let argocd_controller = argocd_controller
                .owns(
                    watch_namespace.get_api::<Secret>(&client),
                    watcher::Config::default(),
                )
                // The repo-server and redis TLS secrets are not owned by any instance,
                // changes to them still need a pass to detect drift.
                .watches(
                    watch_namespace.get_api::<DeserializeGuard<Secret>>(&client),
                    watcher::Config::default(),
                    move |secret| {
                        argocd_store
                            .state()
                            .into_iter()
                            .filter(move |argocd| references_tls_secret(argocd, &secret))
                            .map(|argocd| ObjectRef::from_obj(&*argocd))
                    },
                )
                .graceful_shutdown_on(sigterm_watcher.handle())
                .run(
                    argocd_controller::reconcile_argocd,
                    argocd_controller::error_policy,
                    Arc::new(argocd_controller::Ctx {
                        client: client.clone(),
                        config: operator_config,
                    }),
                )
                // We can let the reporting happen in the background
                .for_each_concurrent(
                    16, // concurrency limit
                    |result| {
                        // The event_recorder needs to be shared across all invocations, so that
                        // events are correctly aggregated
                        let event_recorder = event_recorder.clone();
                        async move {
                            report_controller_reconciled(
                                &event_recorder,
                                FULL_CONTROLLER_NAME,
                                &result,
                            )
                            .await;
                        }
                    },
                )
                .map(anyhow::Ok);

            futures::try_join!(argocd_controller, eos_checker)?;
        }
    }

    Ok(())
}

fn references_tls_secret(
    argocd: &DeserializeGuard<ArgoCd>,
    secret: &DeserializeGuard<Secret>,
) -> bool {
    let secret_name = secret.name_any();
    (secret_name == REPO_SERVER_TLS_SECRET_NAME || secret_name == REDIS_TLS_SECRET_NAME)
        && argocd.namespace() == secret.namespace()
}
