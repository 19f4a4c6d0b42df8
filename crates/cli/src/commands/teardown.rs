//! Operator teardown of every workload group

use anyhow::Result;
use placer_lib::migration::{teardown, TeardownReport};
use placer_lib::orchestrator::KubeOrchestrator;
use placer_lib::Settings;

use crate::config::kube_client;
use crate::output::{print_error, print_json, print_success, print_warning, OutputFormat};

fn print_report(report: &TeardownReport) {
    if report.is_complete() {
        print_success(&format!(
            "Deleted {} job(s) and {} pod(s)",
            report.jobs_deleted, report.pods_deleted
        ));
    } else {
        print_error(&format!(
            "Deleted {} job(s) and {} pod(s); failed groups: {}",
            report.jobs_deleted,
            report.pods_deleted,
            report.failed_groups.join(", ")
        ));
    }
}

/// Delete the jobs of every configured group, then their leftover pods
pub async fn run_teardown(
    settings: &Settings,
    kubeconfig: Option<&str>,
    confirmed: bool,
    format: OutputFormat,
) -> Result<()> {
    if !confirmed {
        print_warning(&format!(
            "This deletes all jobs and pods of {} group(s) in namespace {}; pass --yes to proceed",
            settings.groups.len(),
            settings.namespace
        ));
        return Ok(());
    }

    let client = kube_client(kubeconfig).await?;
    let orchestrator = KubeOrchestrator::new(
        client,
        settings.namespace.clone(),
        settings.group_label.clone(),
        settings.groups.clone(),
    );

    let report = teardown(&orchestrator, &settings.groups).await;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_report(&report),
    }

    if !report.is_complete() {
        anyhow::bail!("teardown incomplete");
    }
    Ok(())
}
