use haproxy_acceptance::{LiveHealthCheck, run_live_health_check};
use serial_test::serial;
use tests_workflows::init_tracing;

#[tokio::test]
#[serial]
#[ignore = "requires a BOSH director, the bosh and ssh CLIs and HAPROXY_BASE_MANIFEST"]
async fn haproxy_reports_health_through_monit() -> anyhow::Result<()> {
    init_tracing();
    let run = LiveHealthCheck::from_env();
    println!(
        "running live health check against deployment {} (backend port {})",
        run.deployment, run.backend_port
    );

    let report = run_live_health_check(&run).await?;

    assert_eq!(report.deployment, run.deployment);
    assert_eq!(report.steps.len(), 7);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore = "requires a BOSH director, the bosh and ssh CLIs and HAPROXY_BASE_MANIFEST"]
async fn haproxy_health_is_stable_once_converged() -> anyhow::Result<()> {
    init_tracing();
    let mut run = LiveHealthCheck::from_env();
    run.stable_observations = 3;

    run_live_health_check(&run).await?;
    Ok(())
}
