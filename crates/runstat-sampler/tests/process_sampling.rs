//! A process sampler supervised end to end.

use std::sync::Arc;
use std::time::Duration;

use runstat_core::RunstatConfig;
use runstat_metrics::{LabelSet, MetricRegistry, render_prometheus};
use runstat_sampler::{ObjectTracker, ProcessProbe, Sampler, SamplerState, SamplerSupervisor};

struct Connection;

#[tokio::test]
async fn supervised_process_sampler_publishes_gauges() {
    let config = RunstatConfig::from_toml_str(
        r#"
[sampler]
interval = "20ms"
worker = "master"
stop_timeout = "1s"
"#,
    )
    .unwrap();

    let registry = Arc::new(MetricRegistry::new());
    let objects = ObjectTracker::new();
    let _open: Vec<_> = (0..4).map(|_| objects.track::<Connection>()).collect();

    let probe = ProcessProbe::new().with_object_tracker(objects);
    let sampler = Sampler::new("process", Arc::new(probe), registry.clone(), config.sampler.clone())
        .unwrap();

    let supervisor = SamplerSupervisor::new();
    let sampler = supervisor.register(sampler).await.unwrap();
    supervisor.start_all().await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    supervisor.stop(config.sampler.stop_timeout).await;

    assert_eq!(sampler.state(), SamplerState::Stopped);
    assert!(sampler.ticks() >= 2);

    let objects_total = registry.handle("runtime_objects_total").unwrap();
    let connection = LabelSet::from([("type", std::any::type_name::<Connection>())]);
    assert_eq!(registry.value(&objects_total, &connection), Some(4.0));

    let body = render_prometheus(&registry.gather());
    assert!(body.contains("runtime_sampler_duration_seconds_count{worker=\"master\"}"));
    #[cfg(unix)]
    assert!(body.contains("runtime_gc_stat{stat=\"minor_page_faults\"}"));
    #[cfg(target_os = "linux")]
    {
        let memory = registry.handle("runtime_memory_usage_bytes").unwrap();
        assert!(registry.value(&memory, &LabelSet::new()).unwrap() > 0.0);
    }
}

#[test]
fn sampler_without_procfs_still_reports_what_it_can() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(MetricRegistry::new());
    let probe = ProcessProbe::new().with_proc_root(dir.path());
    let sampler = Sampler::new(
        "process",
        Arc::new(probe),
        registry.clone(),
        Default::default(),
    )
    .unwrap();

    let report = sampler.sample();
    // statm and fd are missing from the empty directory.
    assert_eq!(report.failures.len(), 2);
    #[cfg(unix)]
    assert!(!report.failed());

    let fds = registry.handle("runtime_file_descriptors_total").unwrap();
    assert_eq!(registry.value(&fds, &LabelSet::new()), None);
}
