mod common;
use crate::common::init_tracing;

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;

use sdsweep::config::load_and_validate;
use sdsweep::errors::SweepError;
use sdsweep::fs::RealFileSystem;
use sdsweep::sweep::Axis;
use sdsweep::types::BackendKind;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn full_run_file_produces_one_request_per_sweep() {
    init_tracing();
    let file = write_config(
        r#"
        [worker]
        backend = "xl"
        program = "python"
        args = ["scripts/sdxl.py"]
        model = "sd_xl_base_1.0"
        output_dir = "images"
        device_index = 1

        [run]
        ready_timeout = "90s"
        post_doubling = true

        [[sweep]]
        prompts = ["a cat", "a dog"]
        iterations = 2
        steps = "20, 30"
        scales = "5 > 9 2"
        seed = 100

        [[sweep]]
        prompts = ["a bird"]
        lock_seed = true
        axis_order = ["step", "prompt"]
        seed_reset = []
        "#,
    );

    let run_file = load_and_validate(&RealFileSystem, file.path()).unwrap();
    let requests = run_file.requests();

    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].worker.backend, BackendKind::Xl);
    assert_eq!(requests[0].worker.device_index, 1);
    assert_eq!(requests[0].options.ready_timeout, Duration::from_secs(90));
    assert!(requests[0].options.post_doubling);
    assert_eq!(requests[0].sweep.expected_job_count(), 2 * 2 * 2 * 3);

    assert!(requests[1].sweep.lock_seed);
    assert_eq!(&requests[1].order.axes()[..2], &[Axis::Step, Axis::Prompt]);
    assert!(!requests[1].order.resets_seed(Axis::Prompt));
}

#[test]
fn backend_override_applies_to_every_request() {
    let file = write_config(
        r#"
        [worker]
        model = "sd-1.5"

        [[sweep]]
        prompts = ["x"]
        "#,
    );

    let run_file = load_and_validate(&RealFileSystem, file.path())
        .unwrap()
        .with_backend(BackendKind::Xl);
    assert!(run_file
        .requests()
        .iter()
        .all(|r| r.worker.backend == BackendKind::Xl));
}

#[test]
fn malformed_toml_is_a_toml_error() {
    let file = write_config("[worker\nmodel = ");
    assert!(matches!(
        load_and_validate(&RealFileSystem, file.path()),
        Err(SweepError::TomlError(_))
    ));
}

#[test]
fn unknown_backend_is_rejected() {
    let file = write_config(
        r#"
        [worker]
        backend = "comfy"
        model = "m"

        [[sweep]]
        prompts = ["x"]
        "#,
    );
    assert!(load_and_validate(&RealFileSystem, file.path()).is_err());
}

#[test]
fn missing_file_is_an_error() {
    assert!(load_and_validate(&RealFileSystem, "/definitely/not/here.toml").is_err());
}
