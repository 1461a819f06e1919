//! Error containment and fatal error propagation

mod common;

use common::{Broken, Event, Probe, Trickle, count, dispatcher, segment, trace};
use pdl_dispatch::dispatch::error::{JobStage, SwitchStage};
use pdl_dispatch::dispatch::{
    DispatchConfig, DispatchError, ErrorReport, JobOutcome, SelectionReason, Source,
    UNIVERSAL_EXIT,
};
use proptest::prelude::*;

#[test]
fn test_job_error_is_contained() {
    let trace = trace();
    let (mut dispatcher, device) = dispatcher(
        vec![Probe::new("ALPHA", &trace).poison(b'!'), Probe::new("BETA", &trace)],
        DispatchConfig::default(),
    );

    let first = segment("ALPHA", b"good!bad bad bad");
    let error_offset = (first.len() - b"bad bad bad".len()) as u64;
    let mut data = first;
    data.extend(segment("BETA", b"fine"));

    let report = dispatcher.run_bytes(data).unwrap();

    let alpha = &report.jobs[1];
    assert_eq!(alpha.outcome, JobOutcome::Recovered);
    let message = alpha.error.as_deref().unwrap();
    assert!(message.contains("ALPHA"));
    assert!(message.contains(&format!("offset {}", error_offset)));
    assert_eq!(device.jobs_for("ALPHA")[0].data, b"good");

    // The next job starts cleanly after the flushed remainder.
    let beta = report.jobs.iter().find(|job| job.language == "BETA").unwrap();
    assert!(beta.error.is_none());
    assert_eq!(device.jobs_for("BETA")[0].data, b"fine");
    assert_eq!(report.error_count(), 1);

    let stats = dispatcher.lifecycle_stats();
    assert_eq!(stats.deinitializations, stats.switches);
    assert_eq!(
        count(&trace, |e| matches!(e, Event::Initialize(_))),
        count(&trace, |e| matches!(e, Event::Deinitialize(_)))
    );
}

#[test]
fn test_error_without_following_boundary_ends_at_eof() {
    let trace = trace();
    let (mut dispatcher, _device) = dispatcher(
        vec![Probe::new("ALPHA", &trace).poison(b'!')],
        DispatchConfig::default(),
    );

    let body = b"!never reaches a boundary";
    let report = dispatcher.run_bytes(segment("ALPHA", body)).unwrap();

    let last = report.jobs.last().unwrap();
    assert_eq!(last.outcome, JobOutcome::Recovered);
    assert_eq!(last.end_offset, report.jobs[0].end_offset + body.len() as u64);
    assert_eq!(count(&trace, |e| matches!(e, Event::EndJob(..))), 1);
    assert_eq!(count(&trace, |e| matches!(e, Event::Eof(_))), 0);
}

#[test]
fn test_verbose_errors_use_implementation_report() {
    let trace = trace();
    let config = DispatchConfig {
        error_report: ErrorReport::Verbose,
        ..DispatchConfig::default()
    };
    let (mut dispatcher, _device) = dispatcher(vec![Probe::new("ALPHA", &trace)], config);

    let mut data = UNIVERSAL_EXIT.to_vec();
    data.extend_from_slice(b"@PJL SET COPIES\r\n");
    let report = dispatcher.run_bytes(data).unwrap();

    let message = report.jobs[0].error.as_deref().unwrap();
    assert!(message.starts_with("PJL"));
    assert!(message.contains("@PJL SET COPIES"));
}

#[test]
fn test_failed_initialize_is_fatal() {
    let trace = trace();
    let (mut dispatcher, _device) = dispatcher(
        vec![
            Probe::new("ALPHA", &trace),
            Probe::new("BETA", &trace).failing_initialize(),
        ],
        DispatchConfig::default(),
    );

    let mut data = segment("BETA", b"never runs");
    data.extend(segment("ALPHA", b"never reached"));

    let err = dispatcher.run_bytes(data).unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Switch {
            stage: SwitchStage::Initialize,
            ..
        }
    ));
    assert_eq!(dispatcher.current_language(), "PJL");
    assert_eq!(count(&trace, |e| matches!(e, Event::BeginJob(_))), 0);
}

#[test]
fn test_failed_revert_is_fatal() {
    let trace = trace();
    let (mut dispatcher, _device) = dispatcher(
        vec![
            Probe::new("ALPHA", &trace).failing_deinitialize(),
            Probe::new("BETA", &trace),
        ],
        DispatchConfig::default(),
    );

    let mut data = segment("ALPHA", b"one job");
    data.extend(segment("BETA", b"never reached"));

    let err = dispatcher.run_bytes(data).unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Revert {
            stage: SwitchStage::Deinitialize,
            ..
        }
    ));
    assert_eq!(count(&trace, |e| matches!(e, Event::BeginJob(n) if n == "BETA")), 0);
}

#[test]
fn test_failed_begin_job_is_fatal() {
    let trace = trace();
    let (mut dispatcher, _device) = dispatcher(
        vec![Probe::new("ALPHA", &trace).failing_begin()],
        DispatchConfig::default(),
    );

    let err = dispatcher.run_bytes(b"anything".to_vec()).unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Job {
            stage: JobStage::Begin,
            ..
        }
    ));
}

#[test]
fn test_read_failure_is_fatal() {
    let trace = trace();
    let (mut dispatcher, _device) = dispatcher(
        vec![Probe::new("ALPHA", &trace)],
        DispatchConfig::default(),
    );

    let source = Source::Reader(Box::new(Broken::new(segment("ALPHA", b"partial"))));
    let err = dispatcher.run(source).unwrap_err();
    assert!(matches!(err, DispatchError::Io { .. }));
}

#[test]
fn test_next_run_works_after_fatal_error() {
    let trace = trace();
    let (mut dispatcher, device) = dispatcher(
        vec![Probe::new("ALPHA", &trace)],
        DispatchConfig::default(),
    );

    // Long enough that the read error lands inside ALPHA's job.
    let source = Source::Reader(Box::new(Broken::new(segment("ALPHA", &[b'x'; 40]))));
    let err = dispatcher.run(source).unwrap_err();
    assert!(matches!(err, DispatchError::Io { .. }));
    assert_eq!(dispatcher.current_language(), "PJL");
    assert!(device.jobs_for("ALPHA").is_empty());

    let report = dispatcher.run_bytes(segment("ALPHA", b"again")).unwrap();
    let alpha = &report.jobs[1];
    assert_eq!(alpha.language, "ALPHA");
    assert_eq!(alpha.selection, SelectionReason::ControlVariable);
    assert_eq!(device.jobs_for("ALPHA")[0].data, b"again");
    assert_eq!(
        count(&trace, |e| matches!(e, Event::Initialize(_))),
        count(&trace, |e| matches!(e, Event::Deinitialize(_)))
    );
}

#[test]
fn test_next_run_works_after_failed_begin() {
    let trace = trace();
    let (mut dispatcher, device) = dispatcher(
        vec![Probe::new("ALPHA", &trace).failing_begin(), Probe::new("BETA", &trace)],
        DispatchConfig::default(),
    );

    assert!(dispatcher.run_bytes(segment("ALPHA", b"refused")).is_err());

    let report = dispatcher.run_bytes(segment("BETA", b"accepted")).unwrap();
    assert_eq!(report.jobs[1].language, "BETA");
    assert_eq!(device.jobs_for("BETA")[0].data, b"accepted");
}

/// What a run looks like from the outside
fn observe(
    data: Vec<u8>,
    chunk: Option<usize>,
) -> (Vec<(String, JobOutcome, u64, u64, bool)>, Vec<Vec<u8>>) {
    let trace = trace();
    let config = DispatchConfig {
        buffer_size: 16,
        ..DispatchConfig::default()
    };
    let (mut dispatcher, device) = dispatcher(
        vec![
            Probe::new("ALPHA", &trace).poison(b'!'),
            Probe::new("BETA", &trace),
        ],
        config,
    );

    let source = match chunk {
        Some(chunk) => Source::Reader(Box::new(Trickle::new(data, chunk))),
        None => Source::Bytes(data),
    };
    let report = dispatcher.run(source).unwrap();

    let jobs = report
        .jobs
        .into_iter()
        .map(|job| {
            (
                job.language,
                job.outcome,
                job.start_offset,
                job.end_offset,
                job.error.is_some(),
            )
        })
        .collect();
    let outputs = device.jobs().into_iter().map(|job| job.data).collect();
    (jobs, outputs)
}

fn body() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>().prop_filter("no escapes", |b| *b != 0x1b), 0..40)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_results_do_not_depend_on_read_sizes(
        segments in proptest::collection::vec((any::<bool>(), body()), 1..5),
        trailing_exit in any::<bool>(),
        chunk in 1usize..48,
    ) {
        let mut data = Vec::new();
        for (alpha, body) in &segments {
            data.extend(segment(if *alpha { "ALPHA" } else { "BETA" }, body));
        }
        if trailing_exit {
            data.extend_from_slice(UNIVERSAL_EXIT);
        }

        let whole = observe(data.clone(), None);
        let trickled = observe(data, Some(chunk));
        prop_assert_eq!(whole, trickled);
    }
}
