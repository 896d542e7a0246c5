//! E2E tests for the playback round loop
//!
//! Drives the full prepare/write/recover/drain cycle against the simulated
//! driver and checks the exact device call sequence of each round.

use playtester::audio::device::{DeviceSession, DriverError, HardwareRequest};
use playtester::audio::sim::{underrun, DeviceEvent, SimulatedDevice, WriteScript};
use playtester::{ElapsedClock, PlaybackDriver, RoundPlan, SquareWave};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn io_error() -> DriverError {
    DriverError::new(-5, "Input/output error")
}

fn driver(device: SimulatedDevice) -> PlaybackDriver<SimulatedDevice> {
    let mut session = DeviceSession::from_device("default", device);
    session.negotiate(HardwareRequest::default()).unwrap();
    PlaybackDriver::new(session, SquareWave::default(), ElapsedClock::start())
        .unwrap()
        .with_pause(Duration::ZERO)
}

/// Device calls after negotiation, split into rounds at each drain
fn rounds_of(driver: &PlaybackDriver<SimulatedDevice>) -> Vec<Vec<DeviceEvent>> {
    let events: Vec<DeviceEvent> = driver
        .session()
        .device()
        .events()
        .into_iter()
        .filter(|e| !matches!(e, DeviceEvent::Param(_)))
        .collect();

    let mut rounds = vec![Vec::new()];
    for event in events {
        let drained = event == DeviceEvent::Drain;
        rounds.last_mut().unwrap().push(event);
        if drained {
            rounds.push(Vec::new());
        }
    }
    rounds.pop();
    rounds
}

fn write(frames: usize) -> DeviceEvent {
    DeviceEvent::Write { frames }
}

/// 1024-frame periods: five identical clean rounds
#[test]
fn test_five_steady_rounds_at_1024() {
    let mut driver = driver(SimulatedDevice::new().with_period_frames(1024));
    assert_eq!(driver.buffer().frames(), 1024);

    let reports = driver.run_rounds(5).unwrap();
    assert_eq!(reports.len(), 5);
    for (i, report) in reports.iter().enumerate() {
        assert_eq!(report.round, i as u64);
        assert_eq!(report.full_writes, 3);
        assert_eq!(report.write_errors, 0);
        assert!(report.is_clean());
    }

    let expected = vec![
        DeviceEvent::Prepare,
        write(1024),
        write(1024),
        write(1024),
        DeviceEvent::Drain,
    ];
    let rounds = rounds_of(&driver);
    assert_eq!(rounds.len(), 5);
    for round in rounds {
        assert_eq!(round, expected);
    }
    assert_eq!(driver.session().device().frames_written(), 5 * 3 * 1024);
    assert_eq!(driver.stats().totals().rounds, 5);
    assert_eq!(driver.stats().clean_rounds(), 5);
}

/// Underrun on the first write; recover succeeds and the same buffer is retried
#[test]
fn test_underrun_recovered_and_retried() {
    let device = SimulatedDevice::new().script_writes([WriteScript::Fail(underrun())]);
    let mut driver = driver(device);

    let report = driver.run_round().unwrap();
    assert_eq!(report.full_writes, 3);
    assert_eq!(report.write_errors, 1);
    assert_eq!(report.recoveries, 1);
    assert_eq!(report.abandoned, 0);
    assert!(report.is_clean());

    assert_eq!(
        rounds_of(&driver),
        vec![vec![
            DeviceEvent::Prepare,
            write(1000),
            DeviceEvent::Recover { code: -32 },
            write(1000),
            write(1000),
            write(1000),
            DeviceEvent::Drain,
        ]]
    );
}

/// Recover fails but the fallback prepare succeeds
#[test]
fn test_failed_recover_then_prepare_retries() {
    let device = SimulatedDevice::new()
        .script_writes([WriteScript::Fail(underrun())])
        .script_recovers([Err(io_error())]);
    let mut driver = driver(device);

    let report = driver.run_round().unwrap();
    assert_eq!(report.full_writes, 3);
    assert_eq!(report.recoveries, 0);
    assert_eq!(report.reprepares, 1);

    assert_eq!(
        rounds_of(&driver)[0],
        vec![
            DeviceEvent::Prepare,
            write(1000),
            DeviceEvent::Recover { code: -32 },
            DeviceEvent::Prepare,
            write(1000),
            write(1000),
            write(1000),
            DeviceEvent::Drain,
        ]
    );
}

/// Recover and prepare both fail: the write is abandoned, the round still
/// drains, and the next round starts normally
#[test]
fn test_irrecoverable_write_abandoned_loop_continues() {
    let device = SimulatedDevice::new()
        .script_writes([WriteScript::Fail(underrun())])
        .script_recovers([Err(io_error())])
        // round-start prepare, then the failing fallback prepare
        .script_prepares([Ok(()), Err(io_error())]);
    let mut driver = driver(device);

    let reports = driver.run_rounds(2).unwrap();
    assert_eq!(reports[0].abandoned, 1);
    assert_eq!(reports[0].full_writes, 2);
    assert_eq!(reports[0].completed_repetitions(), 3);
    assert!(!reports[0].truncated);
    assert!(reports[1].is_clean());
    assert_eq!(reports[1].full_writes, 3);

    let rounds = rounds_of(&driver);
    assert_eq!(rounds.len(), 2);
    assert_eq!(
        rounds[0],
        vec![
            DeviceEvent::Prepare,
            write(1000),
            DeviceEvent::Recover { code: -32 },
            DeviceEvent::Prepare,
            write(1000),
            write(1000),
            DeviceEvent::Drain,
        ]
    );
    assert_eq!(rounds[1][0], DeviceEvent::Prepare);
}

/// A short write ends the round early without a retry
#[test]
fn test_short_write_truncates_round() {
    let device =
        SimulatedDevice::new().script_writes([WriteScript::Full, WriteScript::Short(100)]);
    let mut driver = driver(device);

    let reports = driver.run_rounds(2).unwrap();
    assert_eq!(reports[0].full_writes, 1);
    assert_eq!(reports[0].short_writes, 1);
    assert!(reports[0].truncated);
    assert!(reports[0].completed_repetitions() < 3);
    assert!(reports[1].is_clean());

    assert_eq!(
        rounds_of(&driver)[0],
        vec![
            DeviceEvent::Prepare,
            write(1000),
            write(1000),
            DeviceEvent::Drain,
        ]
    );
    assert_eq!(driver.stats().totals().truncated_rounds, 1);
}

/// A short write on the last repetition does not count as truncation
#[test]
fn test_short_last_write_not_truncated() {
    let device = SimulatedDevice::new().script_writes([
        WriteScript::Full,
        WriteScript::Full,
        WriteScript::Short(10),
    ]);
    let mut driver = driver(device);

    let report = driver.run_round().unwrap();
    assert_eq!(report.completed_repetitions(), 3);
    assert!(!report.truncated);
    assert!(!report.is_clean());
}

/// A failed start-of-round prepare surfaces as a write error and is recovered
#[test]
fn test_failed_round_prepare_recovered_by_write_path() {
    let device = SimulatedDevice::new().script_prepares([Ok(()), Err(io_error())]);
    let mut driver = driver(device);

    let reports = driver.run_rounds(2).unwrap();
    assert!(reports[0].is_clean());
    assert_eq!(reports[1].write_errors, 1);
    assert_eq!(reports[1].recoveries, 1);
    assert_eq!(reports[1].full_writes, 3);
}

/// Counting holds over a mixed script, and every drain follows all writes
/// of its round
#[test]
fn test_repetition_accounting_and_drain_order() {
    let device = SimulatedDevice::new()
        .script_writes([
            WriteScript::Fail(underrun()),
            WriteScript::Full,
            WriteScript::Full,
            WriteScript::Full,
            WriteScript::Fail(underrun()),
            WriteScript::Full,
            WriteScript::Full,
            WriteScript::Short(3),
            WriteScript::Full,
            WriteScript::Full,
            WriteScript::Full,
        ])
        .script_recovers([Ok(()), Err(io_error())])
        .script_prepares([Ok(()), Ok(()), Err(io_error())]);
    let mut driver = driver(device);

    let reports = driver.run_rounds(4).unwrap();
    let rounds = rounds_of(&driver);
    assert_eq!(rounds.len(), 4);

    for (report, events) in reports.iter().zip(&rounds) {
        if !report.truncated {
            assert_eq!(report.completed_repetitions(), 3, "{:?}", report);
        }

        let writes = events
            .iter()
            .filter(|e| matches!(e, DeviceEvent::Write { .. }))
            .count() as u32;
        assert_eq!(
            writes,
            report.full_writes + report.short_writes + report.write_errors
        );
        assert_eq!(events.last(), Some(&DeviceEvent::Drain));
        assert_eq!(
            events.iter().filter(|e| **e == DeviceEvent::Drain).count(),
            1
        );
    }
}

/// Retry bound abandons a repetition whose writes keep failing
#[test]
fn test_retry_bound_abandons_persistent_errors() {
    let device = SimulatedDevice::new().script_writes(vec![WriteScript::Fail(underrun()); 3]);
    let mut driver = driver(device).with_plan(RoundPlan {
        repetitions: 3,
        max_retries: Some(2),
    });

    let report = driver.run_round().unwrap();
    assert_eq!(report.write_errors, 3);
    assert_eq!(report.recoveries, 2);
    assert_eq!(report.abandoned, 1);
    assert_eq!(report.full_writes, 2);
}

/// The inter-round pause still happens after a failed round
#[test]
fn test_pause_between_rounds() {
    let device = SimulatedDevice::new()
        .script_writes([WriteScript::Fail(underrun())])
        .script_recovers([Err(io_error())])
        .script_prepares([Ok(()), Err(io_error())]);
    let mut driver = driver(device).with_pause(Duration::from_millis(50));

    let reports = driver.run_rounds(2).unwrap();
    assert_eq!(reports[0].abandoned, 1);
    assert!(reports[1].started_ms >= reports[0].drained_ms + 45);
}

/// An unbounded pause is still cut short by the stop flag
#[test]
fn test_unbounded_pause_interrupted_by_stop_flag() {
    let mut driver = driver(SimulatedDevice::new()).with_pause(Duration::MAX);

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        flag.store(false, Ordering::SeqCst);
    });

    driver.run(&running).unwrap();
    stopper.join().unwrap();
    assert_eq!(driver.stats().totals().rounds, 1);
}

/// A cleared stop flag ends the loop before the next round
#[test]
fn test_stop_flag_bounds_run() {
    let mut driver = driver(SimulatedDevice::new());

    let stopped = AtomicBool::new(false);
    driver.run(&stopped).unwrap();
    assert_eq!(driver.stats().totals().rounds, 0);

    let running = AtomicBool::new(true);
    driver.run_until(&running, Some(3)).unwrap();
    assert_eq!(driver.stats().totals().rounds, 3);
    assert_eq!(rounds_of(&driver).len(), 3);
}

/// Every write submits the identical rendered buffer
#[test]
fn test_buffer_matches_square_wave() {
    let driver = driver(SimulatedDevice::new().with_period_frames(1024));
    assert_eq!(driver.buffer(), &SquareWave::default().render(1024));
}
