//! Session protocol behaviour against the simulated analyser.

use scan_core::{ScanError, SweepConfiguration};
use scan_driver_vna::scpi;
use scan_driver_vna::{InstrumentSession, SessionConfig, SimulatedVna, SimulatedVnaHandle};
use std::time::Duration;

async fn open(vna: SimulatedVna) -> (InstrumentSession, SimulatedVnaHandle) {
    let handle = vna.handle();
    let session = InstrumentSession::open(Box::new(vna), SessionConfig::new("SIM::VNA::INSTR"))
        .await
        .expect("open simulated session");
    (session, handle)
}

fn sweep(points: u32) -> SweepConfiguration {
    SweepConfiguration::new(2.0e9, 3.0e9, 1.0e3, points).unwrap()
}

#[tokio::test]
async fn open_clears_identifies_and_reads_byte_order() {
    let (session, handle) = open(SimulatedVna::new()).await;

    assert_eq!(
        handle.commands(),
        vec!["*CLS", "*OPC?", "*IDN?", "FORM:BORD?"]
    );
    assert!(session.identity().unwrap().contains("ZNB8"));
    assert_eq!(session.byte_order(), Some("SWAP"));
    assert_eq!(session.timeout(), Duration::from_millis(1500));
}

#[tokio::test]
async fn sweep_window_is_sent_in_order_then_synchronised() {
    let (mut session, handle) = open(SimulatedVna::new()).await;
    let before = handle.commands().len();

    session.set_sweep_window(&sweep(7401)).await.unwrap();

    let sent = handle.commands()[before..].to_vec();
    assert_eq!(
        sent,
        vec![
            "SENS1:FREQ:STAR 2000000000",
            "SENS1:FREQ:STOP 3000000000",
            "SENS1:BWID 1000",
            "SENS1:SWE:POIN 7401",
            "*OPC?",
            "*STB?",
        ]
    );
    assert_eq!(handle.points(), 7401);
    assert_eq!(session.sweep().map(|s| s.points), Some(7401));
}

#[tokio::test]
async fn payload_length_matches_configured_points() {
    for points in [1_u32, 2, 11, 801] {
        let (mut session, _handle) = open(SimulatedVna::new()).await;
        session.set_sweep_window(&sweep(points)).await.unwrap();
        let samples = session.trigger_sweep_and_fetch().await.unwrap();
        assert_eq!(samples.len(), points as usize);
    }
}

#[tokio::test]
async fn fetch_triggers_waits_then_reads() {
    let (mut session, handle) = open(SimulatedVna::new()).await;
    session.set_sweep_window(&sweep(5)).await.unwrap();
    let before = handle.commands().len();

    session.trigger_sweep_and_fetch().await.unwrap();

    let sent = handle.commands()[before..].to_vec();
    assert_eq!(
        sent,
        vec!["INIT1:IMM; *WAI", "*OPC?", "CALC:DATA? SDAT", "*STB?"]
    );
    assert_eq!(handle.sweeps(), 1);
}

#[tokio::test]
async fn adaptive_timeout_is_sweep_time_plus_margin() {
    let (mut session, _handle) = open(SimulatedVna::new().with_sweep_time(0.25)).await;

    let timeout = session
        .compute_adaptive_timeout(Duration::from_millis(1000))
        .await
        .unwrap();

    assert_eq!(timeout, Duration::from_millis(1250));
    assert_eq!(session.timeout(), Duration::from_millis(1250));
}

#[tokio::test]
async fn clean_status_byte_skips_error_queries() {
    let (mut session, handle) = open(SimulatedVna::new()).await;

    let errors = session.drain_error_queue().await.unwrap();

    assert!(errors.is_empty());
    assert_eq!(handle.count(scpi::SYST_ERR), 0);
    session.raise_if_errors().await.unwrap();
}

#[tokio::test]
async fn drains_errors_in_arrival_order() {
    let (mut session, handle) = open(SimulatedVna::new()).await;
    handle.inject_error("-113,\"Undefined header\"");
    handle.inject_error("-222,\"Data out of range\"");

    let err = session.raise_if_errors().await.unwrap_err();

    assert_eq!(
        err.instrument_errors().unwrap(),
        &[
            "-113,\"Undefined header\"".to_string(),
            "-222,\"Data out of range\"".to_string()
        ]
    );
    // two entries plus the sentinel
    assert_eq!(handle.count(scpi::SYST_ERR), 3);
    assert_eq!(handle.pending_errors(), 0);
}

#[tokio::test]
async fn stuck_error_queue_is_bounded() {
    let (mut session, handle) = open(SimulatedVna::new()).await;
    handle.stick_error_queue("-350,\"Queue overflow\"");

    let errors = session.drain_error_queue().await.unwrap();

    assert_eq!(handle.count(scpi::SYST_ERR), 51);
    assert_eq!(errors.len(), 52);
    assert_eq!(errors.last().unwrap(), scpi::ERROR_QUEUE_OVERFLOW);
}

#[tokio::test]
async fn silent_barrier_times_out() {
    let (mut session, handle) = open(SimulatedVna::new()).await;
    handle.silence("*OPC?");
    session.set_timeout(Duration::from_millis(50));

    let err = session.check_completion().await.unwrap_err();

    match err {
        ScanError::ProtocolTimeout { command, timeout } => {
            assert_eq!(command, "*OPC?");
            assert_eq!(timeout, Duration::from_millis(50));
        }
        other => panic!("expected protocol timeout, got {other:?}"),
    }
    assert!(session.query("*OPC?").await.unwrap_err().is_timeout());
}

#[tokio::test]
async fn read_timeout_clears_the_device() {
    let (mut session, handle) = open(SimulatedVna::new()).await;
    let before = handle.device_clears();
    handle.silence("SENS1:SWE:TIME?");
    session.set_timeout(Duration::from_millis(20));

    let err = session
        .compute_adaptive_timeout(Duration::from_millis(1000))
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(handle.device_clears(), before + 1);
    // the session stays usable for the next exchange
    assert!(session.identify().await.unwrap().starts_with("Rohde-Schwarz"));
}

#[tokio::test]
async fn oversized_sweep_time_is_a_decode_error() {
    let (mut session, _handle) = open(SimulatedVna::new().with_sweep_time(1e30)).await;

    let err = session
        .compute_adaptive_timeout(Duration::from_millis(1000))
        .await
        .unwrap_err();

    assert!(matches!(err, ScanError::Decode(msg) if msg.contains("does not fit")));
    assert_eq!(session.timeout(), Duration::from_millis(1500));
}

#[tokio::test]
async fn sweep_time_plus_margin_overflow_is_a_decode_error() {
    let (mut session, _handle) = open(SimulatedVna::new().with_sweep_time(1.0)).await;

    let err = session
        .compute_adaptive_timeout(Duration::MAX)
        .await
        .unwrap_err();

    assert!(matches!(err, ScanError::Decode(_)));
}

#[tokio::test]
async fn odd_payload_is_a_decode_error() {
    let (mut session, handle) = open(SimulatedVna::new()).await;
    session.set_sweep_window(&sweep(2)).await.unwrap();
    handle.set_raw_payload("0.1,0.2,0.3");

    let err = session.trigger_sweep_and_fetch().await.unwrap_err();
    assert!(matches!(err, ScanError::Decode(_)));
}

#[tokio::test]
async fn short_payload_is_a_decode_error() {
    let (mut session, handle) = open(SimulatedVna::new()).await;
    session.set_sweep_window(&sweep(11)).await.unwrap();
    handle.set_payload_points(10);

    let err = session.trigger_sweep_and_fetch().await.unwrap_err();
    assert!(matches!(err, ScanError::Decode(msg) if msg.contains("expected 11 points, got 10")));
}

#[tokio::test]
async fn instrument_error_after_fetch_fails_the_acquisition() {
    let (mut session, handle) = open(SimulatedVna::new()).await;
    session.set_sweep_window(&sweep(3)).await.unwrap();
    handle.fail_fetch_at(2);

    session.trigger_sweep_and_fetch().await.unwrap();
    let err = session.trigger_sweep_and_fetch().await.unwrap_err();

    let errors = err.instrument_errors().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("Data out of range"));
}

#[tokio::test]
async fn free_run_toggles_both_switches() {
    let (mut session, handle) = open(SimulatedVna::new()).await;

    session.set_free_run(false).await.unwrap();
    assert!(!handle.continuous());
    assert!(!handle.display_update());

    session.set_free_run(true).await.unwrap();
    assert!(handle.continuous());
    assert!(handle.display_update());
}

#[tokio::test]
async fn close_is_idempotent() {
    let (mut session, handle) = open(SimulatedVna::new()).await;

    session.close().await.unwrap();
    assert!(session.is_closed());
    assert!(handle.is_closed());
    let cls_after_first = handle.count(scpi::CLS);

    session.close().await.unwrap();
    assert_eq!(handle.count(scpi::CLS), cls_after_first);
    assert!(matches!(
        session.write(scpi::IDN).await,
        Err(ScanError::Connection { .. })
    ));
}
