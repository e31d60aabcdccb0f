use std::time::Duration;

use consult_recorder::artifact::webm;
use consult_recorder::capture::{DeviceError, SyntheticCamera};
use consult_recorder::consultation::{ConsultationForm, RecordStatus};
use consult_recorder::encoder::EncoderError;
use consult_recorder::recorder::{FinalizeError, RecordingError, SessionStatus, UploadState};
use consult_recorder::RecordingEvent;
use tokio::time::sleep;

mod common;
use common::{form, harness, settle, MemoryBackend};

#[tokio::test(start_paused = true)]
async fn test_three_second_consultation_is_saved() {
    let camera = SyntheticCamera::new();
    let usage = camera.usage();
    let mut h = harness(camera, MemoryBackend::default());

    let session_id = h.manager.start(form()).await.unwrap();
    sleep(Duration::from_millis(3050)).await;
    let record = h.manager.stop().await.unwrap().unwrap();

    assert_eq!(record.duration_seconds, 3);
    assert_eq!(record.status, RecordStatus::Completed);
    assert_eq!(record.video_file_name, "U123_Jane Doe.webm");
    assert_eq!(record.doctor, "doctor-42");
    assert_eq!(record.doctor_name, "Dr. Iyer");
    assert_eq!(h.manager.status(), SessionStatus::Finalized);
    assert_eq!(usage.held(), 0);

    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["recordingDuration"], 3);
    assert_eq!(json["status"], "completed");
    assert_eq!(json["uhidId"], "U123");

    let artifact = std::fs::read(h.downloads.path().join("U123_Jane Doe.webm")).unwrap();
    assert_eq!(webm::read_duration(&artifact).unwrap(), Some(3.0));

    let consultations = h.backend.consultations.lock();
    assert_eq!(consultations.len(), 1);
    assert_eq!(consultations[0].1, "token-abc");
    drop(consultations);

    let ledger = h.manager.upload_ledger().unwrap();
    settle(&ledger).await;
    let sequences = h.backend.chunk_sequences();
    assert!(sequences.len() >= 3);
    assert_eq!(sequences, (0..sequences.len() as u64).collect::<Vec<_>>());
    assert!(h
        .backend
        .chunks
        .lock()
        .iter()
        .all(|(id, _, _)| *id == session_id));
}

#[tokio::test(start_paused = true)]
async fn test_events_follow_the_session() {
    let mut h = harness(SyntheticCamera::new(), MemoryBackend::default());
    let mut events = h.manager.subscribe();

    h.manager.start(form()).await.unwrap();
    sleep(Duration::from_millis(2500)).await;
    h.manager.stop().await.unwrap();

    let mut ticks = Vec::new();
    let mut segments = 0;
    let mut saw_stopping = false;
    let mut finalized = None;
    while let Ok(event) = events.try_recv() {
        match event {
            RecordingEvent::Tick(seconds) => ticks.push(seconds),
            RecordingEvent::SegmentEmitted { .. } => segments += 1,
            RecordingEvent::Stopping => saw_stopping = true,
            RecordingEvent::Finalized(record) => finalized = Some(record),
            RecordingEvent::Started { .. } => {}
            RecordingEvent::Error(err) => panic!("unexpected error event: {err}"),
        }
    }

    assert_eq!(ticks, vec![1, 2]);
    assert_eq!(segments, 3);
    assert!(saw_stopping);
    assert_eq!(finalized.unwrap().duration_seconds, 2);
}

#[tokio::test]
async fn test_denied_camera_leaves_session_idle() {
    let camera = SyntheticCamera::new().denying(DeviceError::PermissionDenied("blocked by user".into()));
    let usage = camera.usage();
    let mut h = harness(camera, MemoryBackend::default());
    let mut events = h.manager.subscribe();

    let err = h.manager.start(form()).await.unwrap_err();

    assert!(matches!(err, RecordingError::Device(DeviceError::PermissionDenied(_))));
    assert_eq!(h.manager.status(), SessionStatus::Idle);
    assert_eq!(usage.acquired(), 0);
    assert_eq!(h.backend.call_count(), 0);
    assert!(matches!(events.recv().await.unwrap(), RecordingEvent::Error(_)));
    assert!(h.manager.upload_ledger().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_failed_upload_does_not_affect_artifact() {
    let mut h = harness(SyntheticCamera::new(), MemoryBackend::failing_chunks([1]));

    h.manager.start(form()).await.unwrap();
    sleep(Duration::from_millis(3050)).await;
    let record = h.manager.stop().await.unwrap().unwrap();
    assert_eq!(record.duration_seconds, 3);

    let ledger = h.manager.upload_ledger().unwrap();
    settle(&ledger).await;
    assert_eq!(ledger.failed(), vec![1]);
    assert_eq!(ledger.state(0), Some(UploadState::Sent));
    assert_eq!(ledger.state(2), Some(UploadState::Sent));

    // Clusters follow the rewritten Info untouched, the rejected one included
    let artifact = std::fs::read(h.downloads.path().join("U123_Jane Doe.webm")).unwrap();
    let payloads = h.backend.chunk_payloads();
    let tail: Vec<u8> = payloads[1..].iter().flat_map(|p| p.iter().copied()).collect();
    assert!(!payloads[1].is_empty());
    assert!(artifact.ends_with(&tail));
    let total: usize = payloads.iter().map(|p| p.len()).sum();
    assert!(artifact.len() > total);
}

#[tokio::test(start_paused = true)]
async fn test_second_start_is_rejected() {
    let camera = SyntheticCamera::new();
    let usage = camera.usage();
    let mut h = harness(camera, MemoryBackend::default());

    h.manager.start(form()).await.unwrap();
    let err = h.manager.start(form()).await.unwrap_err();

    assert!(matches!(err, RecordingError::AlreadyRecording));
    assert_eq!(usage.acquired(), 1);
    assert_eq!(h.manager.status(), SessionStatus::Recording);

    sleep(Duration::from_millis(1200)).await;
    h.manager.stop().await.unwrap();
    assert_eq!(usage.held(), 0);
}

#[tokio::test]
async fn test_incomplete_form_is_rejected_before_acquisition() {
    let camera = SyntheticCamera::new();
    let usage = camera.usage();
    let mut h = harness(camera, MemoryBackend::default());

    let err = h
        .manager
        .start(ConsultationForm {
            patient_name: " ".into(),
            doctor_name: String::new(),
            ..form()
        })
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "Please fill in all required fields: patientName, doctorName"
    );
    assert_eq!(usage.acquired(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_silent_source_fails_with_no_data() {
    let camera = SyntheticCamera::new().silent();
    let usage = camera.usage();
    let mut h = harness(camera, MemoryBackend::default());

    h.manager.start(form()).await.unwrap();
    sleep(Duration::from_secs(2)).await;
    let err = h.manager.stop().await.unwrap_err();

    assert!(matches!(err, RecordingError::Finalize(FinalizeError::NoData)));
    assert_eq!(err.to_string(), "no data recorded");
    assert_eq!(h.manager.status(), SessionStatus::Failed);
    assert_eq!(h.backend.call_count(), 0);
    assert_eq!(usage.held(), 0);
    assert!(!h.downloads.path().join("U123_Jane Doe.webm").exists());
}

#[tokio::test]
async fn test_dead_handle_is_released() {
    let camera = SyntheticCamera::new().dead_on_arrival();
    let usage = camera.usage();
    let mut h = harness(camera, MemoryBackend::default());

    let err = h.manager.start(form()).await.unwrap_err();

    assert!(matches!(err, RecordingError::Encoder(EncoderError::DeadHandle)));
    assert_eq!(h.manager.status(), SessionStatus::Idle);
    assert_eq!(usage.acquired(), 1);
    assert_eq!(usage.held(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_discards_session() {
    let camera = SyntheticCamera::new();
    let usage = camera.usage();
    let mut h = harness(camera, MemoryBackend::default());

    h.manager.start(form()).await.unwrap();
    sleep(Duration::from_millis(2500)).await;
    h.manager.teardown().await;

    assert_eq!(h.manager.status(), SessionStatus::Idle);
    assert_eq!(usage.held(), 0);
    assert!(h.backend.consultations.lock().is_empty());
    assert_eq!(std::fs::read_dir(h.downloads.path()).unwrap().count(), 0);
    assert!(h.manager.stop().await.unwrap().is_none());
}

#[tokio::test]
async fn test_stop_when_idle_is_a_no_op() {
    let mut h = harness(SyntheticCamera::new(), MemoryBackend::default());
    assert!(h.manager.stop().await.unwrap().is_none());
    assert_eq!(h.manager.status(), SessionStatus::Idle);
    assert_eq!(h.manager.elapsed_seconds(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_persist_failure_keeps_download() {
    let camera = SyntheticCamera::new();
    let usage = camera.usage();
    let mut h = harness(camera, MemoryBackend::rejecting_consultation("Duplicate consultation"));

    h.manager.start(form()).await.unwrap();
    sleep(Duration::from_millis(1500)).await;
    let err = h.manager.stop().await.unwrap_err();

    assert_eq!(err.to_string(), "Duplicate consultation");
    assert_eq!(h.manager.status(), SessionStatus::Failed);
    assert_eq!(usage.held(), 0);
    assert!(h.downloads.path().join("U123_Jane Doe.webm").exists());

    // A failed session is recovered by starting over
    h.manager.start(form()).await.unwrap();
    assert_eq!(h.manager.status(), SessionStatus::Recording);
}

#[tokio::test(start_paused = true)]
async fn test_acquire_timeout_holds_nothing() {
    let camera = SyntheticCamera::new().with_open_delay(Duration::from_secs(60));
    let usage = camera.usage();
    let mut h = harness(camera, MemoryBackend::default());
    h.manager = h.manager.with_acquire_timeout(Some(Duration::from_secs(5)));

    let err = h.manager.start(form()).await.unwrap_err();

    assert!(matches!(err, RecordingError::Device(DeviceError::Timeout(_))));
    assert_eq!(usage.acquired(), 0);
    assert_eq!(h.manager.status(), SessionStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_manager_releases_device() {
    let camera = SyntheticCamera::new();
    let usage = camera.usage();
    let h = harness(camera, MemoryBackend::default());
    let common::Harness {
        mut manager,
        backend,
        downloads,
    } = h;

    manager.start(form()).await.unwrap();
    sleep(Duration::from_millis(1500)).await;
    assert_eq!(usage.held(), 1);

    drop(manager);
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }

    assert_eq!(usage.acquired(), 1);
    assert_eq!(usage.held(), 0);
    assert!(backend.consultations.lock().is_empty());
    assert_eq!(std::fs::read_dir(downloads.path()).unwrap().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_lost_camera_is_reported_and_buffered_data_kept() {
    let camera = SyntheticCamera::new().failing_after(Duration::from_millis(2500));
    let usage = camera.usage();
    let mut h = harness(camera, MemoryBackend::default());
    let mut events = h.manager.subscribe();

    h.manager.start(form()).await.unwrap();
    sleep(Duration::from_millis(3500)).await;

    assert_eq!(usage.held(), 0);
    assert_eq!(h.manager.status(), SessionStatus::Stopping);
    assert_eq!(h.manager.encoder_failure(), Some(EncoderError::DeadHandle));

    let mut interrupted = None;
    while let Ok(event) = events.try_recv() {
        if let RecordingEvent::Error(message) = event {
            interrupted = Some(message);
        }
    }
    assert_eq!(
        interrupted.as_deref(),
        Some("Recording interrupted: Capture handle is not live")
    );

    // A new session cannot start until the interrupted one is finalized
    assert!(matches!(
        h.manager.start(form()).await.unwrap_err(),
        RecordingError::AlreadyRecording
    ));

    let record = h.manager.stop().await.unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Completed);
    assert_eq!(h.manager.status(), SessionStatus::Finalized);
    assert!(h.downloads.path().join("U123_Jane Doe.webm").exists());
    assert_eq!(usage.acquired(), 1);

    let ledger = h.manager.upload_ledger().unwrap();
    settle(&ledger).await;
    assert_eq!(h.backend.chunk_sequences(), vec![0, 1]);
}
