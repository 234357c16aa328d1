use std::sync::Arc;
use std::time::Duration;

use mmaudio_lib::events::Recorder;
use mmaudio_lib::output::{ManualBackend, NullBackend};
use mmaudio_lib::test_data::{midi_melody, sine_wav, tone_melody};
use mmaudio_lib::{
    ControlOp, ControlValue, EngineConfig, MediaError, MediaEvent, MediaManager, MediaType,
    PlayerState, Status,
};

const WAIT: Duration = Duration::from_secs(2);

fn config() -> EngineConfig {
    EngineConfig {
        output_rate: 8000,
        output_channels: 2,
        block_samples: 80,
        realize_timeout_ms: 500,
        ..EngineConfig::default()
    }
}

fn manager(recorder: &Recorder) -> (MediaManager, ManualBackend) {
    let backend = ManualBackend::new();
    let manager =
        MediaManager::new(config(), Arc::new(backend.clone()), Some(recorder.listener())).unwrap();
    (manager, backend)
}

fn is_silent(block: &[u8]) -> bool {
    block.iter().all(|b| *b == 0)
}

#[test]
fn players_of_one_application_share_a_session() {
    let recorder = Recorder::new();
    let (manager, backend) = manager(&recorder);

    let midi = manager.create(7, 1, None, Some("file:///a.mid"), None).unwrap().handle;
    let wave = manager.create(7, 2, None, Some("file:///b.wav"), None).unwrap().handle;
    let other = manager.create(8, 3, None, Some("device://midi"), None).unwrap().handle;
    assert_eq!(manager.pool().live_sessions(), 2);
    assert_eq!(manager.pool().ref_count(7), Some(2));
    assert_eq!(backend.open_channels(), 2);

    manager.destroy(midi).unwrap();
    assert_eq!(manager.pool().ref_count(7), Some(1));
    manager.destroy(wave).unwrap();
    assert_eq!(manager.pool().ref_count(7), None);
    assert_eq!(backend.open_channels(), 1);
    manager.destroy(other).unwrap();
    assert_eq!(manager.pool().live_sessions(), 0);
}

#[test]
fn midi_and_wave_players_mix_into_one_output() {
    let recorder = Recorder::new();
    let (manager, backend) = manager(&recorder);

    let song = midi_melody(&[60, 64, 67, 72], 250, Some("Arpeggio"), false);
    let midi = manager
        .create(1, 1, Some(MediaType::Midi), None, Some(song.len() as u64))
        .unwrap();
    let ticket = midi.realize.unwrap();
    for chunk in song.chunks(7) {
        manager.submit_data(midi.handle, Some(chunk)).unwrap();
    }
    ticket.wait().unwrap();

    let wav = sine_wav(8000, 1, 16, 2000).unwrap();
    let wave = manager.create(1, 2, Some(MediaType::Pcm), None, None).unwrap().handle;
    manager.submit_data(wave, Some(&wav)).unwrap();
    manager.submit_data(wave, None).unwrap();

    assert!(is_silent(&backend.pull(0).unwrap()));
    manager.control(midi.handle, ControlOp::Start).unwrap();
    manager.control(wave, ControlOp::Start).unwrap();
    backend.pump(10);
    assert!(!is_silent(&backend.pull(0).unwrap()));

    assert_eq!(
        manager.control(midi.handle, ControlOp::MetadataKey(0)).unwrap(),
        ControlValue::Text("title".to_string())
    );
    assert_eq!(
        manager.control(wave, ControlOp::GetDuration).unwrap(),
        ControlValue::Int(2000)
    );

    // The MIDI file is 1 s long, the wave 2 s.
    backend.pump(100);
    assert_eq!(recorder.wait_for(1, MediaEvent::EndOfMedia, 1, WAIT), 1);
    assert_eq!(recorder.count(2, MediaEvent::EndOfMedia), 0);
    assert_eq!(manager.state(midi.handle).unwrap(), PlayerState::Prefetched);
    assert_eq!(manager.state(wave).unwrap(), PlayerState::Started);

    backend.pump(100);
    assert_eq!(recorder.wait_for(2, MediaEvent::EndOfMedia, 1, WAIT), 1);
    assert_eq!(manager.state(wave).unwrap(), PlayerState::Prefetched);
}

#[test]
fn muted_content_renders_silence() {
    let recorder = Recorder::new();
    let (manager, backend) = manager(&recorder);
    let handle = manager.create(1, 1, Some(MediaType::Tone), None, None).unwrap().handle;
    manager.submit_data(handle, Some(&tone_melody(&[69, 71, 72]))).unwrap();
    manager.submit_data(handle, None).unwrap();
    manager.control(handle, ControlOp::SetMute(true)).unwrap();
    manager.control(handle, ControlOp::Start).unwrap();
    backend.pump(5);
    assert!(is_silent(&backend.pull(0).unwrap()));

    manager.control(handle, ControlOp::SetMute(false)).unwrap();
    backend.pump(2);
    assert!(!is_silent(&backend.pull(0).unwrap()));
}

#[test]
fn pool_capacity_is_enforced_and_recovers() {
    let recorder = Recorder::new();
    let (manager, _backend) = manager(&recorder);
    let handles: Vec<_> = (0..20)
        .map(|app| {
            manager
                .create(app, 1, Some(MediaType::DeviceTone), None, None)
                .unwrap()
                .handle
        })
        .collect();
    assert!(matches!(
        manager.create(99, 1, Some(MediaType::DeviceTone), None, None),
        Err(MediaError::Fail(_))
    ));
    // Joining an existing session still works when the pool is full.
    manager.create(5, 2, Some(MediaType::DeviceMidi), None, None).unwrap();

    manager.destroy(handles[0]).unwrap();
    manager.create(99, 1, Some(MediaType::DeviceTone), None, None).unwrap();
}

#[test]
fn missing_output_device_is_reported_but_not_fatal() {
    let recorder = Recorder::new();
    let manager =
        MediaManager::new(config(), Arc::new(NullBackend), Some(recorder.listener())).unwrap();
    let creation = manager.create(1, 1, Some(MediaType::DeviceMidi), None, None).unwrap();
    assert_eq!(creation.status, Status::NoAudioDevice);
    assert!(matches!(
        manager.control(creation.handle, ControlOp::Start),
        Err(MediaError::NoAudioDevice)
    ));
    assert_eq!(
        manager.control(creation.handle, ControlOp::SetVolume(40)).unwrap(),
        ControlValue::Int(40)
    );
    manager.destroy(creation.handle).unwrap();
    assert_eq!(recorder.count(1, MediaEvent::DestroyFinished), 1);
}

#[test]
fn unknown_soundbank_fails_every_creation() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        soundbank_path: Some(dir.path().join("missing.dls")),
        ..config()
    };
    let manager = MediaManager::new(config, Arc::new(ManualBackend::new()), None).unwrap();
    for player in 0..2 {
        assert!(matches!(
            manager.create(1, player, Some(MediaType::DeviceTone), None, None),
            Err(MediaError::Soundbank(_))
        ));
    }
    assert_eq!(manager.pool().live_sessions(), 0);
}

#[test]
fn malformed_content_fails_prefetch_without_leaking() {
    let recorder = Recorder::new();
    let (manager, _backend) = manager(&recorder);
    let handle = manager.create(1, 1, Some(MediaType::Midi), None, None).unwrap().handle;
    manager.submit_data(handle, Some(b"definitely not a midi file")).unwrap();
    manager.submit_data(handle, None).unwrap();
    assert!(manager.control(handle, ControlOp::Start).is_err());
    assert_eq!(manager.state(handle).unwrap(), PlayerState::Realized);
    manager.destroy(handle).unwrap();
    assert_eq!(manager.pool().live_sessions(), 0);
}

#[test]
fn tone_player_lifecycle_restores_the_session_reference() {
    let recorder = Recorder::new();
    let (manager, backend) = manager(&recorder);
    let held = manager.pool().acquire(1).unwrap();
    let before = manager.pool().ref_count(1);
    assert_eq!(before, Some(1));

    let handle = manager.create(1, 4, Some(MediaType::Tone), None, None).unwrap().handle;
    manager.submit_data(handle, Some(&tone_melody(&[60, 64, 67]))).unwrap();
    manager.submit_data(handle, None).unwrap();
    manager.control(handle, ControlOp::Start).unwrap();
    assert_eq!(manager.state(handle).unwrap(), PlayerState::Started);
    backend.pump(5);
    manager.control(handle, ControlOp::Stop).unwrap();
    assert_eq!(recorder.count(4, MediaEvent::StopFinished), 1);
    manager.destroy(handle).unwrap();
    manager.destroy(handle).unwrap();

    assert_eq!(recorder.count(4, MediaEvent::DestroyFinished), 1);
    assert_eq!(manager.pool().ref_count(1), before);
    assert_eq!(backend.open_channels(), 1);
    manager.pool().release(held.handle).unwrap();
    assert_eq!(manager.pool().ref_count(1), None);
}
