use proptest::prelude::*;
use std::time::Duration;
use tekscope_rs::block_reader::{BlockError, BLOCK_SIZE};
use tekscope_rs::header_reader::HeaderReadError;
use tekscope_rs::preamble::{HeaderError, HeaderField};
use tekscope_rs::{
    AcquisitionConfig, AcquisitionError, AcquisitionEvent, CaptureMode, CaptureSequencer,
    ChannelDescriptor, FnSink, MockTransport, SequencerState, TransportError, YUnit,
};

fn header(id: &str, point_count: &str, y_unit: &str) -> String {
    format!("1;8;BIN;RI;MSB;{point_count};\"{id}\";Y;4.0e-7;0;0.0;\"s\";3.9e-3;0.0;0.0;\"{y_unit}\";")
}

fn response(header: &str, codes: &[u8]) -> Vec<u8> {
    let mut bytes = header.as_bytes().to_vec();
    bytes.extend_from_slice(format!("#{}{}", codes.len().to_string().len(), codes.len()).as_bytes());
    bytes.extend_from_slice(codes);
    bytes.push(b'\n');
    bytes
}

fn curve(code: u8) -> Vec<u8> {
    vec![code; BLOCK_SIZE]
}

fn free_running_scope() -> MockTransport {
    MockTransport::new()
        .respond("ACQ:STATE?", "1\n")
        .respond("ACQ:STOPA?", "RUNSTOP\n")
}

fn config() -> AcquisitionConfig {
    AcquisitionConfig::default().settle_delay(Duration::ZERO)
}

/// Compact rendering of the event stream, e.g. `["B0", "W0:0", "E0", "S"]`.
fn markers(events: &[AcquisitionEvent]) -> Vec<String> {
    events
        .iter()
        .map(|event| match event {
            AcquisitionEvent::FrameBegin { frame } => format!("B{frame}"),
            AcquisitionEvent::Waveform(w) => format!("W{}:{}", w.frame, w.channel),
            AcquisitionEvent::FrameEnd { frame } => format!("E{frame}"),
            AcquisitionEvent::SequenceEnd => "S".to_string(),
        })
        .collect()
}

fn run(
    mock: &mut MockTransport,
    channels: &[ChannelDescriptor],
    config: AcquisitionConfig,
    events: &mut Vec<AcquisitionEvent>,
) -> Result<(), AcquisitionError> {
    let mut sequencer = CaptureSequencer::new(channels, config)?;
    sequencer.start(mock, events)?;
    while !sequencer.is_done() {
        sequencer.on_readable(mock, events)?;
    }
    Ok(())
}

#[test]
fn test_two_channels_two_frames() {
    let mut mock = free_running_scope();
    for code in [1u8, 2, 3, 4] {
        mock = mock.respond("WAVF?", response(&header("CH", "2500", "Volts"), &curve(code)));
    }
    let channels = [ChannelDescriptor::new(0), ChannelDescriptor::new(1)];
    let mut events: Vec<AcquisitionEvent> = Vec::new();
    run(&mut mock, &channels, config().limit_frames(2), &mut events).unwrap();

    assert_eq!(
        markers(&events),
        vec!["B0", "W0:0", "W0:1", "E0", "B1", "W1:0", "W1:1", "E1", "S"]
    );
    let first_codes: Vec<f32> = events
        .iter()
        .filter_map(|event| match event {
            AcquisitionEvent::Waveform(w) => Some(w.samples[0]),
            _ => None,
        })
        .collect();
    for (value, code) in first_codes.iter().zip([1.0f32, 2.0, 3.0, 4.0]) {
        assert!((value - code * 3.9e-3).abs() < 1e-6);
    }

    let sent = mock.sent();
    let waveform_queries: Vec<&String> = sent.iter().filter(|c| c.starts_with("DAT:SOU")).collect();
    assert_eq!(waveform_queries, ["DAT:SOU CH1", "DAT:SOU CH2", "DAT:SOU CH1", "DAT:SOU CH2"]);
    assert_eq!(sent.iter().filter(|c| *c == "ACQ:STATE RUN").count(), 3);
    assert_eq!(&sent[sent.len() - 2..], ["ACQ:STOPA RUNST", "ACQ:STATE RUN"]);
}

#[test]
fn test_disabled_channels_are_skipped() {
    let mut mock = free_running_scope()
        .respond("WAVF?", response(&header("CH3", "2500", "Volts"), &curve(9)));
    let channels = [
        ChannelDescriptor::new(0).enabled(false),
        ChannelDescriptor::new(2),
    ];
    let mut events: Vec<AcquisitionEvent> = Vec::new();
    run(&mut mock, &channels, config(), &mut events).unwrap();
    assert_eq!(markers(&events), vec!["B0", "W0:2", "E0", "S"]);
    assert!(mock.sent().contains(&"DAT:SOU CH3".to_string()));
}

#[test]
fn test_sample_header_calibration() {
    let mut codes = curve(0);
    codes[0] = 127;
    codes[1] = 0x81;
    let mut mock = free_running_scope()
        .respond("WAVF?", response(&header("CH1", "2500", "Volts"), &codes));
    let mut events: Vec<AcquisitionEvent> = Vec::new();
    run(&mut mock, &[ChannelDescriptor::new(0).vertical_scale(0.05)], config(), &mut events).unwrap();

    let AcquisitionEvent::Waveform(waveform) = &events[1] else {
        unreachable!("second event is the waveform")
    };
    assert_eq!(waveform.len(), BLOCK_SIZE);
    assert!((waveform.samples[0] - 0.4953).abs() < 1e-4);
    assert!((waveform.samples[1] + 0.4953).abs() < 1e-4);
    assert_eq!(waveform.unit, YUnit::Volts);
    assert_eq!(waveform.digits, 2);
    assert!((waveform.x_increment - 4.0e-7).abs() < 1e-15);
    assert!(waveform.decode_report.is_clean());
}

#[test]
fn test_unknown_unit_is_advisory() {
    let mut mock = free_running_scope()
        .respond("WAVF?", response(&header("CH1", "2500", "XYZ"), &curve(10)));
    let mut events: Vec<AcquisitionEvent> = Vec::new();
    run(&mut mock, &[ChannelDescriptor::new(0)], config(), &mut events).unwrap();

    assert_eq!(markers(&events), vec!["B0", "W0:0", "E0", "S"]);
    let AcquisitionEvent::Waveform(waveform) = &events[1] else {
        unreachable!("second event is the waveform")
    };
    assert_eq!(waveform.unit, YUnit::Unknown);
    assert!(waveform.decode_report.has_error(HeaderField::YUnit));
    assert!(!waveform.decode_report.has_error(HeaderField::YMultiplier));
}

#[test]
fn test_short_read_in_header_aborts() {
    let full = response(&header("CH1", "2500", "Volts"), &curve(1));
    let mut mock = free_running_scope().respond("WAVF?", &full[..50]);
    let mut events: Vec<AcquisitionEvent> = Vec::new();
    let result = run(&mut mock, &[ChannelDescriptor::new(0)], config(), &mut events);

    assert!(matches!(
        result,
        Err(AcquisitionError::HeaderRead(HeaderReadError::Transport(
            TransportError::ShortRead {
                requested: 100,
                received: 50
            }
        )))
    ));
    assert_eq!(markers(&events), vec!["B0", "E0", "S"]);
}

#[test]
fn test_short_read_in_block_aborts() {
    let full = response(&header("CH1", "2500", "Volts"), &curve(1));
    let mut mock = free_running_scope().respond("WAVF?", &full[..full.len() - 1000]);
    let channels = [ChannelDescriptor::new(0), ChannelDescriptor::new(1)];
    let mut events: Vec<AcquisitionEvent> = Vec::new();
    let result = run(&mut mock, &channels, config().limit_frames(2), &mut events);

    assert!(matches!(
        result,
        Err(AcquisitionError::Block(BlockError::Truncated {
            expected: BLOCK_SIZE,
            ..
        }))
    ));
    assert_eq!(markers(&events), vec!["B0", "E0", "S"]);
    // the instrument is put back into free-run
    let sent = mock.sent();
    assert_eq!(&sent[sent.len() - 2..], ["ACQ:STOPA RUNST", "ACQ:STATE RUN"]);
}

#[test]
fn test_unfinished_transaction_is_desync() {
    let mut mock = free_running_scope()
        .respond("WAVF?", response(&header("CH1", "2500", "Volts"), &curve(1)))
        .hold_transaction_open();
    let mut events: Vec<AcquisitionEvent> = Vec::new();
    let result = run(&mut mock, &[ChannelDescriptor::new(0)], config(), &mut events);

    assert!(matches!(result, Err(AcquisitionError::ReadNotComplete)));
    assert_eq!(markers(&events), vec!["B0", "E0", "S"]);
}

#[test]
fn test_invalid_point_count_aborts() {
    let mut mock = free_running_scope()
        .respond("WAVF?", response(&header("CH1", "0", "Volts"), &curve(1)));
    let mut events: Vec<AcquisitionEvent> = Vec::new();
    let result = run(&mut mock, &[ChannelDescriptor::new(0)], config(), &mut events);

    assert!(matches!(
        result,
        Err(AcquisitionError::Header(HeaderError::InvalidPointCount(0)))
    ));
    assert_eq!(markers(&events), vec!["B0", "E0", "S"]);
}

#[test]
fn test_single_shot_leaves_instrument_halted() {
    let mut mock = free_running_scope()
        .respond("WAVF?", response(&header("CH1", "2500", "Volts"), &curve(1)));
    let mut events: Vec<AcquisitionEvent> = Vec::new();
    run(
        &mut mock,
        &[ChannelDescriptor::new(0)],
        config().mode(CaptureMode::SingleShot),
        &mut events,
    )
    .unwrap();

    let sent = mock.sent();
    assert!(!sent.iter().any(|c| c == "ACQ:STOPA RUNST"));
    assert_eq!(sent.last().map(String::as_str), Some("WAVF?"));
}

#[test]
fn test_display_snapshot_waits_after_first_channel() {
    let mut mock = MockTransport::new()
        .respond("ACQ:STATE?", "0\n")
        .respond("ACQ:STOPA?", "RUNSTOP\n")
        .respond("WAVF?", response(&header("CH1", "2500", "Volts"), &curve(1)))
        .respond("WAVF?", response(&header("CH2", "2500", "Volts"), &curve(2)));
    let channels = [ChannelDescriptor::new(0), ChannelDescriptor::new(1)];
    let mut events: Vec<AcquisitionEvent> = Vec::new();
    run(
        &mut mock,
        &channels,
        config().mode(CaptureMode::DisplaySnapshot),
        &mut events,
    )
    .unwrap();

    assert_eq!(
        mock.sent(),
        vec![
            "ACQ:STATE?",
            "ACQ:STOPA?",
            "DAT:ENC RIB",
            "DAT:WID 1",
            "DAT:SOU CH1",
            "WAVF?",
            "DAT:SOU CH2",
            "*WAI",
            "WAVF?",
            "ACQ:STOPA RUNST",
            "ACQ:STATE RUN",
        ]
    );
}

#[test]
fn test_multi_frame_display_snapshot_waits_for_every_trigger() {
    let mut mock = free_running_scope()
        .respond("WAVF?", response(&header("CH1", "2500", "Volts"), &curve(1)))
        .respond("WAVF?", response(&header("CH1", "2500", "Volts"), &curve(2)));
    let mut events: Vec<AcquisitionEvent> = Vec::new();
    run(
        &mut mock,
        &[ChannelDescriptor::new(0)],
        config().mode(CaptureMode::DisplaySnapshot).limit_frames(2),
        &mut events,
    )
    .unwrap();

    assert_eq!(markers(&events), vec!["B0", "W0:0", "E0", "B1", "W1:0", "E1", "S"]);
    assert_eq!(
        mock.sent(),
        vec![
            "ACQ:STATE?",
            "ACQ:STOPA?",
            "DAT:ENC RIB",
            "DAT:WID 1",
            "ACQ:STATE STOP",
            "ACQ:STOPA SEQ",
            "ACQ:STATE RUN",
            "DAT:SOU CH1",
            "*WAI",
            "WAVF?",
            "ACQ:STATE RUN",
            "DAT:SOU CH1",
            "*WAI",
            "WAVF?",
            "ACQ:STOPA RUNST",
            "ACQ:STATE RUN",
        ]
    );
}

#[test]
fn test_send_failure_in_later_frame_restores_instrument() {
    let mut mock = free_running_scope()
        .respond("WAVF?", response(&header("CH1", "2500", "Volts"), &curve(1)))
        .fail_on_send_after("DAT:SOU CH1", 1);
    let mut events: Vec<AcquisitionEvent> = Vec::new();
    let result = run(&mut mock, &[ChannelDescriptor::new(0)], config().limit_frames(2), &mut events);

    assert!(matches!(
        result,
        Err(AcquisitionError::Transport(TransportError::Io(_)))
    ));
    assert_eq!(markers(&events), vec!["B0", "W0:0", "E0", "B1", "E1", "S"]);
    let sent = mock.sent();
    assert_eq!(
        &sent[sent.len() - 3..],
        ["ACQ:STATE RUN", "ACQ:STOPA RUNST", "ACQ:STATE RUN"]
    );
    assert_eq!(sent.iter().filter(|c| *c == "DAT:SOU CH1").count(), 1);
}

#[test]
fn test_failed_mode_switch_restarts_stopped_instrument() {
    let mut mock = free_running_scope().fail_on_send("ACQ:STOPA SEQ");
    let mut events: Vec<AcquisitionEvent> = Vec::new();
    let result = run(&mut mock, &[ChannelDescriptor::new(0)], config(), &mut events);

    assert!(matches!(result, Err(AcquisitionError::Transport(_))));
    assert_eq!(markers(&events), vec!["S"]);
    assert_eq!(
        mock.sent(),
        vec![
            "ACQ:STATE?",
            "ACQ:STOPA?",
            "DAT:ENC RIB",
            "DAT:WID 1",
            "ACQ:STATE STOP",
            "ACQ:STOPA RUNST",
            "ACQ:STATE RUN",
        ]
    );
}

#[test]
fn test_unlimited_capture_until_stopped() {
    let mut mock = free_running_scope();
    for code in 0..3u8 {
        mock = mock.respond("WAVF?", response(&header("CH1", "2500", "Volts"), &curve(code)));
    }
    let mut sequencer =
        CaptureSequencer::new(&[ChannelDescriptor::new(0)], config().limit_frames(0)).unwrap();
    let mut frames: Vec<AcquisitionEvent> = Vec::new();
    let mut sink = FnSink(|event: AcquisitionEvent| frames.push(event));

    sequencer.start(&mut mock, &mut sink).unwrap();
    while sequencer.session().frames_captured() < 3 {
        sequencer.on_readable(&mut mock, &mut sink).unwrap();
    }
    assert_eq!(sequencer.state(), SequencerState::AwaitingHeader);
    sequencer.stop(&mut mock, &mut sink);
    assert!(sequencer.is_done());
    drop(sink);

    assert_eq!(
        markers(&frames),
        vec!["B0", "W0:0", "E0", "B1", "W1:0", "E1", "B2", "W2:0", "E2", "B3", "E3", "S"]
    );
    let sent = mock.sent();
    assert_eq!(&sent[sent.len() - 2..], ["ACQ:STOPA RUNST", "ACQ:STATE RUN"]);
}

#[test]
fn test_settle_delay_before_first_read() {
    let mut mock = free_running_scope()
        .respond("WAVF?", response(&header("CH1", "2500", "Volts"), &curve(1)));
    let mut events: Vec<AcquisitionEvent> = Vec::new();
    let settle = Duration::from_millis(20);
    let started = std::time::Instant::now();
    run(
        &mut mock,
        &[ChannelDescriptor::new(0)],
        config().settle_delay(settle),
        &mut events,
    )
    .unwrap();
    assert!(started.elapsed() >= settle);
    assert_eq!(mock.read_begins(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_fragmentation_does_not_change_result(
        gaps in proptest::collection::vec(any::<bool>(), 0..200),
        read_limit in 100usize..3000,
        code in any::<u8>(),
    ) {
        let mut mock = free_running_scope()
            .read_limit(read_limit)
            .would_block_before_reads(gaps)
            .respond("WAVF?", response(&header("CH1", "2500", "Volts"), &curve(code)));
        let mut events: Vec<AcquisitionEvent> = Vec::new();
        run(&mut mock, &[ChannelDescriptor::new(0)], config(), &mut events).unwrap();

        prop_assert_eq!(markers(&events), vec!["B0", "W0:0", "E0", "S"]);
        let AcquisitionEvent::Waveform(waveform) = &events[1] else {
            unreachable!("second event is the waveform")
        };
        let expected = f32::from(i8::from_ne_bytes([code])) * 3.9e-3;
        prop_assert_eq!(waveform.len(), BLOCK_SIZE);
        prop_assert!(waveform.samples.iter().all(|v| (v - expected).abs() < 1e-5));
        prop_assert!(waveform.decode_report.is_clean());
    }
}
