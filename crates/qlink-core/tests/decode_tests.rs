//! Event and LED decoding tests
//!
//! Exercise the decoder the way the monitor loop does: raw controller
//! lines in, structured events and LED store contents out.

use qlink_core::{
    decode_line, ButtonAction, Decoder, EventKind, EventSource, LedReport, LedState, LedStore,
    LineDecoder, Terminator,
};
use std::sync::Arc;

#[test]
fn test_all_known_kinds() {
    let cases = [
        ("SW 1 23 5 0", "button"),
        ("LO 1 2 3 4 200", "load_module"),
        ("LS 1 23 2 128", "load_station"),
        ("LV 1 12 90", "load_variable"),
        ("LE 1 19 4C 20", "led_keypad"),
        ("LC 1 23 4 1", "led_lcd"),
        ("FOO 1 2 3", "unknown"),
    ];

    for (line, expected) in cases {
        let event = decode_line(line).unwrap_or_else(|| panic!("no event for {:?}", line));
        assert_eq!(event.type_name(), expected, "line {:?}", line);
        assert_eq!(event.raw, line);
    }
}

#[test]
fn test_levels_are_reported_as_received() {
    match decode_line("LS 1 23 2 128").unwrap().kind {
        EventKind::LoadStation { level, load, .. } => {
            assert_eq!(level, 128);
            assert_eq!(load, 2);
        }
        other => panic!("unexpected kind {:?}", other),
    }

    match decode_line("LV 1 12 90").unwrap().kind {
        EventKind::LoadVariable { variable, level, .. } => {
            assert_eq!(variable, 12);
            assert_eq!(level, 90);
        }
        other => panic!("unexpected kind {:?}", other),
    }
}

#[test]
fn test_release_without_serial() {
    match decode_line("SW 2 60 3 0").unwrap().kind {
        EventKind::Button {
            master,
            state,
            serial,
            ..
        } => {
            assert_eq!(master, 2);
            assert_eq!(state, ButtonAction::Released);
            assert!(serial.is_none());
        }
        other => panic!("unexpected kind {:?}", other),
    }
}

#[test]
fn test_decode_is_deterministic() {
    for line in ["SW 1 23 5 1 0001", "LE 1 19 4C 20", "FOO bar"] {
        let a = decode_line(line).unwrap();
        let b = decode_line(line).unwrap();
        assert_eq!(a.kind, b.kind);
        assert_eq!(a.raw, b.raw);
    }
}

#[test]
fn test_stream_into_store() {
    let store = Arc::new(LedStore::new());
    let decoder = Decoder::new(store.clone());
    let mut lines = LineDecoder::new(Terminator::Cr);

    lines.feed(b"ROS\r\nROL\r\nROD\r\nLE 1 19 4C 20\r\nLC 1 19 8 1\r\n1\r");

    let events: Vec<_> = lines
        .drain_lines()
        .iter()
        .filter_map(|line| decoder.decode(line))
        .collect();

    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.source == EventSource::Events));

    let states = store.get(19);
    assert_eq!(states[&6], LedState::Blink);
    assert_eq!(states[&8], LedState::On);
    assert_eq!(states[&1], LedState::Off);
}

#[test]
fn test_poll_event_matches_report() {
    let report = LedReport::parse("RLT 1 23 4C 20").unwrap();
    let event = qlink_core::Event::from_poll(1, 23, &report, "RLT 1 23 4C 20");
    assert_eq!(event.source, EventSource::Poll);

    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "led_keypad");
    assert_eq!(json["station"], 23);
    assert_eq!(json["button_states"]["6"], "blink");
    assert_eq!(json["source"], "poll");
}
