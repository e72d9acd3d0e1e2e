use interview_rt::{Classified, ServerEvent, classify};
use serde_json::json;

fn parse(value: serde_json::Value) -> ServerEvent {
    serde_json::from_value(value).unwrap()
}

#[test]
fn beta_and_ga_names_parse_to_the_same_event() {
    let pairs = [
        ("response.audio_transcript.delta", "response.output_audio_transcript.delta"),
        ("response.audio_transcript.done", "response.output_audio_transcript.done"),
        ("response.audio.delta", "response.output_audio.delta"),
        ("response.audio.done", "response.output_audio.done"),
    ];
    for (beta, ga) in pairs {
        let a = parse(json!({"type": beta, "delta": "x", "transcript": "x"}));
        let b = parse(json!({"type": ga, "delta": "x", "transcript": "x"}));
        assert_eq!(a, b, "{beta} vs {ga}");
        assert_eq!(a.kind(), beta);
    }
}

#[test]
fn full_transcript_delta_payload() {
    let event = parse(json!({
        "type": "response.audio_transcript.delta",
        "event_id": "event_4",
        "response_id": "resp_1",
        "item_id": "item_1",
        "output_index": 0,
        "content_index": 0,
        "delta": "Hello"
    }));
    assert_eq!(
        event,
        ServerEvent::ResponseAudioTranscriptDelta {
            event_id: "event_4".to_string(),
            response_id: "resp_1".to_string(),
            item_id: "item_1".to_string(),
            delta: "Hello".to_string(),
        }
    );
    assert_eq!(event.event_id(), Some("event_4"));
}

#[test]
fn session_created_reads_session_fields() {
    let event = parse(json!({
        "type": "session.created",
        "event_id": "event_1",
        "session": {
            "id": "sess_1",
            "object": "realtime.session",
            "model": "gpt-4o-realtime-preview",
            "voice": "alloy",
            "modalities": ["text", "audio"]
        }
    }));
    match event {
        ServerEvent::SessionCreated { session, .. } => {
            assert_eq!(session.id.as_deref(), Some("sess_1"));
            assert_eq!(session.voice.map(|v| v.to_string()).as_deref(), Some("alloy"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn error_event_carries_server_error() {
    let event = parse(json!({
        "type": "error",
        "event_id": "event_9",
        "error": {
            "type": "invalid_request_error",
            "code": "invalid_value",
            "message": "Invalid voice",
            "param": "session.voice",
            "event_id": "client_1"
        }
    }));
    match classify(event) {
        Classified::ServerError(err) => {
            assert_eq!(err.code.as_deref(), Some("invalid_value"));
            assert_eq!(err.param.as_deref(), Some("session.voice"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn unknown_and_malformed_shapes_become_unknown() {
    let unknown = parse(json!({"type": "conversation.item.truncated", "item_id": "x"}));
    assert!(matches!(unknown, ServerEvent::Unknown(_)));
    assert_eq!(unknown.kind(), "conversation.item.truncated");

    // Known type, wrong shape.
    let bad = parse(json!({"type": "session.created", "session": "not an object"}));
    assert!(matches!(bad, ServerEvent::Unknown(_)));

    let untyped = parse(json!({"hello": "world"}));
    assert_eq!(untyped.kind(), "<untyped>");
    assert_eq!(classify(untyped), Classified::Unrecognized("<untyped>".to_string()));
}

#[test]
fn irrelevant_known_events_are_ignored() {
    for value in [
        json!({"type": "response.created", "response": {"id": "resp_1", "status": "in_progress"}}),
        json!({"type": "response.done", "response": {"id": "resp_1", "status": "completed"}}),
        json!({"type": "input_audio_buffer.speech_started", "audio_start_ms": 120, "item_id": "i"}),
        json!({"type": "input_audio_buffer.speech_stopped", "audio_end_ms": 900, "item_id": "i"}),
        json!({"type": "input_audio_buffer.committed", "item_id": "i"}),
        json!({"type": "conversation.item.created", "item": {"id": "i", "type": "message"}}),
        json!({"type": "response.audio_transcript.done", "transcript": "done"}),
        json!({"type": "rate_limits.updated", "rate_limits": [
            {"name": "tokens", "limit": 1000, "remaining": 900, "reset_seconds": 1.5}
        ]}),
    ] {
        let kind = value["type"].as_str().unwrap().to_string();
        assert_eq!(classify(parse(value)), Classified::Ignored(kind));
    }
}

#[test]
fn transcription_failure_is_a_server_error() {
    let event = parse(json!({
        "type": "conversation.item.input_audio_transcription.failed",
        "item_id": "item_2",
        "content_index": 0,
        "error": {"type": "server_error", "message": "audio unreadable"}
    }));
    assert!(matches!(
        classify(event),
        Classified::ServerError(e) if e.message == "audio unreadable"
    ));
}
