//! Property-based tests for streamed answer assembly.

use bytes::Bytes;
use futures::executor::block_on;
use futures::stream::{self, StreamExt};
use proptest::prelude::*;

use ragchat_core::backend::stream::decode_stream;
use ragchat_core::config::StreamTransport;
use ragchat_core::error::BackendError;
use ragchat_core::session::ChatSession;

/// Split `bytes` at the given cut points (taken modulo its length).
fn split_at(bytes: &[u8], cuts: &[usize]) -> Vec<Bytes> {
    if bytes.is_empty() {
        return Vec::new();
    }
    let mut points: Vec<usize> = cuts.iter().map(|c| c % bytes.len()).collect();
    points.push(0);
    points.push(bytes.len());
    points.sort_unstable();
    points.dedup();
    points
        .windows(2)
        .map(|w| Bytes::copy_from_slice(&bytes[w[0]..w[1]]))
        .collect()
}

fn decode_all(chunks: Vec<Bytes>, transport: StreamTransport) -> Vec<String> {
    let source = stream::iter(chunks.into_iter().map(Ok::<Bytes, BackendError>));
    block_on(decode_stream(source, transport).collect::<Vec<_>>())
        .into_iter()
        .map(|item| item.expect("no stream errors expected"))
        .collect()
}

// --- Session assembly ---

proptest! {
    #[test]
    fn assistant_text_is_running_concatenation(fragments in prop::collection::vec(".{0,12}", 0..20)) {
        let mut session = ChatSession::new();
        session.begin_submission(None, "question").unwrap();
        session.start_streaming().unwrap();

        let mut expected = String::new();
        for fragment in &fragments {
            expected.push_str(fragment);
            let text = session.append_fragment(fragment).unwrap();
            prop_assert_eq!(text, expected.as_str());
        }
        prop_assert_eq!(session.complete().unwrap(), fragments.concat());
        prop_assert!(!session.is_busy());
    }

    #[test]
    fn history_never_contains_pending_message(
        questions in prop::collection::vec("[a-z]{1,8}", 1..6),
    ) {
        let mut session = ChatSession::new();
        for (n, question) in questions.iter().enumerate() {
            let request = session.begin_submission(None, question).unwrap();
            prop_assert_eq!(request.history.len(), n * 2);
            prop_assert_eq!(&request.message, question);
            session.start_streaming().unwrap();
            session.append_fragment("ok").unwrap();
            session.complete().unwrap();
        }
    }
}

// --- Transport decoding ---

proptest! {
    #[test]
    fn chunked_body_survives_any_split(text in "\\PC{0,64}", cuts in prop::collection::vec(0usize..256, 0..8)) {
        let chunks = split_at(text.as_bytes(), &cuts);
        let decoded = decode_all(chunks, StreamTransport::Chunked);
        prop_assert_eq!(decoded.concat(), text);
    }

    #[test]
    fn sse_events_survive_any_split(
        fragments in prop::collection::vec("\\PC{1,10}", 1..10),
        cuts in prop::collection::vec(0usize..1024, 0..12),
    ) {
        let mut body = String::new();
        for fragment in &fragments {
            let event = serde_json::json!({ "content": fragment });
            body.push_str(&format!("data: {}\n\n", event));
        }
        body.push_str("data: [DONE]\n\n");

        let decoded = decode_all(split_at(body.as_bytes(), &cuts), StreamTransport::Sse);
        prop_assert_eq!(decoded, fragments);
    }
}

fn plain_token() -> impl Strategy<Value = String> {
    prop_oneof![
        "[0-9]{1,6}",
        "-?[0-9]{1,3}\\.[0-9]{1,3}",
        "(true|false|null)",
        "[a-z ]{1,8}",
    ]
}

fn line_ending() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("\n"), Just("\r\n"), Just("\r")]
}

proptest! {
    #[test]
    fn plain_text_tokens_survive_any_split(
        tokens in prop::collection::vec(plain_token(), 1..10),
        eol in line_ending(),
        cuts in prop::collection::vec(0usize..512, 0..12),
    ) {
        let mut body = String::new();
        for token in &tokens {
            body.push_str(&format!("data: {token}{eol}{eol}"));
        }

        let decoded = decode_all(split_at(body.as_bytes(), &cuts), StreamTransport::Sse);
        prop_assert_eq!(decoded.concat(), tokens.concat());
    }

    #[test]
    fn multi_line_events_keep_line_breaks(
        events in prop::collection::vec(prop::collection::vec("[a-z0-9 ]{0,8}", 1..4), 1..6),
        eol in line_ending(),
        cuts in prop::collection::vec(0usize..512, 0..12),
    ) {
        let mut body = String::new();
        for lines in &events {
            for line in lines {
                body.push_str(&format!("data: {line}{eol}"));
            }
            body.push_str(eol);
        }

        let expected: Vec<String> = events
            .iter()
            .map(|lines| lines.join("\n"))
            .filter(|text| !text.is_empty())
            .collect();
        let decoded = decode_all(split_at(body.as_bytes(), &cuts), StreamTransport::Sse);
        prop_assert_eq!(decoded, expected);
    }
}
