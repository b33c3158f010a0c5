//! Streaming sessions against a raw HTTP/1.1 server that controls exactly
//! how the body is chunked and paced.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pulse_client::{
    ClientConfig, DiagnosisClient, QueryError, SessionEnd, SessionEvent, StopReason,
    StreamController,
};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Barrier;

#[derive(Clone)]
enum Step {
    Chunk(&'static [u8]),
    Pause(Duration),
    /// Close the socket without the terminating chunk.
    Abort,
}

/// Serve every connection with the same chunked response script.
async fn serve(script: Vec<Step>) -> SocketAddr {
    serve_with_status("200 OK", script).await
}

async fn serve_with_status(status: &'static str, script: Vec<Step>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(respond(socket, status, script.clone()));
        }
    });
    addr
}

async fn respond(mut socket: TcpStream, status: &'static str, script: Vec<Step>) {
    if read_request(&mut socket).await.is_none() {
        return;
    }

    let head = format!(
        "HTTP/1.1 {status}\r\n\
         content-type: application/x-ndjson\r\n\
         transfer-encoding: chunked\r\n\r\n"
    );
    if socket.write_all(head.as_bytes()).await.is_err() {
        return;
    }

    for step in script {
        match step {
            Step::Chunk(data) => {
                let frame = [
                    format!("{:x}\r\n", data.len()).as_bytes(),
                    data,
                    &b"\r\n"[..],
                ]
                .concat();
                if socket.write_all(&frame).await.is_err() || socket.flush().await.is_err() {
                    return;
                }
            }
            Step::Pause(d) => tokio::time::sleep(d).await,
            Step::Abort => return,
        }
    }
    let _ = socket.write_all(b"0\r\n\r\n").await;
}

/// Read request headers and a `content-length` body.
async fn read_request(socket: &mut TcpStream) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 1024];
    let header_end = loop {
        let n = socket.read(&mut tmp).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
    let content_length = head
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut tmp).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&tmp[..n]);
    }
    Some(buf[header_end..].to_vec())
}

fn controller_for(addr: SocketAddr) -> StreamController {
    let client = DiagnosisClient::from_config(ClientConfig::default())
        .expect("client builds")
        .base_url(format!("http://{addr}"));
    StreamController::new(client)
}

#[tokio::test]
async fn records_split_mid_record_and_mid_character() {
    // "腹" is E8 85 B9.
    let addr = serve(vec![
        Step::Chunk(b"{\"word\":\"\xE8"),
        Step::Pause(Duration::from_millis(30)),
        Step::Chunk(b"\x85\xB9\",\"weight\":1}\n{\"ans"),
        Step::Pause(Duration::from_millis(30)),
        Step::Chunk(b"wer\":\"ok\"}\n"),
    ])
    .await;

    let collected = controller_for(addr).start("q").collect().await;
    let values: Vec<_> = collected.records.into_iter().map(|r| r.value).collect();
    assert_eq!(
        values,
        vec![json!({"word": "腹", "weight": 1}), json!({"answer": "ok"})]
    );
    assert!(matches!(collected.end, Some(SessionEnd::Completed { records: 2 })));
}

#[tokio::test]
async fn record_is_not_delivered_before_its_separator() {
    let addr = serve(vec![
        Step::Chunk(b"{\"a\":1}"),
        Step::Pause(Duration::from_millis(300)),
        Step::Chunk(b"\n"),
    ])
    .await;

    let mut session = controller_for(addr).start("q");
    let early = tokio::time::timeout(Duration::from_millis(100), session.next_event()).await;
    assert!(early.is_err(), "record delivered before its separator");

    assert!(matches!(
        session.next_event().await,
        Some(SessionEvent::Record(r)) if r.value == json!({"a": 1})
    ));
    assert!(matches!(
        session.next_event().await,
        Some(SessionEvent::End(SessionEnd::Completed { records: 1 }))
    ));
}

#[tokio::test]
async fn mid_stream_disconnect_keeps_delivered_records() {
    let addr = serve(vec![
        Step::Chunk(b"{\"word\":\"\xE8\x84\x89\"}\n{\"word\":"),
        Step::Pause(Duration::from_millis(30)),
        Step::Abort,
    ])
    .await;

    let collected = controller_for(addr).start("q").collect().await;
    assert_eq!(collected.records.len(), 1);
    assert_eq!(collected.records[0].value, json!({"word": "脉"}));
    match collected.end {
        Some(SessionEnd::Failed(QueryError::Stream {
            records_received, ..
        })) => assert_eq!(records_received, 1),
        other => panic!("expected Failed(Stream), got: {other:?}"),
    }
}

#[tokio::test]
async fn superseded_session_stops_mid_stream() {
    let addr = serve(vec![
        Step::Chunk(b"{\"seq\":0}\n"),
        Step::Pause(Duration::from_millis(500)),
        Step::Chunk(b"{\"seq\":1}\n"),
    ])
    .await;
    let controller = controller_for(addr);

    let mut first = controller.start("first");
    assert!(matches!(
        first.next_event().await,
        Some(SessionEvent::Record(r)) if r.value == json!({"seq": 0})
    ));

    let second = controller.start("second");

    // No further records from the first session, and the stop is not an error.
    assert!(matches!(
        first.next_event().await,
        Some(SessionEvent::End(SessionEnd::Stopped(StopReason::Superseded)))
    ));
    assert!(first.next_event().await.is_none());

    let collected = second.collect().await;
    assert_eq!(collected.records.len(), 2);
    assert!(matches!(collected.end, Some(SessionEnd::Completed { records: 2 })));
}

#[tokio::test]
async fn explicit_cancel_is_distinct_from_failure() {
    let addr = serve(vec![
        Step::Chunk(b"{\"seq\":0}\n"),
        Step::Pause(Duration::from_secs(5)),
        Step::Chunk(b"{\"seq\":1}\n"),
    ])
    .await;

    let mut session = controller_for(addr).start("q");
    assert!(matches!(session.next_event().await, Some(SessionEvent::Record(_))));

    session.cancel();
    assert!(matches!(
        session.next_event().await,
        Some(SessionEvent::End(SessionEnd::Stopped(StopReason::Cancelled)))
    ));
    assert!(!session.is_open());
}

#[tokio::test]
async fn status_survives_truncated_error_body() {
    let addr = serve_with_status(
        "500 Internal Server Error",
        vec![Step::Chunk(b"CUDA out of"), Step::Abort],
    )
    .await;

    let collected = controller_for(addr).start("q").collect().await;
    assert!(collected.records.is_empty());
    match collected.end {
        Some(SessionEnd::Failed(QueryError::Status { status, .. })) => {
            assert_eq!(status.as_u16(), 500);
        }
        other => panic!("expected Failed(Status), got: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_leave_exactly_one_current_session() {
    const STARTERS: usize = 8;

    let addr = serve(vec![
        Step::Pause(Duration::from_millis(300)),
        Step::Chunk(b"{\"done\":true}\n"),
    ])
    .await;
    let controller = controller_for(addr);
    let barrier = Arc::new(Barrier::new(STARTERS));

    let handles: Vec<_> = (0..STARTERS)
        .map(|i| {
            let controller = controller.clone();
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                controller.start(format!("question {i}"))
            })
        })
        .collect();

    let mut sessions = Vec::new();
    for handle in handles {
        sessions.push(handle.await.expect("start task"));
    }

    let newest = sessions.iter().map(|s| s.id()).max().expect("eight sessions");
    assert_eq!(controller.current(), Some(newest));

    let mut completed = 0;
    for session in sessions {
        let id = session.id();
        let collected = session.collect().await;
        if id == newest {
            assert!(matches!(collected.end, Some(SessionEnd::Completed { records: 1 })));
            completed += 1;
        } else {
            assert!(collected.records.is_empty());
            assert!(matches!(
                collected.end,
                Some(SessionEnd::Stopped(StopReason::Superseded))
            ));
        }
    }
    assert_eq!(completed, 1);
}
