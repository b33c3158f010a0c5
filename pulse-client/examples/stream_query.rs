//! Stream an explanation for a clinical question and print records live.
//!
//! Point it at a running server and run:
//!   PULSE_BASE_URL=http://localhost:8000 RUST_LOG=pulse_client=debug \
//!     cargo run -p pulse-client --example stream_query -- "问题..."

use pulse_client::{DiagnosisClient, SessionEnd, SessionEvent, StreamController};
use tracing_subscriber::EnvFilter;

const DEFAULT_QUESTION: &str = "张某，男，27岁。患者因昨晚饮酒发热，喝凉水数杯，早晨腹痛腹泻，\
大便如水色黄，腹中辘辘有声，恶心欲吐，胸中满闷不舒，口干欲冷饮，舌质红、苔白腻，脉沉细数。\
给出中医诊断和处方建议。";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let question = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_QUESTION.to_string());

    let controller = StreamController::new(DiagnosisClient::from_env()?);
    let mut session = controller.start(question);

    while let Some(event) = session.next_event().await {
        while let Some(bad) = session.try_next_diagnostic() {
            eprintln!("skipped malformed line {:?}: {}", bad.raw_line, bad.error);
        }
        match event {
            SessionEvent::Record(record) => println!("[{}] {}", record.index, record.value),
            SessionEvent::End(SessionEnd::Completed { records }) => {
                println!("done, {records} records");
            }
            SessionEvent::End(SessionEnd::Failed(e)) => return Err(e.into()),
            SessionEvent::End(SessionEnd::Stopped(reason)) => println!("stopped: {reason:?}"),
        }
    }

    Ok(())
}
