use futures::StreamExt as _;
use messages_client::prelude::*;
use messages_core::observability::init_observability;
use tokio_util::sync::CancellationToken;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ClientError> {
    init_observability();
    let client = Client::from_env()?;

    let request = MessageRequest::new(models::CLAUDE_3_OPUS, 512)
        .system("Reply to test message streaming.")
        .user_text("Stream a greeting.");

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut stream = client
        .create_stream(request, &RequestOptions::default(), &cancel)
        .await?;
    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::ContentBlockDelta {
                delta: ContentDelta::TextDelta { text },
                ..
            } => print!("{text}"),
            StreamEvent::MessageDelta(delta) => {
                eprintln!("\n[stop_reason: {:?}]", delta.stop_reason);
            }
            StreamEvent::MessageStop => println!(),
            _ => {}
        }
    }
    Ok(())
}
