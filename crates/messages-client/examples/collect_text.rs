use std::time::Duration;

use messages_client::prelude::*;
use messages_core::observability::init_observability;
use tokio_util::sync::CancellationToken;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ClientError> {
    init_observability();
    let client = Client::from_env()?;

    let request = MessageRequest::new(models::CLAUDE_3_SONNET, 256)
        .system("You are a concise assistant. Reply with a short sentence.")
        .user_text("Say hello");
    let options = RequestOptions::default()
        .timeout(Duration::from_secs(60))
        .max_retries(1);

    let response = client
        .create(request, &options, &CancellationToken::new())
        .await?;
    println!("{}", response.text());
    Ok(())
}
