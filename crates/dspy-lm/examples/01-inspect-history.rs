/*
Script to call an LM a few times and inspect its history.

Uses the in-memory backend, so no API key is needed.

Run with:
```
cargo run --example 01-inspect-history
```
*/

use std::sync::Arc;

use anyhow::Result;
use dspy_lm::{CallOverrides, DummyBackend, LM, LMConfig, Message, init_tracing};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let backend = Arc::new(DummyBackend::with_outputs(["Paris", "Paris, France"]));
    let lm = LM::builder()
        .config(LMConfig::builder().model("openai/gpt-4o-mini").build())
        .backend(backend.clone())
        .build()?;

    let answers = lm.invoke("What is the capital of France?").await?;
    println!("answers: {answers:?}");

    // Same request again: served from the memory cache.
    lm.invoke("What is the capital of France?").await?;

    lm.invoke_with(
        vec![
            Message::system("Answer in one word."),
            Message::user("What is the capital of Italy?"),
        ],
        CallOverrides::new().cache(false).param("n", 2),
    )
    .await?;

    println!(
        "backend calls: {}, total cost: {:.4}",
        backend.call_count(),
        lm.history().total_cost()
    );
    lm.inspect_history(3);

    Ok(())
}
