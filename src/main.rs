//! chatrelay - Entry Point
//!
//! Runs the Telegram gateway over the retrieval-augmented chat session.

use chatrelay::Config;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("chatrelay v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: chatrelay");
        println!();
        println!("Environment variables:");
        println!("  TELEGRAM_BOT_TOKEN          Telegram bot token (required)");
        println!("  OPENAI_API_KEY              Completion/embeddings API key");
        println!("  OPENAI_API_BASE             API base URL (default: https://api.openai.com/v1)");
        println!("  CHATRELAY_MODEL             Completion model (default: gpt-4o-mini)");
        println!("  EMBEDDING_MODEL             Embedding model (default: text-embedding-3-small)");
        println!("  TARGET_CHAT_ID              Restrict handling to one chat");
        println!("  CHATRELAY_DB_PATH           Message log database path");
        println!("  CHATRELAY_HISTORY_CAPACITY  Rolling window size (default: 50)");
        println!("  CHATRELAY_RECALL_TOP_K      Recalled messages per turn (default: 3, 0 = off)");
        println!("  CHATRELAY_SYSTEM_PROMPT     Persona system instruction");
        println!("  CHATRELAY_MAX_TOKENS        Max response tokens");
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("chatrelay v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    chatrelay::telegram::run_bot(config).await?;

    Ok(())
}
