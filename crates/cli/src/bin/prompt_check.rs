use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    prompt_cli::main_entry().await
}
