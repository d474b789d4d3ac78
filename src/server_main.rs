use anyhow::Result;

use school_diary::app::serve;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    serve().await
}
