//! Binary entry point for the AtriumVerse presence server.

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    lib_atrium::init().await
}
