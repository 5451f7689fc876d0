use sluice::processor::ProcessorRegistry;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    sluice::run()
        .processors(ProcessorRegistry::with_builtins())
        .start()
        .await
}
