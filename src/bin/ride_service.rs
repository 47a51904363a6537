use ride_hail::app;
use ride_hail::error::AppError;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    app::init_tracing();
    app::ride::run().await
}
