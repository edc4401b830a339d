#[tokio::main]
async fn main() {
    control_plane::telemetry::init_tracing();

    if let Err(err) = control_plane::run().await {
        eprintln!("fatal: {err:#}");
        std::process::exit(1);
    }
}
