use uniproxy_server::{AppConfig, ServerBuilder, init_metrics, init_tracing};

#[tokio::main]
async fn main() {
    init_tracing();
    init_metrics();

    let config_path = std::env::args().nth(1);
    let cfg = match AppConfig::load(config_path.as_deref()) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    let server = match ServerBuilder::new().with_config(cfg).build().await {
        Ok(server) => server,
        Err(err) => {
            eprintln!("startup error: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = server.run().await {
        eprintln!("server error: {err}");
    }
}
