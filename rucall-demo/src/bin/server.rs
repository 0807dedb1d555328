use clap::Parser;
use rucall::{CodecRegistry, Server, ServiceMap};
use rucall_demo::UserProvider;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Listen address.
    #[arg(default_value = "0.0.0.0:8000")]
    pub addr: std::net::SocketAddr,

    /// Codec used for responses.
    #[arg(long, default_value = "json")]
    pub protocol: String,
}

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> rucall::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    let mut services = ServiceMap::default();
    UserProvider.export(&mut services);
    let codec = CodecRegistry::with_defaults().get(&args.protocol)?;
    let server = Server::create(services, codec);

    let addr = server.listen(args.addr).await?;
    tracing::info!("Serving {server:?} on {addr}...");

    server.join().await;
    Ok(())
}
