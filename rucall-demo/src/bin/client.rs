use clap::Parser;
use rucall::{Client, ClientConfig, CodecRegistry};
use rucall_demo::{User, user_invocation};
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Server address.
    #[arg(default_value = "127.0.0.1:8000")]
    pub addr: std::net::SocketAddr,

    /// Codec name.
    #[arg(long, default_value = "json")]
    pub protocol: String,

    /// Call timeout in milliseconds.
    #[arg(long, default_value = "3000")]
    pub timeout_ms: u64,

    /// User id sent with GetUser.
    #[arg(short, long, default_value = "1")]
    pub id: String,

    /// Enable stress testing.
    #[arg(long, default_value_t = false)]
    pub stress: bool,

    /// Stress testing duration.
    #[arg(long, default_value = "60")]
    pub secs: u64,

    /// The number of coroutines.
    #[arg(long, default_value = "32")]
    pub coroutines: usize,
}

#[derive(Default)]
struct State {
    total: AtomicUsize,
    fails: AtomicUsize,
}

async fn stress_test(client: Arc<Client>, args: Args) {
    let state = Arc::new(State::default());
    let start_time = std::time::Instant::now();
    let secs = args.secs;
    let mut tasks = vec![];
    for _ in 0..args.coroutines {
        let client = client.clone();
        let state = state.clone();
        let id = args.id.clone();
        tasks.push(tokio::spawn(async move {
            while start_time.elapsed().as_secs() < secs {
                for _ in 0..256 {
                    let invocation =
                        user_invocation("GetUser", vec![id.clone().into(), "stress".into()]);
                    let result = client.invoke::<User>(invocation).await;
                    state.total.fetch_add(1, Ordering::AcqRel);
                    if result.is_err() {
                        state.fails.fetch_add(1, Ordering::AcqRel);
                    }
                }
            }
        }));
    }
    tokio::select! {
        _ = async {
            for task in tasks {
                if let Err(e) = task.await {
                    tracing::error!("stress task failed: {e}");
                }
            }
        } => {
        }
        _ = async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                let total = state.total.swap(0, Ordering::AcqRel);
                let fails = state.fails.swap(0, Ordering::AcqRel);
                let pending = client.pending_calls();
                tracing::info!("QPS: {total}/s, fails: {fails}/s, pending: {pending}");
            }
        } => {
        }
    }
}

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> rucall::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    let config = ClientConfig {
        protocol: args.protocol.clone(),
        timeout: Duration::from_millis(args.timeout_ms),
        ..Default::default()
    };
    let client = Client::connect(args.addr, config, &CodecRegistry::with_defaults()).await?;

    if args.stress {
        stress_test(Arc::new(client), args).await;
        return Ok(());
    }

    client.heartbeat().await?;

    let invocation = user_invocation("GetUser", vec![args.id.clone().into(), "username".into()]);
    let rsp = client.invoke::<User>(invocation).await;
    tracing::info!("GetUser rsp: {rsp:?}");

    let rsp = client.invoke::<()>(user_invocation("GetUser2", vec![])).await;
    tracing::info!("GetUser2 rsp: {rsp:?}");

    client
        .invoke_oneway(user_invocation("GetUser1", vec![]))
        .await?;

    let (tx, rx) = tokio::sync::oneshot::channel();
    let invocation = user_invocation(
        "GetUser0",
        vec![args.id.into(), serde_json::Value::Null, "username".into()],
    );
    client
        .invoke_async(invocation, move |rsp: rucall::Result<User>| {
            let _ = tx.send(rsp);
        })
        .await?;
    tracing::info!("GetUser0 sent, {} pending", client.pending_calls());
    if let Ok(rsp) = rx.await {
        tracing::info!("GetUser0 rsp: {rsp:?}");
    }
    Ok(())
}
