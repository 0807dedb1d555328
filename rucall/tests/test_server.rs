use std::{
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use rucall::*;

struct SetOnDrop(Arc<AtomicBool>);

impl Drop for SetOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_stop_cancels_running_handlers() {
    let _ = tracing_subscriber::fmt().try_init();

    let started = Arc::new(AtomicBool::new(false));
    let cancelled = Arc::new(AtomicBool::new(false));
    let mut services = ServiceMap::default();
    services.add_method("demo.Slow", "Wait", {
        let started = started.clone();
        let cancelled = cancelled.clone();
        move |_: Invocation| {
            let started = started.clone();
            let cancelled = cancelled.clone();
            async move {
                let _guard = SetOnDrop(cancelled);
                started.store(true, Ordering::SeqCst);
                std::future::pending::<()>().await;
                Ok::<_, Error>(())
            }
        }
    });

    let codec = CodecRegistry::with_defaults().get("json").unwrap();
    let server = Server::create(services, codec);
    let addr = std::net::SocketAddr::from_str("127.0.0.1:0").unwrap();
    let addr = server.listen(addr).await.unwrap();

    let client = Client::connect(addr, ClientConfig::default(), &CodecRegistry::with_defaults())
        .await
        .unwrap();
    let invocation =
        Invocation::new("Wait", vec![]).with_attachment(INTERFACE_KEY, "demo.Slow");
    client.invoke_oneway(invocation).await.unwrap();

    tokio::time::timeout(Duration::from_secs(3), async {
        while !started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(!cancelled.load(Ordering::SeqCst));

    server.stop();
    tokio::time::timeout(Duration::from_secs(3), server.join())
        .await
        .unwrap();
    assert!(cancelled.load(Ordering::SeqCst));
}
