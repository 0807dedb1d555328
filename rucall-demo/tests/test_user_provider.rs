use std::{str::FromStr, time::Duration};

use rucall::{Client, ClientConfig, CodecRegistry, ErrorKind, Invoker, Server, ServiceMap};
use rucall_demo::{GET_USER0_DELAY, User, UserProvider, user_invocation};

async fn start_server(protocol: &str) -> (Server, std::net::SocketAddr) {
    let mut services = ServiceMap::default();
    UserProvider.export(&mut services);
    let codec = CodecRegistry::with_defaults().get(protocol).unwrap();
    let server = Server::create(services, codec);
    let addr = std::net::SocketAddr::from_str("127.0.0.1:0").unwrap();
    let addr = server.listen(addr).await.unwrap();
    (server, addr)
}

async fn connect(addr: std::net::SocketAddr, protocol: &str) -> Client {
    let config = ClientConfig {
        protocol: protocol.to_string(),
        ..Default::default()
    };
    Client::connect(addr, config, &CodecRegistry::with_defaults())
        .await
        .unwrap()
}

fn user(id: &str, name: &str) -> User {
    User {
        id: id.into(),
        name: name.into(),
    }
}

#[tokio::test]
async fn test_user_provider() {
    let _ = tracing_subscriber::fmt().try_init();

    let (server, addr) = start_server("json").await;
    for protocol in ["json", "msgpack"] {
        let client = connect(addr, protocol).await;

        client.heartbeat().await.unwrap();

        let rsp: User = client
            .invoke(user_invocation("GetUser", vec!["1".into(), "username".into()]))
            .await
            .unwrap();
        assert_eq!(rsp, user("1", "username"));

        let rsp: User = client
            .invoke(user_invocation(
                "GetUser0",
                vec!["1".into(), serde_json::Value::Null, "username".into()],
            ))
            .await
            .unwrap();
        assert_eq!(rsp, user("1", "username"));

        client
            .invoke::<()>(user_invocation("GetUser1", vec![]))
            .await
            .unwrap();

        let err = client
            .invoke::<()>(user_invocation("GetUser2", vec![]))
            .await
            .unwrap_err();
        assert_eq!(err.msg, "error");

        let rsp: Option<User> = client
            .invoke(user_invocation("GetUser6", vec![0.into()]))
            .await
            .unwrap();
        assert_eq!(rsp, None);
        let rsp: Option<User> = client
            .invoke(user_invocation("GetUser6", vec![1.into()]))
            .await
            .unwrap();
        assert_eq!(rsp, Some(user("1", "")));

        let err = client
            .invoke::<User>(user_invocation("GetUser9", vec![]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MethodNotFound);

        client
            .invoke_oneway(user_invocation("GetUser1", vec![]))
            .await
            .unwrap();

        let value = Invoker::invoke(
            &client,
            user_invocation("GetUser", vec!["2".into(), "invoker".into()]),
        )
        .await
        .unwrap();
        assert_eq!(value, serde_json::json!({"id": "2", "name": "invoker"}));

        assert_eq!(client.pending_calls(), 0);
    }

    server.stop();
    server.join().await;
}

#[tokio::test]
async fn test_async_call() {
    let (_server, addr) = start_server("msgpack").await;
    let client = connect(addr, "json").await;

    let (tx, rx) = tokio::sync::oneshot::channel();
    client
        .invoke_async(
            user_invocation(
                "GetUser0",
                vec!["4".into(), serde_json::Value::Null, "username".into()],
            ),
            move |rsp: rucall::Result<User>| {
                let _ = tx.send(rsp);
            },
        )
        .await
        .unwrap();
    assert_eq!(client.pending_calls(), 1);

    let rsp = tokio::time::timeout(GET_USER0_DELAY * 10, rx)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(rsp, user("4", "username"));
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn test_timeout_over_tcp() {
    let (_server, addr) = start_server("json").await;
    let config = ClientConfig {
        timeout: GET_USER0_DELAY / 3,
        ..Default::default()
    };
    let client = Client::connect(addr, config, &CodecRegistry::with_defaults())
        .await
        .unwrap();

    let err = client
        .invoke::<User>(user_invocation(
            "GetUser0",
            vec!["1".into(), serde_json::Value::Null, "username".into()],
        ))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(client.pending_calls(), 0);

    // the late response is dropped and the connection stays usable.
    tokio::time::sleep(GET_USER0_DELAY).await;
    let rsp: User = client
        .invoke(user_invocation("GetUser", vec!["1".into(), "u".into()]))
        .await
        .unwrap();
    assert_eq!(rsp, user("1", "u"));
}

#[tokio::test]
async fn test_connection_lost() {
    let (server, addr) = start_server("json").await;
    let client = connect(addr, "json").await;

    let call = client.invoke::<User>(user_invocation(
        "GetUser0",
        vec!["1".into(), serde_json::Value::Null, "username".into()],
    ));
    let stop = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.stop();
    };
    let (result, ()) = tokio::join!(call, stop);
    let err = result.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ConnectionClosed);
    assert_eq!(client.pending_calls(), 0);

    server.join().await;
    let err = client
        .invoke::<User>(user_invocation("GetUser", vec!["1".into(), "u".into()]))
        .await
        .unwrap_err();
    assert!(
        matches!(err.kind, ErrorKind::SendFailed | ErrorKind::ConnectionClosed),
        "{err}"
    );
}
