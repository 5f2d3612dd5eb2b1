// Gateway tests over real TCP connections

mod common;

use common::fast_config;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;
use verifier_node::admin::Admin;
use verifier_node::config::PolicyHandle;
use verifier_node::gateway::Gateway;
use verifier_node::transport::ChannelTransport;
use verifier_node::verifier::Verifier;

struct Harness {
    addr: std::net::SocketAddr,
    verifier: Verifier<ChannelTransport>,
    shutdown: Option<oneshot::Sender<()>>,
    _dir: tempfile::TempDir,
}

impl Harness {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("verifier.toml");
        let mut config = fast_config();
        config.admin.operators = vec!["Alice".to_string()];
        config.admin.reload_token = Some("s3cret".to_string());
        config.to_file(&path).unwrap();

        let policy = PolicyHandle::from_config(&config).unwrap();
        let verifier = Verifier::new(policy.clone(), Arc::new(ChannelTransport::new()));
        let admin = Arc::new(Admin::new(&path, policy, &config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        let gateway = Gateway::new(verifier.clone(), admin);
        tokio::spawn(async move {
            gateway
                .serve(listener, async {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            verifier,
            shutdown: Some(tx),
            _dir: dir,
        }
    }

    async fn join(&self, name: &str) -> Client {
        let stream = TcpStream::connect(self.addr).await.unwrap();
        let (read_half, mut writer) = stream.into_split();
        writer
            .write_all(format!("HELLO {name}\n").as_bytes())
            .await
            .unwrap();
        Client {
            lines: BufReader::new(read_half).lines(),
            writer,
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Client {
    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .unwrap();
    }

    async fn next_line(&mut self) -> Option<String> {
        timeout(Duration::from_secs(2), self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .unwrap()
    }

    /// Next line that is not a verification request
    async fn next_reply(&mut self) -> Option<String> {
        loop {
            match self.next_line().await {
                Some(line) if line == "REQ" => continue,
                other => return other,
            }
        }
    }
}

#[tokio::test]
async fn denylisted_client_is_kicked() {
    let harness = Harness::start().await;
    let mut client = harness.join("Steve").await;

    assert_eq!(client.next_line().await.as_deref(), Some("REQ"));
    client.send("MODS|sodium,FreeCam").await;

    assert_eq!(
        client.next_reply().await.as_deref(),
        Some("KICK remove freecam")
    );
    assert_eq!(client.next_line().await, None);
}

#[tokio::test]
async fn clean_client_stays_connected() {
    let harness = Harness::start().await;
    let mut client = harness.join("Steve").await;

    assert_eq!(client.next_line().await.as_deref(), Some("REQ"));
    client.send("MODS|sodium,iris").await;

    let quiet = timeout(Duration::from_millis(200), async {
        loop {
            match client.lines.next_line().await {
                Ok(Some(line)) if line == "REQ" => continue,
                other => return other,
            }
        }
    })
    .await;
    assert!(quiet.is_err(), "unexpected output: {quiet:?}");

    let ids = harness.verifier.registry().ids();
    assert_eq!(ids.len(), 1);
    assert!(harness.verifier.session(&ids[0]).unwrap().verified);
}

#[tokio::test]
async fn disconnect_drops_session() {
    let harness = Harness::start().await;
    let mut client = harness.join("Steve").await;
    assert_eq!(client.next_line().await.as_deref(), Some("REQ"));
    assert_eq!(harness.verifier.registry().len(), 1);

    drop(client);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(harness.verifier.registry().is_empty());
}

#[tokio::test]
async fn missing_greeting_is_refused() {
    let harness = Harness::start().await;
    let stream = TcpStream::connect(harness.addr).await.unwrap();
    let (read_half, mut writer) = stream.into_split();
    writer.write_all(b"MODS|freecam\n").await.unwrap();

    let mut lines = BufReader::new(read_half).lines();
    let reply = timeout(Duration::from_secs(2), lines.next_line())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.as_deref(), Some("ERR expected HELLO <name>"));
    assert!(harness.verifier.registry().is_empty());
}

#[tokio::test]
async fn reload_command_checks_permission() {
    let harness = Harness::start().await;

    let mut guest = harness.join("Steve").await;
    guest.send("/verifier reload s3cret").await;
    assert_eq!(guest.next_reply().await.as_deref(), Some("MSG No permission."));
    guest.send("/verifier").await;
    assert_eq!(
        guest.next_reply().await.as_deref(),
        Some("MSG Usage: /verifier reload <token>")
    );

    let before = harness.verifier.policy().snapshot().version;
    let mut operator = harness.join("Alice").await;
    operator.send("/verifier reload s3cret").await;
    assert_eq!(
        operator.next_reply().await.as_deref(),
        Some("MSG Verifier reloaded.")
    );
    assert!(harness.verifier.policy().snapshot().version > before);
}

#[tokio::test]
async fn claiming_an_operator_name_grants_nothing() {
    let harness = Harness::start().await;
    let before = harness.verifier.policy().snapshot().version;

    let mut impostor = harness.join("Alice").await;
    impostor.send("/verifier reload").await;
    assert_eq!(
        impostor.next_reply().await.as_deref(),
        Some("MSG No permission.")
    );
    impostor.send("/verifier reload guess").await;
    assert_eq!(
        impostor.next_reply().await.as_deref(),
        Some("MSG No permission.")
    );
    assert_eq!(harness.verifier.policy().snapshot().version, before);
}
