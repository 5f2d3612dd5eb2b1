// Reference TCP host
//
// A minimal line-oriented host so the verifier can run end to end. Each TCP
// connection is one session:
//
//   client -> `HELLO <name>`           opens the session
//   server -> `REQ`                    verification request
//   client -> `MODS|a,b,c`             attestation
//   client -> `/verifier reload <t>`   admin command, answered with `MSG <text>`
//   server -> `KICK <reason>`          disconnect, connection then closes
//
// Any other client line is passed to the verifier, which ignores it.

use crate::admin::{Admin, AdminCommand};
use crate::error::{Result, VerifierError};
use crate::protocol;
use crate::session::SessionId;
use crate::transport::{ChannelTransport, Outbound};
use crate::verifier::Verifier;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

const HELLO: &str = "HELLO ";
const KICK: &str = "KICK ";
const MSG: &str = "MSG ";

/// Accepts client connections and drives one session per connection
pub struct Gateway {
    verifier: Verifier<ChannelTransport>,
    admin: Arc<Admin>,
}

impl Gateway {
    pub fn new(verifier: Verifier<ChannelTransport>, admin: Arc<Admin>) -> Self {
        Self { verifier, admin }
    }

    /// Accept connections until `shutdown` resolves, then close every session.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let local = listener.local_addr()?;
        info!(channel = protocol::CHANNEL, "Gateway listening on {}", local);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };
                    let verifier = self.verifier.clone();
                    let admin = self.admin.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, verifier, admin).await {
                            debug!(%peer, "Connection ended with error: {}", e);
                        }
                    });
                }
                _ = &mut shutdown => {
                    let closed = self.verifier.close_all();
                    info!(closed, "Gateway shutting down");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    verifier: Verifier<ChannelTransport>,
    admin: Arc<Admin>,
) -> Result<()> {
    let (read_half, mut writer) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let name = match lines.next_line().await? {
        Some(line) => match line.strip_prefix(HELLO).map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                writer.write_all(b"ERR expected HELLO <name>\n").await?;
                return Err(VerifierError::Transport(format!("{} sent no greeting", peer)));
            }
        },
        None => return Ok(()),
    };

    let id = SessionId::generate();
    let transport = verifier.transport().clone();
    let mut outbound = transport.register(id.clone());
    verifier.on_session_open(id.clone(), name.clone());
    info!(session = %id, player = %name, %peer, channel = protocol::CHANNEL, "Player joined");

    let result = pump(&id, &name, &mut lines, &mut writer, &mut outbound, &verifier, &admin).await;

    verifier.on_session_close(&id);
    transport.unregister(&id);
    info!(session = %id, player = %name, "Player left");
    result
}

async fn pump<R, W>(
    id: &SessionId,
    name: &str,
    lines: &mut tokio::io::Lines<R>,
    writer: &mut W,
    outbound: &mut tokio::sync::mpsc::UnboundedReceiver<Outbound>,
    verifier: &Verifier<ChannelTransport>,
    admin: &Admin,
) -> Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                if let Some(command) = AdminCommand::parse(&line) {
                    let reply = admin.execute(name, command);
                    writer.write_all(format!("{}{}\n", MSG, reply).as_bytes()).await?;
                } else {
                    verifier.on_message(id, line.as_bytes());
                }
            }
            item = outbound.recv() => match item {
                Some(Outbound::Payload(payload)) => {
                    writer.write_all(&payload).await?;
                    writer.write_all(b"\n").await?;
                }
                Some(Outbound::Disconnect(reason)) => {
                    let reason = reason.replace(['\r', '\n'], " ");
                    writer.write_all(format!("{}{}\n", KICK, reason).as_bytes()).await?;
                    writer.shutdown().await?;
                    return Ok(());
                }
                None => {
                    error!(session = %id, "Outbound queue closed unexpectedly");
                    return Ok(());
                }
            }
        }
    }
}
