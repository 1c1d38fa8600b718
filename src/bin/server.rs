//! TCP transport adapter. Frames each connection's socket as newline-delimited
//! JSON and drives a `ChatCore` — everything here is wiring; the protocol
//! and concurrency rules live in the library crate.

use std::sync::Arc;

use clap::Parser;
use local_agent_chat::{ChatCore, CoreError, Frame, ServerConfig, SessionHandle};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "chat-server", about = "Real-time multi-user chat server")]
struct Args {
    /// Bind address (host:port). Overrides BIND_ADDR if set.
    #[arg(long, short)]
    bind: Option<String>,

    /// Idle timeout in seconds before a silent session is disconnected. 0 disables the sweeper.
    #[arg(long)]
    idle_timeout_secs: Option<u64>,
}

/// Sends by pushing onto an unbounded channel drained by the connection's
/// writer task, so `SessionHandle::send` never blocks on socket I/O.
struct TcpHandle {
    tx: mpsc::UnboundedSender<Frame>,
}

impl SessionHandle for TcpHandle {
    fn send(&self, frame: &Frame) -> Result<(), CoreError> {
        self.tx.send(frame.clone()).map_err(|_| CoreError::TransportFailed)
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let mut config = ServerConfig::from_env();
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(timeout) = args.idle_timeout_secs {
        config.idle_timeout_secs = timeout;
    }

    let core = Arc::new(ChatCore::new(config.clone()));
    let _sweeper = core.clone().spawn_sweeper();

    let listener = match TcpListener::bind(&config.bind_addr).await {
        Ok(l) => l,
        Err(err) => {
            error!(%err, addr = %config.bind_addr, "failed to bind");
            return;
        }
    };
    info!(addr = %config.bind_addr, "chat server listening");

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%err, "accept failed");
                continue;
            }
        };
        info!(%peer, "connection accepted");

        let core = core.clone();
        tokio::spawn(async move {
            handle_connection(core, socket).await;
        });
    }
}

async fn handle_connection(core: Arc<ChatCore>, socket: TcpStream) {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();

    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let Ok(mut line) = serde_json::to_string(&frame) else {
                continue;
            };
            line.push('\n');
            if writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let handle = Arc::new(TcpHandle { tx });
    let sid = core.connect(handle);

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Frame>(&line) {
                    Ok(frame) => core.on_frame(sid, frame),
                    Err(err) => warn!(%sid, %err, "dropping unparseable frame"),
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!(%sid, %err, "read error");
                break;
            }
        }
    }

    core.disconnect(sid);
    writer_task.abort();
}
