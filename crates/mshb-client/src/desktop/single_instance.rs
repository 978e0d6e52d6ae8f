//! One running client per user session.
//!
//! The first instance binds a loopback port and listens. Later instances
//! fail to bind, send their argv to the first one as a JSON line and exit,
//! so a deep link clicked while the app is open lands in the open window.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;

const FORWARD_QUEUE: usize = 16;

pub enum Instance {
    /// This process owns the lock. Arguments from later launches arrive on
    /// `forwarded`.
    Primary {
        port: u16,
        forwarded: mpsc::Receiver<Vec<String>>,
        listener: JoinHandle<()>,
    },
    /// Another instance is running and has received our arguments.
    Secondary,
}

/// Take the lock on `port`, or hand `args` to whoever holds it.
pub async fn acquire(port: u16, args: &[String]) -> Result<Instance> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    match TcpListener::bind(addr).await {
        Ok(listener) => {
            let port = listener.local_addr()?.port();
            let (tx, forwarded) = mpsc::channel(FORWARD_QUEUE);
            info!(port, "Primary instance");
            Ok(Instance::Primary {
                port,
                forwarded,
                listener: tokio::spawn(accept_loop(listener, tx)),
            })
        }
        Err(e) if e.kind() == ErrorKind::AddrInUse => {
            let mut stream = TcpStream::connect(addr).await?;
            let mut line = serde_json::to_string(args)?;
            line.push('\n');
            stream.write_all(line.as_bytes()).await?;
            stream.shutdown().await?;
            info!(port, "Another instance is running, arguments forwarded");
            Ok(Instance::Secondary)
        }
        Err(e) => Err(e.into()),
    }
}

async fn accept_loop(listener: TcpListener, tx: mpsc::Sender<Vec<String>>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "Instance lock accept failed");
                continue;
            }
        };
        debug!(%peer, "Second instance connected");

        let mut lines = BufReader::new(stream).lines();
        match lines.next_line().await {
            Ok(Some(line)) => match serde_json::from_str::<Vec<String>>(&line) {
                Ok(args) => {
                    if tx.send(args).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "Ignoring malformed instance message"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Instance message read failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn second_launch_forwards_its_arguments() {
        let Instance::Primary {
            port,
            mut forwarded,
            listener,
        } = acquire(0, &[]).await.unwrap()
        else {
            panic!("expected primary");
        };

        let args = vec!["mshb".to_string(), "mshb://invite/ABCD2345".to_string()];
        assert!(matches!(acquire(port, &args).await.unwrap(), Instance::Secondary));

        let received = tokio::time::timeout(Duration::from_secs(2), forwarded.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, args);
        listener.abort();
    }
}
