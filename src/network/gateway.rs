//! The gateway: binds every `[[listen]]` block and feeds accepted
//! connections to the engine.
//!
//! TLS is an external concern wired in here and nowhere else: a listener
//! either has an acceptor or it does not, and that flag travels with the
//! connection (STS advertising and +S checks trust it, never re-derive it).

use std::io::BufReader;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

use crate::config::{Config, ListenConfig};
use crate::engine::{Event, EngineHandle};

use super::connection;

struct Listener {
    socket: TcpListener,
    config: ListenConfig,
    tls: Option<TlsAcceptor>,
}

/// All bound listeners.
pub struct Gateway {
    listeners: Vec<Listener>,
    config: Arc<Config>,
    engine: EngineHandle,
}

impl Gateway {
    /// Bind every configured listener. Failure to bind any socket is fatal
    /// (the socket-engine exit code).
    pub async fn bind(config: Arc<Config>, engine: EngineHandle) -> anyhow::Result<Gateway> {
        let mut listeners = Vec::new();
        for listen in &config.listen {
            let addr = format!("{}:{}", listen.addr, listen.port);
            let socket = TcpListener::bind(&addr)
                .await
                .map_err(|e| anyhow::anyhow!("cannot bind {addr}: {e}"))?;
            let tls = if listen.tls {
                Some(build_acceptor(listen)?)
            } else {
                None
            };
            info!(addr = %addr, tls = listen.tls, "Listening");
            listeners.push(Listener {
                socket,
                config: listen.clone(),
                tls,
            });
        }
        Ok(Gateway {
            listeners,
            config,
            engine,
        })
    }

    /// Accept until the process exits.
    pub async fn run(self) {
        let mut tasks = Vec::new();
        for listener in self.listeners {
            let config = Arc::clone(&self.config);
            let engine = self.engine.clone();
            tasks.push(tokio::spawn(accept_loop(listener, config, engine)));
        }
        for task in tasks {
            let _ = task.await;
        }
    }
}

async fn accept_loop(listener: Listener, config: Arc<Config>, engine: EngineHandle) {
    loop {
        let (stream, addr) = match listener.socket.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "Accept failed");
                continue;
            }
        };

        let class = config.find_class(addr.ip(), listener.config.port);
        // The sendq cap, expressed in queued lines.
        let sendq_lines = (class.sendq / 512).max(16);
        let recvq = class.recvq.max(1024);
        let (tx, outgoing) = mpsc::channel::<String>(sendq_lines);
        let (throttle_tx, throttle_rx) = watch::channel(false);
        let (reply_tx, reply_rx) = oneshot::channel();

        let accepted = engine
            .events
            .send(Event::Accepted {
                addr,
                local_port: listener.config.port,
                tls: listener.tls.is_some(),
                password: listener.config.password.clone(),
                class,
                tx,
                throttle: throttle_tx,
                reply: reply_tx,
            })
            .await;
        if accepted.is_err() {
            return; // engine gone, stop accepting
        }

        let uid = match reply_rx.await {
            Ok(Ok(uid)) => uid,
            Ok(Err(reason)) => {
                // Refused before any data was read (Z-line, quota).
                reject(stream, &reason).await;
                continue;
            }
            Err(_) => continue,
        };

        let engine = engine.clone();
        let tls = listener.tls.clone();
        tokio::spawn(async move {
            match tls {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        connection::run(tls_stream, uid, outgoing, throttle_rx, engine, recvq)
                            .await;
                    }
                    Err(e) => {
                        warn!(addr = %addr, error = %e, "TLS handshake failed");
                        let _ = engine
                            .events
                            .send(Event::Closed {
                                uid,
                                reason: Some("TLS handshake failed".to_string()),
                            })
                            .await;
                    }
                },
                None => {
                    connection::run(stream, uid, outgoing, throttle_rx, engine, recvq).await;
                }
            }
        });
    }
}

async fn reject(mut stream: TcpStream, reason: &str) {
    use tokio::io::AsyncWriteExt;
    let line = format!("ERROR :Closing link: ({reason})\r\n");
    let _ = stream.write_all(line.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Load the PEM chain and key for a TLS listener.
fn build_acceptor(listen: &ListenConfig) -> anyhow::Result<TlsAcceptor> {
    let cert_path = listen
        .cert
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("tls listener without cert"))?;
    let key_path = listen
        .key
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("tls listener without key"))?;

    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(std::fs::File::open(cert_path)?))
        .collect::<Result<_, _>>()?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(std::fs::File::open(key_path)?))?
        .ok_or_else(|| anyhow::anyhow!("no private key in {key_path}"))?;

    let tls_config = tokio_rustls::rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| {
            error!(error = %e, "TLS configuration rejected");
            anyhow::anyhow!("bad TLS cert/key: {e}")
        })?;
    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}
