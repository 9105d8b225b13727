//! Listener lifecycle and the per-connection handler loop.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::server_impl::gateway;
use crate::server_impl::request::decode_request;
use crate::AnyResult;

/// A bound listener that is not accepting yet. Binding and accepting are
/// split so tests can read the ephemeral port before traffic starts.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    config: Arc<ServerConfig>,
}

impl Server {
    /// Binds the listening socket with address and port reuse enabled, so a
    /// restarted server can rebind immediately. Failure here is the only
    /// process-fatal error in the crate.
    pub async fn bind(config: ServerConfig) -> AnyResult<Self> {
        let addr = lookup_host((config.host.as_str(), config.port))
            .await?
            .next()
            .ok_or_else(|| eyre::eyre!("cannot resolve {}:{}", config.host, config.port))?;

        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        #[cfg(unix)]
        socket.set_reuseport(true)?;
        socket.bind(addr)?;

        Ok(Self {
            listener: socket.listen(1024)?,
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Starts accepting connections, one task per connection, with no cap on
    /// concurrency beyond what the OS gives us. The returned handle is the
    /// only way to stop the accept loop.
    pub fn start(self) -> ServerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            if let Ok(addr) = self.listener.local_addr() {
                info!(%addr, "server started");
            }

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accepted = self.listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            tokio::spawn(handle_client(stream, peer, Arc::clone(&self.config)));
                        }
                        Err(error) => warn!(%error, "failed to accept connection"),
                    },
                }
            }

            info!("server stopped");
        });

        ServerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Running server, returned by [`Server::start`].
#[derive(Debug)]
pub struct ServerHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Stops accepting new connections and waits for the listening socket to
    /// be released. In-flight connection handlers are not interrupted; they
    /// drain naturally on their own tasks.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
    }

    /// Parks until the accept loop exits, which it normally never does.
    pub async fn wait(mut self) {
        let _ = (&mut self.task).await;
    }
}

/// One accepted connection: decode a request, run it through the gateway,
/// write the response, and either loop or close. Requests on a connection
/// are strictly sequential; any error tears the connection down without a
/// response and never touches other connections.
async fn handle_client(stream: TcpStream, peer: SocketAddr, config: Arc<ServerConfig>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let request = match decode_request(&mut reader).await {
            Ok(Some(request)) => request,
            // peer closed the connection between requests
            Ok(None) => break,
            Err(error) => {
                debug!(%peer, %error, "dropping connection");
                break;
            }
        };

        info!(%peer, method = %request.method, target = %request.target, "request");

        let response = match gateway::dispatch(&request, &config, peer.ip()).await {
            Ok(response) => response,
            Err(error) => {
                warn!(%peer, %error, "dropping connection without a response");
                break;
            }
        };

        info!(%peer, status = response.status, length = response.body.len(), "response");

        if let Err(error) = write_half.write_all(&response.to_bytes()).await {
            warn!(%peer, %error, "failed to write response");
            break;
        }
        if let Err(error) = write_half.flush().await {
            warn!(%peer, %error, "failed to flush response");
            break;
        }

        // the value comparison is deliberately exact
        if request.headers.get("Connection") != Some("keep-alive") {
            break;
        }
    }
}
