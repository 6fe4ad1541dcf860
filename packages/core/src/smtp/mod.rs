//! Authenticated SMTP listener that turns delivered mail into stored
//! [`Email`](crate::model::Email) records.
//!
//! [`SmtpListener::bind`] claims the port; [`SmtpListener::spawn`] runs the
//! accept loop on its own task, one further task per connection, and keeps
//! the [`ListenerMonitor`] current so `/health` can see a dead listener.

pub mod auth;
pub mod message;
pub mod reply;
pub mod session;

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::AppError;
use crate::health::ListenerMonitor;

pub use session::{Session, SmtpContext, SmtpSettings};

pub struct SmtpListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    ctx: SmtpContext,
}

impl SmtpListener {
    pub async fn bind(addr: &str, ctx: SmtpContext) -> Result<Self, AppError> {
        let startup_error = |source| AppError::ListenerStartup {
            listener: "SMTP",
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(startup_error)?;
        let local_addr = listener.local_addr().map_err(startup_error)?;
        Ok(Self {
            listener,
            local_addr,
            ctx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the accept loop until `shutdown` flips to `true`.
    pub async fn serve(
        self,
        monitor: ListenerMonitor,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), AppError> {
        monitor.set_running(self.local_addr);
        tracing::info!("SMTP listener accepting connections on {}", self.local_addr);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let session = Session::new(stream, peer.to_string(), self.ctx.clone());
                        tokio::spawn(async move {
                            if let Err(err) = session.run().await {
                                tracing::warn!(%peer, "SMTP session ended: {}", err);
                            }
                        });
                    }
                    Err(err) => {
                        tracing::error!("SMTP accept failed: {}", err);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }

        tracing::info!("SMTP listener stopped");
        Ok(())
    }

    /// Run [`serve`](Self::serve) on its own task. A panic or error in the
    /// accept loop marks the listener failed.
    pub fn spawn(
        self,
        monitor: ListenerMonitor,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let inner = tokio::spawn(self.serve(monitor.clone(), shutdown));
            match inner.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::error!("SMTP listener failed: {}", err);
                    monitor.set_failed(err.to_string());
                }
                Err(join_err) => {
                    tracing::error!("SMTP listener task aborted: {}", join_err);
                    monitor.set_failed(format!("listener task aborted: {}", join_err));
                }
            }
        })
    }
}
