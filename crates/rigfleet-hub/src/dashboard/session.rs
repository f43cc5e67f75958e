//! Dashboard session: authenticate, then relay pushes until either side leaves.

use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info};

use rigfleet_core::protocol::{DashboardPush, DashboardRequest};

use crate::hub::Hub;
use crate::session::SessionError;

pub struct DashboardSession {
    hub: Hub,
    out_tx: mpsc::Sender<DashboardPush>,
}

impl DashboardSession {
    pub const fn new(hub: Hub, out_tx: mpsc::Sender<DashboardPush>) -> Self {
        Self { hub, out_tx }
    }

    pub async fn run<S>(self, mut inbound: S)
    where
        S: Stream<Item = Result<String, SessionError>> + Unpin,
    {
        let deadline =
            Instant::now() + Duration::from_secs(self.hub.config().server.auth_timeout_secs);

        let text = match timeout_at(deadline, inbound.next()).await {
            Ok(Some(Ok(text))) => text,
            Ok(_) => return,
            Err(_) => {
                self.reject("authentication timeout").await;
                return;
            }
        };
        let token = match DashboardRequest::parse(&text) {
            Ok(DashboardRequest::Auth { token }) => token,
            _ => {
                self.reject("authentication required").await;
                return;
            }
        };
        let claims = match self.hub.jwt().validate_access(&token) {
            Ok(claims) => claims,
            Err(e) => {
                debug!(error = %e, "Dashboard token rejected");
                self.reject("invalid token").await;
                return;
            }
        };

        if self
            .out_tx
            .send(DashboardPush::Authenticated {
                user_id: claims.user_id().to_string(),
            })
            .await
            .is_err()
        {
            return;
        }

        let dashboard = self.hub.dashboard();
        let (subscriber_id, mut pushes) = dashboard.subscribe(claims.user_id()).await;
        loop {
            tokio::select! {
                push = pushes.recv() => match push {
                    Some(push) => {
                        if self.out_tx.send(push).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        info!(subscriber_id, "Dashboard subscriber dropped by hub");
                        break;
                    }
                },
                item = inbound.next() => match item {
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(subscriber_id, error = %e, "Dashboard transport failed");
                        break;
                    }
                    None => break,
                },
            }
        }
        dashboard.unsubscribe(subscriber_id).await;
    }

    async fn reject(&self, message: &str) {
        let _ = self
            .out_tx
            .send(DashboardPush::Error {
                message: message.to_string(),
            })
            .await;
    }
}
