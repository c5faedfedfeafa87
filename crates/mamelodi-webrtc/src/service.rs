//! Async driver for a [`SessionManager`]
//!
//! The manager lives inside one tokio task; commands from any number of
//! [`SessionHandle`] clones and transport events are interleaved by a single
//! `select!` loop, so the manager never needs a lock.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::listener::SessionListener;
use crate::message::Message;
use crate::session::{SessionError, SessionEventRx, SessionManager};
use crate::transport::TransportFactory;
use crate::types::{ConnectedPeer, SessionState};

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Open(String),
    Connect(String),
    Send {
        peer_id: String,
        message: Message,
        reply: Reply<Result<(), SessionError>>,
    },
    Broadcast {
        message: Message,
        reply: Reply<Result<usize, SessionError>>,
    },
    Peers(Reply<Vec<ConnectedPeer>>),
    State(Reply<SessionState>),
    Close(Reply<()>),
    Shutdown,
}

/// Cloneable handle to a running session task
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    fn command(&self, command: Command) -> Result<(), SessionError> {
        self.tx.send(command).map_err(|_| SessionError::ServiceStopped)
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.command(make(reply))?;
        rx.await.map_err(|_| SessionError::ServiceStopped)
    }

    /// Register `local_id`; `connection_opened` follows once the provider confirms
    pub fn open_for_connections(&self, local_id: impl Into<String>) -> Result<(), SessionError> {
        self.command(Command::Open(local_id.into()))
    }

    /// Dial `remote_id`; `peer_connected` or `error_occurred` follows
    pub fn connect_to(&self, remote_id: impl Into<String>) -> Result<(), SessionError> {
        self.command(Command::Connect(remote_id.into()))
    }

    pub async fn send_message_to_peer(
        &self,
        peer_id: impl Into<String>,
        message: Message,
    ) -> Result<(), SessionError> {
        let peer_id = peer_id.into();
        self.request(|reply| Command::Send {
            peer_id,
            message,
            reply,
        })
        .await?
    }

    pub async fn send_message_to_all_peers(&self, message: Message) -> Result<usize, SessionError> {
        self.request(|reply| Command::Broadcast { message, reply })
            .await?
    }

    pub async fn all_peers(&self) -> Result<Vec<ConnectedPeer>, SessionError> {
        self.request(Command::Peers).await
    }

    pub async fn state(&self) -> Result<SessionState, SessionError> {
        self.request(Command::State).await
    }

    /// Close the session; the task keeps running and can be reopened
    pub async fn close(&self) -> Result<(), SessionError> {
        self.request(Command::Close).await
    }

    /// Close the session and stop the task
    pub fn shutdown(&self) -> Result<(), SessionError> {
        self.command(Command::Shutdown)
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Spawns the task owning a session manager
pub struct SessionService;

impl SessionService {
    /// Move `manager` into a new task fed by `events`
    pub fn spawn<F, L>(
        manager: SessionManager<F, L>,
        events: SessionEventRx,
    ) -> (SessionHandle, JoinHandle<()>)
    where
        F: TransportFactory + 'static,
        L: SessionListener + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(manager, events, rx));
        (SessionHandle { tx }, task)
    }
}

async fn run<F, L>(
    mut manager: SessionManager<F, L>,
    mut events: SessionEventRx,
    mut commands: mpsc::UnboundedReceiver<Command>,
) where
    F: TransportFactory,
    L: SessionListener,
{
    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    debug!("All session handles dropped");
                    break;
                };
                if !apply(&mut manager, command) {
                    break;
                }
            }
            Some(event) = events.recv() => {
                if let Err(e) = manager.handle_event(event) {
                    debug!("Session event not applied: {}", e);
                }
            }
        }
    }

    manager.close();
    info!("Session service stopped");
}

/// Returns false when the loop should stop
fn apply<F: TransportFactory, L: SessionListener>(
    manager: &mut SessionManager<F, L>,
    command: Command,
) -> bool {
    // A dropped reply receiver only means the caller stopped waiting
    match command {
        Command::Open(local_id) => manager.open_for_connections(&local_id),
        Command::Connect(remote_id) => manager.connect_to(&remote_id),
        Command::Send {
            peer_id,
            message,
            reply,
        } => {
            let _ = reply.send(manager.send_message_to_peer(&peer_id, &message));
        }
        Command::Broadcast { message, reply } => {
            let _ = reply.send(manager.send_message_to_all_peers(&message));
        }
        Command::Peers(reply) => {
            let _ = reply.send(manager.all_peers());
        }
        Command::State(reply) => {
            let _ = reply.send(manager.state());
        }
        Command::Close(reply) => {
            manager.close();
            let _ = reply.send(());
        }
        Command::Shutdown => return false,
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{ChannelListener, SessionNotification};
    use crate::mock::MockNetwork;
    use mamelodi_config::WebRtcConfig;

    fn spawn(network: &std::sync::Arc<MockNetwork>) -> (SessionHandle, JoinHandle<()>, crate::listener::NotificationRx) {
        let (listener, notifications) = ChannelListener::new();
        let (manager, events) =
            SessionManager::new(&WebRtcConfig::default(), network.factory(), listener);
        let (handle, task) = SessionService::spawn(manager, events);
        (handle, task, notifications)
    }

    #[tokio::test]
    async fn test_open_through_handle() {
        let network = MockNetwork::new();
        let (handle, _task, mut notifications) = spawn(&network);

        handle.open_for_connections("alice").unwrap();

        assert_eq!(
            notifications.recv().await,
            Some(SessionNotification::ConnectionOpened("alice".to_string()))
        );
        assert_eq!(handle.state().await.unwrap(), SessionState::Open);
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer_through_handle() {
        let network = MockNetwork::new();
        let (handle, _task, _notifications) = spawn(&network);
        handle.open_for_connections("alice").unwrap();

        let result = handle.send_message_to_peer("bob", Message::chat("hi")).await;
        assert!(matches!(result, Err(SessionError::UnknownPeer(_))));
    }

    #[tokio::test]
    async fn test_shutdown_stops_task() {
        let network = MockNetwork::new();
        let (handle, task, _notifications) = spawn(&network);
        handle.open_for_connections("alice").unwrap();

        handle.shutdown().unwrap();
        task.await.unwrap();

        assert!(!handle.is_running());
        assert!(matches!(handle.state().await, Err(SessionError::ServiceStopped)));
        assert!(!network.is_registered("mamelodi-webrtc-alice"));
    }
}
