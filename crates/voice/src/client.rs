//! Runs a `VoiceSession` on its own task and exposes a cloneable handle to it.

use crate::connection::VoiceSession;
use crate::error::{Result, VoiceError};
use crate::events::{EventHub, InputMode, Phase, VoiceEvent};
use crate::protocol::SessionPatch;
use crate::session::UpdateOutcome;
use crate::transport::{Collaborators, SessionInput};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{Instrument, debug, info};

const COMMAND_CAPACITY: usize = 32;

/// A request sent from a `VoiceClient` to the session task.
#[derive(Debug)]
enum Command {
    Connect {
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    UpdateSession {
        patch: SessionPatch,
        reply: oneshot::Sender<Result<UpdateOutcome>>,
    },
    SetTurnTaking {
        mode: InputMode,
        reply: oneshot::Sender<Result<UpdateOutcome>>,
    },
    CommitTurn {
        reply: oneshot::Sender<Result<()>>,
    },
    Status {
        reply: oneshot::Sender<(Phase, InputMode)>,
    },
}

/// Handle to a running voice session. Dropping every handle ends the task.
#[derive(Clone, Debug)]
pub struct VoiceClient {
    commands: mpsc::Sender<Command>,
    events: EventHub,
}

impl VoiceClient {
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<VoiceEvent> {
        self.events.subscribe()
    }

    pub async fn connect(&self) -> Result<()> {
        self.request(|reply| Command::Connect { reply }).await?
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    pub async fn update_session(&self, patch: SessionPatch) -> Result<UpdateOutcome> {
        self.request(|reply| Command::UpdateSession { patch, reply })
            .await?
    }

    pub async fn set_turn_taking(&self, mode: impl Into<InputMode>) -> Result<UpdateOutcome> {
        let mode = mode.into();
        self.request(|reply| Command::SetTurnTaking { mode, reply })
            .await?
    }

    pub async fn commit_turn(&self) -> Result<()> {
        self.request(|reply| Command::CommitTurn { reply }).await?
    }

    pub async fn phase(&self) -> Result<Phase> {
        let (phase, _) = self.request(|reply| Command::Status { reply }).await?;
        Ok(phase)
    }

    pub async fn input_mode(&self) -> Result<InputMode> {
        let (_, mode) = self.request(|reply| Command::Status { reply }).await?;
        Ok(mode)
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| VoiceError::SessionClosed)?;
        rx.await.map_err(|_| VoiceError::SessionClosed)
    }
}

/// Spawns the session task.
///
/// The task owns the `VoiceSession` and is the only place it is mutated. It
/// exits once every `VoiceClient` is dropped, disconnecting first.
pub fn spawn_voice_session(collab: Collaborators) -> (VoiceClient, JoinHandle<()>) {
    let (session, inputs) = VoiceSession::new(collab);
    let events = session.event_hub();
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);

    let span = tracing::info_span!("voice_session");
    let handle = tokio::spawn(run_session(session, commands_rx, inputs).instrument(span));

    let client = VoiceClient {
        commands: commands_tx,
        events,
    };
    (client, handle)
}

async fn run_session(
    mut session: VoiceSession,
    mut commands: mpsc::Receiver<Command>,
    mut inputs: mpsc::UnboundedReceiver<SessionInput>,
) {
    info!("Voice session task started.");
    loop {
        tokio::select! {
            biased;
            // Transport events already queued are applied before the next command.
            // The session holds a sender, so this channel never closes first.
            Some(input) = inputs.recv() => session.handle_input(input).await,
            command = commands.recv() => match command {
                Some(command) => handle_command(&mut session, command).await,
                None => {
                    debug!("All voice clients dropped.");
                    break;
                }
            },
        }
    }

    if session.is_connected() {
        session.disconnect().await;
    }
    info!("Voice session task finished.");
}

async fn handle_command(session: &mut VoiceSession, command: Command) {
    match command {
        Command::Connect { reply } => {
            let _ = reply.send(session.connect().await);
        }
        Command::Disconnect { reply } => {
            session.disconnect().await;
            let _ = reply.send(());
        }
        Command::UpdateSession { patch, reply } => {
            let _ = reply.send(session.update_session(patch));
        }
        Command::SetTurnTaking { mode, reply } => {
            let _ = reply.send(session.set_turn_taking(mode));
        }
        Command::CommitTurn { reply } => {
            let _ = reply.send(session.commit_turn());
        }
        Command::Status { reply } => {
            let _ = reply.send((session.phase(), session.input_mode()));
        }
    }
}
