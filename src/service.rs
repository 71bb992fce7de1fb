use crate::{
    config::DeskConfig,
    error::{DeskError, Result, WriteError},
    presets::PresetStore,
    protocol::{Command, Direction, HeightSample},
    state::SharedState,
    transport::{Connected, DeskTransport, EventReceiver, EventSender, LinkEvent, LinkId, TransportEvent},
    types::{ConnectionStatus, DeskState, HeightBounds, MovePhase},
};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, error, info, trace, warn};

const REQUEST_QUEUE: usize = 32;

/// How a height request was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveOutcome {
    /// A new move was started
    Started {
        /// Generation of the move
        generation: u64,
        /// Direction of travel
        direction: Direction,
    },
    /// A move was already running and now heads for the new target
    Superseded {
        /// Generation of the new move
        generation: u64,
        /// Direction of travel toward the new target
        direction: Direction,
    },
    /// The desk is already at the requested height; nothing was sent
    AlreadyAtTarget,
    /// A running move was stopped because the desk is already at the new target
    Stopped,
}

enum Request {
    SetHeight {
        height_mm: i32,
        preset: Option<String>,
        reply: oneshot::Sender<Result<MoveOutcome>>,
    },
    Stop {
        reply: oneshot::Sender<Result<()>>,
    },
    Connect {
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// High level desk control
///
/// `DeskService` owns the control loop task. The loop is the only place that
/// talks to the transport or drives the move state machine; callers enqueue
/// requests and get an answer as soon as the first command has been written.
/// Moves then complete in the background as height notifications arrive.
///
/// Requests made while a move is running replace its target. Nothing is
/// queued: the latest request wins.
///
/// Dropping the service stops the loop and releases the link.
///
/// # Examples
///
/// ```no_run
/// use desklink::{BleTransport, DeskConfig, DeskService};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = DeskConfig::from_env()?;
///     let transport = BleTransport::new(&config).await?;
///     let desk = DeskService::start(transport, &config).await;
///
///     desk.set_height(1050).await?;
///     println!("{:?}", desk.get_state().await);
///     Ok(())
/// }
/// ```
pub struct DeskService {
    state: SharedState,
    presets: PresetStore,
    bounds: HeightBounds,
    requests: mpsc::Sender<Request>,
    task: JoinHandle<()>,
}

impl DeskService {
    /// Start the control loop over `state`
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<T: DeskTransport>(transport: T, config: &DeskConfig, state: SharedState) -> Self {
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_QUEUE);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let control = ControlLoop {
            transport,
            state: state.clone(),
            bounds: config.bounds,
            tolerance_mm: config.stop_tolerance_mm,
            max_nudges: config.max_nudges,
            events: events_tx,
            link: None,
            nudges: 0,
            last_progress_mm: None,
        };
        let task = tokio::spawn(control.run(requests_rx, events_rx));

        Self {
            presets: PresetStore::new(state.clone(), config.bounds),
            state,
            bounds: config.bounds,
            requests: requests_tx,
            task,
        }
    }

    /// Start the control loop with fresh state and the default presets
    pub async fn start<T: DeskTransport>(transport: T, config: &DeskConfig) -> Self {
        let state = SharedState::new(DeskState::new(config.name.clone()), []);
        let service = Self::new(transport, config, state);
        service.presets.clone().with_defaults().await;
        service
    }

    /// Current desk status
    pub async fn get_state(&self) -> DeskState {
        self.state.snapshot().await
    }

    /// Whether the link is up
    pub async fn is_connected(&self) -> bool {
        self.state.snapshot().await.connection_status == ConnectionStatus::Connected
    }

    /// Preset CRUD
    #[must_use]
    pub const fn presets(&self) -> &PresetStore {
        &self.presets
    }

    /// Drive the desk to `height_mm`
    ///
    /// Returns once the first movement command is written; the move finishes
    /// asynchronously. Connects first if needed.
    ///
    /// # Errors
    ///
    /// Returns [`DeskError::Validation`] for heights outside the configured
    /// bounds (before anything is sent), [`DeskError::Connect`] if the desk
    /// cannot be reached, or [`DeskError::Write`] if the command is refused.
    pub async fn set_height(&self, height_mm: i32) -> Result<MoveOutcome> {
        self.bounds.validate(height_mm)?;
        self.request_move(height_mm, None).await
    }

    /// Drive the desk to a stored preset
    ///
    /// # Errors
    ///
    /// Returns [`DeskError::PresetNotFound`] for unknown names, otherwise the
    /// same errors as [`DeskService::set_height`].
    pub async fn apply_preset(&self, name: &str) -> Result<MoveOutcome> {
        let preset = self.presets.get(name).await?;
        info!("Applying preset '{}' ({}mm)", preset.name, preset.height_mm);
        self.bounds.validate(preset.height_mm)?;
        self.request_move(preset.height_mm, Some(preset.name)).await
    }

    /// Stop any movement and drop the target
    ///
    /// # Errors
    ///
    /// Returns [`DeskError::Write`] if the stop command is refused.
    pub async fn stop(&self) -> Result<()> {
        self.call(|reply| Request::Stop { reply }).await?
    }

    /// Connect without moving
    ///
    /// # Errors
    ///
    /// Returns [`DeskError::Connect`] if the desk cannot be reached.
    pub async fn connect(&self) -> Result<()> {
        self.call(|reply| Request::Connect { reply }).await?
    }

    /// Release the link, abandoning any move
    ///
    /// # Errors
    ///
    /// Returns [`DeskError::ServiceStopped`] if the control loop is gone.
    pub async fn disconnect(&self) -> Result<()> {
        self.call(|reply| Request::Disconnect { reply }).await
    }

    /// Stop the control loop and release the link
    pub async fn shutdown(self) {
        let Self { requests, task, .. } = self;
        drop(requests);
        if let Err(e) = task.await {
            error!("Desk control loop ended abnormally: {}", e);
        }
    }

    async fn request_move(&self, height_mm: i32, preset: Option<String>) -> Result<MoveOutcome> {
        self.call(|reply| Request::SetHeight {
            height_mm,
            preset,
            reply,
        })
        .await?
    }

    async fn call<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> Request) -> Result<R> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(make(reply))
            .await
            .map_err(|_| DeskError::ServiceStopped)?;
        response.await.map_err(|_| DeskError::ServiceStopped)
    }
}

/// What a height notification asks the loop to do
enum Reaction {
    Nothing,
    Progress { height_mm: i32, direction: Direction },
    Stop { height_mm: i32, target_mm: i32 },
    Nudge { height_mm: i32, direction: Direction },
}

struct ControlLoop<T> {
    transport: T,
    state: SharedState,
    bounds: HeightBounds,
    tolerance_mm: i32,
    max_nudges: u32,
    events: EventSender,
    link: Option<LinkId>,
    /// Re-issued commands since the desk last moved toward the target
    nudges: u32,
    last_progress_mm: Option<i32>,
}

impl<T: DeskTransport> ControlLoop<T> {
    async fn run(mut self, mut requests: mpsc::Receiver<Request>, mut events: EventReceiver) {
        debug!("Desk control loop started");

        loop {
            tokio::select! {
                biased;
                Some(event) = events.recv() => self.handle_event(event).await,
                request = requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => break,
                },
            }
        }

        if self.link.take().is_some() {
            self.transport.disconnect().await;
        }
        self.state
            .update(|record| {
                record.desk.connection_status = ConnectionStatus::Disconnected;
                record.desk.phase = MovePhase::Idle;
                record.desk.clear_move();
            })
            .await;
        debug!("Desk control loop stopped");
    }

    async fn handle_request(&mut self, request: Request) {
        // A caller that gave up waiting is not an error for the loop
        match request {
            Request::SetHeight {
                height_mm,
                preset,
                reply,
            } => {
                let _ = reply.send(self.set_height(height_mm, preset).await);
            }
            Request::Stop { reply } => {
                let _ = reply.send(self.stop().await);
            }
            Request::Connect { reply } => {
                let _ = reply.send(self.ensure_connected().await);
            }
            Request::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(());
            }
        }
    }

    async fn set_height(&mut self, requested_mm: i32, preset: Option<String>) -> Result<MoveOutcome> {
        let target_mm = self.bounds.clamp(requested_mm);

        let (generation, known_height, was_moving) = self
            .state
            .update(|record| {
                record.desk.move_generation += 1;
                (
                    record.desk.move_generation,
                    record.desk.current_height_mm,
                    record.desk.is_moving,
                )
            })
            .await;

        // Already there and at rest: nothing to send, not even a connect
        if !was_moving && known_height == Some(target_mm) {
            info!("Desk already at {}mm", target_mm);
            self.set_active_preset(preset).await;
            return Ok(MoveOutcome::AlreadyAtTarget);
        }

        self.ensure_connected().await?;

        let current_mm = self
            .state
            .read()
            .await
            .desk
            .current_height_mm
            .unwrap_or(target_mm);

        let direction = match Direction::towards(current_mm, target_mm) {
            Some(direction) if (current_mm - target_mm).abs() > self.tolerance_mm => direction,
            _ if was_moving => {
                info!(
                    "New target {}mm is where the desk is ({}mm), stopping",
                    target_mm, current_mm
                );
                self.write(Command::Stop).await?;
                self.settle().await;
                self.set_active_preset(preset).await;
                return Ok(MoveOutcome::Stopped);
            }
            _ => {
                info!("Desk already at {}mm", current_mm);
                self.set_active_preset(preset).await;
                return Ok(MoveOutcome::AlreadyAtTarget);
            }
        };

        self.write(direction.command()).await?;
        self.nudges = 0;
        self.last_progress_mm = Some(current_mm);

        let superseded = self
            .state
            .update(|record| {
                let previous = record.desk.target_height_mm.filter(|_| record.desk.is_moving);
                record.desk.target_height_mm = Some(target_mm);
                record.desk.direction = Some(direction);
                record.desk.is_moving = true;
                record.desk.phase = MovePhase::Moving;
                record.desk.active_preset = preset;
                record.desk.last_error = None;
                previous
            })
            .await;

        if let Some(previous_mm) = superseded {
            info!(
                "Target {}mm superseded by {}mm, moving {} (generation {})",
                previous_mm, target_mm, direction, generation
            );
            Ok(MoveOutcome::Superseded {
                generation,
                direction,
            })
        } else {
            info!(
                "Moving {} from {}mm to {}mm (generation {})",
                direction, current_mm, target_mm, generation
            );
            Ok(MoveOutcome::Started {
                generation,
                direction,
            })
        }
    }

    async fn stop(&mut self) -> Result<()> {
        if self.link.is_some() {
            self.write(Command::Stop).await?;
            info!("Desk stopped on request");
        }
        self.settle().await;
        Ok(())
    }

    async fn ensure_connected(&mut self) -> Result<()> {
        if self.link.is_some() {
            return Ok(());
        }

        self.state
            .update(|record| {
                record.desk.connection_status = ConnectionStatus::Connecting;
                record.desk.phase = MovePhase::Connecting;
            })
            .await;
        info!("Connecting to desk");

        match self.transport.connect(self.events.clone()).await {
            Ok(Connected { link, height_mm }) => {
                self.link = Some(link);
                self.state
                    .update(|record| {
                        record.desk.connection_status = ConnectionStatus::Connected;
                        record.desk.current_height_mm = Some(height_mm);
                        record.desk.phase = MovePhase::Idle;
                        record.desk.last_error = None;
                    })
                    .await;
                info!("Desk connected on {} at {}mm", link, height_mm);
                Ok(())
            }
            Err(e) => {
                error!("Failed to connect to desk: {}", e);
                let message = e.to_string();
                self.state
                    .update(|record| {
                        record.desk.connection_status = ConnectionStatus::Error;
                        record.desk.phase = MovePhase::Error;
                        record.desk.clear_move();
                        record.desk.last_error = Some(message);
                    })
                    .await;
                Err(e.into())
            }
        }
    }

    async fn disconnect(&mut self) {
        self.transport.disconnect().await;
        self.link = None;
        self.state
            .update(|record| {
                record.desk.connection_status = ConnectionStatus::Disconnected;
                record.desk.phase = MovePhase::Idle;
                record.desk.clear_move();
            })
            .await;
        info!("Desk disconnected");
    }

    async fn handle_event(&mut self, event: TransportEvent) {
        if self.link != Some(event.link) {
            trace!("Dropping event from stale {}", event.link);
            return;
        }

        match event.kind {
            LinkEvent::Height(sample) => self.on_height(sample).await,
            LinkEvent::Disconnected => self.on_link_lost().await,
        }
    }

    async fn on_height(&mut self, sample: HeightSample) {
        let tolerance_mm = self.tolerance_mm;
        let reaction = self
            .state
            .update(|record| {
                let desk = &mut record.desk;
                desk.current_height_mm = Some(sample.height_mm);
                desk.speed = sample.speed;

                if desk.phase != MovePhase::Moving {
                    return Reaction::Nothing;
                }
                let (Some(target_mm), Some(direction)) = (desk.target_height_mm, desk.direction)
                else {
                    return Reaction::Nothing;
                };

                let reached = match direction {
                    Direction::Up => sample.height_mm >= target_mm - tolerance_mm,
                    Direction::Down => sample.height_mm <= target_mm + tolerance_mm,
                };
                if reached {
                    desk.phase = MovePhase::StoppingAtTarget;
                    Reaction::Stop {
                        height_mm: sample.height_mm,
                        target_mm,
                    }
                } else if sample.is_at_rest() {
                    Reaction::Nudge {
                        height_mm: sample.height_mm,
                        direction,
                    }
                } else {
                    Reaction::Progress {
                        height_mm: sample.height_mm,
                        direction,
                    }
                }
            })
            .await;

        trace!("Desk at {}mm (speed {:?})", sample.height_mm, sample.speed);

        match reaction {
            Reaction::Nothing => {}
            Reaction::Progress {
                height_mm,
                direction,
            } => self.track_progress(height_mm, direction),
            Reaction::Stop {
                height_mm,
                target_mm,
            } => {
                if self.write(Command::Stop).await.is_ok() {
                    self.settle().await;
                    info!("Desk reached {}mm (target {}mm)", height_mm, target_mm);
                }
            }
            Reaction::Nudge {
                height_mm,
                direction,
            } => {
                self.track_progress(height_mm, direction);
                self.nudge(height_mm, direction).await;
            }
        }
    }

    /// Reset the retry budget whenever the desk gained ground
    fn track_progress(&mut self, height_mm: i32, direction: Direction) {
        let progressed = self.last_progress_mm.is_none_or(|last_mm| match direction {
            Direction::Up => height_mm > last_mm,
            Direction::Down => height_mm < last_mm,
        });
        if progressed {
            self.last_progress_mm = Some(height_mm);
            self.nudges = 0;
        }
    }

    /// The desk came to rest short of the target; push it again, or give up
    /// once it has stopped gaining ground
    async fn nudge(&mut self, height_mm: i32, direction: Direction) {
        if self.nudges < self.max_nudges {
            self.nudges += 1;
            debug!(
                "Desk stalled at {}mm, re-issuing move {} ({}/{})",
                height_mm, direction, self.nudges, self.max_nudges
            );
            let _ = self.write(direction.command()).await;
            return;
        }

        warn!(
            "Desk stuck at {}mm after {} retries without progress, abandoning move",
            height_mm, self.max_nudges
        );
        if self.write(Command::Stop).await.is_ok() {
            self.state
                .update(|record| {
                    record.desk.phase = MovePhase::Idle;
                    record.desk.clear_move();
                    record.desk.last_error = Some(format!("Desk stalled at {height_mm}mm"));
                })
                .await;
        }
    }

    async fn on_link_lost(&mut self) {
        self.link = None;
        let abandoned = self
            .state
            .update(|record| {
                let desk = &mut record.desk;
                desk.connection_status = ConnectionStatus::Disconnected;
                let abandoned = desk.target_height_mm.filter(|_| desk.is_moving);
                if abandoned.is_some() || desk.phase == MovePhase::StoppingAtTarget {
                    desk.phase = MovePhase::Error;
                    desk.last_error = Some("Link dropped during move".to_string());
                } else if desk.phase != MovePhase::Error {
                    desk.phase = MovePhase::Idle;
                }
                desk.clear_move();
                abandoned
            })
            .await;

        match abandoned {
            Some(target_mm) => warn!("Desk link lost, abandoning move to {}mm", target_mm),
            None => warn!("Desk link lost"),
        }
    }

    /// Write a command; on failure the move is abandoned and the link marked broken
    async fn write(&mut self, command: Command) -> Result<()> {
        debug!("Writing {} to desk", command);
        match self.transport.write_command(command).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail_move(command, e).await),
        }
    }

    async fn fail_move(&mut self, command: Command, e: WriteError) -> DeskError {
        error!("Failed to write {} to desk: {}", command, e);
        self.link = None;
        let message = e.to_string();
        self.state
            .update(|record| {
                record.desk.connection_status = ConnectionStatus::Error;
                record.desk.phase = MovePhase::Error;
                record.desk.clear_move();
                record.desk.last_error = Some(message);
            })
            .await;
        e.into()
    }

    async fn set_active_preset(&self, preset: Option<String>) {
        self.state
            .update(|record| record.desk.active_preset = preset)
            .await;
    }

    /// Back to rest with no target
    async fn settle(&self) {
        self.state
            .update(|record| {
                record.desk.phase = MovePhase::Idle;
                record.desk.clear_move();
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::ConnectError,
        transport::LinkIds,
    };
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder {
        writes: Arc<Mutex<Vec<Command>>>,
        connects: Arc<Mutex<u32>>,
        ids: Arc<LinkIds>,
    }

    #[async_trait]
    impl DeskTransport for Recorder {
        async fn connect(&self, _events: EventSender) -> std::result::Result<Connected, ConnectError> {
            *self.connects.lock().unwrap() += 1;
            Ok(Connected {
                link: self.ids.next(),
                height_mm: 700,
            })
        }

        async fn write_command(&self, command: Command) -> std::result::Result<(), WriteError> {
            self.writes.lock().unwrap().push(command);
            Ok(())
        }

        async fn disconnect(&self) {}
    }

    fn config() -> DeskConfig {
        DeskConfig::new("FD:46:77:A9:30:CA".parse().unwrap())
    }

    #[tokio::test]
    async fn test_set_height_connects_then_moves() {
        let transport = Recorder::default();
        let desk = DeskService::new(transport.clone(), &config(), SharedState::default());

        let outcome = desk.set_height(900).await.unwrap();
        assert_eq!(
            outcome,
            MoveOutcome::Started {
                generation: 1,
                direction: Direction::Up
            }
        );
        assert_eq!(*transport.connects.lock().unwrap(), 1);
        assert_eq!(*transport.writes.lock().unwrap(), vec![Command::MoveUp]);

        let state = desk.get_state().await;
        assert_eq!(state.phase, MovePhase::Moving);
        assert_eq!(state.target_height_mm, Some(900));
        assert!(state.is_moving);
    }

    #[tokio::test]
    async fn test_out_of_bounds_never_reaches_transport() {
        let transport = Recorder::default();
        let desk = DeskService::new(transport.clone(), &config(), SharedState::default());

        let err = desk.set_height(1500).await.unwrap_err();
        assert!(err.is_validation_error());
        assert_eq!(*transport.connects.lock().unwrap(), 0);
        assert!(transport.writes.lock().unwrap().is_empty());
        assert_eq!(desk.get_state().await.move_generation, 0);
    }

    #[tokio::test]
    async fn test_stop_without_link_is_noop() {
        let transport = Recorder::default();
        let desk = DeskService::new(transport.clone(), &config(), SharedState::default());

        desk.stop().await.unwrap();
        assert!(transport.writes.lock().unwrap().is_empty());
        assert_eq!(desk.get_state().await.phase, MovePhase::Idle);
    }

    #[tokio::test]
    async fn test_unknown_preset() {
        let desk = DeskService::start(Recorder::default(), &config()).await;
        let err = desk.apply_preset("Lounging").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_shutdown_marks_disconnected() {
        let state = SharedState::default();
        let desk = DeskService::new(Recorder::default(), &config(), state.clone());
        desk.connect().await.unwrap();
        assert!(desk.is_connected().await);

        desk.shutdown().await;
        assert_eq!(
            state.snapshot().await.connection_status,
            ConnectionStatus::Disconnected
        );
    }
}
