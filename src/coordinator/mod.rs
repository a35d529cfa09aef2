//! Match coordinator: runs a [`MatchMachine`] on a tokio task and carries out
//! its effects against the peer session, the answer oracle and local stats.

pub mod machine;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};

use crate::oracle::AnswerOracle;
use crate::protocol::P2PMessage;
use crate::session::{P2PSession, Subscription};
use crate::stats::StatsStore;
pub use machine::{
    Effect, Input, MatchMachine, MatchSetup, MatchSnapshot, Mode, PendingWin, TimerKind,
    Validation,
};

/// Handle to a running match. Dropping it tears the match down.
pub struct MatchCoordinator {
    commands: mpsc::UnboundedSender<Input>,
    snapshot: watch::Receiver<MatchSnapshot>,
    session: Option<Arc<P2PSession>>,
    task: JoinHandle<()>,
}

impl MatchCoordinator {
    /// Play against the computer
    pub fn solo(mut setup: MatchSetup, oracle: Arc<dyn AnswerOracle>, stats: StatsStore) -> Self {
        setup.mode = Mode::Solo;
        Self::spawn(setup, None, oracle, stats)
    }

    /// Play against the peer on an already connected session
    pub fn versus(
        mut setup: MatchSetup,
        session: Arc<P2PSession>,
        oracle: Arc<dyn AnswerOracle>,
        stats: StatsStore,
    ) -> Self {
        setup.mode = Mode::Versus {
            is_host: session.is_host(),
        };
        setup.local_name = session.display_name();
        if let Some(name) = session.opponent_name() {
            setup.opponent_name = name;
        }
        Self::spawn(setup, Some(session), oracle, stats)
    }

    fn spawn(
        setup: MatchSetup,
        session: Option<Arc<P2PSession>>,
        oracle: Arc<dyn AnswerOracle>,
        stats: StatsStore,
    ) -> Self {
        let machine = MatchMachine::new(setup);
        let (snapshot_tx, snapshot) = watch::channel(machine.snapshot());
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let peer = session.as_ref().map(|s| s.on_message());

        let driver = Driver {
            machine,
            session: session.clone(),
            oracle,
            stats,
            timers: Timers::default(),
            jobs: JoinSet::new(),
            internal_tx,
            snapshot: snapshot_tx,
        };
        let task = tokio::spawn(driver.run(command_rx, internal_rx, peer));

        let coordinator = Self {
            commands,
            snapshot,
            session,
            task,
        };
        coordinator.send(Input::Start);
        coordinator
    }

    fn send(&self, input: Input) {
        if self.commands.send(input).is_err() {
            tracing::debug!("Match task is gone, dropping input");
        }
    }

    /// Move the selection cursor
    pub fn select_team(&self, team_id: &str) {
        self.send(Input::Highlight(team_id.to_string()));
    }

    pub fn confirm_selection(&self) {
        self.send(Input::ConfirmSelection);
    }

    /// Highlight and confirm in one go
    pub fn pick_team(&self, team_id: &str) {
        self.select_team(team_id);
        self.confirm_selection();
    }

    pub fn submit_answer(&self, answer: &str) {
        self.send(Input::Submit(answer.to_string()));
    }

    pub fn surrender(&self) {
        self.send(Input::Surrender);
    }

    pub fn next_round(&self) {
        self.send(Input::NextRound);
    }

    pub fn quit(&self) {
        self.send(Input::Quit);
    }

    pub fn snapshot(&self) -> MatchSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that wakes on every state change
    pub fn updates(&self) -> watch::Receiver<MatchSnapshot> {
        self.snapshot.clone()
    }

    /// Wait for a state matching `pred`. Returns the last known state if the
    /// match task stops first.
    pub async fn wait_until(&self, pred: impl FnMut(&MatchSnapshot) -> bool) -> MatchSnapshot {
        let mut rx = self.snapshot.clone();
        if let Ok(snapshot) = rx.wait_for(pred).await {
            return snapshot.clone();
        }
        let last = rx.borrow().clone();
        last
    }

    /// Stop the match task, its timers and the peer session. Idempotent.
    pub fn destroy(&self) {
        self.task.abort();
        if let Some(session) = &self.session {
            session.destroy();
        }
    }
}

impl Drop for MatchCoordinator {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Pending timers, one per kind. Aborted on drop.
#[derive(Default)]
struct Timers {
    running: HashMap<TimerKind, JoinHandle<()>>,
}

impl Timers {
    fn start(
        &mut self,
        kind: TimerKind,
        after: Duration,
        round: u32,
        tx: mpsc::UnboundedSender<Input>,
    ) {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(Input::TimerFired { kind, round });
        });
        if let Some(old) = self.running.insert(kind, handle) {
            old.abort();
        }
    }

    fn cancel(&mut self, kind: TimerKind) {
        if let Some(handle) = self.running.remove(&kind) {
            handle.abort();
        }
    }

    fn clear(&mut self) {
        for (_, handle) in self.running.drain() {
            handle.abort();
        }
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.clear();
    }
}

enum Event {
    Command(Option<Input>),
    Internal(Option<Input>),
    Peer(Option<P2PMessage>),
    Job(Result<Input, JoinError>),
}

struct Driver {
    machine: MatchMachine,
    session: Option<Arc<P2PSession>>,
    oracle: Arc<dyn AnswerOracle>,
    stats: StatsStore,
    timers: Timers,
    /// Oracle calls; each resolves to the input that reports its result
    jobs: JoinSet<Input>,
    internal_tx: mpsc::UnboundedSender<Input>,
    snapshot: watch::Sender<MatchSnapshot>,
}

async fn next_peer(peer: &mut Option<Subscription>) -> Option<P2PMessage> {
    match peer {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Input>,
        mut internal: mpsc::UnboundedReceiver<Input>,
        mut peer: Option<Subscription>,
    ) {
        loop {
            let event = tokio::select! {
                cmd = commands.recv() => Event::Command(cmd),
                input = internal.recv() => Event::Internal(input),
                msg = next_peer(&mut peer) => Event::Peer(msg),
                Some(done) = self.jobs.join_next(), if !self.jobs.is_empty() => Event::Job(done),
            };

            let input = match event {
                Event::Command(Some(input)) | Event::Internal(Some(input)) => input,
                Event::Command(None) | Event::Internal(None) => {
                    tracing::debug!("Match handle dropped, stopping");
                    break;
                }
                Event::Peer(Some(msg)) => Input::Peer(msg),
                Event::Peer(None) => {
                    // Listener list cleared under us: the session is gone
                    peer = None;
                    Input::Peer(P2PMessage::OpponentDisconnect {})
                }
                Event::Job(Ok(input)) => input,
                Event::Job(Err(e)) => {
                    tracing::error!("Oracle task failed: {}", e);
                    continue;
                }
            };
            self.step(input);
        }
    }

    fn step(&mut self, input: Input) {
        for effect in self.machine.handle(input) {
            self.apply(effect);
        }
        self.snapshot.send_replace(self.machine.snapshot());
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Send(msg) => match &self.session {
                Some(session) => session.send(&msg),
                None => tracing::debug!("No session, not sending {}", msg.kind()),
            },
            Effect::StartTimer { kind, after, round } => {
                self.timers.start(kind, after, round, self.internal_tx.clone());
            }
            Effect::CancelTimer(kind) => self.timers.cancel(kind),
            Effect::CancelAllTimers => self.timers.clear(),
            Effect::Enumerate {
                round,
                team_a,
                team_b,
            } => {
                let oracle = self.oracle.clone();
                self.jobs.spawn(async move {
                    let answers = match oracle.enumerate_valid_answers(&team_a, &team_b).await {
                        Ok(answers) => answers,
                        Err(e) => {
                            tracing::warn!(
                                "Could not list answers for {} / {}: {}",
                                team_a,
                                team_b,
                                e
                            );
                            Vec::new()
                        }
                    };
                    Input::AnswersEnumerated { round, answers }
                });
            }
            Effect::Verify {
                round,
                team_a,
                team_b,
                answer,
            } => {
                let oracle = self.oracle.clone();
                self.jobs.spawn(async move {
                    let result = match oracle.verify(&team_a, &team_b, &answer).await {
                        Ok(verification) => Some(verification),
                        Err(e) => {
                            tracing::warn!("Verification of {} failed: {}", answer, e);
                            None
                        }
                    };
                    Input::Verified {
                        round,
                        answer,
                        result,
                    }
                });
            }
            Effect::RecordMatch {
                result,
                opponent,
                team,
            } => {
                if let Err(e) = self.stats.save_match(result, &opponent, &team) {
                    tracing::error!("Failed to record match: {}", e);
                }
            }
            Effect::CloseSession => {
                if let Some(session) = &self.session {
                    session.destroy();
                }
            }
        }
    }
}
