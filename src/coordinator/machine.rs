//! Round/match state machine.
//!
//! [`MatchMachine::handle`] is pure: it consumes one [`Input`] and returns the
//! [`Effect`]s the driver must carry out (timers, oracle calls, sends). All
//! asynchronous results come back in as inputs tagged with the round they
//! were issued for, so anything from an earlier round is dropped here.

use rand::{rngs::StdRng, seq::IndexedRandom, Rng, SeedableRng};
use std::time::Duration;

use crate::config::MatchTiming;
use crate::oracle::Verification;
use crate::protocol::{MatchConfig, P2PMessage, TeamSelection};
use crate::teams::TeamCatalog;
use crate::types::{
    DrawReason, GamePhase, MatchResult, MatchState, RoundOutcome, Team, TeamId, Winner,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Against the computer, no network
    Solo,
    /// Against a remote peer
    Versus { is_host: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    SelectionCountdown,
    /// Solo only: the computer picks its team
    OpponentSelection,
    Reveal,
    RoundCountdown,
    /// Solo only: the computer answers
    OpponentThink,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// Begin the match. Hosts announce START_GAME; guests keep waiting for it.
    Start,
    Highlight(TeamId),
    ConfirmSelection,
    Submit(String),
    Surrender,
    NextRound,
    Quit,
    Peer(P2PMessage),
    TimerFired {
        kind: TimerKind,
        round: u32,
    },
    AnswersEnumerated {
        round: u32,
        answers: Vec<String>,
    },
    /// `None` when the oracle failed
    Verified {
        round: u32,
        answer: String,
        result: Option<Verification>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Send(P2PMessage),
    StartTimer {
        kind: TimerKind,
        after: Duration,
        round: u32,
    },
    CancelTimer(TimerKind),
    CancelAllTimers,
    Enumerate {
        round: u32,
        team_a: String,
        team_b: String,
    },
    Verify {
        round: u32,
        team_a: String,
        team_b: String,
        answer: String,
    },
    RecordMatch {
        result: MatchResult,
        opponent: String,
        team: String,
    },
    /// Tear the peer session down
    CloseSession,
}

/// An opponent point waiting on our own in-flight answers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWin {
    pub answer: Option<String>,
    pub history: Vec<String>,
}

/// Local answer checks for the current round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Idle,
    Validating { in_flight: u32 },
    /// The opponent scored meanwhile; it stands only if every check misses
    ValidatingWithPendingOpponentWin { in_flight: u32, win: PendingWin },
}

pub struct MatchSetup {
    pub mode: Mode,
    pub best_of: u32,
    pub catalog: TeamCatalog,
    pub timing: MatchTiming,
    /// Our display name, announced to the peer when the match loop starts
    pub local_name: String,
    pub opponent_name: String,
    /// Fixed seed for reproducible computer choices
    pub seed: Option<u64>,
}

/// Read-only view published after every step
#[derive(Debug, Clone, PartialEq)]
pub struct MatchSnapshot {
    pub mode: Mode,
    pub phase: GamePhase,
    pub round: u32,
    pub score: MatchState,
    pub my_team: Option<Team>,
    pub highlighted: Option<Team>,
    pub opponent_team: Option<Team>,
    pub opponent_name: String,
    pub last_outcome: Option<RoundOutcome>,
    pub validation: Validation,
}

pub struct MatchMachine {
    mode: Mode,
    timing: MatchTiming,
    catalog: TeamCatalog,
    rng: StdRng,
    best_of: u32,
    started: bool,
    phase: GamePhase,
    round: u32,
    score: MatchState,
    my_team: Option<Team>,
    highlighted: Option<Team>,
    opponent_team: Option<Team>,
    /// TEAM_SELECT that arrived before our SELECTION
    buffered_opponent: Option<Team>,
    answers: Vec<String>,
    validation: Validation,
    last_outcome: Option<RoundOutcome>,
    local_name: String,
    opponent_name: String,
}

impl MatchMachine {
    pub fn new(setup: MatchSetup) -> Self {
        let rng = match setup.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            mode: setup.mode,
            timing: setup.timing,
            catalog: setup.catalog,
            rng,
            best_of: setup.best_of,
            started: false,
            phase: GamePhase::Waiting,
            round: 0,
            score: MatchState::best_of(setup.best_of),
            my_team: None,
            highlighted: None,
            opponent_team: None,
            buffered_opponent: None,
            answers: Vec::new(),
            validation: Validation::Idle,
            last_outcome: None,
            local_name: setup.local_name,
            opponent_name: setup.opponent_name,
        }
    }

    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn snapshot(&self) -> MatchSnapshot {
        MatchSnapshot {
            mode: self.mode,
            phase: self.phase,
            round: self.round,
            score: self.score.clone(),
            my_team: self.my_team.clone(),
            highlighted: self.highlighted.clone(),
            opponent_team: self.opponent_team.clone(),
            opponent_name: self.opponent_name.clone(),
            last_outcome: self.last_outcome.clone(),
            validation: self.validation.clone(),
        }
    }

    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        let mut fx = Vec::new();
        if self.phase.is_terminal() {
            tracing::debug!("Match over, ignoring {:?}", input);
            return fx;
        }

        match input {
            Input::Start => self.start(&mut fx),
            Input::Highlight(team_id) => self.highlight(&team_id),
            Input::ConfirmSelection => {
                if self.phase == GamePhase::Selection && self.my_team.is_none() {
                    if let Some(team) = self.highlighted.clone() {
                        self.commit_selection(team, &mut fx);
                    }
                }
            }
            Input::Submit(answer) => self.submit(answer, &mut fx),
            Input::Surrender => {
                if self.phase == GamePhase::Playing {
                    if self.is_versus() {
                        fx.push(Effect::Send(P2PMessage::Surrender {}));
                    }
                    self.end_round(RoundOutcome::SelfSurrendered, &mut fx);
                }
            }
            Input::NextRound => {
                if self.phase == GamePhase::RoundEnd {
                    self.enter_selection(&mut fx);
                }
            }
            Input::Quit => self.quit(&mut fx),
            Input::Peer(msg) => self.on_peer(msg, &mut fx),
            Input::TimerFired { kind, round } => {
                if round != self.round {
                    tracing::debug!("Stale {:?} timer from round {}", kind, round);
                } else {
                    self.on_timer(kind, &mut fx);
                }
            }
            Input::AnswersEnumerated { round, answers } => {
                if round == self.round && self.phase == GamePhase::Playing {
                    self.on_answers(answers, &mut fx);
                }
            }
            Input::Verified {
                round,
                answer,
                result,
            } => {
                if round == self.round && self.phase == GamePhase::Playing {
                    self.on_verified(answer, result, &mut fx);
                } else {
                    tracing::debug!("Late verification of {} dropped", answer);
                }
            }
        }
        fx
    }

    fn is_versus(&self) -> bool {
        matches!(self.mode, Mode::Versus { .. })
    }

    fn is_guest(&self) -> bool {
        self.mode == Mode::Versus { is_host: false }
    }

    fn random_between(&mut self, min: Duration, max: Duration) -> Duration {
        let (lo, hi) = (min.as_millis() as u64, max.as_millis() as u64);
        if hi <= lo {
            return min;
        }
        Duration::from_millis(self.rng.random_range(lo..=hi))
    }

    fn random_team(&mut self) -> Option<Team> {
        self.catalog.all().choose(&mut self.rng).cloned()
    }

    fn start(&mut self, fx: &mut Vec<Effect>) {
        if self.started {
            return;
        }
        match self.mode {
            Mode::Solo => {
                self.started = true;
                self.enter_selection(fx);
            }
            Mode::Versus { is_host: true } => {
                self.started = true;
                fx.push(Effect::Send(P2PMessage::StartGame {
                    match_config: MatchConfig {
                        best_of: self.best_of,
                    },
                }));
                self.enter_selection(fx);
            }
            Mode::Versus { is_host: false } => {
                self.started = true;
                if self.phase == GamePhase::Waiting {
                    tracing::debug!("Guest waiting for START_GAME");
                    fx.push(Effect::Send(P2PMessage::Handshake {
                        username: self.local_name.clone(),
                    }));
                }
            }
        }
    }

    /// A guest whose match loop came up after ours announces itself with a
    /// HANDSHAKE; repeat what it may have missed
    fn replay_opening(&mut self, fx: &mut Vec<Effect>) {
        let waiting_for_guest = self.mode == Mode::Versus { is_host: true }
            && self.round == 1
            && self.phase == GamePhase::Selection
            && self.opponent_team.is_none();
        if !waiting_for_guest {
            return;
        }
        tracing::debug!("Replaying START_GAME for a late guest");
        fx.push(Effect::Send(P2PMessage::StartGame {
            match_config: MatchConfig {
                best_of: self.best_of,
            },
        }));
        if let Some(team) = &self.my_team {
            fx.push(Effect::Send(P2PMessage::TeamSelect(TeamSelection::single(
                &team.id,
            ))));
        }
    }

    fn enter_selection(&mut self, fx: &mut Vec<Effect>) {
        self.round += 1;
        self.phase = GamePhase::Selection;
        self.my_team = None;
        self.highlighted = None;
        self.opponent_team = self.buffered_opponent.take();
        self.answers.clear();
        self.validation = Validation::Idle;
        self.last_outcome = None;
        tracing::info!("Round {} selection", self.round);

        fx.push(Effect::StartTimer {
            kind: TimerKind::SelectionCountdown,
            after: self.timing.selection,
            round: self.round,
        });
        if self.mode == Mode::Solo {
            let after = self.random_between(
                self.timing.opponent_pick_min,
                self.timing.opponent_pick_max,
            );
            fx.push(Effect::StartTimer {
                kind: TimerKind::OpponentSelection,
                after,
                round: self.round,
            });
        }
    }

    fn highlight(&mut self, team_id: &str) {
        if self.phase != GamePhase::Selection || self.my_team.is_some() {
            return;
        }
        match self.catalog.get(team_id) {
            Some(team) => self.highlighted = Some(team.clone()),
            None => tracing::warn!("Ignoring unknown team {}", team_id),
        }
    }

    fn commit_selection(&mut self, team: Team, fx: &mut Vec<Effect>) {
        tracing::info!("Round {}: we play as {}", self.round, team.name);
        fx.push(Effect::CancelTimer(TimerKind::SelectionCountdown));
        if self.is_versus() {
            fx.push(Effect::Send(P2PMessage::TeamSelect(TeamSelection::single(
                &team.id,
            ))));
        }
        self.my_team = Some(team);
        self.try_reveal(fx);
    }

    /// Both sides have a team: move on
    fn try_reveal(&mut self, fx: &mut Vec<Effect>) {
        if self.phase != GamePhase::Selection {
            return;
        }
        if self.my_team.is_none() || self.opponent_team.is_none() {
            return;
        }
        self.phase = GamePhase::Reveal;
        fx.push(Effect::StartTimer {
            kind: TimerKind::Reveal,
            after: self.timing.reveal,
            round: self.round,
        });
    }

    fn enter_playing(&mut self, fx: &mut Vec<Effect>) {
        let (Some(mine), Some(theirs)) = (&self.my_team, &self.opponent_team) else {
            return;
        };
        let (team_a, team_b) = (mine.name.clone(), theirs.name.clone());

        self.phase = GamePhase::Playing;
        self.validation = Validation::Idle;
        self.answers.clear();

        // The host's clock decides; a guest only draws on its own well after
        let clock = if self.is_guest() {
            self.timing.round + self.timing.guest_grace
        } else {
            self.timing.round
        };
        fx.push(Effect::StartTimer {
            kind: TimerKind::RoundCountdown,
            after: clock,
            round: self.round,
        });
        fx.push(Effect::Enumerate {
            round: self.round,
            team_a,
            team_b,
        });
    }

    fn on_timer(&mut self, kind: TimerKind, fx: &mut Vec<Effect>) {
        match (kind, self.phase) {
            (TimerKind::SelectionCountdown, GamePhase::Selection) if self.my_team.is_none() => {
                let choice = self.highlighted.clone().or_else(|| self.random_team());
                match choice {
                    Some(team) => {
                        tracing::info!("Selection time up, auto-picking {}", team.name);
                        self.commit_selection(team, fx);
                    }
                    None => tracing::warn!("Selection time up but there are no teams to pick"),
                }
            }
            (TimerKind::OpponentSelection, GamePhase::Selection)
                if self.mode == Mode::Solo && self.opponent_team.is_none() =>
            {
                self.opponent_team = self.random_team();
                self.try_reveal(fx);
            }
            (TimerKind::Reveal, GamePhase::Reveal) => self.enter_playing(fx),
            (TimerKind::RoundCountdown, GamePhase::Playing) => {
                match self.mode {
                    Mode::Versus { is_host: true } => {
                        fx.push(Effect::Send(P2PMessage::RoundTimeout {}));
                    }
                    Mode::Versus { is_host: false } => {
                        tracing::warn!("No ROUND_TIMEOUT from host, ending round locally");
                    }
                    Mode::Solo => {}
                }
                self.end_round(
                    RoundOutcome::Draw {
                        reason: DrawReason::TimeUp,
                    },
                    fx,
                );
            }
            (TimerKind::OpponentThink, GamePhase::Playing) if self.mode == Mode::Solo => {
                let answer = self.answers.choose(&mut self.rng).cloned();
                self.opponent_win(answer, Vec::new(), fx);
            }
            (kind, phase) => tracing::debug!("Ignoring {:?} timer in {:?}", kind, phase),
        }
    }

    fn on_answers(&mut self, answers: Vec<String>, fx: &mut Vec<Effect>) {
        if answers.is_empty() {
            tracing::info!("Round {}: no valid answers exist, draw", self.round);
            self.end_round(
                RoundOutcome::Draw {
                    reason: DrawReason::NoValidAnswers,
                },
                fx,
            );
            return;
        }

        tracing::debug!("Round {}: {} valid answers", self.round, answers.len());
        self.answers = answers;
        if self.mode == Mode::Solo {
            let after = self.random_between(
                self.timing.opponent_think_min,
                self.timing.opponent_think_max,
            );
            fx.push(Effect::StartTimer {
                kind: TimerKind::OpponentThink,
                after,
                round: self.round,
            });
        }
    }

    fn submit(&mut self, answer: String, fx: &mut Vec<Effect>) {
        let answer = answer.trim().to_string();
        if self.phase != GamePhase::Playing || answer.is_empty() {
            return;
        }
        let (Some(mine), Some(theirs)) = (&self.my_team, &self.opponent_team) else {
            return;
        };

        fx.push(Effect::Verify {
            round: self.round,
            team_a: mine.name.clone(),
            team_b: theirs.name.clone(),
            answer,
        });

        self.validation = match std::mem::replace(&mut self.validation, Validation::Idle) {
            Validation::Idle => Validation::Validating { in_flight: 1 },
            Validation::Validating { in_flight } => Validation::Validating {
                in_flight: in_flight + 1,
            },
            Validation::ValidatingWithPendingOpponentWin { in_flight, win } => {
                Validation::ValidatingWithPendingOpponentWin {
                    in_flight: in_flight + 1,
                    win,
                }
            }
        };
    }

    fn on_verified(&mut self, answer: String, result: Option<Verification>, fx: &mut Vec<Effect>) {
        if let Some(verification) = result.filter(|v| v.valid) {
            let name = verification.canonical_name.unwrap_or(answer);
            tracing::info!("Round {}: {} is correct", self.round, name);
            if self.is_versus() {
                fx.push(Effect::Send(P2PMessage::ScoreUpdate {
                    answer: name.clone(),
                    history: verification.history.clone(),
                }));
            }
            self.end_round(
                RoundOutcome::SelfScored {
                    answer: name,
                    history: verification.history,
                },
                fx,
            );
            return;
        }

        tracing::debug!("Round {}: {} is not a valid answer", self.round, answer);
        match std::mem::replace(&mut self.validation, Validation::Idle) {
            Validation::Idle | Validation::Validating { in_flight: 0..=1 } => {}
            Validation::Validating { in_flight } => {
                self.validation = Validation::Validating {
                    in_flight: in_flight - 1,
                };
            }
            Validation::ValidatingWithPendingOpponentWin { in_flight, win } if in_flight <= 1 => {
                self.end_round(
                    RoundOutcome::OpponentScored {
                        answer: win.answer,
                        history: win.history,
                    },
                    fx,
                );
            }
            Validation::ValidatingWithPendingOpponentWin { in_flight, win } => {
                self.validation = Validation::ValidatingWithPendingOpponentWin {
                    in_flight: in_flight - 1,
                    win,
                };
            }
        }
    }

    /// Opponent claims the round; deferred while our own answers are being checked
    fn opponent_win(&mut self, answer: Option<String>, history: Vec<String>, fx: &mut Vec<Effect>) {
        match std::mem::replace(&mut self.validation, Validation::Idle) {
            Validation::Idle => {
                self.end_round(RoundOutcome::OpponentScored { answer, history }, fx);
            }
            Validation::Validating { in_flight } => {
                tracing::debug!("Opponent scored while we are validating, deferring");
                self.validation = Validation::ValidatingWithPendingOpponentWin {
                    in_flight,
                    win: PendingWin { answer, history },
                };
            }
            pending @ Validation::ValidatingWithPendingOpponentWin { .. } => {
                self.validation = pending;
            }
        }
    }

    fn on_peer(&mut self, msg: P2PMessage, fx: &mut Vec<Effect>) {
        match msg {
            P2PMessage::Handshake { username } => {
                self.opponent_name = username;
                self.replay_opening(fx);
            }
            P2PMessage::OpponentDisconnect {} => {
                tracing::info!("Opponent disconnected in {:?}, match forfeited to us", self.phase);
                self.score.winner = Some(Winner::Disconnect);
                self.finish_match(fx);
            }
            _ if !self.is_versus() => {
                tracing::warn!("Ignoring {} in a solo match", msg.kind());
            }
            P2PMessage::StartGame { match_config } => {
                if self.is_guest() && self.phase == GamePhase::Waiting {
                    self.best_of = match_config.best_of;
                    self.score = MatchState::best_of(match_config.best_of);
                    tracing::info!("Host started a best of {}", match_config.best_of);
                    self.enter_selection(fx);
                }
            }
            P2PMessage::TeamSelect(selection) => {
                let team = self.catalog.resolve(selection.sender_team());
                if self.phase == GamePhase::Selection {
                    if self.opponent_team.is_none() {
                        tracing::info!("Round {}: opponent plays as {}", self.round, team.name);
                        self.opponent_team = Some(team);
                        self.try_reveal(fx);
                    }
                } else {
                    tracing::debug!("Holding opponent pick {} for the next selection", team.id);
                    self.buffered_opponent = Some(team);
                }
            }
            P2PMessage::ScoreUpdate { answer, history } => {
                if matches!(self.phase, GamePhase::Reveal | GamePhase::Playing) {
                    self.opponent_win(Some(answer), history, fx);
                }
            }
            P2PMessage::RoundTimeout {} => {
                if self.is_guest() && matches!(self.phase, GamePhase::Reveal | GamePhase::Playing) {
                    self.end_round(
                        RoundOutcome::Draw {
                            reason: DrawReason::TimeUp,
                        },
                        fx,
                    );
                }
            }
            P2PMessage::Surrender {} => {
                if matches!(self.phase, GamePhase::Reveal | GamePhase::Playing) {
                    self.end_round(RoundOutcome::OpponentSurrendered, fx);
                }
            }
        }
    }

    fn quit(&mut self, fx: &mut Vec<Effect>) {
        match self.phase {
            GamePhase::Selection | GamePhase::Reveal | GamePhase::Playing => {
                tracing::info!("Quit mid-round, forfeiting");
                self.score.winner = Some(Winner::Opponent);
                self.finish_match(fx);
            }
            _ => {
                tracing::info!("Quit between rounds");
                self.phase = GamePhase::MatchEnd;
                fx.push(Effect::CancelAllTimers);
            }
        }
        if self.is_versus() {
            fx.push(Effect::CloseSession);
        }
    }

    fn end_round(&mut self, outcome: RoundOutcome, fx: &mut Vec<Effect>) {
        self.phase = GamePhase::RoundEnd;
        self.validation = Validation::Idle;
        fx.push(Effect::CancelAllTimers);

        match outcome {
            RoundOutcome::SelfScored { .. } | RoundOutcome::OpponentSurrendered => {
                self.score.award_self()
            }
            RoundOutcome::OpponentScored { .. } | RoundOutcome::SelfSurrendered => {
                self.score.award_opponent()
            }
            RoundOutcome::Draw { .. } => {}
        }
        tracing::info!(
            "Round {} over: {:?} ({}-{})",
            self.round,
            outcome,
            self.score.score_self,
            self.score.score_opponent
        );
        self.last_outcome = Some(outcome);

        if self.score.is_over() {
            self.finish_match(fx);
        }
    }

    fn finish_match(&mut self, fx: &mut Vec<Effect>) {
        self.phase = GamePhase::MatchEnd;
        fx.push(Effect::CancelAllTimers);

        let result = match self.score.winner {
            Some(Winner::SelfSide) | Some(Winner::Disconnect) => MatchResult::Win,
            Some(Winner::Opponent) => MatchResult::Loss,
            None => return,
        };
        tracing::info!("Match over: {:?} against {}", result, self.opponent_name);
        fx.push(Effect::RecordMatch {
            result,
            opponent: self.opponent_name.clone(),
            team: self
                .my_team
                .as_ref()
                .map(|t| t.name.clone())
                .unwrap_or_default(),
        });
    }
}
