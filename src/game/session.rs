//! Per-peer session actor.
//!
//! A session owns one peer's local view of a game: the replayed track, the
//! local countdown and settle timers, the feed subscription and the poll
//! backstop. All of it lives inside a single task; callers talk to it through
//! a [`SessionHandle`] and read state from a `watch` channel of
//! [`PeerSnapshot`]s.
//!
//! The store row is the only source of truth. Feed events and timer expiries
//! only prompt the session to re-read or to attempt a guarded write; a row
//! older than the one already observed is dropped.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::deck::Deck;
use crate::domain::{
    BetRow, GameId, GameRow, GameStatus, HorseNumber, Participant, PeerIdentity,
    PlayerRoundState, RoundNumber, UserId,
};
use crate::feed::{ChangeEvent, ChangeFeed, FeedEvent, FeedSubscription};
use crate::race::Track;
use crate::store::{GameStore, Transition};
use crate::tokio_tools::spawn_game_task;

use super::betting::{self, StakeContext, StakeRequest};
use super::draw::{self, DrawOutcome, DrawSkip};
use super::error::{SessionError, StakeError};
use super::lobby::Lobby;
use super::round::{self, RoundPhase, RoundStep};
use super::settlement::{self, Settlement};
use super::snapshot::{Countdown, PeerSnapshot, RosterEntry, RoundReveal};

const LOG_TARGET: &str = "game::session";

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

enum SessionCommand {
    Start { reply: Reply<()> },
    PlaceStake { request: StakeRequest, reply: Reply<BetRow> },
    CloseWindow { reply: Reply<()> },
    Refresh { reply: Reply<()> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Countdown,
    Settle,
}

impl TimerKind {
    fn task_name(self) -> &'static str {
        match self {
            TimerKind::Countdown => "countdown",
            TimerKind::Settle => "settle",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TimerFired {
    kind: TimerKind,
    round: RoundNumber,
}

struct ArmedTimer {
    round: RoundNumber,
    deadline: Instant,
    token: CancellationToken,
}

impl ArmedTimer {
    fn disarm(self) {
        self.token.cancel();
    }
}

enum Wake {
    Stop,
    Command(SessionCommand),
    Timer(TimerFired),
    Feed(FeedEvent),
    Poll,
}

/// One peer playing one game.
pub struct PeerSession {
    store: Arc<dyn GameStore>,
    feed: FeedSubscription,
    feed_open: bool,
    identity: PeerIdentity,
    game_id: GameId,
    config: SessionConfig,
    deck: Deck,
    track: Track,
    game: GameRow,
    participants: Vec<Participant>,
    bets: Vec<BetRow>,
    round_states: Vec<PlayerRoundState>,
    /// Rounds whose window this peer closed.
    closed_rounds: BTreeSet<RoundNumber>,
    window_spent: HashMap<RoundNumber, f64>,
    countdown: Option<ArmedTimer>,
    settle: Option<ArmedTimer>,
    countdown_rounds: BTreeSet<RoundNumber>,
    settle_rounds: BTreeSet<RoundNumber>,
    /// Round whose countdown ran out but whose draw has not gone through yet.
    expired_countdown: Option<RoundNumber>,
    /// Drawn round whose settle delay passed without a successful next step.
    step_due: Option<RoundNumber>,
    reveal: Option<RoundReveal>,
    revealed_round: Option<RoundNumber>,
    settlement: Option<Settlement>,
    last_error: Option<String>,
    deleted: bool,
    pending: VecDeque<GameRow>,
    commands: mpsc::Receiver<SessionCommand>,
    timer_tx: mpsc::UnboundedSender<TimerFired>,
    timer_rx: mpsc::UnboundedReceiver<TimerFired>,
    snapshot_tx: watch::Sender<PeerSnapshot>,
    cancel: CancellationToken,
}

impl PeerSession {
    /// Subscribes to the game's feed, registers `identity` as a participant
    /// (or re-enters a game it already belongs to) and spawns the session
    /// task. The track is rebuilt from the deck, so a late or returning peer
    /// sees the same positions as everyone else.
    pub async fn join(
        store: Arc<dyn GameStore>,
        feed: &dyn ChangeFeed,
        identity: PeerIdentity,
        game_id: GameId,
        config: SessionConfig,
    ) -> Result<SessionHandle, SessionError> {
        // Subscribe before the first read so no write falls in between.
        let subscription = feed.subscribe(game_id);
        let game = Lobby::new(Arc::clone(&store))
            .join_game(game_id, &identity)
            .await?;
        let deck = Deck::for_game(&game.id, game.config.horse_count)?;
        let track = Track::new(game.config.horse_count);

        let (command_tx, command_rx) = mpsc::channel(config.command_capacity.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(PeerSnapshot::default());
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let user_id = identity.user_id;

        let mut session = PeerSession {
            store,
            feed: subscription,
            feed_open: true,
            identity,
            game_id,
            config,
            deck,
            track,
            game: game.clone(),
            participants: Vec::new(),
            bets: Vec::new(),
            round_states: Vec::new(),
            closed_rounds: BTreeSet::new(),
            window_spent: HashMap::new(),
            countdown: None,
            settle: None,
            countdown_rounds: BTreeSet::new(),
            settle_rounds: BTreeSet::new(),
            expired_countdown: None,
            step_due: None,
            reveal: None,
            revealed_round: None,
            settlement: None,
            last_error: None,
            deleted: false,
            pending: VecDeque::new(),
            commands: command_rx,
            timer_tx,
            timer_rx,
            snapshot_tx,
            cancel: cancel.clone(),
        };
        session.pending.push_back(game);
        session.drain_pending().await;
        session.refresh_roster().await;
        session.publish();

        info!(
            target: LOG_TARGET,
            game_id = %game_id,
            user_id = %user_id,
            seed = session.deck.seed(),
            "peer session joined"
        );
        let task = spawn_game_task("peer-session", game_id, session.run());

        Ok(SessionHandle {
            game_id,
            user_id,
            commands: command_tx,
            snapshots: snapshot_rx,
            cancel,
            task: Arc::new(Mutex::new(Some(task))),
        })
    }

    async fn run(mut self) {
        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        poll.tick().await;

        while !self.deleted {
            let wake = tokio::select! {
                _ = self.cancel.cancelled() => Wake::Stop,
                command = self.commands.recv() => match command {
                    Some(command) => Wake::Command(command),
                    None => Wake::Stop,
                },
                Some(fired) = self.timer_rx.recv() => Wake::Timer(fired),
                event = self.feed.recv(), if self.feed_open => Wake::Feed(event),
                _ = poll.tick() => Wake::Poll,
            };
            match wake {
                Wake::Stop => break,
                Wake::Command(command) => self.handle_command(command).await,
                Wake::Timer(fired) => self.on_timer(fired).await,
                Wake::Feed(event) => self.on_feed(event).await,
                Wake::Poll => self.on_poll().await,
            }
            self.drain_pending().await;
            self.publish();
        }

        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(timer) = self.countdown.take() {
            timer.disarm();
        }
        if let Some(timer) = self.settle.take() {
            timer.disarm();
        }
        self.cancel.cancel();
        let mut snapshot = self.snapshot();
        snapshot.ended = true;
        self.snapshot_tx.send_replace(snapshot);
        info!(
            target: LOG_TARGET,
            game_id = %self.game_id,
            user_id = %self.identity.user_id,
            deleted = self.deleted,
            "peer session stopped"
        );
    }

    // ---------- commands ----------

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Start { reply } => {
                let result = self.start_game().await;
                self.settle_and_reply(reply, result).await;
            }
            SessionCommand::PlaceStake { request, reply } => {
                let result = self.place_stake(request).await;
                self.settle_and_reply(reply, result).await;
            }
            SessionCommand::CloseWindow { reply } => {
                let result = self.close_own_window().await;
                self.settle_and_reply(reply, result).await;
            }
            SessionCommand::Refresh { reply } => {
                self.fresh_read().await;
                self.refresh_roster().await;
                self.settle_and_reply(reply, Ok(())).await;
            }
        }
    }

    /// Folds in whatever the command produced before answering, so a caller
    /// that reads the snapshot right after the reply sees its own effect.
    async fn settle_and_reply<T>(&mut self, reply: Reply<T>, result: Result<T, SessionError>) {
        self.drain_pending().await;
        self.publish();
        // the caller may have given up waiting
        let _ = reply.send(result);
    }

    async fn start_game(&mut self) -> Result<(), SessionError> {
        let row = round::start_game(self.store.as_ref(), self.game_id, self.identity.user_id).await?;
        self.pending.push_back(row);
        Ok(())
    }

    async fn place_stake(&mut self, request: StakeRequest) -> Result<BetRow, SessionError> {
        self.fresh_read().await;
        self.drain_pending().await;

        let user_id = self.identity.user_id;
        let own_bets: Vec<BetRow> = self
            .store
            .load_bets(self.game_id)
            .await?
            .into_iter()
            .filter(|bet| bet.user_id == user_id)
            .collect();
        let round = self.game.current_round;
        let quote = betting::quote_stake(
            &StakeContext {
                game: &self.game,
                track: &self.track,
                own_bets: &own_bets,
                spent_this_window: self.window_spent.get(&round).copied().unwrap_or(0.0),
                own_window_closed: self.own_window_closed(),
            },
            request,
        )?;

        let bet = betting::place_stake(self.store.as_ref(), self.game_id, user_id, &quote).await?;
        *self.window_spent.entry(quote.round).or_default() += quote.amount;
        info!(
            target: LOG_TARGET,
            game_id = %self.game_id,
            user_id = %user_id,
            round,
            horse = quote.horse_number,
            chips = quote.chips,
            amount = quote.amount,
            "stake placed"
        );

        if round == 1 && !self.game.timer_started {
            match betting::trigger_round_timer(self.store.as_ref(), self.game_id).await {
                Ok(Transition::Applied(row)) => {
                    info!(target: LOG_TARGET, game_id = %self.game_id, "first stake started the round 1 countdown");
                    self.pending.push_back(row);
                }
                Ok(Transition::Lost) => self.fresh_read().await,
                Err(err) => self.record_error("trigger countdown", &err),
            }
        }
        self.refresh_roster().await;
        Ok(bet)
    }

    async fn close_own_window(&mut self) -> Result<(), SessionError> {
        self.fresh_read().await;
        self.drain_pending().await;

        if self.game.status == GameStatus::Finished {
            return Err(StakeError::RaceFinished.into());
        }
        if !self.game.betting_open() {
            return Err(StakeError::WindowClosed.into());
        }
        let user_id = self.identity.user_id;
        let staked = self
            .store
            .load_bets(self.game_id)
            .await?
            .iter()
            .any(|bet| bet.user_id == user_id && bet.amount > 0.0);
        if !staked {
            return Err(StakeError::NothingStaked.into());
        }

        let round = self.game.current_round;
        betting::close_window(self.store.as_ref(), self.game_id, user_id, round).await?;
        self.closed_rounds.insert(round);
        if let Some(timer) = self.countdown.take() {
            timer.disarm();
        }
        info!(target: LOG_TARGET, game_id = %self.game_id, user_id = %user_id, round, "betting window closed");

        self.refresh_roster().await;
        self.check_all_closed().await;
        Ok(())
    }

    // ---------- wake-ups ----------

    async fn on_timer(&mut self, fired: TimerFired) {
        match fired.kind {
            TimerKind::Countdown => {
                if self.countdown.as_ref().map(|timer| timer.round) != Some(fired.round) {
                    return;
                }
                self.countdown = None;
                info!(target: LOG_TARGET, game_id = %self.game_id, round = fired.round, "betting countdown expired");
                self.expired_countdown = Some(fired.round);
                self.drain_pending().await;
                self.retry_expired_draw().await;
            }
            TimerKind::Settle => {
                if self.settle.as_ref().map(|timer| timer.round) != Some(fired.round) {
                    return;
                }
                self.settle = None;
                self.step_due = Some(fired.round);
                self.fresh_read().await;
                self.drain_pending().await;
                self.retry_due_step().await;
            }
        }
    }

    async fn on_feed(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Change(change) => {
                if change.game_id() != self.game_id {
                    return;
                }
                debug!(target: LOG_TARGET, game_id = %self.game_id, kind = change.kind(), "change received");
                match change {
                    ChangeEvent::Game(row) => self.pending.push_back(row),
                    ChangeEvent::GameDeleted(_) => {
                        info!(target: LOG_TARGET, game_id = %self.game_id, "game deleted");
                        self.deleted = true;
                    }
                    ChangeEvent::Participant(_) | ChangeEvent::Bet(_) => self.refresh_roster().await,
                    ChangeEvent::PlayerState(state) => {
                        self.drain_pending().await;
                        if state.round == self.game.current_round {
                            self.refresh_roster().await;
                            self.check_all_closed().await;
                        }
                    }
                }
            }
            FeedEvent::Lagged(skipped) => {
                warn!(target: LOG_TARGET, game_id = %self.game_id, skipped, "feed lagged; re-reading");
                self.fresh_read().await;
                self.refresh_roster().await;
            }
            FeedEvent::Closed => {
                warn!(target: LOG_TARGET, game_id = %self.game_id, "feed closed; polling only");
                self.feed_open = false;
            }
        }
    }

    async fn on_poll(&mut self) {
        self.fresh_read().await;
        self.drain_pending().await;
        self.refresh_roster().await;
        self.retry_expired_draw().await;
        self.retry_due_step().await;
        self.check_all_closed().await;
    }

    /// Draws for a round whose countdown already ran out. The marker stays
    /// until a draw attempt reaches the store, so a failed attempt is
    /// repeated on the next poll.
    async fn retry_expired_draw(&mut self) {
        let Some(round) = self.expired_countdown else {
            return;
        };
        if !(self.game.betting_open() && self.game.current_round == round) {
            self.expired_countdown = None;
            return;
        }
        if self.attempt_draw().await {
            self.expired_countdown = None;
        }
    }

    /// Takes the step after a drawn round once its settle delay has passed,
    /// until a store call for it succeeds.
    async fn retry_due_step(&mut self) {
        let Some(round) = self.step_due else {
            return;
        };
        if !(self.game.round_drawn() && self.game.current_round == round) {
            self.step_due = None;
            return;
        }
        if self.take_next_step().await {
            self.step_due = None;
        }
    }

    // ---------- protocol steps ----------

    /// Returns whether the store answered; a lost race counts as answered.
    async fn attempt_draw(&mut self) -> bool {
        match draw::try_draw(self.store.as_ref(), self.game_id, &self.deck).await {
            Ok(DrawOutcome::Drawn(row)) => {
                self.pending.push_back(row);
                true
            }
            Ok(DrawOutcome::Skipped(DrawSkip::DeckExhausted)) => {
                let game = self.game.clone();
                match round::finish_undealt_round(self.store.as_ref(), &game, &self.track).await {
                    Ok(Transition::Applied(row)) => {
                        self.pending.push_back(row);
                        true
                    }
                    Ok(Transition::Lost) => {
                        self.fresh_read().await;
                        true
                    }
                    Err(err) => {
                        self.record_error("finish race", &err);
                        false
                    }
                }
            }
            Ok(DrawOutcome::Skipped(skip)) => {
                debug!(target: LOG_TARGET, game_id = %self.game_id, ?skip, "draw skipped");
                self.fresh_read().await;
                true
            }
            Err(err) => {
                self.record_error("draw", &err);
                false
            }
        }
    }

    async fn take_next_step(&mut self) -> bool {
        let game = self.game.clone();
        let step = round::next_step(&game, &self.track, &self.deck);
        let outcome = match step {
            RoundStep::Advance { next_round } => {
                debug!(target: LOG_TARGET, game_id = %self.game_id, next_round, "advancing");
                round::advance_round(self.store.as_ref(), &game).await
            }
            RoundStep::Finish(reason) => {
                info!(target: LOG_TARGET, game_id = %self.game_id, ?reason, "race over");
                round::finish_race(self.store.as_ref(), &game, &self.track).await
            }
        };
        match outcome {
            Ok(Transition::Applied(row)) => {
                self.pending.push_back(row);
                true
            }
            Ok(Transition::Lost) => {
                self.fresh_read().await;
                true
            }
            Err(err) => {
                self.record_error("next step", &err);
                false
            }
        }
    }

    async fn check_all_closed(&mut self) {
        if !self.game.betting_open() {
            return;
        }
        let round = self.game.current_round;
        match betting::all_windows_closed(self.store.as_ref(), self.game_id, round).await {
            Ok(true) => {
                info!(target: LOG_TARGET, game_id = %self.game_id, round, "every window closed");
                self.attempt_draw().await;
            }
            Ok(false) => {}
            Err(err) => self.record_error("check closed windows", &err),
        }
    }

    // ---------- local view ----------

    async fn fresh_read(&mut self) {
        match self.store.load_game(self.game_id).await {
            Ok(Some(row)) => {
                self.last_error = None;
                self.pending.push_back(row);
            }
            Ok(None) => {
                info!(target: LOG_TARGET, game_id = %self.game_id, "game no longer exists");
                self.deleted = true;
            }
            Err(err) => self.record_error("read game", &err),
        }
    }

    async fn refresh_roster(&mut self) {
        let round = self.game.current_round;
        let loaded = async {
            let participants = self.store.load_participants(self.game_id).await?;
            let bets = self.store.load_bets(self.game_id).await?;
            let states = self.store.load_player_states(self.game_id, round).await?;
            Ok::<_, crate::store::StoreError>((participants, bets, states))
        }
        .await;
        match loaded {
            Ok((participants, bets, states)) => {
                self.participants = participants;
                self.bets = bets;
                self.round_states = states;
            }
            Err(err) => self.record_error("refresh roster", &err),
        }
    }

    async fn drain_pending(&mut self) {
        while let Some(row) = self.pending.pop_front() {
            self.observe(row);
        }
        if self.game.status == GameStatus::Finished && self.settlement.is_none() {
            self.compute_settlement().await;
        }
    }

    fn observe(&mut self, row: GameRow) {
        if row.id != self.game_id {
            return;
        }
        if row.progress_key() < self.game.progress_key() {
            debug!(target: LOG_TARGET, game_id = %self.game_id, "dropping stale game row");
            return;
        }

        let movements = self.track.catch_up(&self.deck, row.current_card_index);
        if row.round_drawn() && self.revealed_round != Some(row.current_round) {
            self.check_divergence(&row);
            let tail = movements.len().saturating_sub(row.cards_drawn.len());
            self.reveal = Some(RoundReveal {
                round: row.current_round,
                cards: row.cards_drawn.clone(),
                movements: movements[tail..].to_vec(),
            });
            self.revealed_round = Some(row.current_round);
        }

        let round_changed = row.current_round != self.game.current_round;
        self.game = row;
        if round_changed {
            self.round_states.clear();
        }

        match RoundPhase::of(&self.game) {
            RoundPhase::Waiting => {}
            RoundPhase::BettingOpen { round } => {
                if let Some(timer) = self.settle.take() {
                    timer.disarm();
                }
                if self.countdown.as_ref().is_some_and(|timer| timer.round != round) {
                    if let Some(timer) = self.countdown.take() {
                        timer.disarm();
                    }
                }
                if betting::countdown_due(&self.game)
                    && !self.closed_rounds.contains(&round)
                    && self.countdown_rounds.insert(round)
                {
                    self.countdown = Some(self.arm(TimerKind::Countdown, round, self.config.betting_window));
                }
            }
            RoundPhase::Drawn { round } => {
                if let Some(timer) = self.countdown.take() {
                    timer.disarm();
                }
                if self.settle_rounds.insert(round) {
                    self.settle = Some(self.arm(TimerKind::Settle, round, self.config.settle_delay));
                }
            }
            RoundPhase::Finished => {
                if let Some(timer) = self.countdown.take() {
                    timer.disarm();
                }
                if let Some(timer) = self.settle.take() {
                    timer.disarm();
                }
            }
        }
    }

    fn check_divergence(&self, row: &GameRow) {
        let start = row.current_card_index.saturating_sub(row.cards_drawn.len() as u32);
        let expected = draw::cards_for_round(&self.deck, start);
        if expected != row.cards_drawn {
            warn!(
                target: LOG_TARGET,
                game_id = %self.game_id,
                round = row.current_round,
                seed = self.deck.seed(),
                "drawn cards differ from the local deck"
            );
        }
    }

    fn arm(&self, kind: TimerKind, round: RoundNumber, delay: Duration) -> ArmedTimer {
        let token = self.cancel.child_token();
        let deadline = Instant::now() + delay;
        let tx = self.timer_tx.clone();
        let stop = token.clone();
        spawn_game_task(kind.task_name(), self.game_id, async move {
            tokio::select! {
                _ = stop.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    // the session may already be gone
                    let _ = tx.send(TimerFired { kind, round });
                }
            }
        });
        debug!(target: LOG_TARGET, game_id = %self.game_id, round, timer = kind.task_name(), "timer armed");
        ArmedTimer {
            round,
            deadline,
            token,
        }
    }

    async fn compute_settlement(&mut self) {
        let loaded = async {
            let bets = self.store.load_bets(self.game_id).await?;
            let participants = self.store.load_participants(self.game_id).await?;
            Ok::<_, crate::store::StoreError>((bets, participants))
        }
        .await;
        match loaded {
            Ok((bets, participants)) => {
                let report = settlement::settle(
                    &self.track.ranking(),
                    &bets,
                    &participants,
                    self.game.config.prize_distribution,
                );
                info!(
                    target: LOG_TARGET,
                    game_id = %self.game_id,
                    pool = report.total_pool,
                    paid = report.distributed(),
                    "settlement computed"
                );
                self.bets = bets;
                self.participants = participants;
                self.settlement = Some(report);
            }
            Err(err) => self.record_error("settle", &err),
        }
    }

    fn own_window_closed(&self) -> bool {
        let round = self.game.current_round;
        self.closed_rounds.contains(&round)
            || self.round_states.iter().any(|state| {
                state.user_id == self.identity.user_id
                    && state.round == round
                    && state.betting_window_closed
            })
    }

    fn record_error(&mut self, action: &'static str, err: &dyn std::error::Error) {
        warn!(target: LOG_TARGET, game_id = %self.game_id, action, error = %err, "store call failed");
        self.last_error = Some(format!("{action}: {err}"));
    }

    fn snapshot(&self) -> PeerSnapshot {
        let round = self.game.current_round;
        let staked_by = |user: UserId| -> f64 {
            self.bets
                .iter()
                .filter(|bet| bet.user_id == user)
                .map(|bet| bet.amount)
                .sum()
        };
        let roster = self
            .participants
            .iter()
            .map(|participant| RosterEntry {
                user_id: participant.user_id,
                display_name: participant.display_name.clone(),
                window_closed: self.round_states.iter().any(|state| {
                    state.user_id == participant.user_id
                        && state.round == round
                        && state.betting_window_closed
                }),
                total_staked: staked_by(participant.user_id),
                is_creator: self.game.is_creator(participant.user_id),
            })
            .collect();
        let own_stakes: Vec<(HorseNumber, f64)> = self
            .bets
            .iter()
            .filter(|bet| bet.user_id == self.identity.user_id)
            .map(|bet| (bet.horse_number, bet.amount))
            .collect();
        let chip_prices = self
            .track
            .horses()
            .iter()
            .map(|horse| {
                (
                    horse.number,
                    betting::chip_price(self.game.config.initial_chip_price, horse.position),
                )
            })
            .collect();

        PeerSnapshot {
            game: Some(self.game.clone()),
            phase: RoundPhase::of(&self.game),
            horses: self.track.horses().to_vec(),
            reveal: self.reveal.clone(),
            countdown: self.countdown.as_ref().map(|timer| Countdown {
                round: timer.round,
                deadline: timer.deadline,
            }),
            roster,
            own_stakes,
            own_window_closed: self.own_window_closed(),
            chip_prices,
            settlement: self.settlement.clone(),
            last_error: self.last_error.clone(),
            ended: false,
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }
}

/// Cloneable handle to a running [`PeerSession`].
#[derive(Clone)]
pub struct SessionHandle {
    game_id: GameId,
    user_id: UserId,
    commands: mpsc::Sender<SessionCommand>,
    snapshots: watch::Receiver<PeerSnapshot>,
    cancel: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SessionHandle {
    pub fn game_id(&self) -> GameId {
        self.game_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Creator only.
    pub async fn start_game(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Start { reply }).await
    }

    pub async fn place_stake(
        &self,
        horse_number: HorseNumber,
        chips: u32,
    ) -> Result<BetRow, SessionError> {
        let request = StakeRequest {
            horse_number,
            chips,
        };
        self.request(|reply| SessionCommand::PlaceStake { request, reply })
            .await
    }

    pub async fn close_window(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::CloseWindow { reply })
            .await
    }

    /// Forces a fresh read of the game and roster.
    pub async fn refresh(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Refresh { reply }).await
    }

    pub fn snapshot(&self) -> PeerSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<PeerSnapshot> {
        self.snapshots.clone()
    }

    /// Resolves with the first snapshot matching `predicate`.
    pub async fn wait_until(
        &self,
        predicate: impl FnMut(&PeerSnapshot) -> bool,
    ) -> Result<PeerSnapshot, SessionError> {
        let mut rx = self.snapshots.clone();
        let snapshot = rx
            .wait_for(predicate)
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        Ok(snapshot.clone())
    }

    /// Stops the session and waits for its task. Local timers and the feed
    /// subscription go with it; the participant record stays.
    pub async fn leave(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(target: LOG_TARGET, game_id = %self.game_id, error = %err, "session task failed");
            }
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        rx.await.map_err(|_| SessionError::SessionClosed)?
    }
}
