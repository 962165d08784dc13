use chrono::{DateTime, Duration, Utc};
use pilesnap_protocol::*;
use std::collections::{HashMap, VecDeque};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

// ==== knobs ====
pub const CLAIM_WINDOW_MS: i64 = 5000; // arbitration window length
pub const MIN_PLAYERS: usize = 2;
pub const MAX_PLAYERS: usize = 8;

pub type Tx = UnboundedSender<ServerToClient>;

/// A seated player. Bots carry no outbound channel.
pub struct Player {
    pub id: Uuid,
    pub name: String,
    pub joined_at: DateTime<Utc>,
    pub ready: bool,
    pub is_bot: bool,
    pub tx: Option<Tx>,
}

/// Every way an operation can be refused. Rejections are values, never
/// panics, and are surfaced only to the requesting client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("room not found")]
    RoomNotFound,
    #[error("you are not in a room")]
    NotInRoom,
    #[error("you are already in a room")]
    AlreadyInRoom,
    #[error("room is full")]
    RoomFull,
    #[error("only available in the lobby")]
    NotInLobby,
    #[error("game is not running")]
    NotInGame,
    #[error("only the host can do that")]
    NotHost,
    #[error("need at least {MIN_PLAYERS} players")]
    NotEnoughPlayers,
    #[error("all players must be ready")]
    NotAllReady,
    #[error("a claim window is open")]
    ClaimWindowOpen,
    #[error("not your turn")]
    NotYourTurn,
    #[error("you cannot act right now")]
    NotActive,
    #[error("you are out of the game")]
    PlayerOut,
    #[error("no such bot in this room")]
    NoSuchBot,
}

/// Time-boxed arbitration window opened by a matching flip. At most one
/// exists per room; its expiry timer lives in the scheduler, keyed by
/// room code, so the window itself stores no runtime handle.
pub struct ClaimWindow {
    pub id: Uuid,
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
    pub trigger_turn_index: usize,
    /// Arrival order = priority order.
    pub claimers: Vec<Uuid>,
    pub gesture: Option<GestureType>,
    pub subtype: Option<SpecialKind>,
}

impl ClaimWindow {
    fn open(trigger_turn_index: usize, subtype: Option<SpecialKind>) -> Self {
        let now = Utc::now();
        ClaimWindow {
            id: Uuid::new_v4(),
            opens_at: now,
            closes_at: now + Duration::milliseconds(CLAIM_WINDOW_MS),
            trigger_turn_index,
            claimers: Vec::new(),
            gesture: subtype.map(|s| s.gesture()),
            subtype,
        }
    }
}

/// Authoritative per-room game state. Exists only while the room is in
/// game; torn down when the phase moves to Ended.
pub struct InternalGame {
    /// Front of each deque is the next card to flip.
    pub hands: HashMap<Uuid, VecDeque<Card>>,
    /// Last element is the top of the pile.
    pub pile: Vec<Card>,
    pub turn_index: usize,
    /// Index of the next word to be spoken; `pile.len() % 5` after any
    /// flip, 0 after any claim resolution.
    pub word_index: usize,
    pub statuses: HashMap<Uuid, PlayerStatus>,
    pub claim: Option<ClaimWindow>,
}

pub struct Room {
    pub code: String,
    pub phase: Phase,
    pub host_id: Uuid,
    pub players: Vec<Player>,
    pub created_at: DateTime<Utc>,
    pub game: Option<InternalGame>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum FlipOutcome {
    /// Empty hand; turn passed to the next active player, no card moved.
    Skipped,
    /// Card flipped, no match; turn advanced.
    Flipped,
    /// Card flipped and a claim window opened.
    WindowOpened { window_id: Uuid },
    /// The flip (or skip) left at most one participant holding cards.
    Ended,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Claim recorded; window still open.
    Recorded,
    /// Every participant has claimed; window resolved early.
    Resolved { ended: bool },
    /// False slap; the claimant took the whole pile.
    FalseSlap { closed_window: bool, ended: bool },
}

#[derive(Debug, PartialEq, Eq)]
pub struct ResolveReport {
    pub ended: bool,
}

pub struct LeaveSummary {
    pub room_empty: bool,
    pub new_host: Option<Uuid>,
    pub ended: bool,
}

impl Room {
    pub fn new(code: String, host: Player) -> Self {
        let host_id = host.id;
        Room {
            code,
            phase: Phase::Lobby,
            host_id,
            players: vec![host],
            created_at: Utc::now(),
            game: None,
        }
    }

    pub fn seat_of(&self, id: Uuid) -> Option<usize> {
        self.players.iter().position(|p| p.id == id)
    }

    pub fn player(&self, id: Uuid) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    /// Deals the generated deck round-robin in seat order and moves the
    /// room into the playing phase.
    pub fn deal(&mut self) {
        let n = self.players.len();
        let mut hands: HashMap<Uuid, VecDeque<Card>> = self
            .players
            .iter()
            .map(|p| (p.id, VecDeque::new()))
            .collect();
        for (i, card) in generate_deck().into_iter().enumerate() {
            if let Some(hand) = hands.get_mut(&self.players[i % n].id) {
                hand.push_back(card);
            }
        }
        let statuses = self
            .players
            .iter()
            .map(|p| (p.id, PlayerStatus::Active))
            .collect();
        self.game = Some(InternalGame {
            hands,
            pile: Vec::new(),
            turn_index: 0,
            word_index: 0,
            statuses,
            claim: None,
        });
        self.phase = Phase::InGame;
    }

    /// §flip: pop the caller's front card onto the pile; a match opens a
    /// claim window, otherwise the turn advances. Preconditions are
    /// checked in order and each rejection leaves the state untouched.
    pub fn flip_card(&mut self, id: Uuid) -> Result<FlipOutcome, Rejection> {
        if self.phase != Phase::InGame {
            return Err(Rejection::NotInGame);
        }
        let players = &self.players;
        let Some(game) = self.game.as_mut() else {
            return Err(Rejection::NotInGame);
        };
        if game.claim.is_some() {
            return Err(Rejection::ClaimWindowOpen);
        }
        match game.statuses.get(&id) {
            Some(PlayerStatus::Active) => {}
            Some(_) => return Err(Rejection::NotActive),
            None => return Err(Rejection::NotInRoom),
        }
        let turn_player = players
            .get(game.turn_index)
            .ok_or(Rejection::NotYourTurn)?;
        if turn_player.id != id {
            return Err(Rejection::NotYourTurn);
        }

        let Some(hand) = game.hands.get_mut(&id) else {
            return Err(Rejection::NotInRoom);
        };
        let Some(card) = hand.pop_front() else {
            // Transiently empty hand after a redistribution: skip the
            // turn rather than fail it.
            return Ok(match next_active(players, &game.statuses, game.turn_index) {
                Some(next) => {
                    game.turn_index = next;
                    FlipOutcome::Skipped
                }
                None => FlipOutcome::Ended,
            });
        };

        // Spoken word belongs to the position the card lands in,
        // computed before the push.
        let spoken = word_at(game.pile.len());
        let matched = card.matches(spoken);
        let subtype = card.subtype();
        game.pile.push(card);
        game.word_index = game.pile.len() % WORD_CYCLE.len();
        refresh_statuses(&mut game.statuses, &game.hands);

        if matched {
            let window = ClaimWindow::open(game.turn_index, subtype);
            let window_id = window.id;
            game.claim = Some(window);
            return Ok(FlipOutcome::WindowOpened { window_id });
        }

        if participants_with_cards(&game.statuses, &game.hands) <= 1 {
            return Ok(FlipOutcome::Ended);
        }
        match next_active(players, &game.statuses, game.turn_index) {
            Some(next) => {
                game.turn_index = next;
                Ok(FlipOutcome::Flipped)
            }
            None => Ok(FlipOutcome::Ended),
        }
    }

    /// §claim: a valid claim registers the caller in arrival order and
    /// resolves early once every participant has claimed. Anything else
    /// (no window, wrong id, expired window) is a false slap and hands
    /// the claimant the entire pile.
    pub fn claim_attempt(
        &mut self,
        id: Uuid,
        claim_id: Option<Uuid>,
    ) -> Result<ClaimOutcome, Rejection> {
        if self.phase != Phase::InGame {
            return Err(Rejection::NotInGame);
        }
        let players = &self.players;
        let Some(game) = self.game.as_mut() else {
            return Err(Rejection::NotInGame);
        };
        match game.statuses.get(&id) {
            Some(PlayerStatus::Out) => return Err(Rejection::PlayerOut),
            Some(_) => {}
            None => return Err(Rejection::NotInRoom),
        }

        let valid = match (&game.claim, claim_id) {
            (Some(w), _) if Utc::now() > w.closes_at => false,
            (Some(w), Some(cid)) => cid == w.id,
            (Some(_), None) => true,
            (None, _) => false,
        };

        if !valid {
            // False slap: the claimant takes the whole pile and any
            // open (expired) window is force-closed.
            let closed = game.claim.take();
            if let Some(hand) = game.hands.get_mut(&id) {
                hand.extend(game.pile.drain(..));
            }
            game.word_index = 0;
            refresh_statuses(&mut game.statuses, &game.hands);
            let ended = participants_with_cards(&game.statuses, &game.hands) <= 1;
            if let (Some(w), false) = (&closed, ended) {
                // The triggering flip already happened; resume after it.
                if let Some(next) =
                    next_active(players, &game.statuses, w.trigger_turn_index % players.len())
                {
                    game.turn_index = next;
                }
            }
            return Ok(ClaimOutcome::FalseSlap {
                closed_window: closed.is_some(),
                ended,
            });
        }

        let Some(window) = game.claim.as_mut() else {
            return Err(Rejection::NotInGame); // unreachable: valid implies Some
        };
        if !window.claimers.contains(&id) {
            window.claimers.push(id);
        }
        let all_claimed = players.iter().all(|p| {
            game.statuses.get(&p.id) == Some(&PlayerStatus::Out)
                || window.claimers.contains(&p.id)
        });
        if all_claimed {
            let report = resolve_window(players, game);
            return Ok(ClaimOutcome::Resolved {
                ended: report.ended,
            });
        }
        Ok(ClaimOutcome::Recorded)
    }

    /// Expiry path. Silent no-op when the window has already been
    /// resolved or replaced; the caller compares ids, not clocks.
    pub fn resolve_expired(&mut self, window_id: Uuid) -> Option<ResolveReport> {
        if self.phase != Phase::InGame {
            return None;
        }
        let players = &self.players;
        let game = self.game.as_mut()?;
        match &game.claim {
            Some(w) if w.id == window_id => {}
            _ => return None,
        }
        Some(resolve_window(players, game))
    }

    /// Removes a player: host succession by earliest join, abandonment
    /// of their hand mid-game, turn/window bookkeeping, end-game check.
    pub fn remove_player(&mut self, id: Uuid) -> Result<LeaveSummary, Rejection> {
        let idx = self.seat_of(id).ok_or(Rejection::NotInRoom)?;
        let leaving = self.players.remove(idx);
        let mut summary = LeaveSummary {
            room_empty: self.players.is_empty(),
            new_host: None,
            ended: false,
        };
        if summary.room_empty {
            return Ok(summary);
        }
        if leaving.id == self.host_id {
            if let Some(next_host) = self.players.iter().min_by_key(|p| p.joined_at) {
                self.host_id = next_host.id;
                summary.new_host = Some(next_host.id);
            }
        }

        let players = &self.players;
        if let Some(game) = self.game.as_mut() {
            // Abandonment penalty: the leaver's cards exit the game
            // entirely rather than being redistributed.
            game.hands.remove(&id);
            game.statuses.remove(&id);
            if let Some(window) = game.claim.as_mut() {
                // A mid-window leaver is excluded from arbitration.
                window.claimers.retain(|c| *c != id);
                if window.trigger_turn_index > idx {
                    window.trigger_turn_index -= 1;
                }
                window.trigger_turn_index %= players.len();
            }
            if idx < game.turn_index {
                game.turn_index -= 1;
            }
            if game.turn_index >= players.len() {
                game.turn_index = 0;
            }

            if players.len() < MIN_PLAYERS {
                summary.ended = true;
                return Ok(summary);
            }
            refresh_statuses(&mut game.statuses, &game.hands);
            if participants_with_cards(&game.statuses, &game.hands) <= 1 {
                summary.ended = true;
                return Ok(summary);
            }
            // Turn pointer must sit on an active player; the window, if
            // any, re-points the turn itself at resolution.
            if game.claim.is_none() {
                let on_active = players
                    .get(game.turn_index)
                    .and_then(|p| game.statuses.get(&p.id))
                    == Some(&PlayerStatus::Active);
                if !on_active {
                    if let Some(next) = next_active(players, &game.statuses, game.turn_index) {
                        game.turn_index = next;
                    }
                }
            }
        }
        Ok(summary)
    }

    /// Every player already out of cards has won; if nobody is, the sole
    /// remaining participant has.
    pub fn winners(&self) -> Vec<Uuid> {
        let Some(game) = &self.game else {
            return Vec::new();
        };
        let emptied: Vec<Uuid> = self
            .players
            .iter()
            .filter(|p| match game.statuses.get(&p.id) {
                Some(PlayerStatus::Out) => true,
                Some(_) => game.hands.get(&p.id).map_or(true, |h| h.is_empty()),
                None => false,
            })
            .map(|p| p.id)
            .collect();
        if !emptied.is_empty() {
            return emptied;
        }
        self.players
            .iter()
            .filter(|p| game.statuses.get(&p.id) != Some(&PlayerStatus::Out))
            .map(|p| p.id)
            .collect()
    }

    pub fn game_state_view(&self) -> Option<GameStateView> {
        let game = self.game.as_ref()?;
        let turn_player = self.players.get(game.turn_index)?;
        let top_card = game.pile.last();
        let claim = game.claim.as_ref().map(|w| ClaimView {
            id: w.id,
            opens_at: w.opens_at,
            closes_at: w.closes_at,
            claimers: w.claimers.clone(),
            reason: match top_card {
                Some(c) if c.is_special() => ClaimReason::Special,
                _ => ClaimReason::Match,
            },
            gesture: w.gesture,
            subtype: w.subtype,
        });
        Some(GameStateView {
            turn_player_id: turn_player.id,
            turn_index: game.turn_index,
            word_index: game.word_index,
            current_word: word_at(game.word_index),
            spoken_word: (!game.pile.is_empty()).then(|| word_at(game.pile.len() - 1)),
            pile_count: game.pile.len(),
            top_card: top_card.cloned(),
            hand_counts: game.hands.iter().map(|(id, h)| (*id, h.len())).collect(),
            statuses: game.statuses.clone(),
            claim,
        })
    }

    pub fn public_room(&self) -> PublicRoom {
        PublicRoom {
            code: self.code.clone(),
            phase: self.phase,
            host_id: self.host_id,
            players: self
                .players
                .iter()
                .map(|p| PublicPlayer {
                    id: p.id,
                    name: p.name.clone(),
                    ready: p.ready,
                    is_bot: p.is_bot,
                    joined_at: p.joined_at,
                })
                .collect(),
            created_at: self.created_at,
            game: self.game_state_view(),
        }
    }
}

/// Pure recompute after any hand mutation: OUT is sticky, otherwise
/// holding cards means active and an empty hand means pending exit. The
/// OUT transition itself only ever happens inside claim resolution.
pub fn refresh_statuses(
    statuses: &mut HashMap<Uuid, PlayerStatus>,
    hands: &HashMap<Uuid, VecDeque<Card>>,
) {
    for (id, status) in statuses.iter_mut() {
        if *status == PlayerStatus::Out {
            continue;
        }
        *status = match hands.get(id) {
            Some(h) if !h.is_empty() => PlayerStatus::Active,
            _ => PlayerStatus::PendingExit,
        };
    }
}

/// Count of non-OUT players holding at least one card; the game ends
/// when this drops to one or zero.
pub fn participants_with_cards(
    statuses: &HashMap<Uuid, PlayerStatus>,
    hands: &HashMap<Uuid, VecDeque<Card>>,
) -> usize {
    statuses
        .iter()
        .filter(|(id, s)| {
            **s != PlayerStatus::Out && hands.get(*id).map_or(false, |h| !h.is_empty())
        })
        .count()
}

/// Next seat after `from` (exclusive, wrapping) whose status is active.
fn next_active(
    players: &[Player],
    statuses: &HashMap<Uuid, PlayerStatus>,
    from: usize,
) -> Option<usize> {
    let n = players.len();
    (1..=n)
        .map(|step| (from + step) % n)
        .find(|&i| statuses.get(&players[i].id) == Some(&PlayerStatus::Active))
}

/// Closes the window and redistributes the pile: non-claimers split it
/// round-robin in seat order; if everyone claimed, the slowest claimer
/// takes it all. Runs the status and end-game pipeline afterwards.
fn resolve_window(players: &[Player], game: &mut InternalGame) -> ResolveReport {
    let Some(window) = game.claim.take() else {
        return ResolveReport { ended: false };
    };

    let non_claimers: Vec<Uuid> = players
        .iter()
        .filter(|p| {
            game.statuses.get(&p.id) != Some(&PlayerStatus::Out)
                && !window.claimers.contains(&p.id)
        })
        .map(|p| p.id)
        .collect();

    if !non_claimers.is_empty() {
        let cards: Vec<Card> = game.pile.drain(..).collect();
        for (i, card) in cards.into_iter().enumerate() {
            if let Some(hand) = game.hands.get_mut(&non_claimers[i % non_claimers.len()]) {
                hand.push_back(card);
            }
        }
    } else if let Some(last) = window.claimers.last() {
        if let Some(hand) = game.hands.get_mut(last) {
            hand.extend(game.pile.drain(..));
        }
    }

    refresh_statuses(&mut game.statuses, &game.hands);
    // The only exit path: a claimer who emptied their hand and survived
    // the window they participated in goes out.
    for claimer in &window.claimers {
        if game.statuses.get(claimer) == Some(&PlayerStatus::PendingExit) {
            game.statuses.insert(*claimer, PlayerStatus::Out);
        }
    }
    game.word_index = 0;

    if participants_with_cards(&game.statuses, &game.hands) <= 1 {
        return ResolveReport { ended: true };
    }
    match next_active(
        players,
        &game.statuses,
        window.trigger_turn_index % players.len(),
    ) {
        Some(next) => {
            game.turn_index = next;
            ResolveReport { ended: false }
        }
        None => ResolveReport { ended: true },
    }
}
