use crate::bots::{self, BOT_NAMES};
use crate::game::*;
use crate::timers::{TimerEvent, TimerKey, Timers};
use chrono::Utc;
use pilesnap_protocol::*;
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Room codes avoid the ambiguous glyphs I, O, 0 and 1.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 5;

/// Owns every room and the player-to-room index. All mutations funnel
/// through here, whether they arrive from a socket or from a timer, and
/// each one ends with a broadcast plus a bot re-evaluation.
pub struct Registry {
    rooms: HashMap<String, Room>,
    player_rooms: HashMap<Uuid, String>,
    timers: Timers,
}

impl Registry {
    pub fn new(timers: Timers) -> Self {
        Registry {
            rooms: HashMap::new(),
            player_rooms: HashMap::new(),
            timers,
        }
    }

    pub fn room(&self, code: &str) -> Option<&Room> {
        self.rooms.get(code)
    }

    pub fn room_of_player(&self, id: Uuid) -> Option<&Room> {
        self.player_rooms.get(&id).and_then(|c| self.rooms.get(c))
    }

    fn generate_code(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let code: String = (0..CODE_LEN)
                .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
                .collect();
            if !self.rooms.contains_key(&code) {
                return code;
            }
        }
    }

    fn code_of(&self, id: Uuid) -> Result<String, Rejection> {
        self.player_rooms
            .get(&id)
            .cloned()
            .ok_or(Rejection::NotInRoom)
    }

    pub fn create_room(
        &mut self,
        name: String,
        id: Uuid,
        tx: Option<Tx>,
    ) -> Result<String, Rejection> {
        if self.player_rooms.contains_key(&id) {
            return Err(Rejection::AlreadyInRoom);
        }
        let code = self.generate_code();
        let host = Player {
            id,
            name,
            joined_at: Utc::now(),
            ready: false,
            is_bot: false,
            tx,
        };
        eprintln!("[CREATE] room={} host={}", code, &id.to_string()[..8]);
        self.rooms.insert(code.clone(), Room::new(code.clone(), host));
        self.player_rooms.insert(id, code.clone());
        self.touch(&code);
        Ok(code)
    }

    pub fn join_room(
        &mut self,
        code: &str,
        name: String,
        id: Uuid,
        tx: Option<Tx>,
    ) -> Result<String, Rejection> {
        match self.player_rooms.get(&id) {
            Some(existing) if existing == code => {
                // Idempotent rejoin: refresh the outbound channel only.
                if let Some(room) = self.rooms.get_mut(code) {
                    if let Some(p) = room.players.iter_mut().find(|p| p.id == id) {
                        p.tx = tx;
                    }
                }
                self.touch(code);
                return Ok(code.to_string());
            }
            Some(_) => return Err(Rejection::AlreadyInRoom),
            None => {}
        }
        let room = self.rooms.get_mut(code).ok_or(Rejection::RoomNotFound)?;
        if room.phase != Phase::Lobby {
            return Err(Rejection::NotInLobby);
        }
        if room.players.len() >= MAX_PLAYERS {
            return Err(Rejection::RoomFull);
        }
        eprintln!("[JOIN] room={} player={} ({})", code, name, &id.to_string()[..8]);
        room.players.push(Player {
            id,
            name,
            joined_at: Utc::now(),
            ready: false,
            is_bot: false,
            tx,
        });
        self.player_rooms.insert(id, code.to_string());
        self.touch(code);
        Ok(code.to_string())
    }

    /// Also invoked on transport disconnect. Deletes the room when no
    /// humans remain; bot-only rooms have nobody left to play.
    pub fn leave_room(&mut self, id: Uuid) -> Result<(), Rejection> {
        let code = self.code_of(id)?;
        self.player_rooms.remove(&id);
        self.timers.cancel(&TimerKey::bot_flip(&code, id));
        self.timers.cancel(&TimerKey::bot_claim(&code, id));

        let room = self.rooms.get_mut(&code).ok_or(Rejection::RoomNotFound)?;
        let name = room
            .player(id)
            .map(|p| p.name.clone())
            .unwrap_or_default();
        let summary = room.remove_player(id)?;
        eprintln!("[LEAVE] room={} player={} ({})", code, name, &id.to_string()[..8]);

        if summary.room_empty || room.players.iter().all(|p| p.is_bot) {
            for p in &room.players {
                self.player_rooms.remove(&p.id);
            }
            self.rooms.remove(&code);
            self.timers.cancel_room(&code);
            eprintln!("[LEAVE] room={} deleted", code);
            return Ok(());
        }

        self.broadcast_info(&code, format!("{} left the room", name));
        if let Some(new_host) = summary.new_host {
            let host_name = self
                .rooms
                .get(&code)
                .and_then(|r| r.player(new_host))
                .map(|p| p.name.clone())
                .unwrap_or_default();
            self.broadcast_info(&code, format!("{} is now the host", host_name));
        }
        if summary.ended {
            self.finish_game(&code);
        } else {
            self.touch(&code);
        }
        Ok(())
    }

    pub fn toggle_ready(&mut self, id: Uuid) -> Result<(), Rejection> {
        let code = self.code_of(id)?;
        let room = self.rooms.get_mut(&code).ok_or(Rejection::RoomNotFound)?;
        if room.phase != Phase::Lobby {
            return Err(Rejection::NotInLobby);
        }
        if let Some(p) = room.players.iter_mut().find(|p| p.id == id) {
            p.ready = !p.ready;
            eprintln!("[READY] room={} player={} ready={}", code, p.name, p.ready);
        }
        self.touch(&code);
        Ok(())
    }

    /// Host-only, lobby-only. Bots join through the same seat list as
    /// humans and are always ready.
    pub fn add_bot(&mut self, host_id: Uuid) -> Result<Uuid, Rejection> {
        let code = self.code_of(host_id)?;
        let room = self.rooms.get_mut(&code).ok_or(Rejection::RoomNotFound)?;
        if room.host_id != host_id {
            return Err(Rejection::NotHost);
        }
        if room.phase != Phase::Lobby {
            return Err(Rejection::NotInLobby);
        }
        if room.players.len() >= MAX_PLAYERS {
            return Err(Rejection::RoomFull);
        }
        let name = BOT_NAMES
            .iter()
            .find(|n| room.players.iter().all(|p| p.name != **n))
            .map(|n| n.to_string())
            .unwrap_or_else(|| format!("Bot{}", room.players.len()));
        let bot_id = Uuid::new_v4();
        eprintln!("[BOT] room={} added {} ({})", code, name, &bot_id.to_string()[..8]);
        room.players.push(Player {
            id: bot_id,
            name: name.clone(),
            joined_at: Utc::now(),
            ready: true,
            is_bot: true,
            tx: None,
        });
        self.player_rooms.insert(bot_id, code.clone());
        self.broadcast_info(&code, format!("{} joined the table", name));
        self.touch(&code);
        Ok(bot_id)
    }

    pub fn remove_bot(&mut self, host_id: Uuid, bot_id: Uuid) -> Result<(), Rejection> {
        let code = self.code_of(host_id)?;
        let room = self.rooms.get_mut(&code).ok_or(Rejection::RoomNotFound)?;
        if room.host_id != host_id {
            return Err(Rejection::NotHost);
        }
        if room.phase != Phase::Lobby {
            return Err(Rejection::NotInLobby);
        }
        let name = match room.player(bot_id) {
            Some(p) if p.is_bot => p.name.clone(),
            _ => return Err(Rejection::NoSuchBot),
        };
        room.remove_player(bot_id)?;
        self.player_rooms.remove(&bot_id);
        self.timers.cancel(&TimerKey::bot_flip(&code, bot_id));
        self.timers.cancel(&TimerKey::bot_claim(&code, bot_id));
        self.broadcast_info(&code, format!("{} left the table", name));
        self.touch(&code);
        Ok(())
    }

    pub fn start_game(&mut self, id: Uuid) -> Result<(), Rejection> {
        let code = self.code_of(id)?;
        let room = self.rooms.get_mut(&code).ok_or(Rejection::RoomNotFound)?;
        if room.host_id != id {
            return Err(Rejection::NotHost);
        }
        if room.phase != Phase::Lobby {
            return Err(Rejection::NotInLobby);
        }
        if room.players.len() < MIN_PLAYERS {
            return Err(Rejection::NotEnoughPlayers);
        }
        if !room.players.iter().all(|p| p.ready) {
            return Err(Rejection::NotAllReady);
        }
        room.deal();
        eprintln!("[START] room={} players={}", code, room.players.len());
        self.touch(&code);
        Ok(())
    }

    pub fn flip_card(&mut self, id: Uuid) -> Result<(), Rejection> {
        let code = self.code_of(id)?;
        let room = self.rooms.get_mut(&code).ok_or(Rejection::RoomNotFound)?;
        match room.flip_card(id)? {
            FlipOutcome::Skipped => {
                eprintln!("[FLIP] room={} {} had no cards, turn skipped", code, &id.to_string()[..8]);
            }
            FlipOutcome::Flipped => {
                eprintln!("[FLIP] room={} {} flipped", code, &id.to_string()[..8]);
            }
            FlipOutcome::WindowOpened { window_id } => {
                eprintln!("[FLIP] room={} match! window={}", code, window_id);
                self.timers.schedule(
                    TimerKey::claim_expiry(&code),
                    Duration::from_millis(CLAIM_WINDOW_MS as u64),
                    TimerEvent::ClaimExpiry {
                        room: code.clone(),
                        window_id,
                    },
                );
            }
            FlipOutcome::Ended => {
                self.finish_game(&code);
                return Ok(());
            }
        }
        self.touch(&code);
        Ok(())
    }

    pub fn claim_attempt(&mut self, id: Uuid, claim_id: Option<Uuid>) -> Result<(), Rejection> {
        let code = self.code_of(id)?;
        let room = self.rooms.get_mut(&code).ok_or(Rejection::RoomNotFound)?;
        match room.claim_attempt(id, claim_id)? {
            ClaimOutcome::Recorded => {
                eprintln!("[CLAIM] room={} {} claimed", code, &id.to_string()[..8]);
            }
            ClaimOutcome::Resolved { ended } => {
                eprintln!("[CLAIM] room={} all claimed, window resolved", code);
                self.timers.cancel(&TimerKey::claim_expiry(&code));
                if ended {
                    self.finish_game(&code);
                    return Ok(());
                }
            }
            ClaimOutcome::FalseSlap { closed_window, ended } => {
                eprintln!(
                    "[CLAIM] room={} false slap by {} (window_closed={})",
                    code,
                    &id.to_string()[..8],
                    closed_window
                );
                if closed_window {
                    self.timers.cancel(&TimerKey::claim_expiry(&code));
                }
                if ended {
                    self.finish_game(&code);
                    return Ok(());
                }
            }
        }
        self.touch(&code);
        Ok(())
    }

    /// Entry point for everything the timer wheel delivers. Stale
    /// events are silent no-ops; the state, not the clock, decides.
    pub fn handle_timer_event(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::ClaimExpiry { room: code, window_id } => {
                let Some(room) = self.rooms.get_mut(&code) else {
                    return;
                };
                let Some(report) = room.resolve_expired(window_id) else {
                    return;
                };
                eprintln!("[EXPIRE] room={} window={} resolved", code, window_id);
                if report.ended {
                    self.finish_game(&code);
                } else {
                    self.touch(&code);
                }
            }
            TimerEvent::BotFlip { bot_id, .. } => {
                if let Err(rej) = self.flip_card(bot_id) {
                    eprintln!("[BOT] stale flip from {}: {}", &bot_id.to_string()[..8], rej);
                }
            }
            TimerEvent::BotClaim { bot_id, claim_id, .. } => {
                if let Err(rej) = self.claim_attempt(bot_id, claim_id) {
                    eprintln!("[BOT] stale claim from {}: {}", &bot_id.to_string()[..8], rej);
                }
            }
        }
    }

    fn finish_game(&mut self, code: &str) {
        let Some(room) = self.rooms.get_mut(code) else {
            return;
        };
        let winners = room.winners();
        room.phase = Phase::Ended;
        room.game = None;
        eprintln!("[END] room={} winners={}", code, winners.len());
        self.timers.cancel_room(code);
        self.broadcast(code, &ServerToClient::GameOver { winners });
        self.touch(code);
    }

    /// Broadcast the fresh snapshot and let the bots react to it.
    fn touch(&self, code: &str) {
        let Some(room) = self.rooms.get(code) else {
            return;
        };
        let snapshot = room.public_room();
        for p in &room.players {
            if let Some(tx) = &p.tx {
                let _ = tx.send(ServerToClient::RoomState {
                    snapshot: snapshot.clone(),
                });
            }
        }
        bots::evaluate(room, &self.timers);
    }

    fn broadcast(&self, code: &str, msg: &ServerToClient) {
        let Some(room) = self.rooms.get(code) else {
            return;
        };
        for p in &room.players {
            if let Some(tx) = &p.tx {
                let _ = tx.send(msg.clone());
            }
        }
    }

    fn broadcast_info(&self, code: &str, message: String) {
        self.broadcast(code, &ServerToClient::Info { message });
    }
}
