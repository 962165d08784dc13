use crate::game::Room;
use crate::timers::{TimerEvent, TimerKey, Timers};
use pilesnap_protocol::{Phase, PlayerStatus};
use rand::Rng;
use std::time::Duration;

// ==== knobs ====
const FLIP_DELAY_MS: std::ops::RangeInclusive<u64> = 600..=1200;
const CLAIM_DELAY_MS: std::ops::RangeInclusive<u64> = 500..=1200;
const GESTURE_DELAY_MS: std::ops::RangeInclusive<u64> = 2000..=4000;
const FALSE_SLAP_DELAY_MS: std::ops::RangeInclusive<u64> = 300..=500;
const FALSE_SLAP_CHANCE: f64 = 0.05;
const CLAIM_CHANCE: f64 = 0.50;
const CLAIM_CHANCE_BIG_PILE: f64 = 0.65;
const BIG_PILE: usize = 6;

pub const BOT_NAMES: [&str; 8] = [
    "Ziggy", "Rook", "Pickle", "Momo", "Biscuit", "Squid", "Waffles", "Turbo",
];

/// Re-evaluates every bot in the room after a state change and schedules
/// their next move through the same timer wheel the claim window uses.
/// Scheduling is idempotent per bot: a pending timer is never doubled,
/// so calling this back-to-back cannot make a bot act twice.
pub fn evaluate(room: &Room, timers: &Timers) {
    if room.phase != Phase::InGame {
        return;
    }
    let Some(game) = &room.game else {
        return;
    };
    let mut rng = rand::thread_rng();

    for (seat, bot) in room.players.iter().enumerate().filter(|(_, p)| p.is_bot) {
        if game.statuses.get(&bot.id) == Some(&PlayerStatus::Out) {
            continue;
        }

        match &game.claim {
            Some(window) => {
                if window.claimers.contains(&bot.id) {
                    continue;
                }
                let chance = if game.pile.len() > BIG_PILE {
                    CLAIM_CHANCE_BIG_PILE
                } else {
                    CLAIM_CHANCE
                };
                if !rng.gen_bool(chance) {
                    continue;
                }
                // Gesture windows take longer: the bot "performs" the
                // mini-game before its claim lands.
                let delay = if window.gesture.is_some() {
                    rng.gen_range(GESTURE_DELAY_MS)
                } else {
                    rng.gen_range(CLAIM_DELAY_MS)
                };
                let scheduled = timers.schedule_if_idle(
                    TimerKey::bot_claim(&room.code, bot.id),
                    Duration::from_millis(delay),
                    TimerEvent::BotClaim {
                        room: room.code.clone(),
                        bot_id: bot.id,
                        claim_id: Some(window.id),
                    },
                );
                if scheduled {
                    eprintln!(
                        "[BOT] {} will claim window {} in {}ms",
                        bot.name, window.id, delay
                    );
                }
            }
            None => {
                if !game.pile.is_empty() && rng.gen_bool(FALSE_SLAP_CHANCE) {
                    let delay = rng.gen_range(FALSE_SLAP_DELAY_MS);
                    if timers.schedule_if_idle(
                        TimerKey::bot_claim(&room.code, bot.id),
                        Duration::from_millis(delay),
                        TimerEvent::BotClaim {
                            room: room.code.clone(),
                            bot_id: bot.id,
                            claim_id: None,
                        },
                    ) {
                        eprintln!("[BOT] {} will false-slap in {}ms", bot.name, delay);
                    }
                }
                let my_turn = seat == game.turn_index;
                let holds_cards = game.hands.get(&bot.id).map_or(false, |h| !h.is_empty());
                if my_turn && holds_cards {
                    let delay = rng.gen_range(FLIP_DELAY_MS);
                    if timers.schedule_if_idle(
                        TimerKey::bot_flip(&room.code, bot.id),
                        Duration::from_millis(delay),
                        TimerEvent::BotFlip {
                            room: room.code.clone(),
                            bot_id: bot.id,
                        },
                    ) {
                        eprintln!("[BOT] {} will flip in {}ms", bot.name, delay);
                    }
                }
            }
        }
    }
}
