use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::thread_rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// ---- Words ----
///
/// The five kind words, spoken in a fixed cycle keyed by pile position.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Word {
    Taco,
    Cat,
    Goat,
    Cheese,
    Pizza,
}

pub const WORD_CYCLE: [Word; 5] = [Word::Taco, Word::Cat, Word::Goat, Word::Cheese, Word::Pizza];

/// Word spoken for a card landing at pile position `pile_len` (0-based).
pub fn word_at(pile_len: usize) -> Word {
    WORD_CYCLE[pile_len % WORD_CYCLE.len()]
}

impl Word {
    /// Fixed background color for this word's normal cards.
    pub fn background(&self) -> &'static str {
        match self {
            Word::Taco => "#f5a623",
            Word::Cat => "#9b59b6",
            Word::Goat => "#7f8c8d",
            Word::Cheese => "#f1c40f",
            Word::Pizza => "#e74c3c",
        }
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Word::Taco => "taco",
            Word::Cat => "cat",
            Word::Goat => "goat",
            Word::Cheese => "cheese",
            Word::Pizza => "pizza",
        };
        write!(f, "{}", s)
    }
}

/// ---- Cards ----
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    /// One per word.
    Holo,
    /// Five per word.
    Classic,
    /// Five per word.
    Doodle,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SpecialKind {
    Gorilla,
    Narwhal,
    Groundhog,
}

/// Client-side mini-challenge attached to special-card claim windows.
/// The server only records which gesture is required; completion comes
/// back as an ordinary claim attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GestureType {
    RapidClick,
    PopBubbles,
    DrawCircle,
}

impl SpecialKind {
    pub fn gesture(&self) -> GestureType {
        match self {
            SpecialKind::Gorilla => GestureType::RapidClick,
            SpecialKind::Narwhal => GestureType::PopBubbles,
            SpecialKind::Groundhog => GestureType::DrawCircle,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CardFace {
    Normal {
        word: Word,
        style: Style,
        background: String,
    },
    Special {
        subtype: SpecialKind,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Card {
    pub id: Uuid,
    #[serde(flatten)]
    pub face: CardFace,
}

impl Card {
    pub fn normal(word: Word, style: Style) -> Self {
        Card {
            id: Uuid::new_v4(),
            face: CardFace::Normal {
                word,
                style,
                background: word.background().to_string(),
            },
        }
    }

    pub fn special(subtype: SpecialKind) -> Self {
        Card {
            id: Uuid::new_v4(),
            face: CardFace::Special { subtype },
        }
    }

    pub fn is_special(&self) -> bool {
        matches!(self.face, CardFace::Special { .. })
    }

    pub fn word(&self) -> Option<Word> {
        match self.face {
            CardFace::Normal { word, .. } => Some(word),
            CardFace::Special { .. } => None,
        }
    }

    pub fn subtype(&self) -> Option<SpecialKind> {
        match self.face {
            CardFace::Special { subtype } => Some(subtype),
            CardFace::Normal { .. } => None,
        }
    }

    /// Specials always match; normal cards match when their word is the
    /// one being spoken.
    pub fn matches(&self, spoken: Word) -> bool {
        match self.face {
            CardFace::Special { .. } => true,
            CardFace::Normal { word, .. } => word == spoken,
        }
    }
}

pub const DECK_SIZE: usize = 64;
pub const NORMAL_COUNT: usize = 55;
pub const SPECIAL_COUNT: usize = 9;

/// Produces the full shuffled 64-card deck: 11 normals per word
/// (1 holo + 5 classic + 5 doodle) and 3 specials per subtype.
/// Shuffled once here; cards only move between hands and pile afterwards.
pub fn generate_deck() -> Vec<Card> {
    let mut cards = Vec::with_capacity(DECK_SIZE);
    for &word in &WORD_CYCLE {
        cards.push(Card::normal(word, Style::Holo));
        for _ in 0..5 {
            cards.push(Card::normal(word, Style::Classic));
        }
        for _ in 0..5 {
            cards.push(Card::normal(word, Style::Doodle));
        }
    }
    for &subtype in &[SpecialKind::Gorilla, SpecialKind::Narwhal, SpecialKind::Groundhog] {
        for _ in 0..3 {
            cards.push(Card::special(subtype));
        }
    }
    cards.shuffle(&mut thread_rng());
    cards
}

/// ---- Room & game projections ----
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Lobby,
    InGame,
    Ended,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlayerStatus {
    Active,
    PendingExit,
    Out,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicPlayer {
    pub id: Uuid,
    pub name: String,
    pub ready: bool,
    pub is_bot: bool,
    pub joined_at: DateTime<Utc>,
}

/// Why a claim window opened: a word match or a special card.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClaimReason {
    Match,
    Special,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimView {
    pub id: Uuid,
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
    /// Arrival order = priority order.
    pub claimers: Vec<Uuid>,
    pub reason: ClaimReason,
    pub gesture: Option<GestureType>,
    pub subtype: Option<SpecialKind>,
}

/// Externally visible projection of a running game. Hands other than
/// counts are never serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStateView {
    pub turn_player_id: Uuid,
    pub turn_index: usize,
    pub word_index: usize,
    /// Next word to be spoken.
    pub current_word: Word,
    /// Word associated with the current top of pile, if any.
    pub spoken_word: Option<Word>,
    pub pile_count: usize,
    pub top_card: Option<Card>,
    pub hand_counts: HashMap<Uuid, usize>,
    pub statuses: HashMap<Uuid, PlayerStatus>,
    pub claim: Option<ClaimView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicRoom {
    pub code: String,
    pub phase: Phase,
    pub host_id: Uuid,
    pub players: Vec<PublicPlayer>,
    pub created_at: DateTime<Utc>,
    pub game: Option<GameStateView>,
}

/// ---- Wire messages ----
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientToServer {
    CreateRoom { name: String },
    JoinRoom { code: String, name: String },
    Leave,
    ToggleReady,
    AddBot,
    RemoveBot { bot_id: Uuid },
    StartGame,
    FlipCard,
    ClaimAttempt { claim_id: Option<Uuid> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerToClient {
    Hello { your_id: Uuid },
    RoomState { snapshot: PublicRoom },
    Info { message: String },
    GameOver { winners: Vec<Uuid> },
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn deck_composition() {
        let deck = generate_deck();
        assert_eq!(deck.len(), DECK_SIZE);

        let specials: Vec<_> = deck.iter().filter(|c| c.is_special()).collect();
        assert_eq!(specials.len(), SPECIAL_COUNT);
        for subtype in [SpecialKind::Gorilla, SpecialKind::Narwhal, SpecialKind::Groundhog] {
            assert_eq!(specials.iter().filter(|c| c.subtype() == Some(subtype)).count(), 3);
        }

        assert_eq!(deck.iter().filter(|c| !c.is_special()).count(), NORMAL_COUNT);
        for &word in &WORD_CYCLE {
            let of_word: Vec<_> = deck.iter().filter(|c| c.word() == Some(word)).collect();
            assert_eq!(of_word.len(), 11);
            let count_style = |style| {
                of_word
                    .iter()
                    .filter(|c| matches!(c.face, CardFace::Normal { style: s, .. } if s == style))
                    .count()
            };
            assert_eq!(count_style(Style::Holo), 1);
            assert_eq!(count_style(Style::Classic), 5);
            assert_eq!(count_style(Style::Doodle), 5);
        }
    }

    #[test]
    fn deck_ids_unique() {
        let deck = generate_deck();
        let ids: HashSet<Uuid> = deck.iter().map(|c| c.id).collect();
        assert_eq!(ids.len(), DECK_SIZE);
    }

    #[test]
    fn word_cycle_wraps() {
        assert_eq!(word_at(0), Word::Taco);
        assert_eq!(word_at(4), Word::Pizza);
        assert_eq!(word_at(5), Word::Taco);
        assert_eq!(word_at(63), word_at(3));
    }

    #[test]
    fn specials_always_match() {
        let card = Card::special(SpecialKind::Narwhal);
        for &word in &WORD_CYCLE {
            assert!(card.matches(word));
        }
    }

    #[test]
    fn normals_match_their_word_only() {
        let card = Card::normal(Word::Goat, Style::Classic);
        assert!(card.matches(Word::Goat));
        assert!(!card.matches(Word::Taco));
    }

    #[test]
    fn gestures_per_subtype() {
        assert_eq!(SpecialKind::Gorilla.gesture(), GestureType::RapidClick);
        assert_eq!(SpecialKind::Narwhal.gesture(), GestureType::PopBubbles);
        assert_eq!(SpecialKind::Groundhog.gesture(), GestureType::DrawCircle);
    }

    #[test]
    fn card_serializes_with_type_tag() {
        let card = Card::special(SpecialKind::Gorilla);
        let json = serde_json::to_value(&card).unwrap();
        assert_eq!(json["type"], "special");
        assert_eq!(json["subtype"], "gorilla");
        let back: Card = serde_json::from_value(json).unwrap();
        assert_eq!(back, card);
    }
}
