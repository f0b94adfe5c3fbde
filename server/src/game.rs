//! Game engine consumed by the session coordinator.
//!
//! The coordinator only needs two capabilities from an engine: build the
//! initial state from a map description, and apply one player's move to it.
//! Everything it broadcasts is an opaque payload produced here.

use log::info;
use shared::update::{encode_updates, GameUpdate, PlayerView};
use shared::{Direction, PlayerId, ProtocolError, MAX_PLAYERS};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

const MAX_DIMENSION: usize = u16::MAX as usize;

#[derive(Debug, Error)]
pub enum GameError {
    #[error("map is empty")]
    EmptyMap,

    #[error("map is too large ({0}x{1})")]
    TooLarge(usize, usize),

    #[error("unknown map cell {0:?} at line {1}, column {2}")]
    UnknownCell(char, usize, usize),

    #[error("map has no spawn cell for player {0}")]
    MissingSpawn(PlayerId),

    #[error("map has more than one spawn cell for player {0}")]
    DuplicateSpawn(PlayerId),

    #[error("map has no food")]
    NoFood,

    #[error("failed to encode update: {0}")]
    Encode(#[from] ProtocolError),
}

/// Result of applying one move.
#[derive(Debug, Clone)]
pub struct MoveOutcome {
    /// Serialized update to relay to every player.
    pub payload: Vec<u8>,
    /// True once the match has ended.
    pub over: bool,
}

pub trait GameEngine: Send + Sync + 'static {
    type State: Send + 'static;

    fn load(&self, map: &str) -> Result<Self::State, GameError>;

    /// Payload describing the whole state, sent once before play starts.
    fn snapshot(&self, state: &Self::State) -> Result<Vec<u8>, GameError>;

    fn apply_move(
        &self,
        state: &mut Self::State,
        player: PlayerId,
        direction: Direction,
    ) -> Result<MoveOutcome, GameError>;

    /// Payload announcing that `leaver` dropped out of the match.
    fn forfeit(&self, state: &Self::State, leaver: PlayerId) -> Result<Vec<u8>, GameError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pawn {
    x: u16,
    y: u16,
    score: u32,
}

/// Grid state of a maze match.
#[derive(Debug, Clone)]
pub struct Board {
    width: u16,
    height: u16,
    walls: BTreeSet<(u16, u16)>,
    food: BTreeSet<(u16, u16)>,
    pawns: BTreeMap<PlayerId, Pawn>,
    over: bool,
}

impl Board {
    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn food_left(&self) -> usize {
        self.food.len()
    }

    pub fn position(&self, player: PlayerId) -> Option<(u16, u16)> {
        self.pawns.get(&player).map(|pawn| (pawn.x, pawn.y))
    }

    pub fn score(&self, player: PlayerId) -> Option<u32> {
        self.pawns.get(&player).map(|pawn| pawn.score)
    }

    pub fn is_over(&self) -> bool {
        self.over
    }

    fn is_free(&self, x: u16, y: u16, mover: PlayerId) -> bool {
        !self.walls.contains(&(x, y))
            && !self
                .pawns
                .iter()
                .any(|(id, pawn)| *id != mover && pawn.x == x && pawn.y == y)
    }

    fn step(&self, x: u16, y: u16, direction: Direction) -> Option<(u16, u16)> {
        let (dx, dy) = direction.delta();
        let nx = i32::from(x) + dx;
        let ny = i32::from(y) + dy;
        if nx < 0 || ny < 0 || nx >= i32::from(self.width) || ny >= i32::from(self.height) {
            return None;
        }
        Some((nx as u16, ny as u16))
    }

    fn scores(&self) -> Vec<(PlayerId, u32)> {
        self.pawns.iter().map(|(id, pawn)| (*id, pawn.score)).collect()
    }

    fn winner(&self) -> Option<PlayerId> {
        let best = self.pawns.values().map(|pawn| pawn.score).max()?;
        let mut leaders = self.pawns.iter().filter(|(_, pawn)| pawn.score == best);
        match (leaders.next(), leaders.next()) {
            (Some((id, _)), None) => Some(*id),
            _ => None,
        }
    }
}

/// Pellet-collecting maze: `#` wall, `.` food, `1`/`2` spawn cells, space
/// for empty floor. The match ends when the last pellet is eaten.
#[derive(Debug, Clone, Copy, Default)]
pub struct Maze;

impl GameEngine for Maze {
    type State = Board;

    fn load(&self, map: &str) -> Result<Board, GameError> {
        let mut rows: Vec<&str> = map.lines().collect();
        while rows.last().is_some_and(|row| row.trim().is_empty()) {
            rows.pop();
        }
        load_rows(&rows)
    }

    fn snapshot(&self, board: &Board) -> Result<Vec<u8>, GameError> {
        let players = board
            .pawns
            .iter()
            .map(|(id, pawn)| PlayerView {
                id: *id,
                x: pawn.x,
                y: pawn.y,
                score: pawn.score,
            })
            .collect();

        let update = GameUpdate::Snapshot {
            width: board.width,
            height: board.height,
            walls: board.walls.iter().copied().collect(),
            food: board.food.iter().copied().collect(),
            players,
        };
        Ok(encode_updates(&[update])?)
    }

    fn apply_move(
        &self,
        board: &mut Board,
        player: PlayerId,
        direction: Direction,
    ) -> Result<MoveOutcome, GameError> {
        let mut updates = Vec::new();

        if let (false, Some(pawn)) = (board.over, board.pawns.get(&player).copied()) {
            let target = board
                .step(pawn.x, pawn.y, direction)
                .filter(|(x, y)| board.is_free(*x, *y, player));

            let mut moved = pawn;
            let mut ate = false;
            if let Some((x, y)) = target {
                moved.x = x;
                moved.y = y;
                if board.food.remove(&(x, y)) {
                    moved.score += 1;
                    ate = true;
                }
            }
            board.pawns.insert(player, moved);

            updates.push(GameUpdate::Moved {
                player,
                x: moved.x,
                y: moved.y,
                score: moved.score,
            });
            if ate {
                updates.push(GameUpdate::FoodEaten {
                    x: moved.x,
                    y: moved.y,
                });
            }
            if board.food.is_empty() {
                board.over = true;
                info!("Last pellet eaten by player {}", player);
            }
        }

        if board.over {
            updates.push(GameUpdate::GameOver {
                winner: board.winner(),
                scores: board.scores(),
            });
        }

        Ok(MoveOutcome {
            payload: encode_updates(&updates)?,
            over: board.over,
        })
    }

    fn forfeit(&self, board: &Board, leaver: PlayerId) -> Result<Vec<u8>, GameError> {
        let updates = [
            GameUpdate::Forfeit { leaver },
            GameUpdate::GameOver {
                winner: board.pawns.keys().copied().find(|id| *id != leaver),
                scores: board.scores(),
            },
        ];
        Ok(encode_updates(&updates)?)
    }
}

fn load_rows(rows: &[&str]) -> Result<Board, GameError> {
    let height = rows.len();
    let width = rows.iter().map(|row| row.chars().count()).max().unwrap_or(0);
    if height == 0 || width == 0 {
        return Err(GameError::EmptyMap);
    }
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(GameError::TooLarge(width, height));
    }

    let mut walls = BTreeSet::new();
    let mut food = BTreeSet::new();
    let mut pawns = BTreeMap::new();

    for (y, row) in rows.iter().enumerate() {
        let mut cells = row.chars();
        for x in 0..width {
            let pos = (x as u16, y as u16);
            // Short lines are padded with walls.
            match cells.next().unwrap_or('#') {
                '#' => {
                    walls.insert(pos);
                }
                '.' => {
                    food.insert(pos);
                }
                ' ' => {}
                spawn @ ('1' | '2') => {
                    let id = spawn as u8 - b'0';
                    let pawn = Pawn {
                        x: pos.0,
                        y: pos.1,
                        score: 0,
                    };
                    if pawns.insert(id, pawn).is_some() {
                        return Err(GameError::DuplicateSpawn(id));
                    }
                }
                other => return Err(GameError::UnknownCell(other, y + 1, x + 1)),
            }
        }
    }

    for id in 1..=MAX_PLAYERS as PlayerId {
        if !pawns.contains_key(&id) {
            return Err(GameError::MissingSpawn(id));
        }
    }
    if food.is_empty() {
        return Err(GameError::NoFood);
    }

    Ok(Board {
        width: width as u16,
        height: height as u16,
        walls,
        food,
        pawns,
        over: false,
    })
}
