//! Registration state machine for the two-seat lobby.
//!
//! The lobby admits players in arrival order and hands a full roster to the
//! coordinator as soon as the second seat is taken:
//!
//! ```text
//! Empty --admit--> WaitingForSecond --admit--> (roster handed off) --> Empty
//!                        |
//!                        +--deadline--> Empty (player evicted)
//! ```
//!
//! It knows nothing about sockets; the connection type is a parameter so the
//! transitions can be driven directly in tests. The coordinator owns the
//! actual timer and asks the lobby for its deadline.

use log::info;
use shared::{PlayerId, MAX_PLAYERS};
use std::net::SocketAddr;
use tokio::time::{Duration, Instant};

/// What happens to a lone player when the registration window closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutPolicy {
    /// Send a timeout notice, close the connection and reset the lobby.
    #[default]
    Evict,
    /// Start a one-player match.
    PlaySolo,
}

/// A registered player and its connection.
#[derive(Debug)]
pub struct Player<C> {
    pub id: PlayerId,
    pub addr: SocketAddr,
    pub connection: C,
}

#[derive(Debug)]
pub enum Admission<C> {
    /// First seat taken; the registration timer is armed.
    Waiting { player_id: PlayerId },
    /// Both seats taken; the roster is ready for a match.
    Ready(Vec<Player<C>>),
}

#[derive(Debug)]
pub enum Expiry<C> {
    /// The deadline has not passed, or nobody is waiting.
    Pending,
    Evicted(Player<C>),
    Solo(Vec<Player<C>>),
}

pub struct Lobby<C> {
    players: Vec<Player<C>>,
    deadline: Option<Instant>,
    registration_timeout: Duration,
    policy: TimeoutPolicy,
}

impl<C> Lobby<C> {
    pub fn new(registration_timeout: Duration, policy: TimeoutPolicy) -> Self {
        Self {
            players: Vec::with_capacity(MAX_PLAYERS),
            deadline: None,
            registration_timeout,
            policy,
        }
    }

    /// The player holding seat 1 while the lobby waits for an opponent.
    pub fn waiting(&self) -> Option<&Player<C>> {
        match self.players.as_slice() {
            [player] => Some(player),
            _ => None,
        }
    }

    /// When the armed registration timer fires, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Seats a newly accepted connection.
    pub fn admit(&mut self, connection: C, addr: SocketAddr, now: Instant) -> Admission<C> {
        let player_id = self.players.len() as PlayerId + 1;
        self.players.push(Player {
            id: player_id,
            addr,
            connection,
        });
        info!("Player {} registered from {}", player_id, addr);

        if self.players.len() < MAX_PLAYERS {
            self.deadline = Some(now + self.registration_timeout);
            info!(
                "Registration timer armed ({}s)",
                self.registration_timeout.as_secs_f32()
            );
            return Admission::Waiting { player_id };
        }

        self.deadline = None;
        info!("Lobby full, registration timer cancelled");
        Admission::Ready(std::mem::take(&mut self.players))
    }

    /// Applies the timeout policy if the deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Expiry<C> {
        match self.deadline {
            Some(deadline) if now >= deadline => {}
            _ => return Expiry::Pending,
        }
        self.deadline = None;

        match self.policy {
            TimeoutPolicy::Evict => match self.players.pop() {
                Some(player) => {
                    self.players.clear();
                    info!("Registration timed out, evicting player {}", player.id);
                    Expiry::Evicted(player)
                }
                None => Expiry::Pending,
            },
            TimeoutPolicy::PlaySolo => {
                info!(
                    "Registration timed out, starting with {} player(s)",
                    self.players.len()
                );
                Expiry::Solo(std::mem::take(&mut self.players))
            }
        }
    }

    /// Empties the lobby on shutdown, disarming the timer.
    pub fn drain(&mut self) -> Vec<Player<C>> {
        self.deadline = None;
        std::mem::take(&mut self.players)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(30);

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn lobby(policy: TimeoutPolicy) -> Lobby<&'static str> {
        Lobby::new(TIMEOUT, policy)
    }

    #[test]
    fn test_lobby_starts_empty() {
        let lobby = lobby(TimeoutPolicy::Evict);
        assert!(lobby.is_empty());
        assert!(lobby.waiting().is_none());
        assert!(lobby.deadline().is_none());
    }

    #[test]
    fn test_first_admission_arms_timer() {
        let mut lobby = lobby(TimeoutPolicy::Evict);
        let now = Instant::now();

        match lobby.admit("a", addr(1), now) {
            Admission::Waiting { player_id } => assert_eq!(player_id, 1),
            other => panic!("unexpected admission {:?}", other),
        }
        assert_eq!(lobby.waiting().map(|p| p.connection), Some("a"));
        assert_eq!(lobby.deadline(), Some(now + TIMEOUT));
        assert_eq!(lobby.len(), 1);
    }

    #[test]
    fn test_second_admission_hands_off_roster() {
        let mut lobby = lobby(TimeoutPolicy::Evict);
        let now = Instant::now();
        lobby.admit("a", addr(1), now);

        match lobby.admit("b", addr(2), now + Duration::from_secs(5)) {
            Admission::Ready(players) => {
                let ids: Vec<PlayerId> = players.iter().map(|p| p.id).collect();
                assert_eq!(ids, vec![1, 2]);
                assert_eq!(players[0].connection, "a");
                assert_eq!(players[1].connection, "b");
                assert_eq!(players[1].addr, addr(2));
            }
            other => panic!("unexpected admission {:?}", other),
        }

        assert!(lobby.is_empty());
        assert!(lobby.deadline().is_none());
    }

    #[test]
    fn test_expire_before_deadline_is_pending() {
        let mut lobby = lobby(TimeoutPolicy::Evict);
        let now = Instant::now();
        lobby.admit("a", addr(1), now);

        assert!(matches!(
            lobby.expire(now + Duration::from_secs(29)),
            Expiry::Pending
        ));
        assert_eq!(lobby.len(), 1);
    }

    #[test]
    fn test_timeout_evicts_and_resets() {
        let mut lobby = lobby(TimeoutPolicy::Evict);
        let now = Instant::now();
        lobby.admit("a", addr(1), now);

        match lobby.expire(now + TIMEOUT) {
            Expiry::Evicted(player) => {
                assert_eq!(player.id, 1);
                assert_eq!(player.connection, "a");
            }
            other => panic!("unexpected expiry {:?}", other),
        }
        assert!(lobby.is_empty());
        assert!(lobby.deadline().is_none());

        // A fresh first player gets id 1 again.
        match lobby.admit("c", addr(3), now + TIMEOUT) {
            Admission::Waiting { player_id } => assert_eq!(player_id, 1),
            other => panic!("unexpected admission {:?}", other),
        }
    }

    #[test]
    fn test_timeout_with_solo_policy() {
        let mut lobby = lobby(TimeoutPolicy::PlaySolo);
        let now = Instant::now();
        lobby.admit("a", addr(1), now);

        match lobby.expire(now + TIMEOUT + Duration::from_millis(1)) {
            Expiry::Solo(players) => {
                assert_eq!(players.len(), 1);
                assert_eq!(players[0].id, 1);
            }
            other => panic!("unexpected expiry {:?}", other),
        }
        assert!(lobby.is_empty());
    }

    #[test]
    fn test_expire_on_empty_lobby() {
        let mut lobby = lobby(TimeoutPolicy::Evict);
        assert!(matches!(lobby.expire(Instant::now()), Expiry::Pending));
    }

    #[test]
    fn test_drain_disarms_timer() {
        let mut lobby = lobby(TimeoutPolicy::Evict);
        lobby.admit("a", addr(1), Instant::now());

        let drained = lobby.drain();
        assert_eq!(drained.len(), 1);
        assert!(lobby.is_empty());
        assert!(lobby.deadline().is_none());
    }
}
