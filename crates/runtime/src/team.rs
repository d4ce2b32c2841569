use std::sync::Arc;

use volition_core::{AgentHandle, GoalHandle, Message};

use crate::registry::ModelRegistry;

/// A member agent joined to a team under a role.
#[derive(Debug, Clone)]
pub struct Member {
    pub handle: AgentHandle,
    pub role: String,
}

/// One bid returned from an analyse delegation. Lower scores win.
#[derive(Debug, Clone)]
pub struct Bid {
    pub bidder: AgentHandle,
    pub score: f64,
}

/// An in-flight auction for one delegated goal.
#[derive(Debug, Clone)]
pub struct Auction {
    pub goal: GoalHandle,
    pub schedule_id: u64,
    pub parameters: Option<Message>,
    /// Members the team is still expecting bids from.
    pub expected: Vec<AgentHandle>,
    pub bids: Vec<Bid>,
    /// Bids that came back as refusals.
    pub failed: u32,
    pub deadline_ms: u64,
}

impl Auction {
    /// All expected members have answered one way or the other.
    pub fn complete(&self) -> bool {
        self.bids.len() + self.failed as usize >= self.expected.len()
    }

    pub fn expired(&self, clock_ms: u64) -> bool {
        clock_ms >= self.deadline_ms
    }

    /// Lowest score wins.
    pub fn winner(&self) -> Option<&Bid> {
        self.bids
            .iter()
            .min_by(|a, b| a.score.total_cmp(&b.score))
    }
}

pub type MembersChangedHook = Arc<dyn Fn(&[Member]) + Send + Sync>;

/// Team-specific agent state: the member list and the auctions in flight.
#[derive(Clone, Default)]
pub struct TeamState {
    pub members: Vec<Member>,
    pub auctions: Vec<Auction>,
    schedule_counter: u64,
    pub auction_timeout_ms: u64,
    pub members_changed: Option<MembersChangedHook>,
}

impl TeamState {
    pub fn new(auction_timeout_ms: u64) -> Self {
        Self {
            auction_timeout_ms,
            ..Self::default()
        }
    }

    /// Monotonic per-team schedule counter stamped onto each auction.
    pub fn next_schedule_id(&mut self) -> u64 {
        self.schedule_counter += 1;
        self.schedule_counter
    }

    pub fn is_member(&self, handle: &AgentHandle) -> bool {
        self.members.iter().any(|m| m.handle.id == handle.id)
    }

    /// A member can only be added once.
    pub fn add_member(&mut self, handle: AgentHandle, role: impl Into<String>) -> bool {
        if self.is_member(&handle) {
            return false;
        }
        self.members.push(Member {
            handle,
            role: role.into(),
        });
        self.notify_members_changed();
        true
    }

    /// Remove a member and purge its bids from every in-flight auction.
    /// Returns true when the member existed.
    pub fn remove_member(&mut self, handle: &AgentHandle) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m.handle.id != handle.id);
        if self.members.len() == before {
            return false;
        }
        for auction in &mut self.auctions {
            auction.expected.retain(|h| h.id != handle.id);
            auction.bids.retain(|b| b.bidder.id != handle.id);
        }
        self.notify_members_changed();
        true
    }

    fn notify_members_changed(&self) {
        if let Some(hook) = &self.members_changed {
            hook(&self.members);
        }
    }

    /// Members whose role advertises the goal.
    pub fn delegates_for(&self, goal: &str, registry: &ModelRegistry) -> Vec<AgentHandle> {
        self.members
            .iter()
            .filter(|m| {
                registry
                    .role(&m.role)
                    .map(|role| role.advertises(goal))
                    .unwrap_or(false)
            })
            .map(|m| m.handle.clone())
            .collect()
    }

    pub fn auction_mut(&mut self, schedule_id: u64) -> Option<&mut Auction> {
        self.auctions
            .iter_mut()
            .find(|a| a.schedule_id == schedule_id)
    }
}

impl std::fmt::Debug for TeamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeamState")
            .field("members", &self.members)
            .field("auctions", &self.auctions.len())
            .field("schedule_counter", &self.schedule_counter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use volition_core::UniqueId;

    use super::*;

    fn handle(name: &str) -> AgentHandle {
        AgentHandle::new(name, UniqueId::random())
    }

    #[test]
    fn test_member_added_once() {
        let mut team = TeamState::new(100);
        let m1 = handle("m1");
        assert!(team.add_member(m1.clone(), "Scout"));
        assert!(!team.add_member(m1.clone(), "Scout"));
        assert_eq!(team.members.len(), 1);
    }

    #[test]
    fn test_removal_purges_bids() {
        let mut team = TeamState::new(100);
        let m1 = handle("m1");
        let m2 = handle("m2");
        team.add_member(m1.clone(), "Scout");
        team.add_member(m2.clone(), "Scout");
        team.auctions.push(Auction {
            goal: GoalHandle::new("G", UniqueId::random()),
            schedule_id: 1,
            parameters: None,
            expected: vec![m1.clone(), m2.clone()],
            bids: vec![Bid {
                bidder: m1.clone(),
                score: 2.0,
            }],
            failed: 0,
            deadline_ms: 100,
        });
        assert!(team.remove_member(&m1));
        let auction = team.auction_mut(1).unwrap();
        assert!(auction.bids.is_empty());
        assert_eq!(auction.expected.len(), 1);
    }

    #[test]
    fn test_lowest_bid_wins() {
        let auction = Auction {
            goal: GoalHandle::new("G", UniqueId::random()),
            schedule_id: 1,
            parameters: None,
            expected: vec![handle("m1"), handle("m2")],
            bids: vec![
                Bid {
                    bidder: handle("m1"),
                    score: 7.0,
                },
                Bid {
                    bidder: handle("m2"),
                    score: 3.0,
                },
            ],
            failed: 0,
            deadline_ms: 100,
        };
        assert!(auction.complete());
        assert_eq!(auction.winner().unwrap().score, 3.0);
    }

    #[test]
    fn test_auction_expiry() {
        let auction = Auction {
            goal: GoalHandle::new("G", UniqueId::random()),
            schedule_id: 1,
            parameters: None,
            expected: vec![handle("m1")],
            bids: Vec::new(),
            failed: 0,
            deadline_ms: 100,
        };
        assert!(!auction.complete());
        assert!(!auction.expired(99));
        assert!(auction.expired(100));
    }
}
