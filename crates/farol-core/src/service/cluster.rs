//! Cluster membership view
//!
//! Holds the live server node list and broadcasts membership changes.
//! The member list is read far more often than it changes, so reads get a
//! shared snapshot and writers replace it wholesale.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info};

use farol_api::model::{Member, NodeState};
use farol_common::now_millis;

/// Type of member change event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberChangeType {
    MemberJoin,
    MemberLeave,
    MemberStateChange,
}

impl std::fmt::Display for MemberChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberChangeType::MemberJoin => write!(f, "MEMBER_JOIN"),
            MemberChangeType::MemberLeave => write!(f, "MEMBER_LEAVE"),
            MemberChangeType::MemberStateChange => write!(f, "MEMBER_STATE_CHANGE"),
        }
    }
}

/// Member change event
#[derive(Clone, Debug)]
pub struct MemberChangeEvent {
    pub change_type: MemberChangeType,
    pub member: Member,
    pub timestamp: i64,
}

/// Manager for the cluster member list
pub struct ServerMemberManager {
    local_address: String,
    /// Replaced wholesale on every change; readers clone the Arc
    members: RwLock<Arc<Vec<Member>>>,
    /// Bumped on every change; lets consumers cache derived views
    generation: AtomicU64,
    event_tx: broadcast::Sender<MemberChangeEvent>,
}

impl ServerMemberManager {
    pub fn new(local: Member) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            local_address: local.address.clone(),
            members: RwLock::new(Arc::new(vec![local])),
            generation: AtomicU64::new(1),
            event_tx,
        }
    }

    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    /// Snapshot of all known members.
    pub fn members(&self) -> Arc<Vec<Member>> {
        self.members.read().clone()
    }

    /// Members eligible for distro responsibility (UP or SUSPICIOUS).
    pub fn alive_members(&self) -> Vec<Member> {
        self.members()
            .iter()
            .filter(|m| m.is_alive())
            .cloned()
            .collect()
    }

    /// Peers other than the local node, alive only.
    pub fn alive_peers(&self) -> Vec<Member> {
        self.alive_members()
            .into_iter()
            .filter(|m| m.address != self.local_address)
            .collect()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Add a member to the cluster view. Re-joining an existing address is
    /// treated as a state refresh.
    pub fn member_join(&self, member: Member) {
        let mut guard = self.members.write();
        let mut next: Vec<Member> = guard.iter().cloned().collect();
        if let Some(existing) = next.iter_mut().find(|m| m.address == member.address) {
            *existing = member.clone();
        } else {
            next.push(member.clone());
        }
        *guard = Arc::new(next);
        drop(guard);

        self.generation.fetch_add(1, Ordering::AcqRel);
        info!("Member joined: {}", member.address);
        let _ = self.event_tx.send(MemberChangeEvent {
            change_type: MemberChangeType::MemberJoin,
            member,
            timestamp: now_millis(),
        });
    }

    /// Remove a member from the cluster view.
    pub fn member_leave(&self, address: &str) {
        let mut guard = self.members.write();
        let Some(member) = guard.iter().find(|m| m.address == address).cloned() else {
            return;
        };
        let next: Vec<Member> = guard
            .iter()
            .filter(|m| m.address != address)
            .cloned()
            .collect();
        *guard = Arc::new(next);
        drop(guard);

        self.generation.fetch_add(1, Ordering::AcqRel);
        info!("Member left: {}", address);
        let _ = self.event_tx.send(MemberChangeEvent {
            change_type: MemberChangeType::MemberLeave,
            member,
            timestamp: now_millis(),
        });
    }

    /// Update a member's node state.
    pub fn update_state(&self, address: &str, state: NodeState) {
        let mut guard = self.members.write();
        let mut next: Vec<Member> = guard.iter().cloned().collect();
        let Some(member) = next.iter_mut().find(|m| m.address == address) else {
            return;
        };
        if member.state == state {
            return;
        }
        member.state = state;
        let changed = member.clone();
        *guard = Arc::new(next);
        drop(guard);

        self.generation.fetch_add(1, Ordering::AcqRel);
        debug!("Member state changed: {} -> {}", address, state);
        let _ = self.event_tx.send(MemberChangeEvent {
            change_type: MemberChangeType::MemberStateChange,
            member: changed,
            timestamp: now_millis(),
        });
    }

    /// Subscribe to membership changes.
    pub fn subscribe(&self) -> broadcast::Receiver<MemberChangeEvent> {
        self.event_tx.subscribe()
    }
}
