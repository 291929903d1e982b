//! Farol Core - cluster membership view and the distro replication engine
//!
//! The distro protocol keeps ephemeral registry data consistent across a
//! cluster without a leader, using consistent-hash ownership over the live
//! member list and periodic verify/sync anti-entropy.

pub mod service;

pub use service::cluster::{MemberChangeEvent, MemberChangeType, ServerMemberManager};
pub use service::distro::{
    DistroConfig, DistroDataHandler, DistroProtocol, DistroTransport,
};
pub use service::ring::ConsistentHashRing;
