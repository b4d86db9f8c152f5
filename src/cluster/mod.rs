// src/cluster/mod.rs

//! Membership: the `ClusterMember`/`ClusterView` data model and the
//! gossip engine that keeps views eventually consistent across the cluster.

pub mod gossip;
pub mod member;
pub mod view;

pub use gossip::{GossipCommand, GossipEngine};
pub use member::{Capabilities, ClusterMember, MemberState, NodeId};
pub use view::ClusterView;
