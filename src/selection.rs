//! Node selection policy.
//!
//! Random choices are uniform over the filtered candidates so load spreads
//! across every eligible member. Selection never retries; callers that get
//! [`SelectionError::NoLeaderAvailable`] must rediscover first.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::SelectionError;
use crate::gossip::{ClusterMember, MemberRole};
use crate::settings::NodePreference;

/// Pick the member the next call should go to.
pub fn select_node(
    members: &[ClusterMember],
    preference: NodePreference,
) -> Result<ClusterMember, SelectionError> {
    select_node_with(members, preference, &mut rand::thread_rng())
}

/// [`select_node`] with an explicit random source.
pub fn select_node_with<R: Rng + ?Sized>(
    members: &[ClusterMember],
    preference: NodePreference,
    rng: &mut R,
) -> Result<ClusterMember, SelectionError> {
    let selected = match preference {
        NodePreference::Leader => {
            return members
                .iter()
                .find(|m| m.is_alive && m.role == MemberRole::Leader)
                .cloned()
                .ok_or(SelectionError::NoLeaderAvailable);
        }
        NodePreference::Follower => pick_role_or_any(members, MemberRole::Follower, rng),
        NodePreference::ReadOnlyReplica => {
            pick_role_or_any(members, MemberRole::ReadOnlyReplica, rng)
        }
        NodePreference::Random => alive(members).choose(rng).copied(),
        NodePreference::None => members.first(),
    };

    selected.cloned().ok_or(SelectionError::NoMemberAvailable)
}

fn alive(members: &[ClusterMember]) -> Vec<&ClusterMember> {
    members.iter().filter(|m| m.is_alive).collect()
}

fn pick_role_or_any<'a, R: Rng + ?Sized>(
    members: &'a [ClusterMember],
    role: MemberRole,
    rng: &mut R,
) -> Option<&'a ClusterMember> {
    let alive = alive(members);
    let matching: Vec<&ClusterMember> = alive.iter().copied().filter(|m| m.role == role).collect();
    if matching.is_empty() {
        alive.choose(rng).copied()
    } else {
        matching.choose(rng).copied()
    }
}
