//! Timestamp reconciliation.
//!
//! When a peer introduces a channel we already have, the creation timestamp
//! decides who wins. This is the only place authoritative channel state may
//! be rewritten by a non-local event.
//!
//! - Peer newer (`ts' > ts`): peer loses. Its modes and ranks are ignored;
//!   its members join bare.
//! - Peer older (`ts' < ts`): we lose. All local channel modes are cleared,
//!   every local prefix rank is dropped, the peer's timestamp and modes are
//!   adopted.
//! - Equal: union. Parameter conflicts resolve to the lexicographically
//!   greater value; list entries and prefix ranks union.

use crate::state::channel::{Channel, ListModeEntry, Membership};
use crate::state::world::World;

/// A member as carried in a peer's channel introduction.
#[derive(Debug, Clone)]
pub struct IncomingMember {
    pub uid: String,
    pub ranks: Vec<char>,
}

/// A peer's view of one channel.
#[derive(Debug, Clone, Default)]
pub struct IncomingChannel {
    pub name: String,
    pub ts: i64,
    pub modes: Vec<char>,
    pub mode_params: Vec<(char, String)>,
    pub lists: Vec<(char, ListModeEntry)>,
    pub members: Vec<IncomingMember>,
}

/// Which side's state survived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Created,
    PeerLost,
    LocalLost,
    Equal,
}

/// Merge a peer's channel introduction into the world.
///
/// Members named by the peer must already exist as users (the federation
/// layer introduces users before channels); unknown UIDs are skipped.
pub fn merge_channel(world: &mut World, incoming: IncomingChannel) -> MergeOutcome {
    let key = world.key(&incoming.name);
    let casemap = world.casemap;
    let chan_reset_ids = world.slots.reset_ids_for(crate::ext::SlotTarget::Channel);

    let outcome = match world.channels.get(&key) {
        None => MergeOutcome::Created,
        Some(local) if incoming.ts > local.ts => MergeOutcome::PeerLost,
        Some(local) if incoming.ts < local.ts => MergeOutcome::LocalLost,
        Some(_) => MergeOutcome::Equal,
    };

    let channel = world
        .channels
        .entry(key.clone())
        .or_insert_with(|| Channel::new(incoming.name.clone(), incoming.ts));

    match outcome {
        MergeOutcome::Created | MergeOutcome::LocalLost => {
            if outcome == MergeOutcome::LocalLost {
                // We lose: wipe modes, keep memberships but strip ranks.
                // Extension state flagged reset-on-deregister (pending
                // invites) goes with them.
                channel.ts = incoming.ts;
                channel.modes.clear();
                channel.mode_params.clear();
                channel.lists.clear();
                channel.ext.reset(&chan_reset_ids);
                for membership in channel.members.values_mut() {
                    membership.ranks.clear();
                }
            }
            for m in &incoming.modes {
                channel.modes.insert(*m);
            }
            for (m, v) in &incoming.mode_params {
                channel.mode_params.insert(*m, v.clone());
            }
            for (m, entry) in &incoming.lists {
                channel.lists.entry(*m).or_default().push(entry.clone());
            }
        }
        MergeOutcome::PeerLost => {
            // Retain local state entirely; incoming members arrive bare.
        }
        MergeOutcome::Equal => {
            for m in &incoming.modes {
                channel.modes.insert(*m);
            }
            for (m, v) in &incoming.mode_params {
                match channel.mode_params.get(m) {
                    Some(local) if local.as_str() >= v.as_str() => {}
                    _ => {
                        channel.mode_params.insert(*m, v.clone());
                    }
                }
            }
            for (m, entry) in &incoming.lists {
                let list = channel.lists.entry(*m).or_default();
                if !list.iter().any(|e| casemap.eq(&e.mask, &entry.mask)) {
                    list.push(entry.clone());
                }
            }
        }
    }

    // Admit the peer's members. Ranks carry only when the peer's state won
    // or the timestamps tied.
    let keep_ranks = matches!(
        outcome,
        MergeOutcome::Created | MergeOutcome::LocalLost | MergeOutcome::Equal
    );
    let joined_at = incoming.ts;
    let mut admitted: Vec<String> = Vec::new();
    for member in incoming.members {
        if !world.users.contains_key(&member.uid) {
            tracing::warn!(uid = %member.uid, channel = %incoming.name, "Peer introduced unknown member; skipped");
            continue;
        }
        let Some(channel) = world.channels.get_mut(&key) else {
            break;
        };
        let membership = channel
            .members
            .entry(member.uid.clone())
            .or_insert_with(|| Membership::new(&member.uid, joined_at));
        if keep_ranks {
            for r in &member.ranks {
                membership.ranks.insert(*r);
            }
        }
        admitted.push(member.uid);
    }
    for uid in admitted {
        if let Some(user) = world.users.get_mut(&uid) {
            user.channels.insert(key.clone());
        }
    }

    outcome
}
