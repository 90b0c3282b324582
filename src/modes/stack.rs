//! Mode-change stacking.
//!
//! A MODE command is parsed into a change list and processed as one batch:
//! access checks, per-change validation, no-op suppression, then the
//! accepted changes are applied and formatted into as few MODE lines as the
//! max-modes-per-line limit allows. One batch is announced atomically; its
//! lines are never interleaved with another batch on the same channel.

use std::sync::Arc;

use super::{ModeDef, ModeKind};
use crate::hooks::{self, Decision, PreModeEvent};
use crate::routing;
use crate::state::channel::ListModeEntry;
use crate::state::world::World;
use ember_proto::{wildcard, Message, Numeric};

/// One requested change.
#[derive(Clone, Debug)]
pub struct ModeChange {
    pub def: Arc<ModeDef>,
    pub adding: bool,
    /// Display parameter (nick for prefix modes, mask for lists, value for
    /// parameter modes).
    pub param: Option<String>,
}

/// The result of parsing a raw mode string against the channel table.
#[derive(Default)]
pub struct ParsedChanges {
    pub changes: Vec<ModeChange>,
    /// Letters with no registered handler.
    pub unknown: Vec<char>,
    /// List modes named without a parameter: a list query, not a change.
    pub list_queries: Vec<Arc<ModeDef>>,
}

/// Parse `modestr` + `args` into a change list.
pub fn parse_channel_changes(world: &World, modestr: &str, args: &[String]) -> ParsedChanges {
    let mut out = ParsedChanges::default();
    let mut adding = true;
    let mut arg_iter = args.iter();

    for c in modestr.chars() {
        match c {
            '+' => adding = true,
            '-' => adding = false,
            letter => {
                let Some(def) = world.modes.channel_mode(letter) else {
                    out.unknown.push(letter);
                    continue;
                };
                let param = if def.takes_param(adding) {
                    match arg_iter.next() {
                        Some(p) => Some(p.clone()),
                        None if matches!(def.kind, ModeKind::List) && adding => {
                            out.list_queries.push(def);
                            continue;
                        }
                        None => {
                            // A prefix or parameter mode with no argument is
                            // dropped silently, like the unknowns.
                            continue;
                        }
                    }
                } else {
                    // Tolerate a stray argument on parameter-mode removal.
                    if matches!(def.kind, ModeKind::Param { .. }) && !adding {
                        arg_iter.next();
                    }
                    None
                };
                out.changes.push(ModeChange { def, adding, param });
            }
        }
    }
    out
}

/// An applied batch, ready for broadcast.
pub struct AppliedBatch {
    pub applied: Vec<ModeChange>,
}

impl AppliedBatch {
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    /// Format into MODE messages, at most `max_modes` changes per line.
    pub fn format(&self, source: &str, chan_name: &str, max_modes: usize) -> Vec<Message> {
        let mut out = Vec::new();
        for chunk in self.applied.chunks(max_modes.max(1)) {
            let mut letters = String::new();
            let mut params = Vec::new();
            let mut sign: Option<bool> = None;
            for change in chunk {
                if sign != Some(change.adding) {
                    letters.push(if change.adding { '+' } else { '-' });
                    sign = Some(change.adding);
                }
                letters.push(change.def.letter);
                if let Some(p) = &change.param {
                    params.push(p.clone());
                }
            }
            let mut msg = Message::cmd("MODE").with_source(source).param(chan_name).param(letters);
            for p in params {
                msg = msg.param(p);
            }
            out.push(msg);
        }
        out
    }
}

/// Process a change list against a channel.
///
/// With `check_access`, each change is gated on the source's rank against
/// the mode's declared requirement (IRC operators bypass). A denied change
/// is dropped; the rest of the batch continues. The accepted changes are
/// applied, broadcast to the channel, and returned for the federation
/// layer.
pub fn apply_channel_batch(
    world: &mut World,
    source_uid: Option<&str>,
    chan_key: &str,
    changes: Vec<ModeChange>,
    check_access: bool,
) -> AppliedBatch {
    let mut applied = Vec::new();

    let chan_name = match world.channels.get(chan_key) {
        Some(c) => c.name.clone(),
        None => return AppliedBatch { applied },
    };

    // The whole batch is one gated event.
    if let Some(uid) = source_uid {
        let event = PreModeEvent {
            uid: uid.to_string(),
            target: chan_name.clone(),
        };
        if hooks::first_result(world, |h| &h.pre_mode, &event) == Decision::Deny {
            return AppliedBatch { applied };
        }
    }

    let (source_rank, source_is_oper, source_nick) = match source_uid {
        Some(uid) => {
            let rank = world
                .channels
                .get(chan_key)
                .and_then(|c| c.member(uid))
                .map(|m| world.modes.max_rank(m))
                .unwrap_or(0);
            let user = world.user(uid);
            (
                rank,
                user.map(|u| u.modes.oper).unwrap_or(false),
                user.map(|u| u.reply_nick().to_string()).unwrap_or_default(),
            )
        }
        None => (u32::MAX, true, world.server_name().to_string()),
    };

    let max_list = world.config.limits.max_list_entries;
    let casemap = world.casemap;
    let now = World::now();

    for mut change in changes {
        let def = change.def.clone();

        if check_access {
            let denied = (def.oper_only && !source_is_oper)
                || (!source_is_oper && source_rank < def.set_rank);
            if denied {
                if let Some(uid) = source_uid {
                    world.send_numeric(
                        uid,
                        Numeric::ERR_CHANOPRIVSNEEDED
                            .build()
                            .param(&chan_name)
                            .trailing("You're not channel operator"),
                    );
                }
                continue;
            }
        }

        // Parameter validation.
        if let Some(checker) = def.param_check {
            if let Some(param) = &change.param {
                match checker(change.adding, param) {
                    Ok(normalized) => change.param = Some(normalized),
                    Err(reason) => {
                        if let Some(uid) = source_uid {
                            world.send_numeric(
                                uid,
                                Numeric::ERR_INVALIDMODEPARAM
                                    .build()
                                    .param(&chan_name)
                                    .param(def.letter.to_string())
                                    .param(param)
                                    .trailing(reason),
                            );
                        }
                        continue;
                    }
                }
            }
        }

        let accepted = match def.kind {
            ModeKind::Simple => {
                let Some(channel) = world.channels.get_mut(chan_key) else {
                    continue;
                };
                if change.adding {
                    channel.modes.insert(def.letter)
                } else {
                    channel.modes.remove(&def.letter)
                }
            }
            ModeKind::Param { .. } => {
                let Some(channel) = world.channels.get_mut(chan_key) else {
                    continue;
                };
                if change.adding {
                    let value = change.param.clone().unwrap_or_default();
                    // Re-setting the current value is a no-op.
                    if channel.mode_param(def.letter) == Some(value.as_str()) {
                        false
                    } else {
                        channel.mode_params.insert(def.letter, value);
                        true
                    }
                } else {
                    change.param = None;
                    channel.mode_params.remove(&def.letter).is_some()
                }
            }
            ModeKind::Prefix { .. } => {
                apply_prefix_change(world, source_uid, chan_key, &mut change)
            }
            ModeKind::List => {
                let mask = change.param.clone().unwrap_or_default();
                let Some(channel) = world.channels.get_mut(chan_key) else {
                    continue;
                };
                let list = channel.lists.entry(def.letter).or_default();
                if change.adding {
                    if list.iter().any(|e| casemap.eq(&e.mask, &mask)) {
                        false
                    } else if list.len() >= max_list {
                        drop(list);
                        if let Some(uid) = source_uid {
                            world.send_numeric(
                                uid,
                                Numeric::ERR_BANLISTFULL
                                    .build()
                                    .param(&chan_name)
                                    .param(def.letter.to_string())
                                    .trailing("Channel list is full"),
                            );
                        }
                        false
                    } else {
                        list.push(ListModeEntry {
                            mask,
                            setter: source_nick.clone(),
                            set_at: now,
                        });
                        true
                    }
                } else {
                    let before = list.len();
                    list.retain(|e| !casemap.eq(&e.mask, &mask));
                    list.len() != before
                }
            }
        };

        if accepted {
            applied.push(change);
        }
    }

    let batch = AppliedBatch { applied };
    if !batch.is_empty() {
        let source = source_uid
            .and_then(|uid| world.user(uid).map(|u| u.hostmask()))
            .unwrap_or_else(|| world.server_name().to_string());
        let max_modes = world.config.limits.max_modes_per_line;
        for msg in batch.format(&source, &chan_name, max_modes) {
            routing::broadcast_channel(world, chan_key, &msg, &[], 0);
        }
    }
    batch
}

/// Grant or drop a prefix rank. Resolves the nick parameter, rewrites it to
/// the target's display nick, and suppresses no-ops.
fn apply_prefix_change(
    world: &mut World,
    source_uid: Option<&str>,
    chan_key: &str,
    change: &mut ModeChange,
) -> bool {
    let nick = change.param.clone().unwrap_or_default();
    let target_uid = world.find_uid_by_nick(&nick);
    let on_channel = target_uid
        .as_deref()
        .and_then(|t| world.channels.get(chan_key).map(|c| c.members.contains_key(t)))
        .unwrap_or(false);
    if !on_channel {
        if let Some(uid) = source_uid {
            let chan_name = world
                .channels
                .get(chan_key)
                .map(|c| c.name.clone())
                .unwrap_or_default();
            world.send_numeric(
                uid,
                Numeric::ERR_USERNOTINCHANNEL
                    .build()
                    .param(&nick)
                    .param(chan_name)
                    .trailing("They aren't on that channel"),
            );
        }
        return false;
    }
    let target_uid = target_uid.unwrap_or_default();
    let display = world
        .user(&target_uid)
        .and_then(|u| u.nick.clone())
        .unwrap_or(nick);
    change.param = Some(display);

    let letter = change.def.letter;
    let adding = change.adding;
    let Some(membership) = world
        .channels
        .get_mut(chan_key)
        .and_then(|c| c.member_mut(&target_uid))
    else {
        return false;
    };
    if adding {
        membership.ranks.insert(letter)
    } else {
        membership.ranks.remove(&letter)
    }
}

/// Does any ban-list entry match this user, with the exception list able to
/// override? Used by the JOIN checks and the moderated-send path.
pub fn banned_from(world: &World, chan_key: &str, uid: &str) -> bool {
    let Some(channel) = world.channels.get(chan_key) else {
        return false;
    };
    let Some(user) = world.user(uid) else {
        return false;
    };
    let cm = world.casemap;
    let mask = user.hostmask();
    let ip_mask = format!(
        "{}!{}@{}",
        user.reply_nick(),
        if user.ident.is_empty() { "*" } else { &user.ident },
        user.ip
    );
    let hit = |letter: char| {
        channel.list(letter).iter().any(|e| {
            wildcard::matches(&e.mask, &mask, cm) || wildcard::matches(&e.mask, &ip_mask, cm)
        })
    };
    hit('b') && !hit('e')
}
