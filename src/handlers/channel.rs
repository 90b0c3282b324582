//! Channel membership: JOIN, PART, KICK, TOPIC, NAMES, INVITE, LIST.

use crate::dispatch::CmdResult;
use crate::hooks::{self, CheckBanEvent, Decision, PostJoinEvent, PreJoinEvent};
use crate::modes::{stack, RANK_HALFOP, RANK_OP};
use crate::routing;
use crate::state::world::World;
use ember_proto::{wildcard, Message, Numeric, SepStream};

/// Channel name grammar: leading `#`, bounded length, no separators.
pub fn is_valid_channel_name(name: &str) -> bool {
    name.len() > 1
        && name.len() <= 64
        && name.starts_with('#')
        && !name.contains([' ', ',', '\u{7}'])
}

pub fn handle_join(world: &mut World, uid: &str, msg: &Message) -> CmdResult {
    // `JOIN 0` leaves everything.
    if msg.params[0] == "0" {
        let keys: Vec<String> = world
            .user(uid)
            .map(|u| u.channels.iter().cloned().collect())
            .unwrap_or_default();
        for key in keys {
            part_one(world, uid, &key, Some("Left all channels".to_string()));
        }
        return CmdResult::ok_broadcast();
    }

    let names: Vec<String> = SepStream::new(&msg.params[0], ',', false)
        .map(str::to_string)
        .collect();
    let keys: Vec<Option<String>> = match msg.params.get(1) {
        Some(list) => SepStream::new(list, ',', true).map(|k| {
            if k.is_empty() {
                None
            } else {
                Some(k.to_string())
            }
        })
        .collect(),
        None => Vec::new(),
    };

    let mut any_ok = false;
    for (i, name) in names.iter().enumerate() {
        let key = keys.get(i).cloned().flatten();
        if join_one(world, uid, name, key) {
            any_ok = true;
        }
    }
    if any_ok {
        CmdResult::ok_broadcast()
    } else {
        CmdResult::failure()
    }
}

fn join_one(world: &mut World, uid: &str, name: &str, key: Option<String>) -> bool {
    if !is_valid_channel_name(name) {
        world.send_numeric(
            uid,
            Numeric::ERR_NOSUCHCHANNEL
                .build()
                .param(name)
                .trailing("Invalid channel name"),
        );
        return false;
    }

    let chan_key = world.key(name);
    if world
        .user(uid)
        .map(|u| u.channels.contains(&chan_key))
        .unwrap_or(true)
    {
        return false;
    }

    let at_limit = world
        .user(uid)
        .map(|u| u.channels.len() >= world.config.limits.max_channels_per_user)
        .unwrap_or(true);
    if at_limit {
        world.send_numeric(
            uid,
            Numeric::ERR_TOOMANYCHANNELS
                .build()
                .param(name)
                .trailing("You have joined too many channels"),
        );
        return false;
    }

    // Closed channels (CBAN registry).
    let is_oper = world.user(uid).map(|u| u.modes.oper).unwrap_or(false);
    if !is_oper {
        if let Some(line) = world.xlines.check_channel(name, World::now(), world.casemap) {
            world.send_numeric(
                uid,
                Numeric::ERR_BANNEDFROMCHAN
                    .build()
                    .param(name)
                    .trailing(format!("Channel is closed: {}", line.reason)),
            );
            let mask = world.user(uid).map(|u| u.hostmask()).unwrap_or_default();
            world.server_notice(&format!("{mask} tried to join closed channel {name}"));
            return false;
        }
    }

    let creating = !world.channels.contains_key(&chan_key);
    if !creating && !check_join_gates(world, uid, name, &chan_key, key.as_deref()) {
        return false;
    }

    let event = PreJoinEvent {
        uid: uid.to_string(),
        channel: name.to_string(),
        key,
        creating,
    };
    if hooks::first_result(world, |h| &h.pre_join, &event) == Decision::Deny {
        return false;
    }

    let now = World::now();
    let created = world.add_member(uid, name, now);
    if created {
        // The creator takes the top rank by policy.
        if let Some(membership) = world
            .channels
            .get_mut(&chan_key)
            .and_then(|c| c.member_mut(uid))
        {
            membership.ranks.insert('o');
        }
    }

    let mask = world.user(uid).map(|u| u.hostmask()).unwrap_or_default();
    let join = Message::cmd("JOIN").with_source(mask).param(name);
    routing::broadcast_channel(world, &chan_key, &join, &[], 0);

    send_topic_numerics(world, uid, name, &chan_key, false);
    send_names(world, uid, name, &chan_key);

    let mut event = PostJoinEvent {
        uid: uid.to_string(),
        channel: name.to_string(),
    };
    hooks::notify_all(world, |h| &h.post_join, &mut event);
    true
}

/// The join gate battery for an existing channel: invite-only, key, limit,
/// bans with exceptions, registered-only, TLS-only.
fn check_join_gates(
    world: &mut World,
    uid: &str,
    name: &str,
    chan_key: &str,
    key: Option<&str>,
) -> bool {
    let Some(channel) = world.channels.get(chan_key) else {
        return true;
    };
    let Some(user) = world.user(uid) else {
        return false;
    };

    if channel.has_mode('i') {
        let invited = channel
            .ext
            .get(world.core_slots.invite_list)
            .is_some_and(|invites| invites.contains(uid));
        let invex = channel
            .list('I')
            .iter()
            .any(|e| wildcard::matches(&e.mask, &user.hostmask(), world.casemap));
        if !invited && !invex {
            world.send_numeric(
                uid,
                Numeric::ERR_INVITEONLYCHAN
                    .build()
                    .param(name)
                    .trailing("Cannot join channel (+i)"),
            );
            return false;
        }
    }

    if let Some(expected) = channel.mode_param('k') {
        if key != Some(expected) {
            world.send_numeric(
                uid,
                Numeric::ERR_BADCHANNELKEY
                    .build()
                    .param(name)
                    .trailing("Cannot join channel (+k)"),
            );
            return false;
        }
    }

    if let Some(limit) = channel.user_limit() {
        if channel.members.len() >= limit {
            world.send_numeric(
                uid,
                Numeric::ERR_CHANNELISFULL
                    .build()
                    .param(name)
                    .trailing("Cannot join channel (+l)"),
            );
            return false;
        }
    }

    if channel.has_mode('r') && user.account.is_none() {
        world.send_numeric(
            uid,
            Numeric::ERR_NEEDREGGEDNICK
                .build()
                .param(name)
                .trailing("You need a registered nick to join that channel"),
        );
        return false;
    }

    if channel.has_mode('S') && !user.secure {
        world.send_numeric(
            uid,
            Numeric::ERR_SECUREONLYCHAN
                .build()
                .param(name)
                .trailing("Cannot join channel (+S): TLS users only"),
        );
        return false;
    }

    // Ban list, with the check-ban hooks able to override either way.
    let event = CheckBanEvent {
        uid: uid.to_string(),
        channel: name.to_string(),
    };
    let banned = match hooks::first_result(world, |h| &h.check_ban, &event) {
        Decision::Allow => false,
        Decision::Deny => true,
        Decision::Passthru => stack::banned_from(world, chan_key, uid),
    };
    if banned {
        world.send_numeric(
            uid,
            Numeric::ERR_BANNEDFROMCHAN
                .build()
                .param(name)
                .trailing("Cannot join channel (+b)"),
        );
        return false;
    }
    true
}

/// 331 or 332/333.
pub fn send_topic_numerics(world: &mut World, uid: &str, name: &str, chan_key: &str, empty_331: bool) {
    let topic = world.channels.get(chan_key).and_then(|c| c.topic.clone());
    match topic {
        Some(topic) => {
            world.send_numeric(
                uid,
                Numeric::RPL_TOPIC.build().param(name).trailing(&topic.text),
            );
            world.send_numeric(
                uid,
                Numeric::RPL_TOPICWHOTIME
                    .build()
                    .param(name)
                    .param(&topic.set_by)
                    .param(topic.set_at.to_string()),
            );
        }
        None if empty_331 => {
            world.send_numeric(
                uid,
                Numeric::RPL_NOTOPIC.build().param(name).trailing("No topic is set"),
            );
        }
        None => {}
    }
}

/// 353/366, honoring multi-prefix.
pub fn send_names(world: &mut World, uid: &str, name: &str, chan_key: &str) {
    let multi = world
        .user(uid)
        .map(|u| u.has_cap("multi-prefix"))
        .unwrap_or(false);
    let mut entries: Vec<String> = Vec::new();
    if let Some(channel) = world.channels.get(chan_key) {
        let mut members: Vec<_> = channel.members.values().collect();
        members.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
        for membership in members {
            let Some(user) = world.user(&membership.uid) else {
                continue;
            };
            let prefix = world.modes.prefix_string(membership, multi);
            entries.push(format!("{}{}", prefix, user.reply_nick()));
        }
    }
    world.send_numeric(
        uid,
        Numeric::RPL_NAMREPLY
            .build()
            .param("=")
            .param(name)
            .trailing(entries.join(" ")),
    );
    world.send_numeric(
        uid,
        Numeric::RPL_ENDOFNAMES
            .build()
            .param(name)
            .trailing("End of /NAMES list."),
    );
}

pub fn handle_part(world: &mut World, uid: &str, msg: &Message) -> CmdResult {
    let reason = msg.params.get(1).cloned();
    let mut any_ok = false;
    let names: Vec<String> = SepStream::new(&msg.params[0], ',', false)
        .map(str::to_string)
        .collect();
    for name in names {
        let key = world.key(&name);
        let member = world
            .user(uid)
            .map(|u| u.channels.contains(&key))
            .unwrap_or(false);
        if !member {
            world.send_numeric(
                uid,
                Numeric::ERR_NOTONCHANNEL
                    .build()
                    .param(&name)
                    .trailing("You're not on that channel"),
            );
            continue;
        }
        part_one(world, uid, &key, reason.clone());
        any_ok = true;
    }
    if any_ok {
        CmdResult::ok_broadcast()
    } else {
        CmdResult::failure()
    }
}

fn part_one(world: &mut World, uid: &str, chan_key: &str, reason: Option<String>) {
    let name = match world.channels.get(chan_key) {
        Some(c) => c.name.clone(),
        None => return,
    };
    let mask = world.user(uid).map(|u| u.hostmask()).unwrap_or_default();
    let mut msg = Message::cmd("PART").with_source(mask).param(&name);
    if let Some(reason) = reason {
        msg = msg.trailing_param(reason);
    }
    routing::broadcast_channel(world, chan_key, &msg, &[], 0);
    world.remove_member(uid, chan_key);
}

pub fn handle_kick(world: &mut World, uid: &str, msg: &Message) -> CmdResult {
    let name = msg.params[0].clone();
    let target_nick = msg.params[1].clone();
    let chan_key = world.key(&name);

    let Some(channel) = world.channels.get(&chan_key) else {
        world.send_numeric(
            uid,
            Numeric::ERR_NOSUCHCHANNEL
                .build()
                .param(&name)
                .trailing("No such channel"),
        );
        return CmdResult::failure();
    };

    let Some(source_member) = channel.member(uid) else {
        world.send_numeric(
            uid,
            Numeric::ERR_NOTONCHANNEL
                .build()
                .param(&name)
                .trailing("You're not on that channel"),
        );
        return CmdResult::failure();
    };
    let source_rank = world.modes.max_rank(source_member);

    let Some(target_uid) = world.find_uid_by_nick(&target_nick) else {
        world.send_numeric(
            uid,
            Numeric::ERR_NOSUCHNICK
                .build()
                .param(&target_nick)
                .trailing("No such nick/channel"),
        );
        return CmdResult::failure();
    };
    let Some(target_member) = world.channels.get(&chan_key).and_then(|c| c.member(&target_uid))
    else {
        world.send_numeric(
            uid,
            Numeric::ERR_USERNOTINCHANNEL
                .build()
                .param(&target_nick)
                .param(&name)
                .trailing("They aren't on that channel"),
        );
        return CmdResult::failure();
    };
    let target_rank = world.modes.max_rank(target_member);

    let is_oper = world.user(uid).map(|u| u.modes.oper).unwrap_or(false);
    let kick_equal = world.config.server.kick_equal_rank;
    let allowed = is_oper
        || (source_rank >= RANK_HALFOP
            && (target_rank < source_rank || (kick_equal && target_rank == source_rank)));
    if !allowed {
        world.send_numeric(
            uid,
            Numeric::ERR_CHANOPRIVSNEEDED
                .build()
                .param(&name)
                .trailing("You're not channel operator"),
        );
        return CmdResult::failure();
    }

    let kicker_nick = world
        .user(uid)
        .map(|u| u.reply_nick().to_string())
        .unwrap_or_default();
    let reason: String = msg
        .params
        .get(2)
        .cloned()
        .unwrap_or_else(|| kicker_nick.clone())
        .chars()
        .take(world.config.limits.kick_len)
        .collect();
    let mask = world.user(uid).map(|u| u.hostmask()).unwrap_or_default();
    let target_display = world
        .user(&target_uid)
        .map(|u| u.reply_nick().to_string())
        .unwrap_or(target_nick);

    let kick = Message::cmd("KICK")
        .with_source(mask)
        .param(&name)
        .param(target_display)
        .trailing_param(reason);
    routing::broadcast_channel(world, &chan_key, &kick, &[], 0);
    world.remove_member(&target_uid, &chan_key);
    CmdResult::ok_broadcast()
}

pub fn handle_topic(world: &mut World, uid: &str, msg: &Message) -> CmdResult {
    let name = msg.params[0].clone();
    let chan_key = world.key(&name);

    if !world.channels.contains_key(&chan_key) {
        world.send_numeric(
            uid,
            Numeric::ERR_NOSUCHCHANNEL
                .build()
                .param(&name)
                .trailing("No such channel"),
        );
        return CmdResult::failure();
    }

    // Query form.
    if msg.params.len() == 1 {
        send_topic_numerics(world, uid, &name, &chan_key, true);
        return CmdResult::ok();
    }

    let member_rank = world
        .channels
        .get(&chan_key)
        .and_then(|c| c.member(uid))
        .map(|m| world.modes.max_rank(m));
    let Some(rank) = member_rank else {
        world.send_numeric(
            uid,
            Numeric::ERR_NOTONCHANNEL
                .build()
                .param(&name)
                .trailing("You're not on that channel"),
        );
        return CmdResult::failure();
    };

    let locked = world
        .channels
        .get(&chan_key)
        .map(|c| c.has_mode('t'))
        .unwrap_or(false);
    let is_oper = world.user(uid).map(|u| u.modes.oper).unwrap_or(false);
    if locked && rank < RANK_OP && !is_oper {
        world.send_numeric(
            uid,
            Numeric::ERR_CHANOPRIVSNEEDED
                .build()
                .param(&name)
                .trailing("You're not channel operator"),
        );
        return CmdResult::failure();
    }

    let text: String = msg.params[1]
        .chars()
        .take(world.config.limits.topic_len)
        .collect();
    let mask = world.user(uid).map(|u| u.hostmask()).unwrap_or_default();
    if let Some(channel) = world.channels.get_mut(&chan_key) {
        channel.topic = Some(crate::state::channel::Topic {
            text: text.clone(),
            set_by: mask.clone(),
            set_at: World::now(),
        });
    }
    let topic = Message::cmd("TOPIC")
        .with_source(mask)
        .param(&name)
        .trailing_param(text);
    routing::broadcast_channel(world, &chan_key, &topic, &[], 0);
    CmdResult::ok_broadcast()
}

pub fn handle_names(world: &mut World, uid: &str, msg: &Message) -> CmdResult {
    match msg.params.first() {
        Some(name) => {
            let chan_key = world.key(name);
            send_names(world, uid, name, &chan_key);
        }
        None => {
            world.send_numeric(
                uid,
                Numeric::RPL_ENDOFNAMES
                    .build()
                    .param("*")
                    .trailing("End of /NAMES list."),
            );
        }
    }
    CmdResult::ok()
}

pub fn handle_invite(world: &mut World, uid: &str, msg: &Message) -> CmdResult {
    let target_nick = msg.params[0].clone();
    let name = msg.params[1].clone();
    let chan_key = world.key(&name);

    let Some(target_uid) = world.find_uid_by_nick(&target_nick) else {
        world.send_numeric(
            uid,
            Numeric::ERR_NOSUCHNICK
                .build()
                .param(&target_nick)
                .trailing("No such nick/channel"),
        );
        return CmdResult::failure();
    };

    let Some(channel) = world.channels.get(&chan_key) else {
        world.send_numeric(
            uid,
            Numeric::ERR_NOSUCHCHANNEL
                .build()
                .param(&name)
                .trailing("No such channel"),
        );
        return CmdResult::failure();
    };

    let Some(membership) = channel.member(uid) else {
        world.send_numeric(
            uid,
            Numeric::ERR_NOTONCHANNEL
                .build()
                .param(&name)
                .trailing("You're not on that channel"),
        );
        return CmdResult::failure();
    };

    if channel.member(&target_uid).is_some() {
        world.send_numeric(
            uid,
            Numeric::ERR_USERONCHANNEL
                .build()
                .param(&target_nick)
                .param(&name)
                .trailing("is already on channel"),
        );
        return CmdResult::failure();
    }

    // On invite-only channels, inviting takes halfop.
    if channel.has_mode('i') && world.modes.max_rank(membership) < RANK_HALFOP {
        world.send_numeric(
            uid,
            Numeric::ERR_CHANOPRIVSNEEDED
                .build()
                .param(&name)
                .trailing("You're not channel operator"),
        );
        return CmdResult::failure();
    }

    let invite_slot = world.core_slots.invite_list;
    if let Some(channel) = world.channels.get_mut(&chan_key) {
        channel
            .ext
            .get_or_insert_with(invite_slot, Default::default)
            .insert(target_uid.clone());
    }

    world.send_numeric(
        uid,
        Numeric::RPL_INVITING.build().param(&target_nick).param(&name),
    );
    let mask = world.user(uid).map(|u| u.hostmask()).unwrap_or_default();
    let target_display = world
        .user(&target_uid)
        .map(|u| u.reply_nick().to_string())
        .unwrap_or(target_nick);
    let invite = Message::cmd("INVITE")
        .with_source(mask)
        .param(target_display)
        .param(&name);
    routing::deliver(world, &target_uid, &invite);
    CmdResult::ok_target(name)
}

pub fn handle_list(world: &mut World, uid: &str, _msg: &Message) -> CmdResult {
    world.send_numeric(
        uid,
        Numeric::RPL_LISTSTART
            .build()
            .param("Channel")
            .trailing("Users  Name"),
    );
    let visible: Vec<(String, usize, String)> = world
        .channels
        .values()
        .filter(|c| {
            let hidden = c.has_mode('s') || c.has_mode('p');
            !hidden || c.members.contains_key(uid)
        })
        .map(|c| {
            (
                c.name.clone(),
                c.members.len(),
                c.topic.as_ref().map(|t| t.text.clone()).unwrap_or_default(),
            )
        })
        .collect();
    for (name, count, topic) in visible {
        world.send_numeric(
            uid,
            Numeric::RPL_LIST
                .build()
                .param(name)
                .param(count.to_string())
                .trailing(topic),
        );
    }
    world.send_numeric(uid, Numeric::RPL_LISTEND.build().trailing("End of /LIST"));
    CmdResult::ok()
}
