//! PRIVMSG and NOTICE routing.
//!
//! NOTICE differs from PRIVMSG only in that it never generates error
//! replies (RFC 1459 §4.4.2), so both run through one path with a flag.

use crate::dispatch::CmdResult;
use crate::hooks::{self, Decision, PreMessageEvent};
use crate::modes::{stack, RANK_VOICE};
use crate::routing;
use crate::state::world::World;
use ember_proto::{Message, Numeric, SepStream};

pub fn handle_privmsg(world: &mut World, uid: &str, msg: &Message) -> CmdResult {
    handle_message(world, uid, msg, false)
}

pub fn handle_notice(world: &mut World, uid: &str, msg: &Message) -> CmdResult {
    handle_message(world, uid, msg, true)
}

fn handle_message(world: &mut World, uid: &str, msg: &Message, notice: bool) -> CmdResult {
    let text = match msg.params.get(1) {
        Some(text) if !text.is_empty() => text.clone(),
        _ => {
            if !notice {
                world.send_numeric(
                    uid,
                    Numeric::ERR_NOTEXTTOSEND.build().trailing("No text to send"),
                );
            }
            return CmdResult::failure();
        }
    };

    let targets: Vec<String> = SepStream::new(&msg.params[0], ',', false)
        .map(str::to_string)
        .collect();
    let mut any_ok = false;
    let mut last_target = String::new();
    for target in targets {
        if send_one(world, uid, &target, &text, notice, &msg.tags) {
            any_ok = true;
            last_target = target;
        }
    }
    if any_ok {
        CmdResult::ok_target(last_target)
    } else {
        CmdResult::failure()
    }
}

fn send_one(
    world: &mut World,
    uid: &str,
    target: &str,
    text: &str,
    notice: bool,
    tags: &[ember_proto::Tag],
) -> bool {
    let event = PreMessageEvent {
        uid: uid.to_string(),
        target: target.to_string(),
        text: text.to_string(),
        notice,
    };
    if hooks::first_result(world, |h| &h.pre_message, &event) == Decision::Deny {
        return false;
    }

    let (min_rank, bare) = routing::split_status_target(world, target);
    if bare.starts_with('#') {
        send_to_channel(world, uid, target, bare, min_rank, text, notice, tags)
    } else {
        send_to_user(world, uid, bare, text, notice, tags)
    }
}

#[allow(clippy::too_many_arguments)]
fn send_to_channel(
    world: &mut World,
    uid: &str,
    full_target: &str,
    name: &str,
    min_rank: u32,
    text: &str,
    notice: bool,
    tags: &[ember_proto::Tag],
) -> bool {
    let chan_key = world.key(name);
    let Some(channel) = world.channels.get(&chan_key) else {
        if !notice {
            world.send_numeric(
                uid,
                Numeric::ERR_NOSUCHCHANNEL
                    .build()
                    .param(name)
                    .trailing("No such channel"),
            );
        }
        return false;
    };

    let membership = channel.member(uid);
    let rank = membership.map(|m| world.modes.max_rank(m)).unwrap_or(0);

    let refused = if channel.has_mode('n') && membership.is_none() {
        Some("No external messages")
    } else if channel.has_mode('m') && rank < RANK_VOICE {
        Some("You need voice (+v)")
    } else if rank == 0 && stack::banned_from(world, &chan_key, uid) {
        Some("You are banned")
    } else {
        None
    };
    if let Some(why) = refused {
        if !notice {
            world.send_numeric(
                uid,
                Numeric::ERR_CANNOTSENDTOCHAN
                    .build()
                    .param(name)
                    .trailing(format!("Cannot send to channel ({why})")),
            );
        }
        return false;
    }

    // Track the speaker's activity on their membership.
    let spoke_slot = world.core_slots.last_spoke;
    if let Some(membership) = world
        .channels
        .get_mut(&chan_key)
        .and_then(|c| c.member_mut(uid))
    {
        membership.ext.set(spoke_slot, World::now());
    }

    let mask = world.user(uid).map(|u| u.hostmask()).unwrap_or_default();
    let command = if notice { "NOTICE" } else { "PRIVMSG" };
    let mut out = Message::cmd(command)
        .with_source(mask)
        .param(full_target)
        .trailing_param(text);
    out.tags = tags.to_vec();

    // The sender is exempt from their own broadcast unless echo-message.
    let echo = world
        .user(uid)
        .map(|u| u.has_cap("echo-message"))
        .unwrap_or(false);
    let exempt: Vec<&str> = if echo { Vec::new() } else { vec![uid] };
    routing::broadcast_channel(world, &chan_key, &out, &exempt, min_rank);
    true
}

fn send_to_user(
    world: &mut World,
    uid: &str,
    nick: &str,
    text: &str,
    notice: bool,
    tags: &[ember_proto::Tag],
) -> bool {
    let Some(target_uid) = world.find_uid_by_nick(nick) else {
        if !notice {
            world.send_numeric(
                uid,
                Numeric::ERR_NOSUCHNICK
                    .build()
                    .param(nick)
                    .trailing("No such nick/channel"),
            );
        }
        return false;
    };

    let mask = world.user(uid).map(|u| u.hostmask()).unwrap_or_default();
    let display = world
        .user(&target_uid)
        .map(|u| u.reply_nick().to_string())
        .unwrap_or_else(|| nick.to_string());
    let command = if notice { "NOTICE" } else { "PRIVMSG" };
    let mut out = Message::cmd(command)
        .with_source(mask)
        .param(&display)
        .trailing_param(text);
    out.tags = tags.to_vec();
    routing::deliver(world, &target_uid, &out);

    // Surface awayness to the sender.
    if !notice {
        let away = world.user(&target_uid).and_then(|u| u.away.clone());
        if let Some(away) = away {
            world.send_numeric(uid, Numeric::RPL_AWAY.build().param(&display).trailing(away));
        }
    }

    if world
        .user(uid)
        .map(|u| u.has_cap("echo-message"))
        .unwrap_or(false)
    {
        let mut echo = Message::cmd(command)
            .with_source(world.user(uid).map(|u| u.hostmask()).unwrap_or_default())
            .param(display)
            .trailing_param(text);
        echo.tags = tags.to_vec();
        routing::deliver(world, uid, &echo);
    }
    true
}
