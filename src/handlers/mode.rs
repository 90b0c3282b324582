//! The MODE command: channel queries, list queries, change batches, and
//! user modes.

use crate::dispatch::CmdResult;
use crate::modes::stack::{self, parse_channel_changes};
use crate::routing;
use crate::state::world::World;
use ember_proto::{Message, Numeric};

pub fn handle_mode(world: &mut World, uid: &str, msg: &Message) -> CmdResult {
    let target = msg.params[0].clone();
    if target.starts_with('#') {
        channel_mode(world, uid, &target, &msg.params[1..])
    } else {
        user_mode(world, uid, &target, &msg.params[1..])
    }
}

fn channel_mode(world: &mut World, uid: &str, name: &str, rest: &[String]) -> CmdResult {
    let chan_key = world.key(name);
    if !world.channels.contains_key(&chan_key) {
        world.send_numeric(
            uid,
            Numeric::ERR_NOSUCHCHANNEL
                .build()
                .param(name)
                .trailing("No such channel"),
        );
        return CmdResult::failure();
    }

    // Bare query: 324 + 329.
    let Some(modestr) = rest.first() else {
        let (mode_string, ts) = {
            let channel = &world.channels[&chan_key];
            let member = channel.members.contains_key(uid);
            let secret = world.modes.secret_param_letters();
            (channel.mode_string(member, &secret), channel.ts)
        };
        let mut builder = Numeric::RPL_CHANNELMODEIS.build().param(name);
        for part in mode_string.split_whitespace() {
            builder = builder.param(part);
        }
        world.send_numeric(uid, builder);
        world.send_numeric(
            uid,
            Numeric::RPL_CREATIONTIME
                .build()
                .param(name)
                .param(ts.to_string()),
        );
        return CmdResult::ok();
    };

    let parsed = parse_channel_changes(world, modestr, &rest[1..]);

    for letter in parsed.unknown {
        world.send_numeric(
            uid,
            Numeric::ERR_UNKNOWNMODE
                .build()
                .param(letter.to_string())
                .trailing(format!("is unknown mode char to me for {name}")),
        );
    }

    for def in parsed.list_queries {
        send_list(world, uid, name, &chan_key, def.letter);
    }

    if parsed.changes.is_empty() {
        return CmdResult::ok();
    }

    let batch = stack::apply_channel_batch(world, Some(uid), &chan_key, parsed.changes, true);
    if batch.is_empty() {
        CmdResult::failure()
    } else {
        CmdResult::ok_broadcast()
    }
}

/// List-mode query replies: 367/368 for +b, 348/349 for +e, 346/347 for +I.
fn send_list(world: &mut World, uid: &str, name: &str, chan_key: &str, letter: char) {
    let entries: Vec<(String, String, i64)> = world
        .channels
        .get(chan_key)
        .map(|c| {
            c.list(letter)
                .iter()
                .map(|e| (e.mask.clone(), e.setter.clone(), e.set_at))
                .collect()
        })
        .unwrap_or_default();
    let (entry_num, end_num, end_text) = match letter {
        'e' => (
            Numeric::RPL_EXCEPTLIST,
            Numeric::RPL_ENDOFEXCEPTLIST,
            "End of channel exception list",
        ),
        'I' => (
            Numeric::RPL_INVITELIST,
            Numeric::RPL_ENDOFINVITELIST,
            "End of channel invite exception list",
        ),
        _ => (
            Numeric::RPL_BANLIST,
            Numeric::RPL_ENDOFBANLIST,
            "End of channel ban list",
        ),
    };
    for (mask, setter, set_at) in entries {
        world.send_numeric(
            uid,
            entry_num
                .build()
                .param(name)
                .param(mask)
                .param(setter)
                .param(set_at.to_string()),
        );
    }
    world.send_numeric(uid, end_num.build().param(name).trailing(end_text));
}

fn user_mode(world: &mut World, uid: &str, target: &str, rest: &[String]) -> CmdResult {
    // Users may only inspect or change their own modes.
    let own_nick = world
        .user(uid)
        .map(|u| u.reply_nick().to_string())
        .unwrap_or_default();
    if !world.casemap.eq(target, &own_nick) {
        world.send_numeric(
            uid,
            Numeric::ERR_USERSDONTMATCH
                .build()
                .trailing("Can't change mode for other users"),
        );
        return CmdResult::failure();
    }

    let Some(modestr) = rest.first() else {
        let modes = world
            .user(uid)
            .map(|u| u.modes.as_mode_string())
            .unwrap_or_default();
        world.send_numeric(uid, Numeric::RPL_UMODEIS.build().param(modes));
        return CmdResult::ok();
    };

    let mut applied = String::new();
    let mut adding = true;
    let mut applied_sign: Option<bool> = None;
    for c in modestr.chars() {
        match c {
            '+' => adding = true,
            '-' => adding = false,
            letter => {
                let Some(def) = world.modes.user_mode(letter) else {
                    world.send_numeric(
                        uid,
                        Numeric::ERR_UMODEUNKNOWNFLAG
                            .build()
                            .trailing("Unknown MODE flag"),
                    );
                    continue;
                };
                let is_oper = world.user(uid).map(|u| u.modes.oper).unwrap_or(false);
                // Oper status is conferred by OPER, never by MODE +o.
                if letter == 'o' && adding {
                    continue;
                }
                if def.oper_only && adding && !is_oper {
                    continue;
                }
                let Some(user) = world.user_mut(uid) else {
                    continue;
                };
                let flag = match letter {
                    'i' => &mut user.modes.invisible,
                    'w' => &mut user.modes.wallops,
                    'o' => &mut user.modes.oper,
                    's' => &mut user.modes.snotices,
                    _ => continue,
                };
                if *flag == adding {
                    continue;
                }
                *flag = adding;
                if applied_sign != Some(adding) {
                    applied.push(if adding { '+' } else { '-' });
                    applied_sign = Some(adding);
                }
                applied.push(letter);
            }
        }
    }

    if !applied.is_empty() {
        let mask = world.user(uid).map(|u| u.hostmask()).unwrap_or_default();
        let out = Message::cmd("MODE")
            .with_source(mask)
            .param(&own_nick)
            .param(applied);
        routing::deliver(world, uid, &out);
        return CmdResult::ok_broadcast();
    }
    CmdResult::ok()
}
