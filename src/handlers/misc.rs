//! AWAY, MOTD, LUSERS and the XINFO extended-info query.

use crate::dispatch::CmdResult;
use crate::routing;
use crate::state::world::World;
use ember_proto::{Message, Numeric};

pub fn handle_away(world: &mut World, uid: &str, msg: &Message) -> CmdResult {
    let text = msg.params.first().filter(|t| !t.is_empty()).cloned();
    let away_len = world.config.limits.away_len;
    let (mask, going_away) = match world.user_mut(uid) {
        Some(user) => {
            let mask = user.hostmask();
            match &text {
                Some(t) => {
                    user.away = Some(t.chars().take(away_len).collect());
                    (mask, true)
                }
                None => {
                    user.away = None;
                    (mask, false)
                }
            }
        }
        None => return CmdResult::failure(),
    };

    if going_away {
        world.send_numeric(
            uid,
            Numeric::RPL_NOWAWAY
                .build()
                .trailing("You have been marked as being away"),
        );
    } else {
        world.send_numeric(
            uid,
            Numeric::RPL_UNAWAY
                .build()
                .trailing("You are no longer marked as being away"),
        );
    }

    // away-notify holders among the neighbors see the transition.
    let mut notify = Message::cmd("AWAY").with_source(mask);
    if let Some(t) = &text {
        notify = notify.trailing_param(t.clone());
    }
    let holders: Vec<String> = routing::neighbors(world, uid)
        .into_iter()
        .filter(|n| {
            world
                .user(n)
                .map(|u| u.has_cap("away-notify"))
                .unwrap_or(false)
        })
        .collect();
    for holder in holders {
        routing::deliver(world, &holder, &notify);
    }
    CmdResult::ok_broadcast()
}

pub fn handle_motd(world: &mut World, uid: &str, _msg: &Message) -> CmdResult {
    send_motd(world, uid);
    CmdResult::ok()
}

/// 375/372/376, or 422 when no MOTD is configured.
pub fn send_motd(world: &mut World, uid: &str) {
    let server = world.server_name().to_string();
    match world.motd.clone() {
        Some(lines) => {
            world.send_numeric(
                uid,
                Numeric::RPL_MOTDSTART
                    .build()
                    .trailing(format!("- {server} Message of the day -")),
            );
            for line in lines {
                world.send_numeric(uid, Numeric::RPL_MOTD.build().trailing(format!("- {line}")));
            }
            world.send_numeric(
                uid,
                Numeric::RPL_ENDOFMOTD
                    .build()
                    .trailing("End of /MOTD command."),
            );
        }
        None => {
            world.send_numeric(
                uid,
                Numeric::ERR_NOMOTD.build().trailing("MOTD File is missing"),
            );
        }
    }
}

pub fn handle_lusers(world: &mut World, uid: &str, _msg: &Message) -> CmdResult {
    let users = world.users.values().filter(|u| u.registered).count();
    let invisible = world
        .users
        .values()
        .filter(|u| u.registered && u.modes.invisible)
        .count();
    let opers = world
        .users
        .values()
        .filter(|u| u.registered && u.modes.oper)
        .count();
    let unknown = world.users.values().filter(|u| !u.registered).count();
    let channels = world.channels.len();

    world.send_numeric(
        uid,
        Numeric::RPL_LUSERCLIENT.build().trailing(format!(
            "There are {} users and {} invisible on 1 servers",
            users - invisible,
            invisible
        )),
    );
    if opers > 0 {
        world.send_numeric(
            uid,
            Numeric::RPL_LUSEROP
                .build()
                .param(opers.to_string())
                .trailing("operator(s) online"),
        );
    }
    if unknown > 0 {
        world.send_numeric(
            uid,
            Numeric::RPL_LUSERUNKNOWN
                .build()
                .param(unknown.to_string())
                .trailing("unknown connection(s)"),
        );
    }
    world.send_numeric(
        uid,
        Numeric::RPL_LUSERCHANNELS
            .build()
            .param(channels.to_string())
            .trailing("channels formed"),
    );
    world.send_numeric(
        uid,
        Numeric::RPL_LUSERME
            .build()
            .trailing(format!("I have {users} clients and 0 servers")),
    );
    CmdResult::ok()
}

/// XINFO: typed key/value details about a user or channel, including
/// whatever burst-serialized extension slots the target carries.
pub fn handle_xinfo(world: &mut World, uid: &str, msg: &Message) -> CmdResult {
    let target = msg.params[0].clone();

    // (key, type, value) triples, per target kind.
    let entries: Option<Vec<(String, String, String)>> = if target.starts_with('#') {
        world.channel(&target).map(|c| {
            let mut entries = vec![
                ("name", "channel", c.name.clone()),
                ("created", "long", c.ts.to_string()),
                ("users", "int", c.members.len().to_string()),
                (
                    "topic",
                    "string",
                    c.topic.as_ref().map(|t| t.text.clone()).unwrap_or_default(),
                ),
            ]
            .into_iter()
            .map(|(k, t, v)| (k.to_string(), t.to_string(), v))
            .collect::<Vec<_>>();
            // Most recent member activity, from the per-membership slot.
            if let Some(latest) = c
                .members
                .values()
                .filter_map(|m| m.ext.get(world.core_slots.last_spoke))
                .max()
            {
                entries.push(("active".to_string(), "long".to_string(), latest.to_string()));
            }
            entries.extend(synced_slot_entries(world, crate::ext::SlotTarget::Channel, &c.ext));
            entries
        })
    } else {
        world
            .find_uid_by_nick(&target)
            .and_then(|tuid| world.user(&tuid))
            .map(|u| {
                let mut entries = vec![
                    ("uid", "string", u.uid.clone()),
                    ("host", "string", u.shown_host.clone()),
                    ("ip", "ip", u.ip.to_string()),
                    ("signon", "long", u.connected_at.to_string()),
                    ("away", "bool", u.away.is_some().to_string()),
                ]
                .into_iter()
                .map(|(k, t, v)| (k.to_string(), t.to_string(), v))
                .collect::<Vec<_>>();
                entries.extend(synced_slot_entries(world, crate::ext::SlotTarget::User, &u.ext));
                entries
            })
    };

    let Some(entries) = entries else {
        world.send_numeric(
            uid,
            Numeric::ERR_NOSUCHXINFO
                .build()
                .param(&target)
                .trailing("No extended info for that target"),
        );
        return CmdResult::failure();
    };

    for (key, _, value) in &entries {
        world.send_numeric(
            uid,
            Numeric::RPL_XINFOENTRY
                .build()
                .param(&target)
                .param(key)
                .trailing(value.clone()),
        );
    }
    let types: Vec<String> = entries
        .iter()
        .map(|(key, ty, _)| format!("{key}:{ty}"))
        .collect();
    world.send_numeric(
        uid,
        Numeric::RPL_XINFOTYPE
            .build()
            .param(&target)
            .trailing(types.join(" ")),
    );
    world.send_numeric(
        uid,
        Numeric::RPL_XINFOEND
            .build()
            .param(&target)
            .trailing("End of extended info"),
    );
    CmdResult::ok()
}

/// Render every sync-flagged slot present on an extensible object.
fn synced_slot_entries(
    world: &World,
    target: crate::ext::SlotTarget,
    ext: &crate::ext::Extensions,
) -> Vec<(String, String, String)> {
    world
        .slots
        .synced(target)
        .into_iter()
        .filter_map(|meta| {
            let value = ext
                .raw(meta.id)
                .and_then(|any| world.slots.serialize_value(meta.id, any))?;
            Some((meta.name.clone(), "string".to_string(), value))
        })
        .collect()
}
