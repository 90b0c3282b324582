//! Operator X-line commands: KLINE, GLINE, ZLINE, QLINE, RLINE, CBAN.
//!
//! `/<CMD> <pattern> <duration> :<reason>` adds (duration `0` or a
//! `1d2h30m` form; 0 is permanent); `/<CMD> <pattern>` alone removes.

use crate::dispatch::{CmdResult, RouteDescriptor};
use crate::state::world::World;
use crate::xline::parse_duration;
use ember_proto::Message;

pub fn handle_kline(world: &mut World, uid: &str, msg: &Message) -> CmdResult {
    handle_xline(world, uid, msg, "K", RouteDescriptor::LocalOnly)
}

pub fn handle_gline(world: &mut World, uid: &str, msg: &Message) -> CmdResult {
    handle_xline(world, uid, msg, "G", RouteDescriptor::Broadcast)
}

pub fn handle_zline(world: &mut World, uid: &str, msg: &Message) -> CmdResult {
    handle_xline(world, uid, msg, "Z", RouteDescriptor::Broadcast)
}

pub fn handle_qline(world: &mut World, uid: &str, msg: &Message) -> CmdResult {
    handle_xline(world, uid, msg, "Q", RouteDescriptor::Broadcast)
}

pub fn handle_rline(world: &mut World, uid: &str, msg: &Message) -> CmdResult {
    handle_xline(world, uid, msg, "R", RouteDescriptor::LocalOnly)
}

pub fn handle_cban(world: &mut World, uid: &str, msg: &Message) -> CmdResult {
    handle_xline(world, uid, msg, "CBAN", RouteDescriptor::Broadcast)
}

fn notice(world: &mut World, uid: &str, text: &str) {
    let server = world.server_name().to_string();
    let nick = world
        .user(uid)
        .map(|u| u.reply_nick().to_string())
        .unwrap_or_default();
    let msg = Message::cmd("NOTICE")
        .with_source(server)
        .param(nick)
        .trailing_param(format!("*** {text}"));
    world.send_to(uid, &msg);
}

fn handle_xline(
    world: &mut World,
    uid: &str,
    msg: &Message,
    kind: &'static str,
    route: RouteDescriptor,
) -> CmdResult {
    let pattern = msg.params[0].clone();
    let setter = world.user(uid).map(|u| u.hostmask()).unwrap_or_default();

    // Removal form: just the pattern.
    if msg.params.len() < 2 {
        if world.xlines.remove(kind, &pattern, world.casemap) {
            world.server_notice(&format!("{setter} removed {kind}-line on {pattern}"));
            return CmdResult {
                status: crate::dispatch::CmdStatus::Success,
                route,
            };
        }
        notice(world, uid, &format!("{kind}-line on {pattern} not found"));
        return CmdResult::failure();
    }

    let Some(duration) = parse_duration(&msg.params[1]) else {
        notice(
            world,
            uid,
            &format!("Invalid duration '{}'", msg.params[1]),
        );
        return CmdResult::invalid();
    };
    let reason = msg
        .params
        .get(2)
        .cloned()
        .unwrap_or_else(|| "No reason given".to_string());

    let now = World::now();
    let added = world
        .xlines
        .add(kind, &pattern, duration, &reason, &setter, now, world.casemap);
    let line = match added {
        Ok(line) => line,
        Err(e) => {
            notice(world, uid, &e.to_string());
            return CmdResult::failure();
        }
    };

    let lifetime = if duration == 0 {
        "permanent".to_string()
    } else {
        format!("{duration}s")
    };
    world.server_notice(&format!(
        "{setter} added {lifetime} {kind}-line on {}: {reason}",
        line.pattern
    ));

    // Walk existing users when this type applies immediately.
    if world.xlines.applies_to_existing(kind) {
        let casemap = world.casemap;
        let matching: Vec<String> = world
            .users
            .values()
            .filter(|u| !u.quitting && u.registered)
            .filter(|u| {
                world
                    .xlines
                    .check_user(u, now, casemap)
                    .map(|hit| hit.kind == kind && hit.pattern == line.pattern)
                    .unwrap_or(false)
            })
            .map(|u| u.uid.clone())
            .collect();
        let count = matching.len();
        for victim in matching {
            world.quit_user(&victim, &format!("{kind}-lined: {reason}"));
        }
        if count > 0 {
            world.server_notice(&format!(
                "{kind}-line on {} matched {count} existing user(s)",
                line.pattern
            ));
        }
    }

    CmdResult {
        status: crate::dispatch::CmdStatus::Success,
        route,
    }
}
