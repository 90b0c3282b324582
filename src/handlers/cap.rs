//! IRCv3 capability negotiation: CAP LS/LIST/REQ/END, and the NEW/DEL
//! pushes for cap-notify holders.

use crate::dispatch::CmdResult;
use crate::state::world::World;
use ember_proto::{Message, Numeric};

pub fn handle_cap(world: &mut World, uid: &str, msg: &Message) -> CmdResult {
    let sub = msg.params[0].to_ascii_uppercase();
    match sub.as_str() {
        "LS" => handle_ls(world, uid, msg.params.get(1).map(String::as_str)),
        "LIST" => handle_list(world, uid),
        "REQ" => handle_req(world, uid, msg.params.get(1).map(String::as_str).unwrap_or("")),
        "END" => handle_end(world, uid),
        _ => {
            world.send_numeric(
                uid,
                Numeric::ERR_INVALIDCAPCMD
                    .build()
                    .param(&sub)
                    .trailing("Invalid CAP subcommand"),
            );
            CmdResult::invalid()
        }
    }
}

fn cap_reply(world: &mut World, uid: &str, sub: &str, tokens: &str) {
    let server = world.server_name().to_string();
    let nick = world
        .user(uid)
        .map(|u| u.reply_nick().to_string())
        .unwrap_or_else(|| "*".to_string());
    let msg = Message::cmd("CAP")
        .with_source(server)
        .param(nick)
        .param(sub)
        .trailing_param(tokens);
    world.send_to(uid, &msg);
}

fn handle_ls(world: &mut World, uid: &str, version: Option<&str>) -> CmdResult {
    let version = version.and_then(|v| v.parse::<u16>().ok()).unwrap_or(301);
    let (secure, registered) = match world.user(uid) {
        Some(u) => (u.secure, u.registered),
        None => return CmdResult::failure(),
    };
    if let Some(user) = world.user_mut(uid) {
        user.cap_version = user.cap_version.max(version);
        if !registered {
            // Opening negotiation holds registration until CAP END.
            user.cap_negotiating = true;
            user.progress.cap_done = false;
        }
        // A 302 LS implies cap-notify.
        if version >= 302 {
            user.caps.insert("cap-notify".to_string());
        }
    }
    let version = world.user(uid).map(|u| u.cap_version).unwrap_or(301);
    let tokens = world.caps.ls_tokens(version, secure);
    cap_reply(world, uid, "LS", &tokens);
    CmdResult::ok()
}

fn handle_list(world: &mut World, uid: &str) -> CmdResult {
    let enabled = match world.user(uid) {
        Some(u) => {
            let mut caps: Vec<&String> = u.caps.iter().collect();
            caps.sort();
            caps.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(" ")
        }
        None => return CmdResult::failure(),
    };
    cap_reply(world, uid, "LIST", &enabled);
    CmdResult::ok()
}

/// REQ is atomic: every requested change must be acceptable or the whole
/// request is NAKed unchanged.
fn handle_req(world: &mut World, uid: &str, request: &str) -> CmdResult {
    let mut changes: Vec<(bool, String)> = Vec::new();
    let mut acceptable = true;
    for token in request.split_whitespace() {
        let (removing, name) = match token.strip_prefix('-') {
            Some(name) => (true, name),
            None => (false, token),
        };
        if !removing && !world.caps.requestable(name) {
            acceptable = false;
        }
        changes.push((removing, name.to_string()));
    }
    if changes.is_empty() {
        acceptable = false;
    }

    if let Some(user) = world.user_mut(uid) {
        if !user.registered {
            user.cap_negotiating = true;
            user.progress.cap_done = false;
        }
    }

    if !acceptable {
        cap_reply(world, uid, "NAK", request);
        return CmdResult::failure();
    }

    if let Some(user) = world.user_mut(uid) {
        for (removing, name) in &changes {
            if *removing {
                user.caps.remove(name);
            } else {
                user.caps.insert(name.clone());
            }
        }
    }
    cap_reply(world, uid, "ACK", request);
    CmdResult::ok()
}

fn handle_end(world: &mut World, uid: &str) -> CmdResult {
    let negotiating = world.user(uid).map(|u| u.cap_negotiating).unwrap_or(false);
    if negotiating {
        if let Some(user) = world.user_mut(uid) {
            user.cap_negotiating = false;
            user.progress.cap_done = true;
        }
        super::connection::try_complete(world, uid);
    }
    CmdResult::ok()
}

/// Push `CAP NEW` for a newly available (or value-changed) capability to
/// every cap-notify holder.
pub fn announce_cap_new(world: &mut World, name: &str) {
    let token = match world.caps.get(name) {
        Some(def) => match &def.value {
            Some(v) => format!("{}={}", def.name, v),
            None => def.name.clone(),
        },
        None => return,
    };
    push_to_notify_holders(world, "NEW", &token);
}

/// Push `CAP DEL` for a withdrawn capability; holders lose it immediately.
pub fn announce_cap_del(world: &mut World, name: &str) {
    push_to_notify_holders(world, "DEL", name);
    for user in world.users.values_mut() {
        user.caps.remove(name);
    }
}

fn push_to_notify_holders(world: &mut World, sub: &str, token: &str) {
    let holders: Vec<String> = world
        .users
        .values()
        .filter(|u| u.registered && u.has_cap("cap-notify"))
        .map(|u| u.uid.clone())
        .collect();
    let server = world.server_name().to_string();
    for uid in holders {
        let nick = world
            .user(&uid)
            .map(|u| u.reply_nick().to_string())
            .unwrap_or_default();
        let msg = Message::cmd("CAP")
            .with_source(server.clone())
            .param(nick)
            .param(sub)
            .trailing_param(token);
        world.send_to(&uid, &msg);
    }
}
