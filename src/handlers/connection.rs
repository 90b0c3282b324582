//! Registration and liveness: NICK, USER, PASS, PING, PONG, QUIT, and the
//! welcome burst.

use crate::dispatch::CmdResult;
use crate::routing;
use crate::state::world::{RegOutcome, World};
use ember_proto::{Message, Numeric};

/// Nick grammar: `letter|special` first, then `letter|digit|special|-`,
/// bounded by the configured length.
pub fn is_valid_nick(nick: &str, max_len: usize) -> bool {
    if nick.is_empty() || nick.len() > max_len {
        return false;
    }
    let special = |c: char| "[]\\`_^{|}".contains(c);
    let mut chars = nick.chars();
    let first = chars.next().unwrap_or(' ');
    if !(first.is_ascii_alphabetic() || special(first)) {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || special(c) || c == '-')
}

pub fn handle_nick(world: &mut World, uid: &str, msg: &Message) -> CmdResult {
    let Some(nick) = msg.params.first().map(String::clone) else {
        world.send_numeric(
            uid,
            Numeric::ERR_NONICKNAMEGIVEN
                .build()
                .trailing("No nickname given"),
        );
        return CmdResult::failure();
    };

    let max_len = world.config.limits.nick_len;
    if !is_valid_nick(&nick, max_len) {
        world.send_numeric(
            uid,
            Numeric::ERR_ERRONEUSNICKNAME
                .build()
                .param(&nick)
                .trailing("Erroneous nickname"),
        );
        return CmdResult::invalid();
    }

    // Q-lines forbid nicks; opers are exempt.
    let is_oper = world.user(uid).map(|u| u.modes.oper).unwrap_or(false);
    if !is_oper {
        if let Some(line) = world.xlines.check_nick(&nick, World::now(), world.casemap) {
            world.send_numeric(
                uid,
                Numeric::ERR_ERRONEUSNICKNAME
                    .build()
                    .param(&nick)
                    .trailing(format!("Invalid nickname: {}", line.reason)),
            );
            return CmdResult::failure();
        }
    }

    if let Some(holder) = world.find_uid_by_nick(&nick) {
        if holder != uid {
            world.send_numeric(
                uid,
                Numeric::ERR_NICKNAMEINUSE
                    .build()
                    .param(&nick)
                    .trailing("Nickname is already in use"),
            );
            return CmdResult::failure();
        }
    }

    let was_registered = world.user(uid).map(|u| u.registered).unwrap_or(false);
    let old_mask = world.user(uid).map(|u| u.hostmask());

    if world.set_nick(uid, &nick).is_err() {
        return CmdResult::failure();
    }

    if was_registered {
        // Announce to self and every neighbor.
        let msg = Message::cmd("NICK")
            .with_source(old_mask.unwrap_or_default())
            .param(&nick);
        routing::broadcast_neighbors(world, uid, &msg, true);
        CmdResult::ok_broadcast()
    } else {
        if let Some(user) = world.user_mut(uid) {
            user.progress.nick_seen = true;
        }
        try_complete(world, uid);
        CmdResult::ok()
    }
}

pub fn handle_user(world: &mut World, uid: &str, msg: &Message) -> CmdResult {
    if world.user(uid).map(|u| u.registered).unwrap_or(false) {
        world.send_numeric(
            uid,
            Numeric::ERR_ALREADYREGISTERED
                .build()
                .trailing("You may not reregister"),
        );
        return CmdResult::failure();
    }

    let ident_len = world.config.limits.ident_len;
    let username: String = msg.params[0].chars().take(ident_len.saturating_sub(1)).collect();
    let realname = msg.params[3].clone();
    if let Some(user) = world.user_mut(uid) {
        // An ident-lookup result outranks what the client claims.
        if user.ident.is_empty() || user.ident.starts_with('~') {
            user.ident = format!("~{username}");
        }
        user.realname = realname;
        user.progress.user_seen = true;
    }
    try_complete(world, uid);
    CmdResult::ok()
}

pub fn handle_pass(world: &mut World, uid: &str, msg: &Message) -> CmdResult {
    if world.user(uid).map(|u| u.registered).unwrap_or(false) {
        world.send_numeric(
            uid,
            Numeric::ERR_ALREADYREGISTERED
                .build()
                .trailing("You may not reregister"),
        );
        return CmdResult::failure();
    }
    if let Some(user) = world.user_mut(uid) {
        user.password = Some(msg.params[0].clone());
    }
    CmdResult::ok()
}

pub fn handle_ping(world: &mut World, uid: &str, msg: &Message) -> CmdResult {
    let token = msg.params[0].clone();
    let server = world.server_name().to_string();
    let reply = Message::cmd("PONG")
        .with_source(server.clone())
        .param(server)
        .trailing_param(token);
    world.send_to(uid, &reply);
    CmdResult::ok()
}

pub fn handle_pong(world: &mut World, uid: &str, _msg: &Message) -> CmdResult {
    if let Some(user) = world.user_mut(uid) {
        user.ping_sent_at = None;
        user.last_activity = World::now();
    }
    CmdResult::ok()
}

pub fn handle_quit(world: &mut World, uid: &str, msg: &Message) -> CmdResult {
    let reason = match msg.params.first() {
        Some(text) if !text.is_empty() => format!("Quit: {text}"),
        _ => "Client exited".to_string(),
    };
    world.quit_user(uid, &reason);
    CmdResult::ok_broadcast()
}

/// Attempt to finish registration and, on success, emit the welcome burst.
pub fn try_complete(world: &mut World, uid: &str) {
    match world.try_register(uid) {
        RegOutcome::Registered => send_welcome_burst(world, uid),
        RegOutcome::NotReady | RegOutcome::Denied => {}
    }
}

/// Numerics 001–005 and 042, the LUSERS summary, and the MOTD.
fn send_welcome_burst(world: &mut World, uid: &str) {
    let Some(user) = world.user(uid) else { return };
    let nick = user.reply_nick().to_string();
    let mask = user.hostmask();
    let network = world.config.server.network.clone();
    let server = world.config.server.name.clone();

    world.send_numeric(
        uid,
        Numeric::RPL_WELCOME
            .build()
            .trailing(format!("Welcome to the {network} IRC Network {mask}")),
    );
    world.send_numeric(
        uid,
        Numeric::RPL_YOURHOST.build().trailing(format!(
            "Your host is {server}, running version emberd-{}",
            env!("CARGO_PKG_VERSION")
        )),
    );
    let created = chrono::DateTime::from_timestamp(world.started_at, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_default();
    world.send_numeric(
        uid,
        Numeric::RPL_CREATED
            .build()
            .trailing(format!("This server was created {created}")),
    );
    world.send_numeric(
        uid,
        Numeric::RPL_MYINFO
            .build()
            .param(&server)
            .param(format!("emberd-{}", env!("CARGO_PKG_VERSION")))
            .param("iows")
            .param("beIiklmnpqstvhaoPrS"),
    );

    for chunk in isupport_tokens(world).chunks(13) {
        let mut builder = Numeric::RPL_ISUPPORT.build();
        for token in chunk {
            builder = builder.param(token);
        }
        world.send_numeric(uid, builder.trailing("are supported by this server"));
    }

    world.send_numeric(
        uid,
        Numeric::RPL_YOURUUID
            .build()
            .param(uid)
            .trailing("your unique ID"),
    );

    send_lusers(world, uid);
    super::misc::send_motd(world, uid);
    tracing::info!(uid = %uid, nick = %nick, "User registered");
}

/// The ISUPPORT token list advertised in 005.
pub fn isupport_tokens(world: &World) -> Vec<String> {
    let limits = &world.config.limits;
    vec![
        format!("AWAYLEN={}", limits.away_len),
        format!("CASEMAPPING={}", world.casemap.name()),
        format!("CHANMODES={}", world.modes.isupport_chanmodes()),
        "CHANTYPES=#".to_string(),
        "CHANNELLEN=64".to_string(),
        format!("HOSTLEN={}", limits.host_len),
        format!("KICKLEN={}", limits.kick_len),
        format!("MAXLIST=beI:{}", limits.max_list_entries),
        format!("MODES={}", limits.max_modes_per_line),
        format!("NETWORK={}", world.config.server.network),
        format!("NICKLEN={}", limits.nick_len),
        format!("PREFIX={}", world.modes.isupport_prefix()),
        format!("TOPICLEN={}", limits.topic_len),
    ]
}

fn send_lusers(world: &mut World, uid: &str) {
    let users = world.users.values().filter(|u| u.registered).count();
    let invisible = world
        .users
        .values()
        .filter(|u| u.registered && u.modes.invisible)
        .count();
    let channels = world.channels.len();
    world.send_numeric(
        uid,
        Numeric::RPL_LUSERCLIENT.build().trailing(format!(
            "There are {} users and {} invisible on 1 servers",
            users - invisible,
            invisible
        )),
    );
    if channels > 0 {
        world.send_numeric(
            uid,
            Numeric::RPL_LUSERCHANNELS
                .build()
                .param(channels.to_string())
                .trailing("channels formed"),
        );
    }
    world.send_numeric(
        uid,
        Numeric::RPL_LUSERME
            .build()
            .trailing(format!("I have {users} clients and 0 servers")),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nick_grammar() {
        assert!(is_valid_nick("alice", 30));
        assert!(is_valid_nick("[away]`_", 30));
        assert!(is_valid_nick("a-b-c", 30));
        assert!(!is_valid_nick("", 30));
        assert!(!is_valid_nick("1starts-with-digit", 30));
        assert!(!is_valid_nick("-dash", 30));
        assert!(!is_valid_nick("has space", 30));
        assert!(!is_valid_nick("toolong", 5));
        assert!(!is_valid_nick("#chan", 30));
    }
}
