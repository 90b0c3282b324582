//! Operator authentication and configuration reload.

use std::sync::Arc;

use crate::dispatch::CmdResult;
use crate::routing;
use crate::state::world::World;
use ember_proto::{wildcard, Casemap, Message, Numeric, ReplyKind, StandardReply};

pub fn handle_oper(world: &mut World, uid: &str, msg: &Message) -> CmdResult {
    let name = msg.params[0].clone();
    let password = msg.params[1].clone();

    let mask = world.user(uid).map(|u| u.hostmask()).unwrap_or_default();
    let block = world
        .config
        .oper
        .iter()
        .find(|b| {
            b.name == name
                && b.hosts
                    .iter()
                    .any(|pat| wildcard::matches(pat, &mask, Casemap::Ascii))
        })
        .cloned();

    let Some(block) = block else {
        world.send_numeric(
            uid,
            Numeric::ERR_NOOPERHOST
                .build()
                .trailing("No O-lines for your host"),
        );
        world.server_notice(&format!("Failed OPER attempt as {name} from {mask}"));
        return CmdResult::failure();
    };

    // Hashing is an opaque provider concern; re-resolved on each use since
    // the provider may unload. With none registered the comparison is
    // plaintext.
    let ok = match world.services.resolve("hash/default") {
        Some(provider) => match provider.as_any().downcast_ref::<crate::ext::PasswordHasher>() {
            Some(hasher) => hasher.verify(&block.password, &password),
            None => block.password == password,
        },
        None => block.password == password,
    };
    if !ok {
        world.send_numeric(
            uid,
            Numeric::ERR_PASSWDMISMATCH
                .build()
                .trailing("Password incorrect"),
        );
        world.server_notice(&format!("Failed OPER attempt as {name} from {mask}"));
        return CmdResult::failure();
    }

    let oper_slot = world.core_slots.oper_account;
    let nick = match world.user_mut(uid) {
        Some(user) => {
            user.modes.oper = true;
            user.modes.snotices = true;
            user.ext.set(oper_slot, block.name.clone());
            user.reply_nick().to_string()
        }
        None => return CmdResult::failure(),
    };
    world.send_numeric(
        uid,
        Numeric::RPL_YOUREOPER
            .build()
            .trailing("You are now an IRC operator"),
    );
    let mode = Message::cmd("MODE").with_source(mask.clone()).param(nick).param("+os");
    routing::deliver(world, uid, &mode);
    world.server_notice(&format!("{mask} is now an IRC operator ({name})"));
    CmdResult::ok_broadcast()
}

/// Reload the configuration snapshot. A changed casemap triggers the index
/// rebuild and UID-renames ambiguous nicks.
pub fn handle_rehash(world: &mut World, uid: &str, _msg: &Message) -> CmdResult {
    let path = world.config_path.clone();
    let loaded = crate::config::Config::load(&path);
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            world.send_standard(
                uid,
                &StandardReply::new(ReplyKind::Fail, "REHASH", "CANNOT_REHASH", e.to_string()),
            );
            world.server_notice(&format!("Rehash failed: {e}"));
            return CmdResult::failure();
        }
    };
    if let Err(errors) = crate::config::validate(&config) {
        for err in &errors {
            tracing::error!(error = %err, "Rehash validation failed");
        }
        world.send_standard(
            uid,
            &StandardReply::new(
                ReplyKind::Fail,
                "REHASH",
                "CONFIG_INVALID",
                format!("Configuration has {} error(s); keeping the old one", errors.len()),
            ),
        );
        world.server_notice(&format!("Rehash failed: {} error(s)", errors.len()));
        return CmdResult::failure();
    }

    let mask = world.user(uid).map(|u| u.hostmask()).unwrap_or_default();
    world.server_notice(&format!("{mask} is rehashing the server configuration"));

    let new_casemap = config.casemap();
    world.motd = config.motd.load_lines();

    // STS follows the listener configuration; cap-notify holders hear about
    // policy changes.
    let new_sts = config
        .listen
        .iter()
        .find(|l| l.tls && l.sts_duration.is_some())
        .map(|l| (l.port, l.sts_duration.unwrap_or(0)));
    let old_sts = world.caps.get("sts").and_then(|d| d.value.clone());
    world.config = Arc::new(config);
    match new_sts {
        Some((port, duration)) => {
            world.caps.register_sts(port, duration);
            let changed = world.caps.get("sts").and_then(|d| d.value.clone()) != old_sts;
            if changed {
                super::cap::announce_cap_new(world, "sts");
            }
        }
        None => {
            if world.caps.unregister("sts") {
                super::cap::announce_cap_del(world, "sts");
            }
        }
    }

    // Casemap migration: rebuild indexes, announce forced renames.
    let renamed = world.swap_casemap(new_casemap);
    for (loser_uid, old_nick) in renamed {
        let mask = format!(
            "{}!{}@{}",
            old_nick,
            world.user(&loser_uid).map(|u| u.ident.clone()).unwrap_or_default(),
            world
                .user(&loser_uid)
                .map(|u| u.shown_host.clone())
                .unwrap_or_default()
        );
        let rename = Message::cmd("NICK").with_source(mask).param(&loser_uid);
        routing::broadcast_neighbors(world, &loser_uid, &rename, true);
        let notice = Message::cmd("NOTICE")
            .with_source(world.server_name().to_string())
            .param(&loser_uid)
            .trailing_param("Your nickname is no longer valid under the new case rules and was changed to your UID");
        world.send_to(&loser_uid, &notice);
    }

    CmdResult::ok()
}
