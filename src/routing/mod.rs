//! Recipient computation and message delivery.
//!
//! A user's neighbor set is the union of the other members of every channel
//! they share; it is computed per event, then filtered through the
//! neighbor-exception hooks. Users sharing several channels with the source
//! must still receive one copy, so every broadcast reserves a fresh serial
//! and marks each recipient as it is written; later traversals skip marked
//! users.
//!
//! Delivery is also where per-recipient capability shaping happens: the
//! `time` tag for `server-time` holders, client-only tags for
//! `message-tags` holders.

use std::collections::HashSet;

use crate::hooks::{self, NeighborsEvent};
use crate::state::world::World;
use ember_proto::Message;

/// RFC 3339 with milliseconds, the `server-time` tag format.
pub fn time_tag_now() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

/// Shape one message for one recipient according to their capabilities.
fn shape_for(world: &World, uid: &str, msg: &Message, time_tag: &str) -> Message {
    let Some(user) = world.user(uid) else {
        return msg.clone();
    };
    let mut out = msg.clone();
    if !user.has_cap("message-tags") {
        out.tags.retain(|t| !t.is_client_only());
    }
    if user.has_cap("server-time") && out.tag_value("time").is_none() {
        out.tags
            .insert(0, ember_proto::Tag::new("time", Some(time_tag.to_string())));
    }
    out
}

/// Deliver one message to one user with capability shaping.
pub fn deliver(world: &mut World, uid: &str, msg: &Message) {
    let shaped = shape_for(world, uid, msg, &time_tag_now());
    world.send_to(uid, &shaped);
}

/// The raw neighbor set of `uid`: everyone sharing at least one channel,
/// excluding `uid` itself and quitting users.
pub fn neighbors(world: &World, uid: &str) -> HashSet<String> {
    let mut out = HashSet::new();
    let Some(user) = world.user(uid) else {
        return out;
    };
    for key in &user.channels {
        if let Some(channel) = world.channels.get(key) {
            for member in channel.members.keys() {
                if member != uid {
                    out.insert(member.clone());
                }
            }
        }
    }
    out
}

/// Broadcast to the source's neighbor set exactly once per recipient,
/// after applying the exception hooks.
pub fn broadcast_neighbors(world: &mut World, source: &str, msg: &Message, include_self: bool) {
    let mut set = neighbors(world, source);

    let mut event = NeighborsEvent {
        source: source.to_string(),
        overrides: Default::default(),
    };
    hooks::notify_all(world, |h| &h.neighbor_exceptions, &mut event);
    for (uid, include) in event.overrides {
        if include {
            set.insert(uid);
        } else {
            set.remove(&uid);
        }
    }
    if include_self {
        set.insert(source.to_string());
    }

    let serial = world.reserve_serial();
    let time_tag = time_tag_now();
    for uid in set {
        let skip = match world.user_mut(&uid) {
            Some(user) => {
                if user.sent_serial == serial || user.quitting {
                    true
                } else {
                    user.sent_serial = serial;
                    false
                }
            }
            None => true,
        };
        if skip {
            continue;
        }
        let shaped = shape_for(world, &uid, msg, &time_tag);
        world.send_to(&uid, &shaped);
    }
}

/// Broadcast to a channel's members. `min_rank` filters by prefix rank
/// (status-prefixed targets); `exempt` users are skipped.
pub fn broadcast_channel(
    world: &mut World,
    chan_key: &str,
    msg: &Message,
    exempt: &[&str],
    min_rank: u32,
) {
    let Some(channel) = world.channels.get(chan_key) else {
        return;
    };
    let recipients: Vec<String> = channel
        .members
        .values()
        .filter(|m| !exempt.contains(&m.uid.as_str()))
        .filter(|m| min_rank == 0 || world.modes.max_rank(m) >= min_rank)
        .map(|m| m.uid.clone())
        .collect();

    let serial = world.reserve_serial();
    let time_tag = time_tag_now();
    for uid in recipients {
        let skip = match world.user_mut(&uid) {
            Some(user) => {
                if user.sent_serial == serial || user.quitting {
                    true
                } else {
                    user.sent_serial = serial;
                    false
                }
            }
            None => true,
        };
        if skip {
            continue;
        }
        let shaped = shape_for(world, &uid, msg, &time_tag);
        world.send_to(&uid, &shaped);
    }
}

/// Split a possibly status-prefixed channel target (`@#chan`, `+#chan`).
/// Returns the minimum rank and the bare channel name.
pub fn split_status_target<'a>(world: &World, target: &'a str) -> (u32, &'a str) {
    if target.len() > 1 && !target.starts_with('#') {
        let prefix = target.chars().next().unwrap_or(' ');
        if let Some(def) = world.modes.prefix_to_mode(prefix) {
            return (def.rank().unwrap_or(0), &target[1..]);
        }
    }
    (0, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClassConfig, Config};
    use crate::state::world::Link;
    use std::sync::Arc;
    use tokio::sync::{mpsc, watch};

    fn world() -> World {
        let config = Config::parse(
            r#"
            [server]
            name = "irc.example.net"
            sid = "001"
            network = "EmberNet"
            description = "test"
            "#,
            "test",
        )
        .unwrap();
        World::new(Arc::new(config))
    }

    fn add_user(world: &mut World, nick: &str) -> (String, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(64);
        let (throttle, _) = watch::channel(false);
        let link = Link {
            tx,
            throttle,
            addr: "127.0.0.1:50000".parse().unwrap(),
            tls: false,
            password: None,
        };
        let uid = world.create_user(link, Arc::new(ClassConfig::default()));
        world.set_nick(&uid, nick).unwrap();
        world.users.get_mut(&uid).unwrap().registered = true;
        (uid, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(line) = rx.try_recv() {
            out.push(line);
        }
        out
    }

    #[test]
    fn dedup_across_shared_channels() {
        let mut w = world();
        let (alice, _arx) = add_user(&mut w, "alice");
        let (bob, mut brx) = add_user(&mut w, "bob");
        // Two shared channels.
        w.add_member(&alice, "#one", 100);
        w.add_member(&bob, "#one", 100);
        w.add_member(&alice, "#two", 100);
        w.add_member(&bob, "#two", 100);

        let msg = Message::cmd("PRIVMSG")
            .with_source("alice!a@h")
            .param("x")
            .trailing_param("hi");
        broadcast_neighbors(&mut w, &alice, &msg, false);

        assert_eq!(drain(&mut brx).len(), 1);
    }

    #[test]
    fn sender_not_included_by_default() {
        let mut w = world();
        let (alice, mut arx) = add_user(&mut w, "alice");
        let (bob, mut brx) = add_user(&mut w, "bob");
        w.add_member(&alice, "#one", 100);
        w.add_member(&bob, "#one", 100);

        let msg = Message::cmd("QUIT").with_source("alice!a@h").trailing_param("bye");
        broadcast_neighbors(&mut w, &alice, &msg, false);
        assert!(drain(&mut arx).is_empty());
        assert_eq!(drain(&mut brx).len(), 1);
    }

    #[test]
    fn exception_hook_excludes() {
        let mut w = world();
        let (alice, _arx) = add_user(&mut w, "alice");
        let (bob, mut brx) = add_user(&mut w, "bob");
        w.add_member(&alice, "#one", 100);
        w.add_member(&bob, "#one", 100);

        let bob_uid = bob.clone();
        w.hooks.neighbor_exceptions.attach(
            "hide-bob",
            crate::hooks::Priority::Normal,
            move |_, ev| {
                ev.overrides.insert(bob_uid.clone(), false);
            },
        );

        let msg = Message::cmd("NICK").with_source("alice!a@h").param("alicia");
        broadcast_neighbors(&mut w, &alice, &msg, false);
        assert!(drain(&mut brx).is_empty());
    }

    #[test]
    fn status_target_rank_filter() {
        let mut w = world();
        let (alice, _arx) = add_user(&mut w, "alice");
        let (bob, mut brx) = add_user(&mut w, "bob");
        let (carol, mut crx) = add_user(&mut w, "carol");
        w.add_member(&alice, "#one", 100);
        w.add_member(&bob, "#one", 100);
        w.add_member(&carol, "#one", 100);
        let key = w.key("#one");
        w.channels
            .get_mut(&key)
            .unwrap()
            .member_mut(&bob)
            .unwrap()
            .ranks
            .insert('o');

        let (min_rank, chan) = split_status_target(&w, "@#one");
        assert_eq!(chan, "#one");
        assert!(min_rank > 0);

        let msg = Message::cmd("PRIVMSG")
            .with_source("alice!a@h")
            .param("@#one")
            .trailing_param("ops only");
        broadcast_channel(&mut w, &key, &msg, &[&alice], min_rank);
        assert_eq!(drain(&mut brx).len(), 1);
        assert!(drain(&mut crx).is_empty());
    }

    #[test]
    fn server_time_tag_added_for_cap_holders() {
        let mut w = world();
        let (alice, _arx) = add_user(&mut w, "alice");
        let (bob, mut brx) = add_user(&mut w, "bob");
        w.add_member(&alice, "#one", 100);
        w.add_member(&bob, "#one", 100);
        w.users
            .get_mut(&bob)
            .unwrap()
            .caps
            .insert("server-time".to_string());

        let msg = Message::cmd("PRIVMSG")
            .with_source("alice!a@h")
            .param("#one")
            .trailing_param("hi");
        broadcast_neighbors(&mut w, &alice, &msg, false);
        let lines = drain(&mut brx);
        assert!(lines[0].starts_with("@time="), "got {}", lines[0]);
    }

    #[test]
    fn client_only_tags_stripped_without_message_tags() {
        let mut w = world();
        let (alice, _arx) = add_user(&mut w, "alice");
        let (bob, mut brx) = add_user(&mut w, "bob");
        w.add_member(&alice, "#one", 100);
        w.add_member(&bob, "#one", 100);

        let msg = Message::cmd("TAGMSG")
            .with_source("alice!a@h")
            .with_tag("+typing", Some("active".into()))
            .param("#one");
        broadcast_neighbors(&mut w, &alice, &msg, false);
        let lines = drain(&mut brx);
        assert!(!lines[0].contains("+typing"));
    }
}
