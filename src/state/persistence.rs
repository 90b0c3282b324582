//! Permanent-channel database.
//!
//! Optional flat-text persistence for channels that survive emptiness
//! (+P). One line per channel, an `end` terminator, atomic
//! write-temp-rename like the X-line store:
//!
//! ```text
//! #lobby 1700000000 +Pnt :alice!a@host 1700000100 Welcome to the lobby
//! end
//! ```
//!
//! The head is `name ts modestring [params...]`; everything after ` :` is
//! `setter set-at topic-text`, present only when a topic is set. Lists and
//! memberships are runtime state and are not persisted.

use std::io::Write;
use std::path::Path;

use crate::error::StoreError;
use crate::modes::{ModeKind, ModeRegistry};
use crate::state::channel::Topic;
use crate::state::world::World;

/// A channel as read back from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChannel {
    pub name: String,
    pub ts: i64,
    pub modes: Vec<char>,
    pub mode_params: Vec<(char, String)>,
    pub topic: Option<Topic>,
}

/// Render every permanent channel into database text. Split from the file
/// write so the engine can snapshot cheaply and push the I/O to a worker.
pub fn render_channels(world: &World) -> String {
    let mut text = String::new();
    for channel in world.channels.values().filter(|c| c.is_permanent()) {
        let mut head = format!("{} {} +", channel.name, channel.ts);
        let mut params = Vec::new();
        for &m in &channel.modes {
            head.push(m);
        }
        for (&m, value) in &channel.mode_params {
            head.push(m);
            params.push(value.clone());
        }
        for p in params {
            head.push(' ');
            head.push_str(&p);
        }
        match &channel.topic {
            Some(topic) => text.push_str(&format!(
                "{} :{} {} {}\n",
                head, topic.set_by, topic.set_at, topic.text
            )),
            None => text.push_str(&format!("{head}\n")),
        }
    }
    text.push_str("end\n");
    text
}

/// Atomic text write: temp file in the same directory, then rename.
pub fn write_text(path: &Path, text: &str) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.display().to_string(),
        source,
    };
    let tmp = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(text.as_bytes()).map_err(io_err)?;
        file.sync_data().ok();
    }
    std::fs::rename(&tmp, path).map_err(io_err)
}

/// Write every permanent channel to `path`.
pub fn save_channels(path: &Path, world: &World) -> Result<(), StoreError> {
    write_text(path, &render_channels(world))
}

/// Replay a channel database. Missing file means no channels.
pub fn load_channels(path: &Path, modes: &ModeRegistry) -> Result<Vec<StoredChannel>, StoreError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };

    let format_err = |line: usize, reason: &str| StoreError::Format {
        path: path.display().to_string(),
        line,
        reason: reason.to_string(),
    };

    let mut out = Vec::new();
    let mut terminated = false;
    for (idx, raw) in text.lines().enumerate() {
        let lineno = idx + 1;
        let raw = raw.trim_end();
        if raw.is_empty() {
            continue;
        }
        if raw == "end" {
            terminated = true;
            break;
        }
        let (head, tail) = match raw.split_once(" :") {
            Some((head, tail)) => (head, Some(tail)),
            None => (raw, None),
        };
        let mut fields = head.split_whitespace();
        let name = fields
            .next()
            .ok_or_else(|| format_err(lineno, "missing channel name"))?
            .to_string();
        let ts: i64 = fields
            .next()
            .and_then(|f| f.parse().ok())
            .ok_or_else(|| format_err(lineno, "bad timestamp"))?;
        let letters = fields.next().unwrap_or("+");
        let params: Vec<&str> = fields.collect();

        let mut simple = Vec::new();
        let mut with_params = Vec::new();
        let mut param_iter = params.iter();
        for c in letters.chars().skip_while(|&c| c == '+') {
            match modes.channel_mode(c).map(|d| d.kind) {
                Some(ModeKind::Param { .. }) => {
                    let value = param_iter
                        .next()
                        .ok_or_else(|| format_err(lineno, "missing mode parameter"))?;
                    with_params.push((c, value.to_string()));
                }
                _ => simple.push(c),
            }
        }

        let topic = match tail {
            Some(tail) => {
                let mut parts = tail.splitn(3, ' ');
                let set_by = parts
                    .next()
                    .ok_or_else(|| format_err(lineno, "missing topic setter"))?
                    .to_string();
                let set_at: i64 = parts
                    .next()
                    .and_then(|f| f.parse().ok())
                    .ok_or_else(|| format_err(lineno, "bad topic time"))?;
                let text = parts.next().unwrap_or("").to_string();
                Some(Topic {
                    text,
                    set_by,
                    set_at,
                })
            }
            None => None,
        };

        out.push(StoredChannel {
            name,
            ts,
            modes: simple,
            mode_params: with_params,
            topic,
        });
    }
    if !terminated {
        return Err(format_err(text.lines().count(), "missing end terminator"));
    }
    Ok(out)
}

/// Recreate stored channels in the world at startup.
pub fn restore_channels(world: &mut World, stored: Vec<StoredChannel>) {
    for entry in stored {
        let key = world.key(&entry.name);
        if world.channels.contains_key(&key) {
            continue;
        }
        let mut channel = crate::state::channel::Channel::new(&entry.name, entry.ts);
        for m in entry.modes {
            channel.modes.insert(m);
        }
        // Only permanent channels are stored; enforce the invariant anyway
        // so a hand-edited file cannot create an instantly-culled channel.
        channel.modes.insert('P');
        for (m, v) in entry.mode_params {
            channel.mode_params.insert(m, v);
        }
        channel.topic = entry.topic;
        world.channels.insert(key, channel);
    }
}
