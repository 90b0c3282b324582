//! Event hook chains.
//!
//! Extensions observe and gate core behavior through ordered listener lists.
//! Gating chains use first-result semantics: the first listener that returns
//! something other than [`Decision::Passthru`] decides the outcome.
//! Notification chains visit every listener and cannot gate.
//!
//! Listeners declare a priority; `Before`/`After` constraints are resolved
//! against listener names after each registration.

use std::sync::Arc;

use crate::state::world::World;

/// Outcome of a gating listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
    Passthru,
}

/// Listener ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Priority {
    First,
    Before(&'static str),
    After(&'static str),
    Normal,
    Last,
}

type GateFn<E> = Arc<dyn Fn(&mut World, &E) -> Decision + Send + Sync>;
type NotifyFn<E> = Arc<dyn Fn(&mut World, &mut E) + Send + Sync>;

struct Entry<F> {
    name: &'static str,
    priority: Priority,
    f: F,
}

fn reorder<F>(entries: &mut Vec<Entry<F>>) {
    // Stable bucket sort: First, everything else, Last.
    let class = |p: Priority| match p {
        Priority::First => 0u8,
        Priority::Last => 2,
        _ => 1,
    };
    entries.sort_by_key(|e| class(e.priority));

    // Then satisfy Before/After constraints with bounded relocation passes.
    for _ in 0..entries.len() {
        let mut changed = false;
        for i in 0..entries.len() {
            let target = match entries[i].priority {
                Priority::Before(name) | Priority::After(name) => {
                    entries.iter().position(|e| e.name == name)
                }
                _ => None,
            };
            let Some(j) = target else { continue };
            match entries[i].priority {
                Priority::Before(_) if i > j => {
                    let e = entries.remove(i);
                    entries.insert(j, e);
                    changed = true;
                }
                Priority::After(_) if i < j => {
                    let e = entries.remove(i);
                    entries.insert(j, e);
                    changed = true;
                }
                _ => {}
            }
        }
        if !changed {
            break;
        }
    }
}

/// A first-result gating chain.
pub struct HookChain<E> {
    entries: Vec<Entry<GateFn<E>>>,
}

impl<E> Default for HookChain<E> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<E> HookChain<E> {
    pub fn attach(
        &mut self,
        name: &'static str,
        priority: Priority,
        f: impl Fn(&mut World, &E) -> Decision + Send + Sync + 'static,
    ) {
        self.entries.push(Entry {
            name,
            priority,
            f: Arc::new(f),
        });
        reorder(&mut self.entries);
    }

    pub fn detach(&mut self, name: &str) {
        self.entries.retain(|e| e.name != name);
    }

    /// Snapshot the callbacks so the caller can run them while mutating the
    /// world.
    pub fn snapshot(&self) -> Vec<GateFn<E>> {
        self.entries.iter().map(|e| e.f.clone()).collect()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.name).collect()
    }
}

/// A visit-all notification chain. Listeners may mutate the event.
pub struct NotifyChain<E> {
    entries: Vec<Entry<NotifyFn<E>>>,
}

impl<E> Default for NotifyChain<E> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<E> NotifyChain<E> {
    pub fn attach(
        &mut self,
        name: &'static str,
        priority: Priority,
        f: impl Fn(&mut World, &mut E) + Send + Sync + 'static,
    ) {
        self.entries.push(Entry {
            name,
            priority,
            f: Arc::new(f),
        });
        reorder(&mut self.entries);
    }

    pub fn detach(&mut self, name: &str) {
        self.entries.retain(|e| e.name != name);
    }

    pub fn snapshot(&self) -> Vec<NotifyFn<E>> {
        self.entries.iter().map(|e| e.f.clone()).collect()
    }
}

// === Event payloads ===

pub struct PreCommandEvent {
    pub uid: String,
    pub command: String,
    pub params: Vec<String>,
}

pub struct PreConnectEvent {
    pub uid: String,
}

pub struct PreJoinEvent {
    pub uid: String,
    pub channel: String,
    pub key: Option<String>,
    /// Whether this JOIN would create the channel.
    pub creating: bool,
}

pub struct PreMessageEvent {
    pub uid: String,
    pub target: String,
    pub text: String,
    pub notice: bool,
}

pub struct PreModeEvent {
    pub uid: String,
    pub target: String,
}

/// Consulted before the ban list verdict stands. `Allow` exempts the user,
/// `Deny` bans regardless of the list.
pub struct CheckBanEvent {
    pub uid: String,
    pub channel: String,
}

pub struct PostJoinEvent {
    pub uid: String,
    pub channel: String,
}

pub struct RegisteredEvent {
    pub uid: String,
}

pub struct QuitEvent {
    pub uid: String,
    pub reason: String,
}

/// Built per broadcast; listeners force-include or force-exclude recipients.
pub struct NeighborsEvent {
    pub source: String,
    /// uid → include? Overrides the computed neighbor set.
    pub overrides: std::collections::HashMap<String, bool>,
}

/// All the chains the core consults.
#[derive(Default)]
pub struct Hooks {
    pub pre_command: HookChain<PreCommandEvent>,
    pub pre_connect: HookChain<PreConnectEvent>,
    pub pre_join: HookChain<PreJoinEvent>,
    pub pre_message: HookChain<PreMessageEvent>,
    pub pre_mode: HookChain<PreModeEvent>,
    pub check_ban: HookChain<CheckBanEvent>,
    pub post_join: NotifyChain<PostJoinEvent>,
    pub post_register: NotifyChain<RegisteredEvent>,
    pub user_quit: NotifyChain<QuitEvent>,
    pub neighbor_exceptions: NotifyChain<NeighborsEvent>,
}

/// Run a gating chain to its first non-Passthru result.
///
/// A snapshot is taken first so listeners may mutate the world; listeners
/// attached mid-run are not consulted until the next event.
pub fn first_result<E>(
    world: &mut World,
    select: fn(&Hooks) -> &HookChain<E>,
    event: &E,
) -> Decision {
    let fns = select(&world.hooks).snapshot();
    for f in fns {
        match f(world, event) {
            Decision::Passthru => continue,
            decision => return decision,
        }
    }
    Decision::Passthru
}

/// Run a notification chain over every listener.
pub fn notify_all<E>(world: &mut World, select: fn(&Hooks) -> &NotifyChain<E>, event: &mut E) {
    let fns = select(&world.hooks).snapshot();
    for f in fns {
        f(world, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> HookChain<PreConnectEvent> {
        HookChain::default()
    }

    #[test]
    fn priority_ordering() {
        let mut c = chain();
        c.attach("middle", Priority::Normal, |_, _| Decision::Passthru);
        c.attach("first", Priority::First, |_, _| Decision::Passthru);
        c.attach("last", Priority::Last, |_, _| Decision::Passthru);
        c.attach("before-middle", Priority::Before("middle"), |_, _| {
            Decision::Passthru
        });
        c.attach("after-middle", Priority::After("middle"), |_, _| {
            Decision::Passthru
        });
        let names = c.names();
        let pos = |n: &str| names.iter().position(|&x| x == n).unwrap();
        assert_eq!(pos("first"), 0);
        assert!(pos("before-middle") < pos("middle"));
        assert!(pos("after-middle") > pos("middle"));
        assert_eq!(pos("last"), names.len() - 1);
    }

    #[test]
    fn detach_removes() {
        let mut c = chain();
        c.attach("a", Priority::Normal, |_, _| Decision::Passthru);
        c.attach("b", Priority::Normal, |_, _| Decision::Passthru);
        c.detach("a");
        assert_eq!(c.names(), vec!["b"]);
    }
}
