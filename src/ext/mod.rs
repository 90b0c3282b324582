//! Extension slots and service providers.
//!
//! Extensible objects (users, channels, memberships) carry a sparse map of
//! typed slots so optional features can attach state without widening the
//! core structs. Slots are identified by a strongly typed handle allocated
//! from the [`SlotRegistry`]; access is `O(log n)` on the per-object map.
//!
//! Service providers are named singletons ("hash/sha256", "regex/default")
//! held by the registry through weak references: the owner keeps the `Arc`,
//! and consumers must re-resolve on every use because the provider may have
//! unloaded in between.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

/// Renders a slot value for the server-to-server burst (and for XINFO).
pub type SlotSerializer = Arc<dyn Fn(&dyn Any) -> Option<String> + Send + Sync>;

/// What kind of object a slot attaches to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotTarget {
    User,
    Channel,
    Membership,
}

/// Metadata describing a registered slot.
#[derive(Clone, Debug)]
pub struct SlotMeta {
    pub id: u32,
    pub name: String,
    pub target: SlotTarget,
    /// Whether the value is serialized to peers on burst.
    pub sync: bool,
    /// Whether the value is cleared when the owner deregisters.
    pub reset_on_deregister: bool,
}

/// A typed handle to an extension slot.
pub struct Slot<T> {
    id: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Slot<T> {}

impl<T> Slot<T> {
    pub fn id(self) -> u32 {
        self.id
    }
}

/// Allocates slot ids and records their metadata.
#[derive(Default)]
pub struct SlotRegistry {
    next: u32,
    metas: Vec<SlotMeta>,
    serializers: HashMap<u32, SlotSerializer>,
}

impl SlotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new typed slot.
    pub fn register<T: Send + Sync + 'static>(
        &mut self,
        name: impl Into<String>,
        target: SlotTarget,
        sync: bool,
        reset_on_deregister: bool,
    ) -> Slot<T> {
        let id = self.next;
        self.next += 1;
        self.metas.push(SlotMeta {
            id,
            name: name.into(),
            target,
            sync,
            reset_on_deregister,
        });
        Slot {
            id,
            _marker: PhantomData,
        }
    }

    /// Register a slot that is serialized to peers on burst. The rendering
    /// function also feeds XINFO's extended-info output.
    pub fn register_synced<T: Send + Sync + 'static>(
        &mut self,
        name: impl Into<String>,
        target: SlotTarget,
        reset_on_deregister: bool,
        render: fn(&T) -> String,
    ) -> Slot<T> {
        let slot = self.register(name, target, true, reset_on_deregister);
        self.serializers.insert(
            slot.id,
            Arc::new(move |any: &dyn Any| any.downcast_ref::<T>().map(render)),
        );
        slot
    }

    pub fn meta(&self, id: u32) -> Option<&SlotMeta> {
        self.metas.iter().find(|m| m.id == id)
    }

    /// Slots flagged for burst serialization on one target kind.
    pub fn synced(&self, target: SlotTarget) -> Vec<&SlotMeta> {
        self.metas
            .iter()
            .filter(|m| m.sync && m.target == target)
            .collect()
    }

    /// Render a slot value through its registered serializer.
    pub fn serialize_value(&self, id: u32, value: &dyn Any) -> Option<String> {
        self.serializers.get(&id).and_then(|f| f(value))
    }

    /// Ids of slots flagged `reset_on_deregister`.
    pub fn reset_ids(&self) -> Vec<u32> {
        self.metas
            .iter()
            .filter(|m| m.reset_on_deregister)
            .map(|m| m.id)
            .collect()
    }

    /// Reset ids restricted to one target kind.
    pub fn reset_ids_for(&self, target: SlotTarget) -> Vec<u32> {
        self.metas
            .iter()
            .filter(|m| m.reset_on_deregister && m.target == target)
            .map(|m| m.id)
            .collect()
    }
}

/// The per-object slot map.
#[derive(Default)]
pub struct Extensions {
    map: BTreeMap<u32, Box<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for Extensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extensions").field("len", &self.map.len()).finish()
    }
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: 'static>(&self, slot: Slot<T>) -> Option<&T> {
        self.map.get(&slot.id).and_then(|v| v.downcast_ref())
    }

    pub fn get_mut<T: 'static>(&mut self, slot: Slot<T>) -> Option<&mut T> {
        self.map.get_mut(&slot.id).and_then(|v| v.downcast_mut())
    }

    pub fn set<T: Send + Sync + 'static>(&mut self, slot: Slot<T>, value: T) {
        self.map.insert(slot.id, Box::new(value));
    }

    /// Get the value, inserting `default()` first when the slot is unset.
    pub fn get_or_insert_with<T: Send + Sync + 'static>(
        &mut self,
        slot: Slot<T>,
        default: impl FnOnce() -> T,
    ) -> &mut T {
        let entry = self
            .map
            .entry(slot.id)
            .or_insert_with(|| Box::new(default()));
        // Only the registration that issued this handle decides the id's
        // type, so the downcast cannot fail.
        entry
            .downcast_mut()
            .expect("slot id reused with a different type")
    }

    pub fn remove<T: 'static>(&mut self, slot: Slot<T>) -> bool {
        self.map.remove(&slot.id).is_some()
    }

    /// Untyped access, for the burst serializers.
    pub fn raw(&self, id: u32) -> Option<&dyn Any> {
        self.map.get(&id).map(|v| {
            let value: &dyn Any = v.as_ref();
            value
        })
    }

    /// Clear the given slot ids (deregistration cleanup).
    pub fn reset(&mut self, ids: &[u32]) {
        for id in ids {
            self.map.remove(id);
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Handles to the slots the core itself attaches. Everything else about
/// these values lives behind the slot mechanism: the invite list is consumed
/// by the +i join gate, the oper account is burst-serialized and shows up in
/// XINFO, and per-membership activity feeds channel info.
#[derive(Clone, Copy)]
pub struct CoreSlots {
    /// Channel: UIDs holding a pending invite.
    pub invite_list: Slot<BTreeSet<String>>,
    /// User: name of the oper block the user authenticated against.
    pub oper_account: Slot<String>,
    /// Membership: when this member last spoke in the channel.
    pub last_spoke: Slot<i64>,
}

impl CoreSlots {
    pub fn register(registry: &mut SlotRegistry) -> Self {
        Self {
            // Invites do not survive a lost timestamp merge; flagging the
            // slot reset-on-deregister lets the merge clear it generically.
            invite_list: registry.register("invite-list", SlotTarget::Channel, false, true),
            oper_account: registry.register_synced(
                "oper-account",
                SlotTarget::User,
                true,
                |name: &String| name.clone(),
            ),
            last_spoke: registry.register("last-spoke", SlotTarget::Membership, false, false),
        }
    }
}

/// A named service provider.
///
/// `as_any` exists so consumers can downcast a resolved provider to its
/// concrete interface.
pub trait Provider: Send + Sync {
    fn provider_name(&self) -> &str;
    fn as_any(&self) -> &dyn Any;
}

/// A password-verification service, registered as `hash/<algorithm>`.
/// The daemon treats hashing as opaque: whoever owns the algorithm supplies
/// the closure.
pub struct PasswordHasher {
    name: String,
    verify: Box<dyn Fn(&str, &str) -> bool + Send + Sync>,
}

impl PasswordHasher {
    pub fn new(
        name: impl Into<String>,
        verify: impl Fn(&str, &str) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            verify: Box::new(verify),
        }
    }

    /// Does `supplied` match the `stored` credential?
    pub fn verify(&self, stored: &str, supplied: &str) -> bool {
        (self.verify)(stored, supplied)
    }
}

impl Provider for PasswordHasher {
    fn provider_name(&self) -> &str {
        &self.name
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Process-wide provider table holding weak references.
#[derive(Default)]
pub struct ServiceRegistry {
    map: HashMap<String, Weak<dyn Provider>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own name. The registry does not keep
    /// it alive.
    pub fn register(&mut self, provider: &Arc<dyn Provider>) {
        self.map
            .insert(provider.provider_name().to_string(), Arc::downgrade(provider));
    }

    /// Resolve a provider by name. Returns `None` when it was never
    /// registered or has since unloaded.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.map.get(name).and_then(Weak::upgrade)
    }

    /// Drop entries whose providers are gone.
    pub fn prune(&mut self) {
        self.map.retain(|_, weak| weak.strong_count() > 0);
    }
}
