use crate::{Extension, PartyId};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

#[derive(Default)]
struct DirectoryState {
    extension_by_party: HashMap<PartyId, Extension>,
    party_by_extension: HashMap<Extension, PartyId>,
}

/// Bidirectional map between connected parties and their dialable
/// extensions. Entries exist only while a party is connected to the
/// realtime transport; a process restart loses the directory by design.
pub struct ExtensionDirectory {
    inner: Mutex<DirectoryState>,
}

impl ExtensionDirectory {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(DirectoryState::default()),
        }
    }

    /// Register `extension` for `party`. Any previous extension held by the
    /// party, and any previous holder of the extension, are evicted first so
    /// both indexes stay exact inverses. Empty extension is a no-op.
    pub fn register(&self, party: &str, extension: &str) {
        if extension.is_empty() {
            return;
        }
        let mut guard = self.inner.lock().unwrap();
        if let Some(old_ext) = guard.extension_by_party.remove(party) {
            guard.party_by_extension.remove(&old_ext);
        }
        if let Some(old_party) = guard.party_by_extension.remove(extension) {
            guard.extension_by_party.remove(&old_party);
        }
        guard
            .extension_by_party
            .insert(party.to_string(), extension.to_string());
        guard
            .party_by_extension
            .insert(extension.to_string(), party.to_string());
        debug!("registered extension {} for {}", extension, party);
    }

    /// Remove both directions for `party`. No-op if the party has no
    /// registered extension.
    pub fn unregister(&self, party: &str) {
        let mut guard = self.inner.lock().unwrap();
        if let Some(ext) = guard.extension_by_party.remove(party) {
            guard.party_by_extension.remove(&ext);
            debug!("unregistered extension {} for {}", ext, party);
        }
    }

    pub fn lookup_party_by_extension(&self, extension: &str) -> Option<PartyId> {
        self.inner
            .lock()
            .unwrap()
            .party_by_extension
            .get(extension)
            .cloned()
    }

    pub fn lookup_extension_by_party(&self, party: &str) -> Option<Extension> {
        self.inner
            .lock()
            .unwrap()
            .extension_by_party
            .get(party)
            .cloned()
    }

    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().extension_by_party.len()
    }
}

impl Default for ExtensionDirectory {
    fn default() -> Self {
        Self::new()
    }
}
