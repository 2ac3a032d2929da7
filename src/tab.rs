use log::{debug, warn};
use rand::Rng;

use crate::storage::SharedStorage;

const TAB_ID_LEN: usize = 11;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

pub fn generate_tab_id() -> String {
    let mut rng = rand::thread_rng();
    (0..TAB_ID_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect()
}

/// Returns this tab's identifier, creating it on first use.
///
/// `slot` is tab-scoped storage, never the storage shared between tabs.
/// A slot that can't be read or written still yields a usable id; it just
/// won't survive a reload.
pub async fn resolve_tab_id(slot: &dyn SharedStorage, key: &str) -> String {
    match slot.get(key).await {
        Ok(Some(existing)) if !existing.is_empty() => return existing,
        Ok(_) => {}
        Err(err) => warn!("Failed to read tab id from '{key}': {err:#}"),
    }

    let tab_id = generate_tab_id();
    if let Err(err) = slot.set(key, &tab_id).await {
        warn!("Failed to store tab id under '{key}': {err:#}");
    }
    debug!("Assigned tab id {tab_id}");
    tab_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn generated_ids_are_base36() {
        let id = generate_tab_id();
        assert_eq!(id.len(), TAB_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_ne!(generate_tab_id(), generate_tab_id());
    }

    #[tokio::test]
    async fn id_is_stable_within_a_slot() {
        let slot = MemoryStorage::new();
        let first = resolve_tab_id(&slot, "tabId").await;
        let second = resolve_tab_id(&slot, "tabId").await;
        assert_eq!(first, second);

        let other_tab = MemoryStorage::new();
        assert_ne!(resolve_tab_id(&other_tab, "tabId").await, first);
    }
}
