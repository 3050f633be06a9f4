//! Process-wide singleton registry (`spec.md` §9 "Singleton sync per name").
//!
//! `pgsync` enforced "one live `Sync` per name" with a metaclass singleton;
//! here creation is an explicit operation against a shared registry instead
//! of a side effect of construction.

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

use crate::error::{Error, Result};

fn registry() -> &'static Mutex<HashSet<String>> {
    static REGISTRY: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashSet::new()))
}

/// RAII handle: the name is released from the registry when this is dropped,
/// so a crashed or shut-down sync doesn't permanently block its name.
pub struct RegistryHandle {
    name: String,
}

impl Drop for RegistryHandle {
    fn drop(&mut self) {
        registry().lock().unwrap().remove(&self.name);
    }
}

/// Claims `name` for the life of the returned handle. Fails if another live
/// sync already holds it.
pub fn claim(name: &str) -> Result<RegistryHandle> {
    let mut guard = registry().lock().unwrap();
    if !guard.insert(name.to_string()) {
        return Err(Error::configuration(format!(
            "a sync named '{name}' is already running in this process"
        )));
    }
    Ok(RegistryHandle {
        name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_of_same_name_fails_while_first_is_held() {
        let _first = claim("dup_test_name").unwrap();
        assert!(claim("dup_test_name").is_err());
    }

    #[test]
    fn claim_is_released_on_drop() {
        {
            let _handle = claim("releasable_test_name").unwrap();
        }
        assert!(claim("releasable_test_name").is_ok());
    }
}
