use std::collections::HashMap;

use senmux_utils::InterfaceId;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate interface name {0:?} (names are case-insensitive)")]
    DuplicateName(String),
    #[error("too many interfaces: {0} exceeds the maximum of {max}", max = senmux_utils::MAX_INTERFACES)]
    TooManyInterfaces(usize),
}

/// A built-once, read-only mapping between configured interface names and
/// the [`InterfaceId`] assigned to them. Interface names are matched
/// case-insensitively, matching the reference lookup behavior for `-o
/// name=...` and failover source specs.
pub struct Registry {
    by_name: HashMap<String, InterfaceId>,
    by_id: HashMap<u32, String>,
}

impl Registry {
    /// Assigns sequential ids (starting at 1; id 0 is reserved for
    /// internally generated senblks such as the heartbeat) to `names`, in
    /// order.
    pub fn build(names: &[String]) -> Result<Self, RegistryError> {
        if names.len() > senmux_utils::MAX_INTERFACES as usize {
            return Err(RegistryError::TooManyInterfaces(names.len()));
        }
        let mut by_name = HashMap::with_capacity(names.len());
        let mut by_id = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            let key = name.to_ascii_lowercase();
            if by_name.contains_key(&key) {
                return Err(RegistryError::DuplicateName(name.clone()));
            }
            let id = InterfaceId::major((i + 1) as u32);
            by_name.insert(key, id);
            by_id.insert(id.major_bits(), name.clone());
        }
        Ok(Self { by_name, by_id })
    }

    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<InterfaceId> {
        self.by_name.get(&name.to_ascii_lowercase()).copied()
    }

    #[must_use]
    pub fn name_of(&self, id: InterfaceId) -> Option<&str> {
        self.by_id.get(&id.major_bits()).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigns_sequential_ids() {
        let reg = Registry::build(&["gps".into(), "ais".into()]).unwrap();
        assert_eq!(reg.id_of("gps"), Some(InterfaceId::major(1)));
        assert_eq!(reg.id_of("ais"), Some(InterfaceId::major(2)));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let reg = Registry::build(&["GPS".into()]).unwrap();
        assert_eq!(reg.id_of("gps"), reg.id_of("GPS"));
    }

    #[test]
    fn duplicate_names_rejected() {
        let err = Registry::build(&["gps".into(), "GPS".into()]).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(_)));
    }

    #[test]
    fn name_of_resolves_minor_ids_via_major_bits() {
        let reg = Registry::build(&["tcp-server".into()]).unwrap();
        let conn_id = InterfaceId::major(1).with_minor(42);
        assert_eq!(reg.name_of(conn_id), Some("tcp-server"));
    }
}
