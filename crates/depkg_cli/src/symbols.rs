use std::collections::HashMap;
use std::path::Path;

use depkg_lib::SymbolResolver;
use serde::Deserialize;

/// Symbol lookups loaded from a JSON side file. The container's object
/// graph is outside this tool; whoever extracted the body dumps the
/// relevant tables here.
///
/// ```json
/// {
///   "objects": { "5": "Health", "-12": "Engine.Actor" },
///   "names": { "7": "Begin" },
///   "enums": { "8": { "0": "TEAM_Red", "1": "TEAM_Blue" } }
/// }
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct SymbolMap {
    #[serde(default)]
    pub objects: HashMap<i32, String>,
    #[serde(default)]
    pub names: HashMap<u32, String>,
    #[serde(default)]
    pub enums: HashMap<i32, HashMap<u8, String>>,
}

impl SymbolMap {
    pub fn load(path: &Path) -> Result<Self, String> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {path:?}: {e}"))?;
        serde_json::from_str(&data).map_err(|e| format!("invalid symbol map {path:?}: {e}"))
    }
}

impl SymbolResolver for SymbolMap {
    fn object_name(&self, index: i32) -> Option<String> {
        self.objects.get(&index).cloned()
    }

    fn name(&self, index: u32) -> Option<String> {
        self.names.get(&index).cloned()
    }

    fn enum_member(&self, property: i32, value: u8) -> Option<String> {
        self.enums.get(&property)?.get(&value).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_all_sections() {
        let map: SymbolMap = serde_json::from_str(
            r#"{
                "objects": { "5": "Health", "-12": "Engine.Actor" },
                "names": { "7": "Begin" },
                "enums": { "8": { "1": "TEAM_Blue" } }
            }"#,
        )
        .expect("parse");
        assert_eq!(map.object_name(5).as_deref(), Some("Health"));
        assert_eq!(map.object_name(-12).as_deref(), Some("Engine.Actor"));
        assert_eq!(map.name(7).as_deref(), Some("Begin"));
        assert_eq!(map.enum_member(8, 1).as_deref(), Some("TEAM_Blue"));
        assert_eq!(map.enum_member(8, 2), None);
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let map: SymbolMap = serde_json::from_str("{}").expect("parse");
        assert_eq!(map.object_name(1), None);
        assert_eq!(map.name(1), None);
    }
}
