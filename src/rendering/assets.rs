//! Read-only shader asset stores keyed by string id.

use std::path::{Path, PathBuf};

use crate::error::{MagnifierError, MagnifierResult};

/// File extension of shader assets.
pub const SHADER_EXTENSION: &str = "shader";

/// Id of the built-in fallback program. Always present, never listed.
pub const FALLBACK_SHADER_ID: &str = "passthrough";

const BUILTIN_SHADERS: &[(&str, &str)] = &[
    (
        FALLBACK_SHADER_ID,
        include_str!("../../assets/shaders/passthrough.shader"),
    ),
    ("2xbr", include_str!("../../assets/shaders/2xbr.shader")),
    ("scanlines", include_str!("../../assets/shaders/scanlines.shader")),
    (
        "sharp-bilinear",
        include_str!("../../assets/shaders/sharp-bilinear.shader"),
    ),
];

/// Source of raw shader asset documents.
pub trait ShaderAssetStore: Send + Sync {
    /// User-selectable ids, sorted.
    fn list_available(&self) -> Vec<String>;

    /// Raw document bytes, or `ShaderNotFound`.
    fn read(&self, id: &str) -> MagnifierResult<Vec<u8>>;
}

/// Canonical form of an asset id: trimmed, `.shader` suffix removed.
pub fn normalize_id(id: &str) -> &str {
    let id = id.trim();
    id.strip_suffix(".shader").unwrap_or(id)
}

/// Built-in source of the fallback shader.
pub fn fallback_source() -> &'static str {
    BUILTIN_SHADERS[0].1
}

/// Shaders compiled into the binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinAssets;

impl ShaderAssetStore for BuiltinAssets {
    fn list_available(&self) -> Vec<String> {
        let mut ids: Vec<String> = BUILTIN_SHADERS
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| *id != FALLBACK_SHADER_ID)
            .map(str::to_string)
            .collect();
        ids.sort();
        ids
    }

    fn read(&self, id: &str) -> MagnifierResult<Vec<u8>> {
        let id = normalize_id(id);
        BUILTIN_SHADERS
            .iter()
            .find(|(name, _)| *name == id)
            .map(|(_, source)| source.as_bytes().to_vec())
            .ok_or_else(|| MagnifierError::ShaderNotFound(id.to_string()))
    }
}

/// A directory of `*.shader` files.
#[derive(Debug, Clone)]
pub struct DirectoryAssets {
    root: PathBuf,
}

impl DirectoryAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> Option<PathBuf> {
        // Ids are bare names; anything path-like is not in this store.
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return None;
        }
        Some(self.root.join(format!("{}.{}", id, SHADER_EXTENSION)))
    }
}

impl ShaderAssetStore for DirectoryAssets {
    fn list_available(&self) -> Vec<String> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!(
                    "[SHADER] Cannot list shader directory {}: {}",
                    self.root.display(),
                    e
                );
                return Vec::new();
            },
        };

        let mut ids: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path.extension().and_then(|ext| ext.to_str()) == Some(SHADER_EXTENSION)
            })
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .filter(|id| id != FALLBACK_SHADER_ID)
            .collect();
        ids.sort();
        ids
    }

    fn read(&self, id: &str) -> MagnifierResult<Vec<u8>> {
        let id = normalize_id(id);
        let path = self
            .path_for(id)
            .ok_or_else(|| MagnifierError::ShaderNotFound(id.to_string()))?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(MagnifierError::ShaderNotFound(id.to_string()))
            },
            Err(e) => Err(e.into()),
        }
    }
}

/// Stores consulted in order; the first that has the id wins.
#[derive(Default)]
pub struct LayeredAssets {
    layers: Vec<Box<dyn ShaderAssetStore>>,
}

impl LayeredAssets {
    pub fn new() -> Self {
        Self::default()
    }

    /// A user directory over the built-ins.
    pub fn with_directory(root: impl Into<PathBuf>) -> Self {
        Self::new()
            .push(DirectoryAssets::new(root))
            .push(BuiltinAssets)
    }

    pub fn push(mut self, store: impl ShaderAssetStore + 'static) -> Self {
        self.layers.push(Box::new(store));
        self
    }
}

impl ShaderAssetStore for LayeredAssets {
    fn list_available(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .layers
            .iter()
            .flat_map(|layer| layer.list_available())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    fn read(&self, id: &str) -> MagnifierResult<Vec<u8>> {
        for layer in &self.layers {
            match layer.read(id) {
                Err(MagnifierError::ShaderNotFound(_)) => continue,
                other => return other,
            }
        }
        Err(MagnifierError::ShaderNotFound(normalize_id(id).to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_list_excludes_fallback() {
        let ids = BuiltinAssets.list_available();
        assert_eq!(ids, vec!["2xbr", "scanlines", "sharp-bilinear"]);
        assert!(BuiltinAssets.read(FALLBACK_SHADER_ID).is_ok());
    }

    #[test]
    fn builtin_read_accepts_suffix() {
        let plain = BuiltinAssets.read("2xbr").unwrap();
        let suffixed = BuiltinAssets.read("2xbr.shader").unwrap();
        assert_eq!(plain, suffixed);
        assert!(matches!(
            BuiltinAssets.read("crt-royale"),
            Err(MagnifierError::ShaderNotFound(id)) if id == "crt-royale"
        ));
    }

    #[test]
    fn directory_store() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.shader"), "fragment = ''").unwrap();
        std::fs::write(dir.path().join("a.shader"), "fragment = ''").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = DirectoryAssets::new(dir.path());
        assert_eq!(store.list_available(), vec!["a", "b"]);
        assert_eq!(store.read("a").unwrap(), b"fragment = ''");
        assert!(matches!(store.read("c"), Err(MagnifierError::ShaderNotFound(_))));
        assert!(matches!(
            store.read("../a"),
            Err(MagnifierError::ShaderNotFound(_))
        ));
    }

    #[test]
    fn missing_directory_lists_nothing() {
        let store = DirectoryAssets::new("/nonexistent/lupe/shaders");
        assert!(store.list_available().is_empty());
    }

    #[test]
    fn layered_prefers_first_layer() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("2xbr.shader"), "override").unwrap();
        std::fs::write(dir.path().join("crt.shader"), "crt").unwrap();

        let store = LayeredAssets::with_directory(dir.path());
        assert_eq!(store.read("2xbr").unwrap(), b"override");
        assert!(store.read("scanlines").is_ok());
        assert_eq!(
            store.list_available(),
            vec!["2xbr", "crt", "scanlines", "sharp-bilinear"]
        );
        assert!(matches!(store.read("nope"), Err(MagnifierError::ShaderNotFound(_))));
    }
}
