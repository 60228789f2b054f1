use super::abi::{
    CLAP_PLUGIN_FACTORY_ID, ClapPluginEntry, ClapPluginFactory, c_str_to_option,
    clap_version_is_compatible,
};
use crate::config::{CLAP_PATH_ENV, EngineOptions};
use crate::processor::AudioProcessorInfo;
use libloading::Library;
use serde::Serialize;
use std::collections::HashSet;
use std::ffi::CString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::debug;

struct FileState {
    open_count: usize,
    library: Option<Library>,
    entry: *const ClapPluginEntry,
    static_entry: *const ClapPluginEntry,
}

// SAFETY: the entry pointers refer to immutable tables inside the loaded
// library or to statics, both outlive the state that holds them.
unsafe impl Send for FileState {}

/// A `.clap` module, opened and initialized while references are held.
pub struct ClapFileHandle {
    path: PathBuf,
    state: Mutex<FileState>,
}

impl fmt::Debug for ClapFileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClapFileHandle")
            .field("path", &self.path)
            .field("open_count", &self.open_count())
            .finish()
    }
}

impl ClapFileHandle {
    pub fn new(path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            state: Mutex::new(FileState {
                open_count: 0,
                library: None,
                entry: std::ptr::null(),
                static_entry: std::ptr::null(),
            }),
        })
    }

    /// An entry linked into the process instead of a module on disk.
    pub fn from_static(name: &str, entry: &'static ClapPluginEntry) -> Arc<Self> {
        let handle = Self::new(name);
        handle.state().static_entry = entry;
        handle
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn state(&self) -> MutexGuard<'_, FileState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn open_count(&self) -> usize {
        self.state().open_count
    }

    pub fn opened(&self) -> bool {
        !self.state().entry.is_null()
    }

    /// The initialized entry, null unless opened.
    pub fn entry(&self) -> *const ClapPluginEntry {
        self.state().entry
    }

    /// Take a reference, the first one loads and initializes the module.
    pub fn open(&self) -> bool {
        let mut state = self.state();
        state.open_count += 1;
        if state.open_count == 1 && state.entry.is_null() {
            let entry = if state.static_entry.is_null() {
                // SAFETY: loading runs the module constructors, accepted for
                // every module placed on a CLAP search path.
                let library = match unsafe { Library::new(&self.path) } {
                    Ok(library) => library,
                    Err(e) => {
                        debug!(target: "clap", "dlopen failed: {}: {e}", self.path.display());
                        return false;
                    }
                };
                // SAFETY: `clap_entry` is a `clap_plugin_entry` global per the CLAP ABI.
                let entry = unsafe {
                    match library.get::<*const ClapPluginEntry>(b"clap_entry\0") {
                        Ok(sym) => *sym,
                        Err(_) => std::ptr::null(),
                    }
                };
                state.library = Some(library);
                entry
            } else {
                state.static_entry
            };
            if !self.init_entry(entry) {
                state.library = None;
                return false;
            }
            state.entry = entry;
        }
        !state.entry.is_null()
    }

    fn init_entry(&self, entry: *const ClapPluginEntry) -> bool {
        if entry.is_null() {
            debug!(target: "clap", "unusable clap_entry: NULL: {}", self.path.display());
            return false;
        }
        // SAFETY: non-null entry from the module or a static table.
        let entry = unsafe { &*entry };
        let version = entry.clap_version;
        let Ok(c_path) = CString::new(self.path.to_string_lossy().as_bytes()) else {
            return false;
        };
        let mut initialized = false;
        if clap_version_is_compatible(version)
            && let Some(init) = entry.init
        {
            // SAFETY: NUL terminated plugin path, entry follows the CLAP ABI.
            initialized = unsafe { init(c_path.as_ptr()) };
            if !initialized && let Some(deinit) = entry.deinit {
                // SAFETY: deinit is valid after a failed init.
                unsafe { deinit() };
            }
        }
        if !initialized {
            debug!(target: "clap", "unusable clap_entry: clap-{}.{}.{}: {}",
                   version.major, version.minor, version.revision, self.path.display());
        }
        initialized
    }

    /// Drop a reference, the last one deinitializes and unloads the module.
    pub fn close(&self) {
        let mut state = self.state();
        assert_return!(state.open_count > 0);
        state.open_count -= 1;
        if state.open_count > 0 {
            return;
        }
        if !state.entry.is_null() {
            // SAFETY: entry was initialized by `open`.
            if let Some(deinit) = unsafe { (*state.entry).deinit } {
                // SAFETY: balanced with the successful init in `open`.
                unsafe { deinit() };
            }
            state.entry = std::ptr::null();
        }
        if let Some(library) = state.library.take()
            && let Err(e) = library.close()
        {
            debug!(target: "clap", "dlclose failed: {}: {e}", self.path.display());
        }
    }
}

/// One plugin offered by a `.clap` module.
#[derive(Debug, Clone, Serialize)]
pub struct ClapPluginDescriptor {
    pub id: String,
    pub name: String,
    pub version: String,
    pub vendor: String,
    pub url: String,
    pub manual_url: String,
    pub support_url: String,
    pub description: String,
    /// Canonified features in `:a:b:` form.
    pub features: String,
    pub path: PathBuf,
    #[serde(skip)]
    file: Arc<ClapFileHandle>,
}

impl ClapPluginDescriptor {
    pub fn file(&self) -> &Arc<ClapFileHandle> {
        &self.file
    }

    pub fn open(&self) -> bool {
        self.file.open()
    }

    pub fn close(&self) {
        self.file.close()
    }

    pub fn entry(&self) -> *const ClapPluginEntry {
        self.file.entry()
    }

    pub fn uri(&self) -> String {
        format!("CLAP:{}", self.id)
    }

    pub fn device_info(&self) -> AudioProcessorInfo {
        let category = if self.features.contains(":instrument:") {
            "Instrument"
        } else if self.features.contains(":analyzer:") {
            "Analyzer"
        } else if self.features.contains(":note-effect:") {
            "Note FX"
        } else if self.features.contains(":audio-effect:") || self.features.contains(":effect:") {
            "Audio FX"
        } else {
            "Clap Device"
        };
        AudioProcessorInfo {
            uri: self.uri(),
            version: self.version.clone(),
            label: self.name.clone(),
            category: category.to_string(),
            description: self.description.clone(),
            website_url: self.url.clone(),
            creator_name: self.vendor.clone(),
        }
    }

    /// Append the usable descriptors of `file` to `out`.
    pub fn add_descriptors(file: &Arc<ClapFileHandle>, out: &mut Vec<Arc<Self>>) {
        if !file.open() {
            file.close();
            return;
        }
        // SAFETY: opened, so the entry is non-null and initialized.
        let entry = unsafe { &*file.entry() };
        let factory = match entry.get_factory {
            // SAFETY: static factory id.
            Some(get_factory) => {
                (unsafe { get_factory(CLAP_PLUGIN_FACTORY_ID.as_ptr()) }) as *const ClapPluginFactory
            }
            None => std::ptr::null(),
        };
        if !factory.is_null() {
            // SAFETY: factory pointer validated above.
            let factory_ref = unsafe { &*factory };
            if let (Some(get_count), Some(get_desc)) =
                (factory_ref.get_plugin_count, factory_ref.get_plugin_descriptor)
            {
                // SAFETY: function pointers from the plugin factory.
                let count = unsafe { get_count(factory) };
                for i in 0..count {
                    // SAFETY: i < count.
                    let desc = unsafe { get_desc(factory, i) };
                    if desc.is_null() {
                        continue;
                    }
                    // SAFETY: descriptor pointer from the plugin factory.
                    let desc = unsafe { &*desc };
                    // SAFETY: descriptor strings are null or NUL terminated.
                    let text = |ptr| unsafe { c_str_to_option(ptr) };
                    let Some(id) = text(desc.id).filter(|id| !id.is_empty()) else {
                        continue;
                    };
                    let v = desc.clap_version;
                    let clapversion = format!("clap-{}.{}.{}", v.major, v.minor, v.revision);
                    if !clap_version_is_compatible(v) {
                        debug!(target: "clap", "invalid plugin: {id} ({clapversion})");
                        continue;
                    }
                    let mut features = Vec::new();
                    if !desc.features.is_null() {
                        for ft in 0.. {
                            // SAFETY: the features array is NULL terminated.
                            let ptr = unsafe { *desc.features.add(ft) };
                            if ptr.is_null() {
                                break;
                            }
                            if let Some(feature) = text(ptr).filter(|f| !f.is_empty()) {
                                features.push(feature_canonify(&feature));
                            }
                        }
                    }
                    let descriptor = Self {
                        name: text(desc.name).unwrap_or_else(|| id.clone()),
                        version: text(desc.version).unwrap_or_else(|| "0.0.0-unknown".to_string()),
                        vendor: text(desc.vendor).unwrap_or_default(),
                        url: text(desc.url).unwrap_or_default(),
                        manual_url: text(desc.manual_url).unwrap_or_default(),
                        support_url: text(desc.support_url).unwrap_or_default(),
                        description: text(desc.description).unwrap_or_default(),
                        features: format!(":{}:", features.join(":")),
                        path: file.path().to_path_buf(),
                        file: file.clone(),
                        id,
                    };
                    debug!(target: "clap", "Plugin: {} {} {} ({}, {clapversion}): {}",
                           descriptor.name, descriptor.version, descriptor.vendor,
                           descriptor.id, descriptor.features);
                    out.push(Arc::new(descriptor));
                }
            }
        }
        file.close();
    }
}

/// Replace every character outside `[A-Za-z0-9-]` with `-`.
pub fn feature_canonify(feature: &str) -> String {
    feature
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

fn collect_clap_files(root: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(ft) = entry.file_type() else {
            continue;
        };
        if ft.is_dir() {
            collect_clap_files(&path, out);
        } else if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("clap"))
        {
            out.push(path);
        }
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_default()
}

/// All `*.clap` files under `~/.clap`, `/usr/lib/clap`, `$CLAP_PATH` and
/// `extra`, unique by canonical path.
pub fn list_clap_files(extra: &[PathBuf]) -> Vec<PathBuf> {
    let mut roots = vec![
        PathBuf::from(format!("{}/.clap", home_dir())),
        PathBuf::from("/usr/lib/clap"),
    ];
    if let Ok(paths) = std::env::var(CLAP_PATH_ENV) {
        roots.extend(std::env::split_paths(&paths).filter(|p| !p.as_os_str().is_empty()));
    }
    roots.extend(extra.iter().cloned());

    let mut files = Vec::new();
    for root in roots {
        collect_clap_files(&root, &mut files);
    }
    let mut seen = HashSet::new();
    files
        .into_iter()
        .filter_map(|file| std::fs::canonicalize(&file).ok())
        .filter(|file| seen.insert(file.clone()))
        .collect()
}

/// Descriptor collection, scanned on first use.
pub struct ClapPluginRegistry {
    search_paths: Vec<PathBuf>,
    descriptors: OnceLock<Vec<Arc<ClapPluginDescriptor>>>,
}

impl ClapPluginRegistry {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self {
            search_paths,
            descriptors: OnceLock::new(),
        }
    }

    pub fn from_options(options: &EngineOptions) -> Self {
        Self::new(options.clap_search_paths.clone())
    }

    /// A registry over the given files only, without a file system scan.
    pub fn from_files(files: &[Arc<ClapFileHandle>]) -> Self {
        let registry = Self::new(Vec::new());
        let mut descriptors = Vec::new();
        for file in files {
            ClapPluginDescriptor::add_descriptors(file, &mut descriptors);
        }
        let _ = registry.descriptors.set(descriptors);
        registry
    }

    pub fn descriptors(&self) -> &[Arc<ClapPluginDescriptor>] {
        self.descriptors.get_or_init(|| {
            let mut descriptors = Vec::new();
            for path in list_clap_files(&self.search_paths) {
                ClapPluginDescriptor::add_descriptors(&ClapFileHandle::new(path), &mut descriptors);
            }
            debug!(target: "clap", "registry: {} plugins", descriptors.len());
            descriptors
        })
    }

    /// Look up by plugin id or by `CLAP:<id>` uri.
    pub fn find(&self, id: &str) -> Option<Arc<ClapPluginDescriptor>> {
        let id = id.strip_prefix("CLAP:").unwrap_or(id);
        self.descriptors().iter().find(|d| d.id == id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_canonify() {
        assert_eq!(feature_canonify("audio-effect"), "audio-effect");
        assert_eq!(feature_canonify("Stereo FX/2"), "Stereo-FX-2");
    }

    #[test]
    fn test_missing_module_does_not_open() {
        let file = ClapFileHandle::new("/nonexistent/anklang-test.clap");
        assert!(!file.open());
        assert!(!file.opened());
        assert_eq!(file.open_count(), 1);
        file.close();
        assert_eq!(file.open_count(), 0);
        let mut out = Vec::new();
        ClapPluginDescriptor::add_descriptors(&file, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_list_clap_files_is_unique() {
        let dir = std::env::temp_dir().join(format!("anklang-clap-scan-{}", std::process::id()));
        let nested = dir.join("nested");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("synth.clap"), b"").unwrap();
        std::fs::write(nested.join("readme.txt"), b"").unwrap();
        let files = list_clap_files(&[dir.clone(), nested.clone()]);
        let ours: Vec<_> = files.iter().filter(|f| f.starts_with(std::fs::canonicalize(&dir).unwrap())).collect();
        assert_eq!(ours.len(), 1);
        assert!(ours[0].ends_with("synth.clap"));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_device_info_categories() {
        let descriptor = |features: &str| ClapPluginDescriptor {
            id: "org.example.test".to_string(),
            name: "Test".to_string(),
            version: "1.0".to_string(),
            vendor: "Example".to_string(),
            url: String::new(),
            manual_url: String::new(),
            support_url: String::new(),
            description: String::new(),
            features: features.to_string(),
            path: PathBuf::new(),
            file: ClapFileHandle::new("test.clap"),
        };
        assert_eq!(descriptor(":instrument:synthesizer:").device_info().category, "Instrument");
        assert_eq!(descriptor(":analyzer:").device_info().category, "Analyzer");
        assert_eq!(descriptor(":note-effect:").device_info().category, "Note FX");
        assert_eq!(descriptor(":audio-effect:").device_info().category, "Audio FX");
        assert_eq!(descriptor(":effect:").device_info().category, "Audio FX");
        assert_eq!(descriptor("::").device_info().category, "Clap Device");
        assert_eq!(descriptor("::").device_info().uri, "CLAP:org.example.test");
    }
}
