/*!
 * Runtime Loader
 *
 * Loads the runtime's shared library from a configurable install directory
 * on first use and caches it. Changing the install directory unloads the
 * cached library; the next request loads from the new location.
 *
 * The entry point is only reachable through a [`RuntimeEntry`] guard that
 * holds a read lock, so `set_home` and `unload` wait until every outstanding
 * entry is dropped. A stale entry point cannot outlive its library.
 */

use crate::core::errors::{LoadError, LoadResult};
use crate::core::limits::JVM_ENTRY_SYMBOL;
use parking_lot::{
    MappedRwLockReadGuard, RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard,
};
use std::ffi::c_void;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// `JNI_CreateJavaVM(JavaVM **pvm, void **penv, void *args)`
pub type CreateJavaVmFn =
    unsafe extern "C" fn(*mut *mut c_void, *mut *mut c_void, *mut c_void) -> i32;

/// Where the library lives inside an install, and what it exports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLayout {
    /// Library path relative to the install directory
    pub library: PathBuf,
    pub symbol: String,
}

impl RuntimeLayout {
    pub fn new(library: impl Into<PathBuf>, symbol: impl Into<String>) -> Self {
        Self {
            library: library.into(),
            symbol: symbol.into(),
        }
    }

    /// HotSpot server VM layout for the current platform
    pub fn jvm() -> Self {
        #[cfg(target_os = "windows")]
        let library = "bin/server/jvm.dll";
        #[cfg(target_os = "macos")]
        let library = "lib/server/libjvm.dylib";
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        let library = "lib/server/libjvm.so";

        Self::new(library, JVM_ENTRY_SYMBOL)
    }
}

impl Default for RuntimeLayout {
    fn default() -> Self {
        Self::jvm()
    }
}

/// A loaded runtime library and its resolved entry point
pub struct LoadedRuntime {
    path: PathBuf,
    entry: CreateJavaVmFn,
    // Declared last: unloaded after everything referring to it
    _library: Option<libloading::Library>,
}

impl LoadedRuntime {
    /// Entry point not backed by a library this process loaded itself
    pub fn detached(path: impl Into<PathBuf>, entry: CreateJavaVmFn) -> Self {
        Self {
            path: path.into(),
            entry,
            _library: None,
        }
    }

    /// Path the runtime was loaded from
    pub fn library(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for LoadedRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedRuntime")
            .field("path", &self.path)
            .field("owned", &self._library.is_some())
            .finish()
    }
}

/// Resolves a library file and symbol into a [`LoadedRuntime`]
#[cfg_attr(test, mockall::automock)]
pub trait RuntimeBackend: Send + Sync {
    fn open(&self, library: &Path, symbol: &str) -> LoadResult<LoadedRuntime>;
}

/// Backend on the OS dynamic loader
#[derive(Debug, Default, Clone, Copy)]
pub struct DylibBackend;

impl RuntimeBackend for DylibBackend {
    fn open(&self, library: &Path, symbol: &str) -> LoadResult<LoadedRuntime> {
        let open_error = |e: libloading::Error| LoadError::LibraryOpen {
            path: library.to_path_buf(),
            reason: e.to_string(),
        };

        // SAFETY: runs the library's initializers; the path points into a
        // runtime install chosen by the caller
        #[cfg(unix)]
        let handle = unsafe {
            use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_NOW};
            Library::open(Some(library), RTLD_NOW | RTLD_GLOBAL).map(libloading::Library::from)
        }
        .map_err(open_error)?;
        #[cfg(not(unix))]
        let handle = unsafe { libloading::Library::new(library) }.map_err(open_error)?;

        // SAFETY: the symbol is declared with the JNI signature
        let entry = unsafe { handle.get::<CreateJavaVmFn>(symbol.as_bytes()) }
            .map(|sym| *sym)
            .map_err(|e| LoadError::SymbolMissing {
                path: library.to_path_buf(),
                symbol: symbol.to_string(),
                reason: e.to_string(),
            })?;

        Ok(LoadedRuntime {
            path: library.to_path_buf(),
            entry,
            _library: Some(handle),
        })
    }
}

/// Borrowed access to the loaded entry point
///
/// Holds the loader's read lock until dropped.
pub struct RuntimeEntry<'a> {
    runtime: MappedRwLockReadGuard<'a, LoadedRuntime>,
}

impl RuntimeEntry<'_> {
    /// Call `JNI_CreateJavaVM`
    ///
    /// # Safety
    ///
    /// Arguments must satisfy the JNI invocation API contract.
    pub unsafe fn create_java_vm(
        &self,
        vm: *mut *mut c_void,
        env: *mut *mut c_void,
        args: *mut c_void,
    ) -> i32 {
        (self.runtime.entry)(vm, env, args)
    }
}

impl Deref for RuntimeEntry<'_> {
    type Target = LoadedRuntime;

    fn deref(&self) -> &LoadedRuntime {
        &self.runtime
    }
}

struct LoaderState {
    home: Option<PathBuf>,
    loaded: Option<LoadedRuntime>,
}

/// Lazily loaded, re-homeable runtime library
pub struct RuntimeLoader {
    layout: RuntimeLayout,
    backend: Box<dyn RuntimeBackend>,
    state: RwLock<LoaderState>,
}

impl RuntimeLoader {
    /// JVM layout on the OS loader
    pub fn new() -> Self {
        Self::with_backend(RuntimeLayout::jvm(), DylibBackend)
    }

    pub fn with_backend(layout: RuntimeLayout, backend: impl RuntimeBackend + 'static) -> Self {
        Self {
            layout,
            backend: Box::new(backend),
            state: RwLock::new(LoaderState {
                home: None,
                loaded: None,
            }),
        }
    }

    pub fn layout(&self) -> &RuntimeLayout {
        &self.layout
    }

    pub fn home(&self) -> Option<PathBuf> {
        self.state.read().home.clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.state.read().loaded.is_some()
    }

    /// Unload whatever is cached and load from `home` next time
    ///
    /// An empty path clears the home.
    pub fn set_home(&self, home: impl Into<PathBuf>) {
        let home = configured(home.into());
        let mut state = self.state.write();
        Self::release(&mut state);
        debug!(home = ?home, "Runtime home set");
        state.home = home;
    }

    /// Like [`set_home`](Self::set_home), but keeps the cached library when
    /// `home` is already the configured one. Returns whether it changed.
    pub fn ensure_home(&self, home: &Path) -> bool {
        let home = configured(home.to_path_buf());
        let state = self.state.upgradable_read();
        if state.home == home {
            return false;
        }

        let mut state = RwLockUpgradableReadGuard::upgrade(state);
        Self::release(&mut state);
        debug!(home = ?home, "Runtime home changed");
        state.home = home;
        true
    }

    /// Full path of the library under the configured home
    pub fn library_path(&self) -> LoadResult<PathBuf> {
        let state = self.state.read();
        let home = state.home.as_ref().ok_or(LoadError::HomeNotSet)?;
        Ok(home.join(&self.layout.library))
    }

    /// Resolve the entry point, loading the library if nothing is cached
    pub fn entry_point(&self) -> LoadResult<RuntimeEntry<'_>> {
        let state = self.state.upgradable_read();

        let state = if state.loaded.is_some() {
            RwLockUpgradableReadGuard::downgrade(state)
        } else {
            let mut state = RwLockUpgradableReadGuard::upgrade(state);
            let home = state.home.as_ref().ok_or(LoadError::HomeNotSet)?;
            let path = home.join(&self.layout.library);

            let loaded = self.backend.open(&path, &self.layout.symbol)?;
            info!(
                library = %loaded.library().display(),
                symbol = %self.layout.symbol,
                "Runtime loaded"
            );
            state.loaded = Some(loaded);
            RwLockWriteGuard::downgrade(state)
        };

        match RwLockReadGuard::try_map(state, |state| state.loaded.as_ref()) {
            Ok(runtime) => Ok(RuntimeEntry { runtime }),
            Err(_) => unreachable!("runtime cache emptied while holding the lock"),
        }
    }

    /// Drop the cached library; the home stays configured
    pub fn unload(&self) {
        Self::release(&mut self.state.write());
    }

    fn release(state: &mut LoaderState) {
        if let Some(loaded) = state.loaded.take() {
            info!(library = %loaded.library().display(), "Runtime unloaded");
        }
    }
}

/// Empty means unset
fn configured(home: PathBuf) -> Option<PathBuf> {
    (!home.as_os_str().is_empty()).then_some(home)
}

impl Default for RuntimeLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RuntimeLoader {
    fn drop(&mut self) {
        Self::release(self.state.get_mut());
    }
}

impl std::fmt::Debug for RuntimeLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("RuntimeLoader")
            .field("layout", &self.layout)
            .field("home", &state.home)
            .field("loaded", &state.loaded.is_some())
            .finish()
    }
}
