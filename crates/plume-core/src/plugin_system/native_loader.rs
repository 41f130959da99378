//! The `native` bootstrap loader: plugin code in a shared library.
//!
//! The library is `module` from the loader attributes, relative to the
//! plugin directory, or the platform library name of the plugin id
//! (`lib<id>.so`, `<id>.dll`, ...). Services are bound to C symbols:
//!
//! - general: `plume_plugin_init` / `plume_plugin_cleanup`, both optional
//! - file_opener: `<service>_file_probe` (optional) and `<service>_file_open`
//! - file_saver: `<service>_file_save`
//!
//! Every symbol returns a C int; zero (or non-zero for probes) means success.
//! `-` in a service id becomes `_` in the symbol name.
use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::ffi::CString;
use std::os::raw::{c_char, c_int};
use std::panic;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;
use log::{debug, warn};

use crate::plugin_system::loader::{Loader, LoaderFactory, PluginContext, ServiceRequest};
use crate::plugin_system::service::{
    FileFn, HookFn, ProbeFn, ServiceBinding, FILE_OPENER_KIND, FILE_SAVER_KIND, GENERAL_KIND,
};

type HookSymbol = unsafe extern "C-unwind" fn() -> c_int;
type PathSymbol = unsafe extern "C-unwind" fn(*const c_char) -> c_int;

/// Factory for the `native` loader.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeLoaderFactory;

impl LoaderFactory for NativeLoaderFactory {
    fn create(&self, plugin: &PluginContext<'_>) -> Result<Box<dyn Loader>, String> {
        let file_name = match plugin.attribute("module") {
            Some(module) => PathBuf::from(module),
            None => PathBuf::from(format!("{}{}{}", DLL_PREFIX, plugin.plugin_id, DLL_SUFFIX)),
        };
        Ok(Box::new(NativeLoader {
            path: plugin.directory.join(file_name),
            library: None,
        }))
    }
}

/// Loader over one shared library
#[derive(Debug)]
pub struct NativeLoader {
    path: PathBuf,
    library: Option<Arc<Library>>,
}

impl NativeLoader {
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn library(&self) -> Result<&Arc<Library>, String> {
        self.library.as_ref().ok_or_else(|| "library is not loaded".to_string())
    }
}

fn symbol_name(service_id: &str, suffix: &str) -> String {
    format!("{}_{}", service_id.replace('-', "_"), suffix)
}

fn hook_symbol(library: &Arc<Library>, name: &str) -> Option<HookFn> {
    // SAFETY: the symbol is declared with the HookSymbol signature by contract.
    let symbol: HookSymbol = unsafe { library.get::<HookSymbol>(name.as_bytes()) }.ok().map(|s| *s)?;
    let library = Arc::clone(library);
    let name = name.to_string();
    Some(Arc::new(move || {
        let _keep_loaded = &library;
        let rc = panic::catch_unwind(|| unsafe { symbol() }).map_err(|_| format!("'{}' panicked", name))?;
        if rc == 0 { Ok(()) } else { Err(format!("'{}' returned {}", name, rc)) }
    }))
}

fn path_symbol(library: &Arc<Library>, name: &str) -> Option<PathSymbol> {
    // SAFETY: the symbol is declared with the PathSymbol signature by contract.
    unsafe { library.get::<PathSymbol>(name.as_bytes()) }.ok().map(|s| *s)
}

fn c_path(path: &Path) -> Result<CString, String> {
    CString::new(path.to_string_lossy().as_bytes()).map_err(|_| format!("path '{}' contains a NUL byte", path.display()))
}

fn file_fn(library: &Arc<Library>, name: String, symbol: PathSymbol) -> FileFn {
    let library = Arc::clone(library);
    Arc::new(move |path: &Path| {
        let _keep_loaded = &library;
        let c_path = c_path(path)?;
        let rc = panic::catch_unwind(|| unsafe { symbol(c_path.as_ptr()) })
            .map_err(|_| format!("'{}' panicked", name))?;
        if rc == 0 { Ok(()) } else { Err(format!("'{}' failed with code {}", name, rc)) }
    })
}

fn probe_fn(library: &Arc<Library>, name: String, symbol: PathSymbol) -> ProbeFn {
    let library = Arc::clone(library);
    Arc::new(move |path: &Path| {
        let _keep_loaded = &library;
        let Ok(c_path) = c_path(path) else {
            return false;
        };
        match panic::catch_unwind(|| unsafe { symbol(c_path.as_ptr()) }) {
            Ok(rc) => rc != 0,
            Err(_) => {
                warn!("'{}' panicked while probing '{}'", name, path.display());
                false
            }
        }
    })
}

impl Loader for NativeLoader {
    fn load_base(&mut self, plugin: &PluginContext<'_>) -> Result<(), String> {
        if self.library.is_some() {
            return Ok(());
        }
        debug!("Loading native library {} for plugin '{}'", self.path.display(), plugin.plugin_id);
        // SAFETY: loading runs the library's initializers; plugins are trusted code.
        let library = unsafe { Library::new(&self.path) }
            .map_err(|e| format!("can't load '{}': {}", self.path.display(), e))?;
        self.library = Some(Arc::new(library));
        Ok(())
    }

    fn load_service(&mut self, _plugin: &PluginContext<'_>, service: &ServiceRequest<'_>) -> Result<ServiceBinding, String> {
        let library = self.library()?;
        match service.kind {
            GENERAL_KIND => Ok(ServiceBinding::General {
                init: hook_symbol(library, "plume_plugin_init"),
                cleanup: hook_symbol(library, "plume_plugin_cleanup"),
            }),
            FILE_OPENER_KIND => {
                let open_name = symbol_name(service.service_id, "file_open");
                let open = path_symbol(library, &open_name)
                    .ok_or_else(|| format!("missing symbol '{}'", open_name))?;
                let probe_name = symbol_name(service.service_id, "file_probe");
                let probe = path_symbol(library, &probe_name).map(|symbol| probe_fn(library, probe_name, symbol));
                Ok(ServiceBinding::FileOpener {
                    probe,
                    open: file_fn(library, open_name, open),
                })
            }
            FILE_SAVER_KIND => {
                let save_name = symbol_name(service.service_id, "file_save");
                let save = path_symbol(library, &save_name)
                    .ok_or_else(|| format!("missing symbol '{}'", save_name))?;
                Ok(ServiceBinding::FileSaver {
                    save: file_fn(library, save_name, save),
                })
            }
            other => Err(format!("native libraries can't provide '{}' services", other)),
        }
    }

    fn unload_base(&mut self, plugin: &PluginContext<'_>) -> Result<(), String> {
        if let Some(library) = self.library.take() {
            // Closures handed out for services keep their own reference.
            if Arc::strong_count(&library) > 1 {
                warn!(
                    "Library for plugin '{}' is still referenced; it stays mapped until released",
                    plugin.plugin_id
                );
            }
            debug!("Unloaded native library {}", self.path.display());
        }
        Ok(())
    }
}
