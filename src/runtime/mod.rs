/*!
 * Runtime Module
 * Dynamic loading of the native runtime the server runs on
 */

pub mod loader;

pub use loader::{
    CreateJavaVmFn, DylibBackend, LoadedRuntime, RuntimeBackend, RuntimeEntry, RuntimeLayout,
    RuntimeLoader,
};
