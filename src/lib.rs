//! A runtime module loader for long-running host processes.
//!
//! Modules are independently built units that the host loads, starts,
//! reloads, stops and unloads while it keeps running. `mod_link` keeps track
//! of which modules exist, what each one needs from the others, and who is
//! holding on to whom, so that loads always happen dependencies first and
//! unloads always happen dependents first.
//!
//! # Core Concepts
//!
//! - [`Module`]: The permanent record of a unit, created from a
//! 	[`ModuleManifest`] and never removed from the [`Registry`]. Holding an
//! 	`Arc<Module>` never keeps a unit loaded.
//!
//! - [`Capability`]: A `(kind, id)` pair a module provides or uses. Every
//! 	module implicitly provides `("module", name)`. Usages are flattened by
//! 	[`build_alldeps`] into each module's dependency closure.
//!
//! - [`Lib`]: One load cycle of a unit: its OS handle and the
//! 	[`EntryPoints`] it registered while being opened.
//!
//! - [`Instance`]: A running module. It exists from the moment `start`
//! 	succeeds and stops as soon as nobody holds it any more.
//!
//! - [`Disposer`]: A party's hold on an [`Instance`]. Unloading asks every
//! 	holder to let go at some [`ForceLevel`]; holders that are themselves
//! 	modules pass the question on to whoever holds them first.
//!
//! A module reaches its current load cycle through weak links only:
//!
//! ```text
//! Module --weak--> LibProxy --strong--> Lib --weak--> Instance
//! ```
//!
//! # Startup
//!
//! A [`Loader`] starts out collecting registrations of units compiled into
//! the host. [`Loader::init`] then reads the manifests and the startup
//! directives, builds the dependency graph, loads what was asked for, and
//! executes reload requests made in the meantime.
//!
//! ```
//! use mod_link::{
//! 	EntryPoints, LibraryError, LibraryLoader, Loader, LoaderConfig,
//! 	ModuleManifest, ModulesConfig, OpenRequest, Registration, UnitHandle,
//! };
//!
//! // Only compiled-in units in this example, nothing is opened from disk.
//! struct NoUnits ;
//! impl LibraryLoader for NoUnits {
//! 	fn open( &self, request: &OpenRequest<'_> ) -> Result<Box<dyn UnitHandle>, LibraryError> {
//! 		Err( LibraryError::Unavailable( request.module().to_string() ))
//! 	}
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let loader = Loader::new( LoaderConfig::default(), NoUnits )?;
//!
//! loader.registry().register( Registration::new( "codec-g711", "c0de", EntryPoints::new() ))?;
//! loader.registry().register( Registration::new( "chan-sip", "51b0", EntryPoints::new()
//! 	.with_reload(|| Ok(()) )))?;
//!
//! let manifests = vec![
//! 	ModuleManifest::new( "codec-g711", "c0de" ).providing( "codec", "g711" ),
//! 	ModuleManifest::new( "chan-sip", "51b0" ).using( "codec", "g711" ),
//! ];
//! let config = ModulesConfig { load: vec![ "chan-sip".into() ], ..ModulesConfig::default() };
//! let warnings = loader.init( &config, manifests )?;
//! assert!( warnings.is_empty() );
//!
//! // The codec was loaded because chan-sip uses it.
//! assert_eq!( loader.running(), [ "chan-sip", "codec-g711" ]);
//!
//! // Forcing the codec out takes chan-sip down with it, chan-sip first.
//! let codec = loader.find( "codec-g711" ).ok_or( "codec-g711 is not known" )?;
//! loader.unload( &codec, true );
//! assert!( loader.running().is_empty() );
//! # Ok(())
//! # }
//! ```
//!
//! # Units on Disk
//!
//! [`DylibLoader`] opens `<module_dir>/<name>.so` with `libloading`. A unit
//! exports its registration with [`declare_module!`]; the loader calls it
//! while opening the unit so that the entry points attach to the load cycle
//! in progress.

mod module ;
mod manifest ;
mod config ;
mod registry ;
mod graph ;
mod linkage ;
mod instance ;
mod disposer ;
mod library ;
mod loader ;
mod reload ;
mod init ;
mod teardown ;
pub mod global ;

#[doc( no_inline )]
pub use nonempty_collections::NEVec ;

pub use module::{ Capability, EntryPoints, HookError, HookResult, Module };
pub use manifest::{ ModuleManifest, ManifestSet };
pub use config::{ ConfigError, LoaderConfig, ModulesConfig, UseDirective, strip_extension };
pub use registry::{ DigestVerifier, KeyVerifier, Registration, RegisterError, Registry, Runlevel };
pub use graph::{ GraphError, build_alldeps };
pub use linkage::{ Lib, LibProxy };
pub use instance::Instance ;
pub use disposer::{ DisposeCallback, Disposer, Disposition, ForceLevel, run_disposers };
pub use library::{ DylibLoader, LibraryError, LibraryLoader, OpenRequest, RegisterFn, UnitHandle, REGISTER_SYMBOL };
pub use loader::{ CompletionFilter, LoadError, LoadPhase, Loader };
pub use reload::ReloadResult ;
pub use init::{ InitError, InitWarning };
