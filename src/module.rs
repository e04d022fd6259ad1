//! Module identity records and the entry points a unit registers.
//!
//! A [`Module`] is created once, when the registry is seeded from build
//! manifests, and is never removed afterwards. Everything that changes from
//! one load cycle to the next hangs off its weak link; see [`crate::linkage`].

use std::sync::{ Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock, Weak };
use std::thread::{ self, ThreadId };
use serde::{ Deserialize, Serialize };

use crate::disposer::Disposer ;
use crate::instance::Instance ;
use crate::linkage::{ Lib, LibProxy };
use crate::manifest::ModuleManifest ;



/// A named abstract service a module can advertise and other modules can use.
///
/// Every module implicitly provides `("module", <its name>)`, so depending on a
/// concrete module is just a usage of that capability.
#[derive( Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize )]
pub struct Capability {
	kind: String,
	id: String,
}

impl Capability {

	/// Capability kind every module provides under its own name.
	pub const MODULE_KIND: &'static str = "module";

	#[inline]
	pub fn new( kind: impl Into<String>, id: impl Into<String> ) -> Self {
		Self { kind: kind.into(), id: id.into() }
	}

	/// The implicit capability of the module called `name`.
	#[inline] pub fn module( name: impl Into<String> ) -> Self { Self::new( Self::MODULE_KIND, name ) }

	#[inline] pub fn kind( &self ) -> &str { &self.kind }
	#[inline] pub fn id( &self ) -> &str { &self.id }

}

impl std::fmt::Display for Capability {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		write!( f, "{}:{}", self.kind, self.id )
	}
}

/// Error type returned by module entry points.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;
/// Result type returned by module entry points.
pub type HookResult = Result<(), HookError>;

type Hook = Arc<dyn Fn() -> HookResult + Send + Sync>;
type StopHook = Arc<dyn Fn() + Send + Sync>;

/// The four lifecycle entry points of a unit.
///
/// Every entry point is optional. A missing `init` or `start` counts as an
/// immediate success, a missing `reload` makes reload requests report
/// [`ReloadResult::NotImplemented`]( crate::ReloadResult::NotImplemented ).
///
/// Entry points are arbitrary code and may block for as long as they like;
/// the loader imposes no timeout.
#[derive( Clone, Default )]
pub struct EntryPoints {
	init: Option<Hook>,
	start: Option<Hook>,
	reload: Option<Hook>,
	stop: Option<StopHook>,
}

impl std::fmt::Debug for EntryPoints {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::result::Result<(), std::fmt::Error> {
		f.debug_struct( "EntryPoints" )
			.field( "init", &self.init.as_ref().map(| _ | "<closure>" ))
			.field( "start", &self.start.as_ref().map(| _ | "<closure>" ))
			.field( "reload", &self.reload.as_ref().map(| _ | "<closure>" ))
			.field( "stop", &self.stop.as_ref().map(| _ | "<closure>" ))
			.finish()
	}
}

impl EntryPoints {

	#[inline] pub fn new() -> Self { Self::default() }

	pub fn with_init( mut self, init: impl Fn() -> HookResult + Send + Sync + 'static ) -> Self {
		self.init = Some( Arc::new( init ));
		self
	}

	pub fn with_start( mut self, start: impl Fn() -> HookResult + Send + Sync + 'static ) -> Self {
		self.start = Some( Arc::new( start ));
		self
	}

	pub fn with_reload( mut self, reload: impl Fn() -> HookResult + Send + Sync + 'static ) -> Self {
		self.reload = Some( Arc::new( reload ));
		self
	}

	pub fn with_stop( mut self, stop: impl Fn() + Send + Sync + 'static ) -> Self {
		self.stop = Some( Arc::new( stop ));
		self
	}

	/// Whether the unit can be reloaded in place.
	#[inline] pub fn has_reload( &self ) -> bool { self.reload.is_some() }

	pub(crate) fn init( &self ) -> HookResult {
		self.init.as_ref().map_or( Ok(()), | init | init() )
	}

	pub(crate) fn start( &self ) -> HookResult {
		self.start.as_ref().map_or( Ok(()), | start | start() )
	}

	pub(crate) fn reload( &self ) -> Option<HookResult> {
		self.reload.as_ref().map(| reload | reload() )
	}

	pub(crate) fn stop( &self ) {
		if let Some( stop ) = &self.stop { stop() }
	}

}

#[derive( Debug, Default )]
pub(crate) struct ModuleState {
	/// The disposer standing for an explicit administrative load. It lives in
	/// the instance's `users` list, this slot only observes it.
	pub(crate) admin_user: Weak<Disposer>,
	pub(crate) neverload: bool,
}

/// Serializes loads and unloads of one module. Unlike a plain mutex it
/// knows its holder, so a thread coming back for a module it is already
/// loading, from inside an entry point, is turned away instead of blocking
/// on itself.
#[derive( Debug, Default )]
struct LoadGate {
	gate: Mutex<()>,
	holder: Mutex<Option<ThreadId>>,
}

impl LoadGate {
	fn holder( &self ) -> MutexGuard<'_, Option<ThreadId>> {
		self.holder.lock().unwrap_or_else( PoisonError::into_inner )
	}
}

/// Held while a load or unload of one module is in progress.
pub(crate) struct LoadGuard<'a> {
	gate: &'a LoadGate,
	_serial: MutexGuard<'a, ()>,
}

impl Drop for LoadGuard<'_> {
	fn drop( &mut self ) {
		*self.gate.holder() = None ;
	}
}

/// Identity record of one extension unit.
///
/// The record outlives every load cycle of the unit: references to a
/// `Module` stay valid no matter how often it is loaded, reloaded or unloaded.
pub struct Module {
	name: String,
	checksum: String,
	description: RwLock<String>,
	load_priority: i32,
	block_unload: bool,
	export_globals: bool,
	provides: Vec<Capability>,
	uses: Mutex<Vec<Capability>>,
	alldeps: OnceLock<Vec<String>>,
	embedded: OnceLock<EntryPoints>,
	state: Mutex<ModuleState>,
	serial: LoadGate,
	link: RwLock<Weak<LibProxy>>,
}

impl std::fmt::Debug for Module {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::result::Result<(), std::fmt::Error> {
		f.debug_struct( "Module" )
			.field( "name", &self.name )
			.field( "checksum", &self.checksum )
			.field( "load_priority", &self.load_priority )
			.field( "alldeps", &self.alldeps.get() )
			.field( "embedded", &self.embedded.get().is_some() )
			.finish_non_exhaustive()
	}
}

impl Module {

	pub(crate) fn from_manifest( manifest: ModuleManifest ) -> Self {
		let ModuleManifest {
			name, checksum, description, load_priority,
			block_unload, export_globals, provides, uses,
		} = manifest ;
		Self {
			name,
			checksum,
			description: RwLock::new( description ),
			load_priority,
			block_unload,
			export_globals,
			provides,
			uses: Mutex::new( uses ),
			alldeps: OnceLock::new(),
			embedded: OnceLock::new(),
			state: Mutex::new( ModuleState::default() ),
			serial: LoadGate::default(),
			link: RwLock::new( Weak::new() ),
		}
	}

	#[inline] pub fn name( &self ) -> &str { &self.name }
	#[inline] pub fn checksum( &self ) -> &str { &self.checksum }
	pub fn description( &self ) -> String {
		self.description.read().unwrap_or_else( PoisonError::into_inner ).clone()
	}
	#[inline] pub fn load_priority( &self ) -> i32 { self.load_priority }
	#[inline] pub fn block_unload( &self ) -> bool { self.block_unload }
	#[inline] pub fn export_globals( &self ) -> bool { self.export_globals }

	/// Capabilities advertised by this module, excluding the implicit
	/// `("module", name)` one.
	#[inline] pub fn provides( &self ) -> &[Capability] { &self.provides }

	/// Raw capability usages, as declared by the manifest and the `uses`
	/// configuration directives.
	pub fn uses( &self ) -> Vec<Capability> {
		self.uses.lock().unwrap_or_else( PoisonError::into_inner ).clone()
	}

	/// The flattened dependency closure, dependencies first. Empty until the
	/// dependency graph has been built.
	pub fn alldeps( &self ) -> &[String] {
		self.alldeps.get().map_or( &[], Vec::as_slice )
	}

	/// Whether this unit was compiled into the host rather than loaded from disk.
	#[inline] pub fn is_embedded( &self ) -> bool { self.embedded.get().is_some() }

	pub fn is_neverload( &self ) -> bool { self.lock().neverload }

	/// Whether an explicit administrative load currently keeps this module running.
	pub fn has_admin_user( &self ) -> bool { self.lock().admin_user.strong_count() > 0 }

	/// The running instance, if the weak chain currently resolves to one.
	pub fn instance( &self ) -> Option<Arc<Instance>> {
		self.lib().and_then(| lib | lib.instance() )
	}

	/// Short-lived access to the per-module flags. Never held while entry
	/// points run.
	pub(crate) fn lock( &self ) -> MutexGuard<'_, ModuleState> {
		self.state.lock().unwrap_or_else( PoisonError::into_inner )
	}

	/// Waits for any other thread loading or unloading this module. `None`
	/// when the calling thread is already doing so further up its stack.
	pub(crate) fn serialize( &self ) -> Option<LoadGuard<'_>> {
		let current = thread::current().id();
		if *self.serial.holder() == Some( current ) { return None }
		let serial = self.serial.gate.lock().unwrap_or_else( PoisonError::into_inner );
		*self.serial.holder() = Some( current );
		Some( LoadGuard { gate: &self.serial, _serial: serial })
	}

	pub(crate) fn set_description( &self, description: String ) {
		*self.description.write().unwrap_or_else( PoisonError::into_inner ) = description ;
	}

	pub(crate) fn add_use( &self, capability: Capability ) {
		let mut uses = self.uses.lock().unwrap_or_else( PoisonError::into_inner );
		if !uses.contains( &capability ) { uses.push( capability ) }
	}

	#[inline] pub(crate) fn alldeps_built( &self ) -> Option<&[String]> { self.alldeps.get().map( Vec::as_slice ) }
	#[inline] pub(crate) fn set_alldeps( &self, alldeps: Vec<String> ) -> bool { self.alldeps.set( alldeps ).is_ok() }

	#[inline] pub(crate) fn embedded( &self ) -> Option<&EntryPoints> { self.embedded.get() }
	#[inline] pub(crate) fn set_embedded( &self, entry: EntryPoints ) -> bool { self.embedded.set( entry ).is_ok() }

	pub(crate) fn proxy( &self ) -> Option<Arc<LibProxy>> {
		self.link.read().unwrap_or_else( PoisonError::into_inner ).upgrade()
	}

	pub(crate) fn lib( &self ) -> Option<Arc<Lib>> {
		self.proxy().map(| proxy | Arc::clone( proxy.lib() ))
	}

	pub(crate) fn set_link( &self, proxy: &Arc<LibProxy> ) {
		*self.link.write().unwrap_or_else( PoisonError::into_inner ) = Arc::downgrade( proxy );
	}

}

#[cfg( test )]
mod tests {

	use super::* ;

	#[test]
	fn serialize_refuses_the_holding_thread() {

		let module = Arc::new( Module::from_manifest( ModuleManifest::new( "res-test", "00" )));
		let guard = module.serialize().expect( "Gate is free" );
		assert!( module.serialize().is_none() );

		// Another thread waits instead of being refused.
		let waiter = {
			let module = Arc::clone( &module );
			thread::spawn( move || module.serialize().is_some() )
		};
		drop( guard );
		assert!( waiter.join().expect( "Waiting thread panicked" ));
		assert!( module.serialize().is_some() );

	}

}
