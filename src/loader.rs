//! The lifecycle manager: loading modules with their dependencies,
//! unloading them through the disposer protocol, and the queries front
//! ends run against the loaded and running sets.

use std::collections::BTreeMap ;
use std::sync::{ Arc, PoisonError, RwLock, Weak };
use std::sync::atomic::{ AtomicBool, Ordering };
use thiserror::Error ;
use tracing::{ debug, error, info, warn };

use crate::{ Disposer, Disposition, ForceLevel, HookError, Instance, Module, Registry, run_disposers };
use crate::config::{ ConfigError, LoaderConfig };
use crate::library::{ LibraryLoader, OpenRequest };
use crate::linkage::{ Lib, LibProxy };
use crate::registry::KeyVerifier ;
use crate::reload::ReloadQueue ;



/// The step of a load that failed.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash )]
pub enum LoadPhase {
	/// The dynamic-load primitive failed.
	Open,
	/// The unit opened but did not register, or its registration was rejected.
	Register,
	Init,
	Start,
}

impl std::fmt::Display for LoadPhase {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		f.write_str( match self {
			Self::Open => "open",
			Self::Register => "registration",
			Self::Init => "initialization",
			Self::Start => "start",
		})
	}
}

/// Errors returned by [`Loader::load`].
///
/// Every failure leaves nothing behind: whatever the attempt acquired has
/// been released by the time the error is returned.
#[derive( Error, Debug )]
pub enum LoadError {
	#[error( "Module '{0}' is not known" )] NotFound( String ),
	#[error( "Module '{0}' is flagged to neverload" )] NeverloadBlocked( String ),
	#[error( "Module '{0}' has not yet completed unload, try again later" )] TransientUnloadInProgress( String ),
	/// An entry point of the module asked for the module's own load.
	#[error( "Module '{0}' is being loaded by the calling thread" )] LoadInProgress( String ),
	#[error( "The module loader is shutting down" )] ShuttingDown,
	#[error( "No module loader is installed" )] NoLoader,
	#[error( "Module '{module}' failed to load dependency '{dependency}': {source}" )]
	Dependency { module: String, dependency: String, #[source] source: Box<LoadError> },
	#[error( "Module '{module}' failed during {phase}: {source}" )]
	Phase { module: String, phase: LoadPhase, #[source] source: HookError },
}

impl LoadError {

	fn phase( module: &str, phase: LoadPhase, source: impl Into<HookError> ) -> Self {
		Self::Phase { module: module.to_string(), phase, source: source.into() }
	}

	/// Whether retrying later may succeed without any configuration change.
	pub fn is_transient( &self ) -> bool {
		match self {
			Self::TransientUnloadInProgress( _ ) => true,
			Self::Dependency { source, .. } => source.is_transient(),
			_ => false,
		}
	}

	/// The phase that failed, looking through dependency failures.
	pub fn failed_phase( &self ) -> Option<LoadPhase> {
		match self {
			Self::Phase { phase, .. } => Some( *phase ),
			Self::Dependency { source, .. } => source.failed_phase(),
			_ => None,
		}
	}

}

/// Which modules a name-completion query offers.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash )]
pub enum CompletionFilter {
	All,
	/// Kept running by an explicit administrative load.
	AdminLoaded,
	/// Unit currently open.
	Loaded,
	/// Unit not open.
	Unloaded,
	/// Running with a reload entry point.
	Reloadable,
	/// Not running and not banned.
	CanLoad,
}

/// State shared between a [`Loader`] and the objects of its load cycles.
pub(crate) struct Shared {
	pub(crate) registry: Registry,
	loaded: RwLock<BTreeMap<String, ( Arc<Module>, Weak<Lib> )>>,
	running: RwLock<BTreeMap<String, Arc<Lib>>>,
	pub(crate) reloads: ReloadQueue,
	backend: Box<dyn LibraryLoader>,
	config: LoaderConfig,
	shutting_down: Arc<AtomicBool>,
}

/// Handle to a module loader.
///
/// Cloning is cheap and every clone drives the same loader.
#[derive( Clone )]
pub struct Loader {
	pub(crate) shared: Arc<Shared>,
}

impl std::fmt::Debug for Loader {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::result::Result<(), std::fmt::Error> {
		f.debug_struct( "Loader" )
			.field( "registry", &self.shared.registry )
			.field( "loaded", &self.loaded() )
			.field( "running", &self.running() )
			.finish_non_exhaustive()
	}
}

impl Loader {

	/// Creates a loader in [`Runlevel::Embedding`]( crate::Runlevel::Embedding ).
	///
	/// Key verification follows `config.key_digest`.
	///
	/// # Errors
	/// Fails when the configured key digest is malformed.
	pub fn new( config: LoaderConfig, backend: impl LibraryLoader + 'static ) -> Result<Self, ConfigError> {
		let verifier = config.verifier()?.map(| verifier | Box::new( verifier ) as Box<dyn KeyVerifier> );
		Ok( Self::with_verifier( config, backend, verifier ))
	}

	/// Creates a loader using a custom key verifier. `None` accepts every unit.
	pub fn with_verifier(
		config: LoaderConfig,
		backend: impl LibraryLoader + 'static,
		verifier: Option<Box<dyn KeyVerifier>>,
	) -> Self {
		let registry = Registry::new( verifier, config.build_options_sum.clone() );
		Self { shared: Arc::new( Shared {
			registry,
			loaded: RwLock::new( BTreeMap::new() ),
			running: RwLock::new( BTreeMap::new() ),
			reloads: ReloadQueue::default(),
			backend: Box::new( backend ),
			config,
			shutting_down: Arc::new( AtomicBool::new( false )),
		})}
	}

	#[inline] pub fn registry( &self ) -> &Registry { &self.shared.registry }
	#[inline] pub fn config( &self ) -> &LoaderConfig { &self.shared.config }

	pub fn find( &self, name: &str ) -> Option<Arc<Module>> { self.shared.registry.find( name ) }

	/// Loads `module` and everything it depends on, and records an
	/// administrative hold on it. Loading a module that already has one
	/// succeeds without doing anything.
	///
	/// Loads of the same module are serialized. An entry point that asks for
	/// a module its own load is still working on gets
	/// [`LoadError::LoadInProgress`].
	///
	/// # Errors
	/// See [`LoadError`]. Transient failures are flagged by
	/// [`LoadError::is_transient`].
	pub fn load( &self, module: &Arc<Module> ) -> Result<(), LoadError> {
		let _serial = module.serialize().ok_or_else(|| reentered( module ))?;
		if module.has_admin_user() { return Ok(()) }
		let instance = self.shared.load_instance( module, module.is_neverload() )?;
		let admin = Disposer::alloc( &instance, release_admin );
		module.lock().admin_user = Arc::downgrade( &admin );
		Ok(())
	}

	/// Drops the administrative hold on `module` and asks everything else
	/// holding it to let go at `force`.
	///
	/// The module stops once nothing holds it any more. Dependents are asked
	/// first, so with enough force they stop before it does.
	pub fn unload( &self, module: &Arc<Module>, force: impl Into<ForceLevel> ) {

		let level = force.into();
		let ( admin, instance ) = {
			let Some( _serial ) = module.serialize() else {
				warn!( module = %module.name(), "Unload requested from within the module's own load" );
				return ;
			};
			let admin = std::mem::take( &mut module.lock().admin_user ).upgrade();
			let instance = admin.as_ref()
				.map(| admin | Arc::clone( admin.instance() ))
				.or_else(|| module.instance() );
			( admin, instance )
		};

		let Some( instance ) = instance else {
			debug!( module = %module.name(), "Unload requested for module that is not running" );
			return ;
		};

		info!( module = %module.name(), ?level, "Unload requested" );
		if let Some( admin ) = admin { admin.destroy() }
		run_disposers( &instance, level );

	}

	pub fn is_running( &self, module: &Module ) -> bool {
		self.shared.running.read().unwrap_or_else( PoisonError::into_inner ).contains_key( module.name() )
	}

	/// Number of holds on the module's running instance: one per disposer
	/// referencing it, including edges already settled whose dependent has
	/// not finished stopping. Zero when the module is not running.
	pub fn instance_refs( &self, module: &Module ) -> usize {
		module.instance().map_or( 0, | instance | Arc::strong_count( &instance ).saturating_sub( 1 ))
	}

	/// The running instance of `module`. Allocating a [`Disposer`] on it
	/// keeps the module running until the disposer is destroyed or accepts a
	/// release request.
	pub fn instance( &self, module: &Module ) -> Option<Arc<Instance>> { module.instance() }

	/// Names of modules whose unit is open, ordered by name.
	pub fn loaded( &self ) -> Vec<String> {
		self.shared.loaded.read().unwrap_or_else( PoisonError::into_inner ).keys().cloned().collect()
	}

	/// Names of running modules, ordered by name.
	pub fn running( &self ) -> Vec<String> {
		self.shared.running.read().unwrap_or_else( PoisonError::into_inner ).keys().cloned().collect()
	}

	/// Module names starting with `word`, ignoring case, that pass `filter`.
	pub fn complete( &self, word: &str, filter: CompletionFilter ) -> Vec<String> {
		let word = word.to_lowercase();
		self.shared.registry.modules().into_iter()
			.filter(| module | module.name().to_lowercase().starts_with( &word ))
			.filter(| module | self.passes( module, filter ))
			.map(| module | module.name().to_string() )
			.collect()
	}

	fn passes( &self, module: &Module, filter: CompletionFilter ) -> bool {
		match filter {
			CompletionFilter::All => true,
			CompletionFilter::AdminLoaded => module.has_admin_user(),
			CompletionFilter::Loaded => self.shared.is_loaded( module.name() ),
			CompletionFilter::Unloaded => !self.shared.is_loaded( module.name() ),
			CompletionFilter::Reloadable => self.shared.running_lib( module.name() )
				.is_some_and(| lib | lib.entry_points().is_some_and(| entry | entry.has_reload() )),
			CompletionFilter::CanLoad => !self.is_running( module ) && !module.is_neverload(),
		}
	}

	/// Stops every module and refuses further loads.
	///
	/// Administrative holds are dropped first, then the running set is asked
	/// to let go at increasing force. `block_unload` modules let go only here.
	pub fn shutdown( &self ) {

		info!( "Module loader shutting down" );
		self.shared.shutting_down.store( true, Ordering::SeqCst );

		for module in self.shared.registry.modules() {
			let admin = std::mem::take( &mut module.lock().admin_user ).upgrade();
			if let Some( admin ) = admin { admin.destroy() }
		}

		for level in [ ForceLevel::Soft, ForceLevel::Firm, ForceLevel::Hard ] {
			let libs = self.shared.running_libs();
			if libs.is_empty() { break }
			libs.iter()
				.filter_map(| lib | lib.instance() )
				.for_each(| instance | run_disposers( &instance, level ));
		}

		let remaining = self.running();
		if !remaining.is_empty() {
			warn!( ?remaining, "Modules still running after shutdown" );
		}

	}

	pub fn is_shutting_down( &self ) -> bool { self.shared.shutting_down.load( Ordering::SeqCst ) }

}

fn reentered( module: &Module ) -> LoadError {
	warn!( module = %module.name(), "Module load re-entered from its own entry points" );
	LoadError::LoadInProgress( module.name().to_string() )
}

/// Administrative holds of dependents give way to firm requests.
fn release_admin( level: ForceLevel ) -> Disposition {
	match level >= ForceLevel::Firm {
		true => Disposition::Accepted,
		false => Disposition::Declined,
	}
}

impl Shared {

	pub(crate) fn is_loaded( &self, name: &str ) -> bool {
		self.loaded.read().unwrap_or_else( PoisonError::into_inner ).contains_key( name )
	}

	pub(crate) fn running_lib( &self, name: &str ) -> Option<Arc<Lib>> {
		self.running.read().unwrap_or_else( PoisonError::into_inner ).get( name ).cloned()
	}

	pub(crate) fn running_libs( &self ) -> Vec<Arc<Lib>> {
		self.running.read().unwrap_or_else( PoisonError::into_inner ).values().cloned().collect()
	}

	pub(crate) fn unmark_loaded( &self, name: &str, lib: &Lib ) {
		let mut loaded = self.loaded.write().unwrap_or_else( PoisonError::into_inner );
		if loaded.get( name ).is_some_and(|( _, entry )| std::ptr::eq( entry.as_ptr(), lib )) {
			loaded.remove( name );
		}
	}

	pub(crate) fn unmark_running( &self, name: &str, lib: &Arc<Lib> ) {
		let removed = {
			let mut running = self.running.write().unwrap_or_else( PoisonError::into_inner );
			match running.get( name ).is_some_and(| entry | Arc::ptr_eq( entry, lib )) {
				true => running.remove( name ),
				false => None,
			}
		};
		drop( removed );
	}

	/// Whether a previous cycle's lib of `name` is still open.
	fn lingering( &self, name: &str ) -> bool {
		self.loaded.read()
			.unwrap_or_else( PoisonError::into_inner )
			.get( name )
			.is_some_and(|( _, lib )| lib.strong_count() > 0 )
	}

	/// Resolves the running instance of `module`, loading it and its
	/// dependencies when needed. The caller serializes on the module.
	fn load_instance( self: &Arc<Self>, module: &Arc<Module>, neverload: bool ) -> Result<Arc<Instance>, LoadError> {

		if self.shutting_down.load( Ordering::SeqCst ) { return Err( LoadError::ShuttingDown ) }

		if let Some( proxy ) = module.proxy() {
			return proxy.lib().instance().ok_or_else(|| {
				warn!( module = %module.name(), "Library has not yet completed unload, try again later" );
				LoadError::TransientUnloadInProgress( module.name().to_string() )
			});
		}
		if self.lingering( module.name() ) {
			warn!( module = %module.name(), "Library has not yet completed unload, try again later" );
			return Err( LoadError::TransientUnloadInProgress( module.name().to_string() ));
		}

		if neverload {
			error!( module = %module.name(), "Module is flagged to neverload, update the modules configuration and restart to use it" );
			return Err( LoadError::NeverloadBlocked( module.name().to_string() ));
		}

		let mut attempt = LoadAttempt::new( LibProxy::new( Lib::new( Arc::clone( module ), Arc::downgrade( self ))));

		for dependency in module.alldeps() {
			let instance = self.load_dependency( dependency ).map_err(| source | {
				error!( module = %module.name(), %dependency, "Dependency failure" );
				LoadError::Dependency { module: module.name().to_string(), dependency: dependency.clone(), source: Box::new( source )}
			})?;
			attempt.lib().push_using( Arc::clone( instance.proxy() ));
			attempt.edges.push( Disposer::alloc_edge( &instance ));
		}

		info!( module = %module.name(), "Loading module" );
		module.set_link( &attempt.proxy );
		self.open( module, attempt.lib() )?;

		let entry = attempt.lib().entry_points().cloned().unwrap_or_default();
		entry.init().map_err(| err | {
			error!( module = %module.name(), %err, "Initialization failed" );
			LoadError::phase( module.name(), LoadPhase::Init, err )
		})?;
		attempt.initialized = true ;
		self.mark_loaded( module, attempt.lib() );

		entry.start().map_err(| err | {
			error!( module = %module.name(), %err, "Start failed" );
			LoadError::phase( module.name(), LoadPhase::Start, err )
		})?;
		self.running.write()
			.unwrap_or_else( PoisonError::into_inner )
			.insert( module.name().to_string(), Arc::clone( attempt.lib() ));

		let instance = attempt.commit( module, Arc::downgrade( self ));
		if module.block_unload() {
			let shutting_down = Arc::clone( &self.shutting_down );
			Disposer::alloc( &instance, move | _ | match shutting_down.load( Ordering::SeqCst ) {
				true => Disposition::Accepted,
				false => Disposition::Declined,
			});
		}

		info!( module = %module.name(), description = %module.description(), "Started module" );
		Ok( instance )

	}

	fn load_dependency( self: &Arc<Self>, name: &str ) -> Result<Arc<Instance>, LoadError> {
		let module = self.registry.find( name ).ok_or_else(|| LoadError::NotFound( name.to_string() ))?;
		let _serial = module.serialize().ok_or_else(|| reentered( &module ))?;
		self.load_instance( &module, module.is_neverload() )
	}

	fn open( &self, module: &Module, lib: &Lib ) -> Result<(), LoadError> {

		if let Some( entry ) = module.embedded() {
			lib.attach( entry.clone() );
			return Ok(());
		}

		let path = self.config.module_path( module.name() );
		let request = OpenRequest::new( module.name(), &path, module.export_globals(), &self.registry );
		let handle = self.backend.open( &request ).map_err(| err | {
			error!( module = %module.name(), %err, "Error loading module" );
			LoadError::phase( module.name(), LoadPhase::Open, err )
		})?;
		lib.set_handle( handle );

		match lib.entry_points() {
			Some( _ ) => Ok(()),
			None => {
				error!( module = %module.name(), "Module unit did not register" );
				Err( LoadError::phase( module.name(), LoadPhase::Register, "unit did not register" ))
			},
		}

	}

	fn mark_loaded( &self, module: &Arc<Module>, lib: &Arc<Lib> ) {
		self.loaded.write()
			.unwrap_or_else( PoisonError::into_inner )
			.insert( module.name().to_string(), ( Arc::clone( module ), Arc::downgrade( lib )));
	}

}

/// Everything a load acquired before its instance exists.
///
/// Dropping an uncommitted attempt unwinds it: `stop` runs if `init` had
/// succeeded, the dependency edges are released, and the lib closes with
/// the proxy.
struct LoadAttempt {
	proxy: Arc<LibProxy>,
	edges: Vec<Arc<Disposer>>,
	initialized: bool,
}

impl LoadAttempt {

	fn new( proxy: LibProxy ) -> Self {
		Self { proxy: Arc::new( proxy ), edges: Vec::new(), initialized: false }
	}

	#[inline] fn lib( &self ) -> &Arc<Lib> { self.proxy.lib() }

	fn commit( mut self, module: &Arc<Module>, shared: Weak<Shared> ) -> Arc<Instance> {
		let edges = std::mem::take( &mut self.edges );
		self.initialized = false ;
		let instance = Arc::new( Instance::new( Arc::clone( module ), Arc::clone( &self.proxy ), edges, shared ));
		instance.using().iter().for_each(| edge | edge.bind_dependent( &instance ));
		self.lib().set_instance( &instance );
		instance
	}

}

impl Drop for LoadAttempt {
	fn drop( &mut self ) {
		if self.initialized {
			if let Some( entry ) = self.lib().entry_points() { entry.stop() }
		}
		let edges = std::mem::take( &mut self.edges );
		edges.iter().for_each(| edge | edge.destroy() );
	}
}
