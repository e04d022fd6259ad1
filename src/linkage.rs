//! The re-bindable chain between a [`Module`] and its running [`Instance`].
//!
//! ```text
//! Module --weak--> LibProxy --strong--> Lib --weak--> Instance
//! ```
//!
//! A module only ever observes its current load cycle through weak links, so
//! a reader racing an unload sees "gone" rather than a dangling object. The
//! proxy exists so the module's link can be pointed at a fresh [`Lib`]
//! without touching anything that holds the module itself.

use std::sync::{ Arc, Mutex, OnceLock, PoisonError, RwLock, Weak };
use tracing::{ debug, error };

use crate::{ EntryPoints, Instance, Module };
use crate::library::UnitHandle ;
use crate::loader::Shared ;
use crate::teardown ;



/// Current link target of a module, holding its [`Lib`] alive.
#[derive( Debug )]
pub struct LibProxy {
	lib: Arc<Lib>,
}

impl LibProxy {
	pub(crate) fn new( lib: Lib ) -> Self { Self { lib: Arc::new( lib ) }}
	#[inline] pub fn lib( &self ) -> &Arc<Lib> { &self.lib }
}

/// One load cycle of a module's unit.
///
/// Dropping the last reference closes the unit and takes the module out of
/// the loaded set. The libs of every dependency stay open at least as long
/// as this one, through the proxies held in `using`.
pub struct Lib {
	module: Arc<Module>,
	handle: Mutex<Option<Box<dyn UnitHandle>>>,
	entry: OnceLock<EntryPoints>,
	using: Mutex<Vec<Arc<LibProxy>>>,
	instance: RwLock<Weak<Instance>>,
	shared: Weak<Shared>,
}

impl std::fmt::Debug for Lib {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::result::Result<(), std::fmt::Error> {
		f.debug_struct( "Lib" )
			.field( "module", &self.module.name() )
			.field( "registered", &self.entry.get().is_some() )
			.field( "using", &self.using.lock().unwrap_or_else( PoisonError::into_inner ).len() )
			.finish_non_exhaustive()
	}
}

impl Lib {

	pub(crate) fn new( module: Arc<Module>, shared: Weak<Shared> ) -> Self {
		let using = Vec::with_capacity( module.alldeps().len() );
		Self {
			module,
			handle: Mutex::new( None ),
			entry: OnceLock::new(),
			using: Mutex::new( using ),
			instance: RwLock::new( Weak::new() ),
			shared,
		}
	}

	#[inline] pub fn module( &self ) -> &Arc<Module> { &self.module }

	/// The entry points the unit registered, once it has.
	#[inline] pub fn entry_points( &self ) -> Option<&EntryPoints> { self.entry.get() }

	/// The instance this cycle materialised, while it is alive.
	pub fn instance( &self ) -> Option<Arc<Instance>> {
		self.instance.read().unwrap_or_else( PoisonError::into_inner ).upgrade()
	}

	#[inline] pub(crate) fn attach( &self, entry: EntryPoints ) -> bool { self.entry.set( entry ).is_ok() }

	pub(crate) fn set_handle( &self, handle: Box<dyn UnitHandle> ) {
		*self.handle.lock().unwrap_or_else( PoisonError::into_inner ) = Some( handle );
	}

	pub(crate) fn push_using( &self, proxy: Arc<LibProxy> ) {
		self.using.lock().unwrap_or_else( PoisonError::into_inner ).push( proxy );
	}

	pub(crate) fn set_instance( &self, instance: &Arc<Instance> ) {
		*self.instance.write().unwrap_or_else( PoisonError::into_inner ) = Arc::downgrade( instance );
	}

}

impl Drop for Lib {
	fn drop( &mut self ) {

		let handle = self.handle.get_mut().unwrap_or_else( PoisonError::into_inner ).take();
		if let Some( handle ) = handle {
			if let Err( err ) = handle.close() {
				error!( module = %self.module.name(), %err, "Failure closing module unit" );
			}
		}

		if let Some( shared ) = self.shared.upgrade() {
			shared.unmark_loaded( self.module.name(), self );
		}

		debug!( module = %self.module.name(), "Library released" );
		teardown::release( std::mem::take( self.using.get_mut().unwrap_or_else( PoisonError::into_inner )));

	}
}
