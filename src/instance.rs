use std::sync::{ Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak };
use tracing::info ;

use crate::{ Disposer, Module };
use crate::linkage::{ Lib, LibProxy };
use crate::loader::Shared ;
use crate::teardown ;



/// A running module.
///
/// An instance exists only after its unit's `init` and `start` both
/// succeeded. It is kept alive by the [`Disposer`]s in its `users` list;
/// once the last one lets go the instance tears itself down: `stop` runs,
/// the disposers it holds on its dependencies are released, and its lib
/// leaves the running set.
pub struct Instance {
	module: Arc<Module>,
	proxy: Arc<LibProxy>,
	users: RwLock<Vec<Arc<Disposer>>>,
	using: RwLock<Vec<Arc<Disposer>>>,
	shared: Weak<Shared>,
}

impl std::fmt::Debug for Instance {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::result::Result<(), std::fmt::Error> {
		f.debug_struct( "Instance" )
			.field( "module", &self.module.name() )
			.field( "users", &self.users_len() )
			.field( "using", &self.using_len() )
			.finish_non_exhaustive()
	}
}

impl Instance {

	pub(crate) fn new( module: Arc<Module>, proxy: Arc<LibProxy>, using: Vec<Arc<Disposer>>, shared: Weak<Shared> ) -> Self {
		Self {
			module,
			proxy,
			users: RwLock::new( Vec::with_capacity( 1 )),
			using: RwLock::new( using ),
			shared,
		}
	}

	#[inline] pub fn module( &self ) -> &Arc<Module> { &self.module }
	#[inline] pub fn lib( &self ) -> &Arc<Lib> { self.proxy.lib() }
	#[inline] pub(crate) fn proxy( &self ) -> &Arc<LibProxy> { &self.proxy }

	/// Number of parties that must let go before this instance may stop.
	pub fn users_len( &self ) -> usize { self.users().len() }

	/// Number of dependency edges this instance holds.
	pub fn using_len( &self ) -> usize {
		self.using.read().unwrap_or_else( PoisonError::into_inner ).len()
	}

	pub(crate) fn users( &self ) -> RwLockReadGuard<'_, Vec<Arc<Disposer>>> {
		self.users.read().unwrap_or_else( PoisonError::into_inner )
	}

	pub(crate) fn users_mut( &self ) -> RwLockWriteGuard<'_, Vec<Arc<Disposer>>> {
		self.users.write().unwrap_or_else( PoisonError::into_inner )
	}

	pub(crate) fn using( &self ) -> RwLockReadGuard<'_, Vec<Arc<Disposer>>> {
		self.using.read().unwrap_or_else( PoisonError::into_inner )
	}

}

impl Drop for Instance {
	fn drop( &mut self ) {

		info!( module = %self.module.name(), "Unloading module" );

		if let Some( entry ) = self.lib().entry_points() { entry.stop() }

		let using = std::mem::take( self.using.get_mut().unwrap_or_else( PoisonError::into_inner ));
		using.iter().for_each(| disposer | disposer.destroy() );
		teardown::release( using );

		if let Some( shared ) = self.shared.upgrade() {
			shared.unmark_running( self.module.name(), self.proxy.lib() );
		}

	}
}
