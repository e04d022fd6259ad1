//! Reload requests: executed on the spot once the loader runs normally,
//! queued while it is still starting up.

use std::sync::{ Arc, Mutex, PoisonError, TryLockError };
use tracing::{ error, info, warn };

use crate::{ Loader, Module, Runlevel };
use crate::linkage::Lib ;



/// Outcome of a reload request.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash )]
pub enum ReloadResult {
	Success,
	/// The module is not running, or nothing is running at all.
	NotFound,
	/// The module has no reload entry point.
	NotImplemented,
	/// The reload entry point failed. The module keeps running.
	Error,
	/// Another reload is executing.
	InProgress,
	/// The loader is still starting; the request runs once it is done.
	Queued,
	/// The loader is not ready to execute or queue requests yet.
	Uninitialized,
}

#[derive( Debug, Default )]
struct PendingReloads {
	full: bool,
	modules: Vec<Arc<Module>>,
}

impl PendingReloads {
	fn push( &mut self, module: Option<&Arc<Module>> ) {
		match module {
			None => {
				self.full = true ;
				self.modules.clear();
			},
			Some( _ ) if self.full => {},
			Some( module ) => if !self.modules.iter().any(| queued | Arc::ptr_eq( queued, module )) {
				self.modules.push( Arc::clone( module ));
			},
		}
	}
}

/// Reload serialization and the startup queue.
#[derive( Debug, Default )]
pub(crate) struct ReloadQueue {
	executing: Mutex<()>,
	pending: Mutex<PendingReloads>,
}

impl Loader {

	/// Reloads `module`, or every running module when `None`.
	///
	/// While the loader is starting up the request is queued; queuing a
	/// module twice, or queuing anything after a full reload, has no further
	/// effect. A full reload replaces everything queued before it.
	pub fn reload( &self, module: Option<&Arc<Module>> ) -> ReloadResult {

		let queue = &self.shared.reloads ;
		let _executing = match queue.executing.try_lock() {
			Ok( guard ) => guard,
			Err( TryLockError::Poisoned( poisoned )) => poisoned.into_inner(),
			Err( TryLockError::WouldBlock ) => {
				warn!( "A module reload request is already in progress" );
				return ReloadResult::InProgress ;
			},
		};

		match self.registry().runlevel() {
			Runlevel::Embedding => ReloadResult::Uninitialized,
			Runlevel::Loading => {
				queue.pending.lock().unwrap_or_else( PoisonError::into_inner ).push( module );
				ReloadResult::Queued
			},
			Runlevel::Normal => self.execute_reload( module ),
		}

	}

	fn execute_reload( &self, module: Option<&Arc<Module>> ) -> ReloadResult {

		let libs = match module {
			Some( module ) => match self.shared.running_lib( module.name() ) {
				Some( lib ) => vec![ lib ],
				None => {
					warn!( module = %module.name(), "Reload requested for module that is not running" );
					return ReloadResult::NotFound ;
				},
			},
			None => self.shared.running_libs(),
		};

		let results = libs.iter().map( reload_lib ).collect::<Vec<_>>();
		match ( module, results.as_slice() ) {
			( _, [] ) => ReloadResult::NotFound,
			( Some( _ ), [ result ]) => *result,
			( _, results ) => match results.contains( &ReloadResult::Success ) {
				true => ReloadResult::Success,
				false => ReloadResult::Error,
			},
		}

	}

	/// Moves the loader to [`Runlevel::Normal`] and executes what was queued
	/// during startup. A queued full reload runs once in place of everything
	/// else.
	///
	/// Requests from other threads report [`ReloadResult::InProgress`] until
	/// the queue has been drained.
	pub fn process_pending_reloads( &self ) {

		let _executing = self.shared.reloads.executing.lock().unwrap_or_else( PoisonError::into_inner );
		self.registry().set_runlevel( Runlevel::Normal );
		let pending = std::mem::take( &mut *self.shared.reloads.pending.lock().unwrap_or_else( PoisonError::into_inner ));

		if pending.full {
			info!( "Executing deferred reload of all modules" );
			self.execute_reload( None );
			return ;
		}

		for module in pending.modules {
			info!( module = %module.name(), "Executing deferred reload" );
			self.execute_reload( Some( &module ));
		}

	}

}

fn reload_lib( lib: &Arc<Lib> ) -> ReloadResult {

	let module = lib.module();
	let Some( entry ) = lib.entry_points().filter(| entry | entry.has_reload() ) else {
		warn!( module = %module.name(), "Module does not support reloading" );
		return ReloadResult::NotImplemented ;
	};

	if lib.instance().is_none() {
		warn!( module = %module.name(), "Module is not ready to be reloaded" );
		return ReloadResult::Uninitialized ;
	}

	match entry.reload() {
		None => ReloadResult::NotImplemented,
		Some( Ok(()) ) => {
			info!( module = %module.name(), "Module reloaded" );
			ReloadResult::Success
		},
		Some( Err( err )) => {
			error!( module = %module.name(), %err, "Module reload failed" );
			ReloadResult::Error
		},
	}

}

#[cfg( test )]
mod tests {

	use super::* ;
	use crate::ModuleManifest ;

	fn module( name: &str ) -> Arc<Module> {
		Arc::new( Module::from_manifest( ModuleManifest::new( name, "sum" )))
	}

	#[test]
	fn queued_modules_are_deduplicated() {
		let a = module( "a" );
		let mut pending = PendingReloads::default();
		pending.push( Some( &a ));
		pending.push( Some( &a ));
		assert_eq!( pending.modules.len(), 1 );
		assert!( !pending.full );
	}

	#[test]
	fn full_reload_replaces_queued_modules() {
		let ( a, b ) = ( module( "a" ), module( "b" ));
		let mut pending = PendingReloads::default();
		pending.push( Some( &a ));
		pending.push( None );
		pending.push( Some( &b ));
		assert!( pending.full );
		assert!( pending.modules.is_empty() );
	}

}
