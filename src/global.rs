//! Process-wide loader for hosts with a single module loader.
//!
//! Modules and front ends that cannot be handed a [`Loader`] reach the
//! installed one through these functions. Without an installed loader,
//! lookups find nothing and requests fail.

use std::sync::{ Arc, PoisonError, RwLock };
use tracing::warn ;

use crate::{ CompletionFilter, ForceLevel, LoadError, Loader, Module, ReloadResult };



static CURRENT: RwLock<Option<Loader>> = RwLock::new( None );

/// Makes `loader` the process-wide loader, returning the one it replaces.
pub fn install( loader: Loader ) -> Option<Loader> {
	let previous = CURRENT.write().unwrap_or_else( PoisonError::into_inner ).replace( loader );
	if previous.is_some() { warn!( "Replacing the installed module loader" ) }
	previous
}

/// The installed loader.
pub fn current() -> Option<Loader> {
	CURRENT.read().unwrap_or_else( PoisonError::into_inner ).clone()
}

/// Shuts the installed loader down and uninstalls it.
pub fn teardown() {
	let loader = CURRENT.write().unwrap_or_else( PoisonError::into_inner ).take();
	if let Some( loader ) = loader { loader.shutdown() }
}

pub fn module_find( name: &str ) -> Option<Arc<Module>> {
	current()?.find( name )
}

pub fn module_load( module: &Arc<Module> ) -> Result<(), LoadError> {
	current().ok_or( LoadError::NoLoader )?.load( module )
}

pub fn module_unload( module: &Arc<Module>, force: impl Into<ForceLevel> ) {
	if let Some( loader ) = current() { loader.unload( module, force ) }
}

pub fn module_reload( module: Option<&Arc<Module>> ) -> ReloadResult {
	current().map_or( ReloadResult::Uninitialized, | loader | loader.reload( module ))
}

pub fn module_is_running( module: &Module ) -> bool {
	current().is_some_and(| loader | loader.is_running( module ))
}

pub fn module_instance_refs( module: &Module ) -> usize {
	current().map_or( 0, | loader | loader.instance_refs( module ))
}

pub fn module_complete( word: &str, filter: CompletionFilter ) -> Vec<String> {
	current().map_or_else( Vec::new, | loader | loader.complete( word, filter ))
}
