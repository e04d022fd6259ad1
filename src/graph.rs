//! Flattening of declared capability usages into per-module dependency closures.

use std::collections::HashMap ;
use std::sync::Arc ;
use itertools::Itertools ;
use nonempty_collections::NEVec ;
use thiserror::Error ;
use tracing::{ debug, error };

use crate::{ Capability, Module, Registry };



/// Errors that make the dependency graph unusable. Both abort startup.
#[derive( Error, Debug, Clone )]
pub enum GraphError {
	#[error( "Module '{module}' uses {capability} but nothing provides it" )]
	Unresolved { module: String, capability: Capability },
	/// The path starts and ends with the same module.
	#[error( "Loop detected in module dependencies: {}", Vec::from( .0.clone() ).join( " -> " ))]
	LoopDetected( NEVec<String> ),
}

#[derive( Debug )]
enum Closure {
	Resolving,
	Resolved( Vec<String> ),
}

/// Computes `alldeps` for every module in the registry.
///
/// The closure of a module lists, for each direct provider in declaration
/// order, the provider's own closure followed by the provider itself, with
/// duplicates removed. Loading a closure front to back therefore always
/// starts a dependency before anything that needs it.
///
/// Closures are computed once; modules whose closure is already set keep it.
///
/// # Errors
/// Fails on the first usage no module provides, and on any dependency loop,
/// a module using a capability it provides itself included.
pub fn build_alldeps( registry: &Registry ) -> Result<(), GraphError> {

	let modules = registry.modules();
	let mut closures: HashMap<String, Closure> = modules.iter()
		.filter_map(| module | module.alldeps_built().map(| deps | ( module.name().to_string(), Closure::Resolved( deps.to_vec() ))))
		.collect();

	for module in &modules {
		let mut path = Vec::new();
		let alldeps = resolve( registry, module, &mut closures, &mut path )?;
		if module.set_alldeps( alldeps ) {
			debug!( module = %module.name(), alldeps = ?module.alldeps(), "Dependency closure built" );
		}
	}

	Ok(())

}

fn resolve(
	registry: &Registry,
	module: &Arc<Module>,
	closures: &mut HashMap<String, Closure>,
	path: &mut Vec<String>,
) -> Result<Vec<String>, GraphError> {

	match closures.get( module.name() ) {
		Some( Closure::Resolved( alldeps )) => return Ok( alldeps.clone() ),
		Some( Closure::Resolving ) => {
			let start = path.iter().position(| name | name == module.name() ).unwrap_or( 0 );
			let mut cycle = NEVec::new( module.name().to_string() );
			path[ start + 1.. ].iter().for_each(| name | cycle.push( name.clone() ));
			cycle.push( module.name().to_string() );
			let err = GraphError::LoopDetected( cycle );
			error!( %err, "Module dependency graph failed" );
			return Err( err );
		},
		None => {},
	}

	closures.insert( module.name().to_string(), Closure::Resolving );
	path.push( module.name().to_string() );

	let mut alldeps = Vec::new();
	for capability in module.uses() {
		let Some( provider ) = registry.find_provider( capability.kind(), capability.id() ) else {
			error!( module = %module.name(), %capability, "Failed to find provider" );
			return Err( GraphError::Unresolved { module: module.name().to_string(), capability });
		};
		alldeps.extend( resolve( registry, &provider, closures, path )? );
		alldeps.push( provider.name().to_string() );
	}
	let alldeps = alldeps.into_iter().unique().collect_vec();

	path.pop();
	closures.insert( module.name().to_string(), Closure::Resolved( alldeps.clone() ));
	Ok( alldeps )

}

#[cfg( test )]
mod tests {

	use super::* ;
	use crate::ModuleManifest ;

	fn registry( manifests: impl IntoIterator<Item = ModuleManifest> ) -> Registry {
		let registry = Registry::default();
		manifests.into_iter().for_each(| manifest | { registry.insert( manifest ).unwrap(); });
		registry
	}

	fn alldeps( registry: &Registry, name: &str ) -> Vec<String> {
		registry.find( name ).unwrap().alldeps().to_vec()
	}

	#[test]
	fn provider_lookup_resolves_capability() {
		let registry = registry([
			ModuleManifest::new( "codec-g711", "a" ).providing( "codec", "g711" ),
			ModuleManifest::new( "chan-sip", "b" ).using( "codec", "g711" ),
		]);
		build_alldeps( &registry ).unwrap();
		assert_eq!( alldeps( &registry, "chan-sip" ), vec![ "codec-g711" ]);
		assert!( alldeps( &registry, "codec-g711" ).is_empty() );
	}

	#[test]
	fn transitive_dependencies_come_first() {
		let registry = registry([
			ModuleManifest::new( "a", "a" ).depending_on( "b" ).depending_on( "c" ),
			ModuleManifest::new( "b", "b" ).depending_on( "d" ),
			ModuleManifest::new( "c", "c" ).depending_on( "d" ),
			ModuleManifest::new( "d", "d" ),
		]);
		build_alldeps( &registry ).unwrap();
		assert_eq!( alldeps( &registry, "a" ), vec![ "d", "b", "c" ]);
		assert_eq!( alldeps( &registry, "b" ), vec![ "d" ]);
	}

	#[test]
	fn unresolved_usage_is_fatal() {
		let registry = registry([ ModuleManifest::new( "chan-sip", "b" ).using( "codec", "g711" ) ]);
		match build_alldeps( &registry ) {
			Err( GraphError::Unresolved { module, capability }) => {
				assert_eq!( module, "chan-sip" );
				assert_eq!( capability, Capability::new( "codec", "g711" ));
			},
			other => panic!( "Expected unresolved usage, found: {:?}", other ),
		}
	}

	#[test]
	fn loop_reports_path() {
		let registry = registry([
			ModuleManifest::new( "a", "a" ).depending_on( "b" ),
			ModuleManifest::new( "b", "b" ).depending_on( "c" ),
			ModuleManifest::new( "c", "c" ).depending_on( "a" ),
		]);
		match build_alldeps( &registry ) {
			Err( GraphError::LoopDetected( cycle )) => assert_eq!( Vec::from( cycle ), vec![ "a", "b", "c", "a" ]),
			other => panic!( "Expected loop, found: {:?}", other ),
		}
	}

	#[test]
	fn self_usage_is_a_loop() {
		let registry = registry([ ModuleManifest::new( "a", "a" ).providing( "codec", "x" ).using( "codec", "x" ) ]);
		match build_alldeps( &registry ) {
			Err( GraphError::LoopDetected( cycle )) => assert_eq!( Vec::from( cycle ), vec![ "a", "a" ]),
			other => panic!( "Expected loop, found: {:?}", other ),
		}
	}

	#[test]
	fn closures_are_computed_once() {
		let registry = registry([
			ModuleManifest::new( "a", "a" ).depending_on( "b" ),
			ModuleManifest::new( "b", "b" ),
		]);
		build_alldeps( &registry ).unwrap();
		registry.find( "b" ).unwrap().add_use( Capability::module( "a" ));
		build_alldeps( &registry ).unwrap();
		assert_eq!( alldeps( &registry, "a" ), vec![ "b" ]);
		assert!( alldeps( &registry, "b" ).is_empty() );
	}

}
