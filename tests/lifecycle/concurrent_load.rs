use std::sync::{ Arc, Barrier };
use std::thread ;
use std::time::Duration ;
use mod_link::{ LoadError, Loader, Module, ModuleManifest };
use crate::fixture_units::{ Harness, UnitSpec };

const THREADS: usize = 8 ;

fn slow_start() -> UnitSpec {
	UnitSpec::new().on_start(|| thread::sleep( Duration::from_millis( 50 )))
}

/// Loads each module from its own thread, all released at once.
fn load_together( loader: &Loader, modules: Vec<Arc<Module>> ) -> Vec<Result<(), LoadError>> {
	let barrier = Arc::new( Barrier::new( modules.len() ));
	modules.into_iter()
		.map(| module | {
			let ( loader, barrier ) = ( loader.clone(), Arc::clone( &barrier ));
			thread::spawn( move || {
				barrier.wait();
				loader.load( &module )
			})
		})
		.collect::<Vec<_>>()
		.into_iter()
		.map(| handle | handle.join().expect( "Loading thread panicked" ))
		.collect()
}

#[test]
fn lifecycle_concurrent_load() {

	let fixture = Harness::new()
		.module( ModuleManifest::new( "res-odbc", "0d" ))
		.unit( "res-odbc", slow_start() )
		.start( &[]);
	let module = fixture.module( "res-odbc" );

	let results = load_together( &fixture.loader, vec![ Arc::clone( &module ); THREADS ]);

	assert!( results.iter().all( Result::is_ok ), "Concurrent loads failed: {results:?}" );
	assert_eq!( fixture.journal.count( "open:res-odbc" ), 1 );
	assert_eq!( fixture.journal.count( "init:res-odbc" ), 1 );
	assert_eq!( fixture.journal.count( "start:res-odbc" ), 1 );
	assert_running!( fixture.loader, [ "res-odbc" ]);
	assert_eq!( fixture.loader.instance_refs( &module ), 1 );

}

#[test]
fn lifecycle_concurrent_load_shared_dependency() {

	let fixture = Harness::new()
		.module( ModuleManifest::new( "res-crypto", "c1" ))
		.unit( "res-crypto", slow_start() )
		.module( ModuleManifest::new( "chan-pjsip", "c2" ).depending_on( "res-crypto" ))
		.module( ModuleManifest::new( "chan-iax2", "c3" ).depending_on( "res-crypto" ))
		.start( &[]);

	let results = load_together( &fixture.loader, vec![ fixture.module( "chan-pjsip" ), fixture.module( "chan-iax2" )]);

	assert!( results.iter().all( Result::is_ok ), "Concurrent loads failed: {results:?}" );
	assert_eq!( fixture.journal.count( "open:res-crypto" ), 1 );
	assert_eq!( fixture.journal.count( "start:res-crypto" ), 1 );
	assert_running!( fixture.loader, [ "chan-iax2", "chan-pjsip", "res-crypto" ]);

	// One dependency edge per dependent.
	assert_eq!( fixture.loader.instance_refs( &fixture.module( "res-crypto" )), 2 );

}
