use std::sync::{ Arc, Mutex };
use mod_link::{ ModuleManifest, ReloadResult };
use crate::fixture_units::{ Harness, UnitSpec };

#[test]
fn reload_stopping_module() {

	let harness = Harness::new()
		.module( ModuleManifest::new( "res-plain", "01" ))
		.module( ModuleManifest::new( "res-hot", "02" ));
	let slot = harness.loader_slot();
	let results = Arc::new( Mutex::new( Vec::new() ));

	// Each module asks for its own reload while it is stopping.
	let reload_self = | name: &'static str | {
		let ( slot, results ) = ( Arc::clone( &slot ), Arc::clone( &results ));
		move || {
			let loader = slot.get().expect( "Loader not built" );
			let module = loader.find( name ).expect( "Module not known" );
			results.lock().unwrap().push(( name, loader.reload( Some( &module ))));
		}
	};
	let fixture = harness
		.unit( "res-plain", UnitSpec::new().on_stop( reload_self( "res-plain" )))
		.unit( "res-hot", UnitSpec::new().reloadable().on_stop( reload_self( "res-hot" )))
		.start( &[ "res-plain", "res-hot" ]);

	fixture.loader.unload( &fixture.module( "res-plain" ), false );
	fixture.loader.unload( &fixture.module( "res-hot" ), false );

	// Missing support is reported before readiness.
	assert_eq!( *results.lock().unwrap(), [
		( "res-plain", ReloadResult::NotImplemented ),
		( "res-hot", ReloadResult::Uninitialized ),
	]);
	assert_eq!( fixture.journal.count( "reload:res-hot" ), 0 );
	assert_running!( fixture.loader, []);

}
