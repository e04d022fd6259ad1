use std::sync::{ Arc, Mutex };
use mod_link::{ ModuleManifest, ReloadResult };
use crate::fixture_units::{ Harness, UnitSpec };

#[test]
fn reload_in_progress() {

	let harness = Harness::new().module( ModuleManifest::new( "res-config", "cf" ));
	let slot = harness.loader_slot();
	let nested = Arc::new( Mutex::new( Vec::new() ));

	let fixture = harness.unit( "res-config", UnitSpec::new().reloadable().on_reload({
		let nested = Arc::clone( &nested );
		move || {
			let loader = slot.get().expect( "Loader not built" );
			nested.lock().unwrap().push( loader.reload( None ));
		}
	})).start( &[ "res-config" ]);

	assert_eq!( fixture.loader.reload( Some( &fixture.module( "res-config" ))), ReloadResult::Success );
	assert_eq!( *nested.lock().unwrap(), [ ReloadResult::InProgress ]);
	assert_eq!( fixture.journal.count( "reload:res-config" ), 1 );

}
