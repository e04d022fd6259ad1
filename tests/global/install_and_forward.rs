use mod_link::{ CompletionFilter, LoadError, ModuleManifest, ReloadResult, global };
use crate::fixture_units::{ Harness, UnitSpec };

#[test]
fn global_install_and_forward() {

	assert!( global::current().is_none() );
	assert!( global::module_find( "chan-sip" ).is_none() );
	assert_eq!( global::module_reload( None ), ReloadResult::Uninitialized );

	let fixture = Harness::new()
		.module( ModuleManifest::new( "codec-g711", "c0de" ).providing( "codec", "g711" ))
		.module( ModuleManifest::new( "chan-sip", "51b0" ).using( "codec", "g711" ))
		.unit( "chan-sip", UnitSpec::new().reloadable() )
		.start( &[]);
	assert!( global::install( fixture.loader.clone() ).is_none() );

	let sip = global::module_find( "chan-sip" ).expect( "Module not known" );
	global::module_load( &sip ).expect( "Failed to load" );
	assert!( global::module_is_running( &sip ));
	assert_eq!( global::module_instance_refs( &sip ), 1 );
	assert_eq!( global::module_complete( "c", CompletionFilter::Reloadable ), [ "chan-sip" ]);
	assert_eq!( global::module_reload( Some( &sip )), ReloadResult::Success );

	global::module_unload( &sip, false );
	assert!( !global::module_is_running( &sip ));
	assert_running!( fixture.loader, []);

	global::module_load( &sip ).expect( "Failed to load" );
	global::teardown();
	assert!( global::current().is_none() );
	assert!( fixture.loader.is_shutting_down() );
	assert_running!( fixture.loader, []);

	match global::module_load( &sip ) {
		Err( LoadError::NoLoader ) => {},
		other => panic!( "Expected no loader, found: {other:?}" ),
	}

}
