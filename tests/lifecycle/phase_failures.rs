use mod_link::{ LoadPhase, ModuleManifest };
use crate::fixture_units::{ Harness, UnitSpec };

#[test]
fn lifecycle_phase_failures() {

	let fixture = Harness::new()
		.module( ModuleManifest::new( "app-open", "01" ))
		.unit( "app-open", UnitSpec::new().failing_open() )
		.module( ModuleManifest::new( "app-silent", "02" ))
		.unit( "app-silent", UnitSpec::new().not_registering() )
		.module( ModuleManifest::new( "app-stale", "03" ))
		.unit( "app-stale", UnitSpec::new().with_checksum( "ff" ))
		.module( ModuleManifest::new( "app-init", "04" ))
		.unit( "app-init", UnitSpec::new().failing_init() )
		.module( ModuleManifest::new( "app-start", "05" ))
		.unit( "app-start", UnitSpec::new().failing_start() )
		.start( &[]);

	let cases = [
		( "app-open", LoadPhase::Open ),
		( "app-silent", LoadPhase::Register ),
		( "app-stale", LoadPhase::Register ),
		( "app-init", LoadPhase::Init ),
		( "app-start", LoadPhase::Start ),
	];

	for ( name, phase ) in cases {
		let module = fixture.module( name );
		match fixture.loader.load( &module ) {
			Err( err ) if err.failed_phase() == Some( phase ) => assert!( !err.is_transient() ),
			other => panic!( "Expected {phase} failure for {name}, found: {other:?}" ),
		}
		assert!( !fixture.loader.is_running( &module ));
		assert!( !module.has_admin_user() );
		assert!( module.instance().is_none() );
	}

	// Nothing is left behind: every opened unit is closed again, and only
	// the unit whose start failed after a successful init is stopped.
	assert!( fixture.loader.loaded().is_empty() );
	assert!( fixture.loader.running().is_empty() );
	assert_eq!( fixture.journal.of( "stop" ), [ "app-start" ]);
	assert_eq!( fixture.journal.of( "close" ), [ "app-silent", "app-stale", "app-init", "app-start" ]);

}
