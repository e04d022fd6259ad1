use mod_link::{ GraphError, InitError, ModuleManifest, ModulesConfig };
use crate::fixture_units::Harness ;

#[test]
fn graph_unresolved_usage() {

	let fixture = Harness::new()
		.module( ModuleManifest::new( "codec-g711", "c0de" ).providing( "codec", "g711" ))
		.module( ModuleManifest::new( "chan-h323", "32" ).using( "codec", "g729" ))
		.build();

	match fixture.init( &ModulesConfig { autoload: true, ..ModulesConfig::default() }) {
		Err( InitError::Graph( GraphError::Unresolved { module, capability })) => {
			assert_eq!( module, "chan-h323" );
			assert_eq!( capability.kind(), "codec" );
			assert_eq!( capability.id(), "g729" );
		},
		other => panic!( "Expected unresolved usage, found: {other:?}" ),
	}

	// Startup aborted before anything was loaded.
	assert!( fixture.journal.events().is_empty() );

}
