use mod_link::{ InitError, ModuleManifest, ModulesConfig };
use crate::fixture_units::Harness ;

#[test]
fn init_require_neverload_conflict() {

	let fixture = Harness::new()
		.module( ModuleManifest::new( "app-a", "0a" ))
		.module( ModuleManifest::new( "res-crypto", "c7" ))
		.build();

	match fixture.init( &ModulesConfig {
		load: vec![ "app-a".to_string() ],
		require: vec![ "res-crypto".to_string() ],
		neverload: vec![ "res-crypto.so".to_string() ],
		..ModulesConfig::default()
	}) {
		Err( InitError::RequireNeverloadConflict( name )) => assert_eq!( name, "res-crypto" ),
		other => panic!( "Expected conflict, found: {other:?}" ),
	}

	assert!( fixture.journal.events().is_empty() );

}
