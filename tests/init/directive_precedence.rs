use mod_link::{ ModuleManifest, ModulesConfig };
use crate::fixture_units::Harness ;

#[test]
fn init_directive_precedence() {

	let fixture = Harness::new()
		.module( ModuleManifest::new( "app-a", "0a" ))
		.module( ModuleManifest::new( "app-b", "0b" ))
		.module( ModuleManifest::new( "app-c", "0c" ))
		.module( ModuleManifest::new( "app-d", "0d" ))
		.module( ModuleManifest::new( "app-e", "0e" ))
		.build();

	// require beats noload, neverload beats everything.
	let warnings = fixture.init( &ModulesConfig {
		autoload: true,
		load: vec![ "app-d".to_string() ],
		noload: vec![ "app-b".to_string(), "app-c".to_string() ],
		require: vec![ "app-b".to_string() ],
		neverload: vec![ "app-d".to_string() ],
		..ModulesConfig::default()
	}).expect( "Failed to initialise" );
	assert_no_warnings!( warnings );

	assert_running!( fixture.loader, [ "app-a", "app-b", "app-e" ]);
	assert!( fixture.module( "app-d" ).is_neverload() );
	assert_eq!( fixture.journal.count( "open:app-c" ), 0 );
	assert_eq!( fixture.journal.count( "open:app-d" ), 0 );

}
