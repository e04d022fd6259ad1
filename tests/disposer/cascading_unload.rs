use mod_link::ModuleManifest ;
use crate::fixture_units::Harness ;

#[test]
fn disposer_cascading_unload() {

	let fixture = Harness::new()
		.module( ModuleManifest::new( "codec-g711", "c0de" ).providing( "codec", "g711" ))
		.module( ModuleManifest::new( "chan-sip", "51b0" ).using( "codec", "g711" ))
		.start( &[ "chan-sip" ]);

	fixture.loader.unload( &fixture.module( "codec-g711" ), true );

	assert_running!( fixture.loader, []);
	assert!( fixture.loader.loaded().is_empty() );
	assert_eq!( fixture.journal.of( "stop" ), [ "chan-sip", "codec-g711" ]);
	assert_eq!( fixture.journal.of( "close" ), [ "chan-sip", "codec-g711" ]);
	assert!( !fixture.module( "chan-sip" ).has_admin_user() );

}
