use mod_link::{ ForceLevel, ModuleManifest };
use crate::fixture_units::Harness ;

#[test]
fn disposer_soft_unload_keeps_admin_loads() {

	let fixture = Harness::new()
		.module( ModuleManifest::new( "codec-g711", "c0de" ).providing( "codec", "g711" ))
		.module( ModuleManifest::new( "chan-sip", "51b0" ).using( "codec", "g711" ))
		.start( &[ "chan-sip", "codec-g711" ]);
	let codec = fixture.module( "codec-g711" );
	assert!( codec.has_admin_user() );

	// chan-sip was loaded explicitly, so a soft request leaves it alone and
	// the codec keeps running for it.
	fixture.loader.unload( &codec, false );
	assert_running!( fixture.loader, [ "chan-sip", "codec-g711" ]);
	assert!( !codec.has_admin_user() );
	assert_eq!( fixture.loader.instance_refs( &codec ), 1 );

	fixture.loader.unload( &codec, ForceLevel::Firm );
	assert_running!( fixture.loader, []);
	assert_eq!( fixture.journal.of( "stop" ), [ "chan-sip", "codec-g711" ]);

}
