use mod_link::ModuleManifest ;
use crate::fixture_units::Harness ;

#[test]
fn lifecycle_dependencies_start_first() {

	let fixture = Harness::new()
		.module( ModuleManifest::new( "codec-g711", "c0de" ).providing( "codec", "g711" ))
		.module( ModuleManifest::new( "chan-sip", "51b0" ).using( "codec", "g711" ))
		.start( &[ "chan-sip" ]);

	assert_running!( fixture.loader, [ "chan-sip", "codec-g711" ]);
	assert_eq!( fixture.module( "chan-sip" ).alldeps().to_vec(), vec![ "codec-g711" ]);

	// The whole dependency is up before the dependent's unit is even opened.
	assert!( fixture.journal.position( "start:codec-g711" ) < fixture.journal.position( "open:chan-sip" ));
	assert_eq!( fixture.journal.of( "start" ), [ "codec-g711", "chan-sip" ]);

	let codec = fixture.module( "codec-g711" );
	let sip = fixture.module( "chan-sip" );
	assert!( sip.has_admin_user() );
	assert!( !codec.has_admin_user() );
	assert_eq!( fixture.loader.instance_refs( &sip ), 1 );
	assert_eq!( fixture.loader.instance_refs( &codec ), 1 );

}
