use mod_link::{ CompletionFilter, ModuleManifest, ModulesConfig };
use crate::fixture_units::{ Harness, UnitSpec };

#[test]
fn lifecycle_completion() {

	let fixture = Harness::new()
		.module( ModuleManifest::new( "codec-g711", "c0de" ).providing( "codec", "g711" ))
		.module( ModuleManifest::new( "chan-sip", "51b0" ).using( "codec", "g711" ))
		.unit( "chan-sip", UnitSpec::new().reloadable() )
		.module( ModuleManifest::new( "chan-iax", "1a" ))
		.module( ModuleManifest::new( "app-banned", "ba" ))
		.build();

	let warnings = fixture.init( &ModulesConfig {
		load: vec![ "chan-sip".to_string() ],
		neverload: vec![ "app-banned".to_string() ],
		..ModulesConfig::default()
	}).expect( "Failed to initialise" );
	assert_no_warnings!( warnings );

	let complete = | word: &str, filter | fixture.loader.complete( word, filter );

	assert_eq!( complete( "chan", CompletionFilter::All ), [ "chan-iax", "chan-sip" ]);
	assert_eq!( complete( "CHAN-S", CompletionFilter::All ), [ "chan-sip" ]);
	assert!( complete( "res", CompletionFilter::All ).is_empty() );
	assert_eq!( complete( "", CompletionFilter::AdminLoaded ), [ "chan-sip" ]);
	assert_eq!( complete( "", CompletionFilter::Loaded ), [ "chan-sip", "codec-g711" ]);
	assert_eq!( complete( "", CompletionFilter::Unloaded ), [ "app-banned", "chan-iax" ]);
	assert_eq!( complete( "", CompletionFilter::Reloadable ), [ "chan-sip" ]);
	assert_eq!( complete( "", CompletionFilter::CanLoad ), [ "chan-iax" ]);

}
