//! Build manifests describing the modules that can be discovered on disk.

use std::path::Path ;
use pipe_trait::Pipe ;
use serde::{ Deserialize, Serialize };

use crate::Capability ;
use crate::config::{ ConfigError, read_document };



/// The build-time description of one discoverable module.
///
/// The checksum recorded here is what a unit must present when it registers;
/// a mismatch means the binary on disk is not the one the manifest was
/// generated from.
#[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize )]
#[serde( deny_unknown_fields )]
pub struct ModuleManifest {
	pub name: String,
	pub checksum: String,
	#[serde( default )] pub description: String,
	/// Lower values load earlier during startup.
	#[serde( default )] pub load_priority: i32,
	/// Keep the unit running until shutdown, whatever unload requests say.
	#[serde( default )] pub block_unload: bool,
	/// Open the unit with its symbols visible to later units.
	#[serde( default )] pub export_globals: bool,
	#[serde( default )] pub provides: Vec<Capability>,
	#[serde( default )] pub uses: Vec<Capability>,
}

impl ModuleManifest {

	pub fn new( name: impl Into<String>, checksum: impl Into<String> ) -> Self {
		Self {
			name: name.into(),
			checksum: checksum.into(),
			description: String::new(),
			load_priority: 0,
			block_unload: false,
			export_globals: false,
			provides: Vec::with_capacity( 0 ),
			uses: Vec::with_capacity( 0 ),
		}
	}

	pub fn with_description( mut self, description: impl Into<String> ) -> Self {
		self.description = description.into();
		self
	}

	pub fn with_load_priority( mut self, load_priority: i32 ) -> Self {
		self.load_priority = load_priority ;
		self
	}

	pub fn providing( mut self, kind: impl Into<String>, id: impl Into<String> ) -> Self {
		self.provides.push( Capability::new( kind, id ));
		self
	}

	pub fn using( mut self, kind: impl Into<String>, id: impl Into<String> ) -> Self {
		self.uses.push( Capability::new( kind, id ));
		self
	}

	/// Shorthand for using the implicit capability of module `name`.
	pub fn depending_on( self, name: impl Into<String> ) -> Self {
		self.using( Capability::MODULE_KIND, name )
	}

	pub fn with_block_unload( mut self ) -> Self {
		self.block_unload = true ;
		self
	}

	pub fn with_export_globals( mut self ) -> Self {
		self.export_globals = true ;
		self
	}

}

/// A manifest document: a list of `[[module]]` tables.
///
/// ```
/// use mod_link::ManifestSet ;
///
/// let set = ManifestSet::from_toml_str( r#"
/// 	[[module]]
/// 	name = "codec-g711"
/// 	checksum = "4f1c"
/// 	provides = [{ kind = "codec", id = "g711" }]
///
/// 	[[module]]
/// 	name = "chan-sip"
/// 	checksum = "9ab2"
/// 	uses = [{ kind = "codec", id = "g711" }]
/// "# ).unwrap();
/// assert_eq!( set.modules.len(), 2 );
/// ```
#[derive( Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize )]
pub struct ManifestSet {
	#[serde( rename = "module", default )]
	pub modules: Vec<ModuleManifest>,
}

impl ManifestSet {

	pub fn from_toml_str( source: &str ) -> Result<Self, ConfigError> {
		Ok( toml::from_str( source )? )
	}

	pub fn from_path( path: impl AsRef<Path> ) -> Result<Self, ConfigError> {
		read_document( path.as_ref() )?.pipe(| source | Self::from_toml_str( &source ))
	}

}

impl IntoIterator for ManifestSet {
	type Item = ModuleManifest ;
	type IntoIter = std::vec::IntoIter<ModuleManifest>;
	fn into_iter( self ) -> Self::IntoIter { self.modules.into_iter() }
}
