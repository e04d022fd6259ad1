//! Loader settings and the `modules.conf` directive set.
//!
//! Both documents are TOML. [`LoaderConfig`] describes the host: where units
//! live on disk and what a unit must present to be accepted.
//! [`ModulesConfig`] lists what to load at startup and is consumed once by
//! [`Loader::init`]( crate::Loader::init ).

use std::path::{ Path, PathBuf };
use std::sync::Once ;
use pipe_trait::Pipe ;
use serde::{ Deserialize, Serialize };
use thiserror::Error ;
use tracing::warn ;

use crate::Capability ;
use crate::registry::DigestVerifier ;



/// Errors raised while reading configuration or manifest documents.
#[derive( Error, Debug )]
pub enum ConfigError {
	#[error( "Failed to read '{path}': {source}" )] Io { path: PathBuf, #[source] source: std::io::Error },
	#[error( "Invalid TOML: {0}" )] Parse( #[from] toml::de::Error ),
	#[error( "Invalid key digest: {0}" )] InvalidDigest( #[from] hex::FromHexError ),
	#[error( "Key digest must be 32 bytes, found {0}" )] DigestLength( usize ),
}

pub(crate) fn read_document( path: &Path ) -> Result<String, ConfigError> {
	std::fs::read_to_string( path ).map_err(| source | ConfigError::Io { path: path.to_path_buf(), source })
}

/// Host-side settings of the loader.
#[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize )]
#[serde( default, deny_unknown_fields )]
pub struct LoaderConfig {
	/// Directory holding the loadable units.
	pub module_dir: PathBuf,
	/// File extension of loadable units.
	pub library_extension: String,
	/// Build-compatibility checksum of the host. Units presenting a
	/// different non-empty sum are rejected.
	pub build_options_sum: String,
	/// Hex-encoded BLAKE3 digest of the accepted identity key. Without one
	/// every unit is accepted.
	pub key_digest: Option<String>,
}

impl Default for LoaderConfig {
	fn default() -> Self {
		Self {
			module_dir: PathBuf::from( "modules" ),
			library_extension: "so".to_string(),
			build_options_sum: String::new(),
			key_digest: None,
		}
	}
}

impl LoaderConfig {

	pub fn from_toml_str( source: &str ) -> Result<Self, ConfigError> {
		Ok( toml::from_str( source )? )
	}

	pub fn from_path( path: impl AsRef<Path> ) -> Result<Self, ConfigError> {
		read_document( path.as_ref() )?.pipe(| source | Self::from_toml_str( &source ))
	}

	/// Where the unit of module `name` is expected on disk.
	pub fn module_path( &self, name: &str ) -> PathBuf {
		self.module_dir.join( format!( "{}.{}", name, self.library_extension ))
	}

	pub(crate) fn verifier( &self ) -> Result<Option<DigestVerifier>, ConfigError> {
		self.key_digest.as_deref().map( DigestVerifier::from_hex ).transpose()
	}

}

/// One `uses` directive: `module` additionally uses capability `kind:id`.
#[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize )]
#[serde( deny_unknown_fields )]
pub struct UseDirective {
	pub module: String,
	#[serde( default = "module_kind" )]
	pub kind: String,
	pub id: String,
}

fn module_kind() -> String { Capability::MODULE_KIND.to_string() }

impl UseDirective {

	pub fn new( module: impl Into<String>, kind: impl Into<String>, id: impl Into<String> ) -> Self {
		Self { module: module.into(), kind: kind.into(), id: id.into() }
	}

	/// The used capability. Module ids are normalised like module names.
	pub fn capability( &self ) -> Capability {
		match self.kind == Capability::MODULE_KIND {
			true => Capability::module( strip_extension( &self.id )),
			false => Capability::new( self.kind.clone(), self.id.clone() ),
		}
	}

}

/// The startup directive set.
///
/// Precedence, from strongest: `neverload`, `require`, `noload`, `load`.
/// Naming the same module under both `require` and `neverload` is fatal.
/// With `autoload` every known module that is not `noload` or `neverload`
/// is added to the load list.
#[derive( Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize )]
#[serde( default, deny_unknown_fields )]
pub struct ModulesConfig {
	pub autoload: bool,
	pub load: Vec<String>,
	pub noload: Vec<String>,
	pub require: Vec<String>,
	pub neverload: Vec<String>,
	pub uses: Vec<UseDirective>,
}

impl ModulesConfig {

	pub fn from_toml_str( source: &str ) -> Result<Self, ConfigError> {
		Ok( toml::from_str( source )? )
	}

	pub fn from_path( path: impl AsRef<Path> ) -> Result<Self, ConfigError> {
		read_document( path.as_ref() )?.pipe(| source | Self::from_toml_str( &source ))
	}

}

static SUFFIX_DEPRECATION: Once = Once::new();

/// Strips a trailing `.so` from a module name.
///
/// The suffix is still accepted for compatibility but deprecated; the first
/// use logs a warning.
pub fn strip_extension( name: &str ) -> &str {
	match name.strip_suffix( ".so" ) {
		Some( stripped ) => {
			SUFFIX_DEPRECATION.call_once(|| warn!( "Use of '.so' with module names is deprecated" ));
			stripped
		},
		None => name,
	}
}

#[cfg( test )]
mod tests {

	use super::* ;

	#[test]
	fn strip_extension_only_touches_suffix() {
		assert_eq!( strip_extension( "chan-sip.so" ), "chan-sip" );
		assert_eq!( strip_extension( "chan-sip" ), "chan-sip" );
		assert_eq!( strip_extension( "res.sorcery" ), "res.sorcery" );
	}

	#[test]
	fn modules_config_defaults_missing_lists() {
		let config = ModulesConfig::from_toml_str( "autoload = true\nnoload = [\"pbx-lua\"]" ).unwrap();
		assert!( config.autoload );
		assert_eq!( config.noload, vec![ "pbx-lua".to_string() ]);
		assert!( config.load.is_empty() && config.require.is_empty() && config.neverload.is_empty() );
	}

	#[test]
	fn modules_config_rejects_unknown_directive() {
		match ModulesConfig::from_toml_str( "preload = [\"chan-sip\"]" ) {
			Err( ConfigError::Parse( _ )) => {},
			other => panic!( "Expected parse error, found: {:?}", other ),
		}
	}

	#[test]
	fn use_directive_defaults_to_module_kind() {
		let config = ModulesConfig::from_toml_str( r#"
			[[uses]]
			module = "app-dial"
			id = "chan-sip.so"

			[[uses]]
			module = "app-dial"
			kind = "codec"
			id = "g711"
		"# ).unwrap();
		assert_eq!( config.uses[0].capability(), Capability::module( "chan-sip" ));
		assert_eq!( config.uses[1].capability(), Capability::new( "codec", "g711" ));
	}

	#[test]
	fn loader_config_builds_unit_path() {
		let config = LoaderConfig::from_toml_str( "module_dir = \"/usr/lib/pbx\"" ).unwrap();
		assert_eq!( config.module_path( "chan-sip" ), PathBuf::from( "/usr/lib/pbx/chan-sip.so" ));
	}

	#[test]
	fn loader_config_rejects_short_digest() {
		let config = LoaderConfig { key_digest: Some( "abcd".to_string() ), ..LoaderConfig::default() };
		match config.verifier() {
			Err( ConfigError::DigestLength( 2 )) => {},
			other => panic!( "Expected digest length error, found: {:?}", other.map(| v | v.is_some() )),
		}
	}

}
